//! Status report accumulation
//!
//! Translation records conditions into a [`ReportMap`] as it goes: one
//! entry per Gateway (with its listeners), per route parent ref and per
//! policy ancestor. Only conditions that deviate from the positive
//! defaults need to be recorded; [`status`] fills the rest in when it builds
//! the Gateway API status blocks.

mod status;

use std::collections::BTreeMap;

use kube::ResourceExt;
use portico_common::crd::ConditionStatus;
use portico_common::ObjectSource;

use crate::gateway_api::{Gateway, ParentReference, RouteGroupKind};
use crate::parent_ref;
use crate::query::{QueryError, RouteObject};
use crate::wellknown::{condition_type, reason};
use crate::QualifiedName;

pub use status::{Clock, FixedClock, SystemClock};

/// A condition as reported, before timestamps are assigned
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportedCondition {
    /// Condition type
    pub type_: String,
    /// Condition status
    pub status: ConditionStatus,
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable message
    pub message: String,
}

impl ReportedCondition {
    /// Create a condition
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Conditions keyed by type; setting a type again replaces it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConditionSet {
    conditions: Vec<ReportedCondition>,
}

impl ConditionSet {
    /// Record a condition, replacing any previous one of the same type
    pub fn set(&mut self, condition: ReportedCondition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }

    /// Record a condition only if none of its type exists yet
    pub fn set_if_absent(&mut self, condition: ReportedCondition) {
        if self.get(&condition.type_).is_none() {
            self.conditions.push(condition);
        }
    }

    /// Condition of a type, if recorded
    pub fn get(&self, type_: &str) -> Option<&ReportedCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Conditions in recording order
    pub fn iter(&self) -> impl Iterator<Item = &ReportedCondition> {
        self.conditions.iter()
    }

    /// Number of conditions
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Check if no conditions were recorded
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// Report for one Gateway
#[derive(Clone, Debug, Default)]
pub struct GatewayReport {
    /// Gateway level conditions
    pub conditions: ConditionSet,
    /// Listener reports keyed by listener name
    pub listeners: BTreeMap<String, ListenerReport>,
    /// Generation the report was computed from
    pub observed_generation: Option<i64>,
}

impl GatewayReport {
    /// Record a Gateway level condition
    pub fn set_condition(&mut self, condition: ReportedCondition) {
        self.conditions.set(condition);
    }

    /// Report for a listener, created on first use
    pub fn listener(&mut self, name: &str) -> &mut ListenerReport {
        self.listeners.entry(name.to_string()).or_default()
    }
}

/// Report for one Gateway listener
#[derive(Clone, Debug, Default)]
pub struct ListenerReport {
    /// Listener conditions
    pub conditions: ConditionSet,
    /// Number of routes attached
    pub attached_routes: i32,
    /// Route kinds the listener accepts
    pub supported_kinds: Vec<RouteGroupKind>,
}

impl ListenerReport {
    /// Record a listener condition
    pub fn set_condition(&mut self, condition: ReportedCondition) {
        self.conditions.set(condition);
    }

    /// Mark the listener as rejected with `reason`
    ///
    /// A rejected listener is neither accepted nor programmed.
    pub fn reject(&mut self, reason: &str, message: impl Into<String>) {
        let message = message.into();
        self.set_condition(ReportedCondition::new(
            condition_type::ACCEPTED,
            ConditionStatus::False,
            reason,
            message.clone(),
        ));
        self.set_condition(ReportedCondition::new(
            condition_type::PROGRAMMED,
            ConditionStatus::False,
            reason::INVALID,
            message,
        ));
    }
}

/// Report for one route, keyed by normalized parent ref
#[derive(Clone, Debug, Default)]
pub struct RouteReport {
    namespace: String,
    /// Generation the report was computed from
    pub observed_generation: Option<i64>,
    /// Parent ref reports keyed by normalized parent ref
    pub parents: BTreeMap<ParentReference, ConditionSet>,
}

impl RouteReport {
    /// Conditions for a parent ref, created on first use
    pub fn parent_ref(&mut self, parent_ref: &ParentReference) -> &mut ConditionSet {
        let key = parent_ref::normalize(parent_ref, &self.namespace);
        self.parents.entry(key).or_default()
    }

    /// Record a condition for a parent ref
    pub fn set_condition(&mut self, parent_ref: &ParentReference, condition: ReportedCondition) {
        self.parent_ref(parent_ref).set(condition);
    }

    /// Record a query error against a parent ref under its reason
    ///
    /// Attachment errors become `Accepted=False`; every other error becomes
    /// `ResolvedRefs=False`.
    pub fn set_error(&mut self, parent_ref: &ParentReference, err: &QueryError) {
        let type_ = if err.is_attachment_error() {
            condition_type::ACCEPTED
        } else {
            condition_type::RESOLVED_REFS
        };
        self.set_condition(
            parent_ref,
            ReportedCondition::new(type_, ConditionStatus::False, err.reason(), err.to_string()),
        );
    }

    /// Conditions recorded for a parent ref
    pub fn get(&self, parent_ref: &ParentReference) -> Option<&ConditionSet> {
        self.parents.get(&parent_ref::normalize(parent_ref, &self.namespace))
    }
}

/// Report for one policy, keyed by ancestor ref
#[derive(Clone, Debug, Default)]
pub struct PolicyReport {
    /// Generation the report was computed from
    pub observed_generation: Option<i64>,
    /// Ancestor conditions keyed by ancestor ref
    pub ancestors: BTreeMap<ParentReference, ConditionSet>,
}

impl PolicyReport {
    /// Conditions for an ancestor, created on first use
    pub fn ancestor(&mut self, ancestor: &ParentReference) -> &mut ConditionSet {
        self.ancestors.entry(ancestor.clone()).or_default()
    }
}

/// Accumulated reports for one translation
#[derive(Clone, Debug, Default)]
pub struct ReportMap {
    gateways: BTreeMap<QualifiedName, GatewayReport>,
    routes: BTreeMap<ObjectSource, RouteReport>,
    policies: BTreeMap<ObjectSource, PolicyReport>,
}

impl ReportMap {
    /// Create an empty report map
    pub fn new() -> Self {
        Self::default()
    }

    /// Report for a Gateway, created on first use
    pub fn gateway(&mut self, gw: &Gateway) -> &mut GatewayReport {
        let key = (gw.namespace().unwrap_or_default(), gw.name_any());
        let report = self.gateways.entry(key).or_default();
        report.observed_generation = gw.metadata.generation;
        report
    }

    /// Report for a route, created on first use
    pub fn route(&mut self, route: &RouteObject) -> &mut RouteReport {
        let report = self.routes.entry(route.source()).or_insert_with(|| RouteReport {
            namespace: route.namespace(),
            ..Default::default()
        });
        report.observed_generation = route.generation();
        report
    }

    /// Report for a policy, created on first use
    pub fn policy(&mut self, policy: &ObjectSource, generation: Option<i64>) -> &mut PolicyReport {
        let report = self.policies.entry(policy.clone()).or_default();
        report.observed_generation = generation;
        report
    }

    /// Mark a Gateway whose translation did not finish
    pub fn mark_pending(&mut self, gw: &Gateway, message: impl Into<String>) {
        let message = message.into();
        let report = self.gateway(gw);
        report.set_condition(ReportedCondition::new(
            condition_type::ACCEPTED,
            ConditionStatus::False,
            reason::PENDING,
            message.clone(),
        ));
        report.set_condition(ReportedCondition::new(
            condition_type::PROGRAMMED,
            ConditionStatus::False,
            reason::PENDING,
            message,
        ));
    }

    /// Recorded Gateway report
    pub fn gateway_report(&self, namespace: &str, name: &str) -> Option<&GatewayReport> {
        self.gateways.get(&(namespace.to_string(), name.to_string()))
    }

    /// Recorded route report
    pub fn route_report(&self, route: &ObjectSource) -> Option<&RouteReport> {
        self.routes.get(route)
    }

    /// Recorded policy report
    pub fn policy_report(&self, policy: &ObjectSource) -> Option<&PolicyReport> {
        self.policies.get(policy)
    }

    /// Every route with a report
    pub fn reported_routes(&self) -> impl Iterator<Item = &ObjectSource> {
        self.routes.keys()
    }

    /// Every policy with a report
    pub fn reported_policies(&self) -> impl Iterator<Item = &ObjectSource> {
        self.policies.keys()
    }

    /// Merge another report map into this one; `other` wins per condition type
    pub fn merge(&mut self, other: ReportMap) {
        for (key, report) in other.gateways {
            let mine = self.gateways.entry(key).or_default();
            mine.observed_generation = report.observed_generation;
            for c in report.conditions.iter() {
                mine.conditions.set(c.clone());
            }
            for (name, listener) in report.listeners {
                let l = mine.listeners.entry(name).or_default();
                for c in listener.conditions.iter() {
                    l.conditions.set(c.clone());
                }
                l.attached_routes = listener.attached_routes;
                l.supported_kinds = listener.supported_kinds;
            }
        }
        for (key, report) in other.routes {
            let mine = self.routes.entry(key).or_insert_with(|| RouteReport {
                namespace: report.namespace.clone(),
                ..Default::default()
            });
            mine.observed_generation = report.observed_generation;
            for (pr, conds) in report.parents {
                let set = mine.parents.entry(pr).or_default();
                for c in conds.iter() {
                    set.set(c.clone());
                }
            }
        }
        for (key, report) in other.policies {
            let mine = self.policies.entry(key).or_default();
            mine.observed_generation = report.observed_generation;
            for (ancestor, conds) in report.ancestors {
                let set = mine.ancestors.entry(ancestor).or_default();
                for c in conds.iter() {
                    set.set(c.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway_api::{HttpRoute, HttpRouteSpec};
    use std::sync::Arc;

    fn route() -> RouteObject {
        let mut r = HttpRoute::new("r", HttpRouteSpec::default());
        r.metadata.namespace = Some("default".to_string());
        RouteObject::Http(Arc::new(r))
    }

    #[test]
    fn test_set_replaces_same_type() {
        let mut set = ConditionSet::default();
        set.set(ReportedCondition::new("Accepted", ConditionStatus::True, "Accepted", ""));
        set.set(ReportedCondition::new("Accepted", ConditionStatus::False, "Pending", ""));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("Accepted").map(|c| c.reason.as_str()), Some("Pending"));

        set.set_if_absent(ReportedCondition::new("Accepted", ConditionStatus::True, "Accepted", ""));
        assert_eq!(set.get("Accepted").map(|c| c.status), Some(ConditionStatus::False));
    }

    #[test]
    fn test_parent_refs_normalized() {
        let mut reports = ReportMap::new();
        let r = route();
        reports
            .route(&r)
            .set_error(&ParentReference::gateway("gw"), &QueryError::NoMatchingParent);

        let explicit = ParentReference {
            namespace: Some("default".to_string()),
            ..ParentReference::gateway("gw")
        };
        let report = reports.route_report(&r.source()).expect("route report");
        let conds = report.get(&explicit).expect("normalized key");
        let accepted = conds.get("Accepted").expect("accepted");
        assert_eq!(accepted.status, ConditionStatus::False);
        assert_eq!(accepted.reason, "NoMatchingParent");
    }

    #[test]
    fn test_reference_errors_go_to_resolved_refs() {
        let mut reports = ReportMap::new();
        let r = route();
        reports.route(&r).set_error(
            &ParentReference::gateway("gw"),
            &QueryError::NotFound { target: "x".into() },
        );
        let report = reports.route_report(&r.source()).expect("route report");
        let conds = report.get(&ParentReference::gateway("gw")).expect("parent");
        assert!(conds.get("Accepted").is_none());
        assert_eq!(
            conds.get("ResolvedRefs").map(|c| c.reason.as_str()),
            Some("BackendNotFound")
        );
    }
}
