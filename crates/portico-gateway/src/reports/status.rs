//! Status building from accumulated reports

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use portico_common::crd::{Condition, ConditionStatus, PolicyAncestorStatus, PolicyStatus};
use portico_common::ObjectSource;

use super::{ConditionSet, ReportMap, ReportedCondition};
use crate::gateway_api::{Gateway, GatewayStatus, ListenerStatus, RouteParentStatus, RouteStatus};
use crate::parent_ref;
use crate::query::RouteObject;
use crate::wellknown::{condition_type, reason};

/// Source of the current time for condition timestamps
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a fixed instant
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn positive(type_: &str, reason: &str) -> ReportedCondition {
    ReportedCondition::new(type_, ConditionStatus::True, reason, "")
}

/// Gateway defaults
fn gateway_defaults(set: &mut ConditionSet) {
    set.set_if_absent(positive(condition_type::ACCEPTED, reason::ACCEPTED));
    set.set_if_absent(positive(condition_type::PROGRAMMED, reason::PROGRAMMED));
}

/// Listener defaults
fn listener_defaults(set: &mut ConditionSet) {
    set.set_if_absent(positive(condition_type::ACCEPTED, reason::ACCEPTED));
    set.set_if_absent(ReportedCondition::new(
        condition_type::CONFLICTED,
        ConditionStatus::False,
        reason::NO_CONFLICTS,
        "",
    ));
    set.set_if_absent(positive(condition_type::RESOLVED_REFS, reason::RESOLVED_REFS));
    set.set_if_absent(positive(condition_type::PROGRAMMED, reason::PROGRAMMED));
}

/// Route parent defaults
fn route_parent_defaults(set: &mut ConditionSet) {
    set.set_if_absent(positive(condition_type::ACCEPTED, reason::ACCEPTED));
    set.set_if_absent(positive(condition_type::RESOLVED_REFS, reason::RESOLVED_REFS));
}

/// Turn reported conditions into timestamped ones, merging with `prior`
///
/// A condition keeps its prior `lastTransitionTime` when its status and
/// reason are unchanged; otherwise it transitions now.
pub(crate) fn merge_conditions(
    reported: &ConditionSet,
    prior: &[Condition],
    generation: Option<i64>,
    clock: &dyn Clock,
) -> Vec<Condition> {
    let now = clock.now();
    reported
        .iter()
        .map(|c| {
            let mut condition =
                Condition::new(c.type_.clone(), c.status, c.reason.clone(), c.message.clone())
                    .with_observed_generation(generation)
                    .with_transition_time(now);
            if let Some(old) = prior.iter().find(|p| p.type_ == c.type_) {
                if condition.same_transition(old) {
                    condition.last_transition_time = old.last_transition_time;
                }
            }
            condition
        })
        .collect()
}

impl ReportMap {
    /// Build the status of a Gateway
    ///
    /// Listener statuses follow the Gateway's listener order.
    pub fn build_gateway_status(&self, gw: &Gateway, clock: &dyn Clock) -> GatewayStatus {
        let namespace = gw.namespace().unwrap_or_default();
        let name = gw.name_any();
        let report = self.gateway_report(&namespace, &name);
        let prior = gw.status.clone().unwrap_or_default();
        let generation = gw.metadata.generation;

        let mut conditions = report.map(|r| r.conditions.clone()).unwrap_or_default();
        gateway_defaults(&mut conditions);

        let listeners = gw
            .spec
            .listeners
            .iter()
            .map(|listener| {
                let listener_report = report.and_then(|r| r.listeners.get(&listener.name));
                let mut set = listener_report
                    .map(|l| l.conditions.clone())
                    .unwrap_or_default();
                listener_defaults(&mut set);
                let prior_conditions = prior
                    .listeners
                    .iter()
                    .find(|l| l.name == listener.name)
                    .map(|l| l.conditions.as_slice())
                    .unwrap_or_default();
                ListenerStatus {
                    name: listener.name.clone(),
                    supported_kinds: listener_report
                        .map(|l| l.supported_kinds.clone())
                        .unwrap_or_else(|| parent_ref::allowed_kinds(listener)),
                    attached_routes: listener_report.map(|l| l.attached_routes).unwrap_or(0),
                    conditions: merge_conditions(&set, prior_conditions, generation, clock),
                }
            })
            .collect();

        GatewayStatus {
            conditions: merge_conditions(&conditions, &prior.conditions, generation, clock),
            listeners,
        }
    }

    /// Build the status of a route
    ///
    /// Parents follow the route's parent-ref order; any further reported
    /// parents (delegating routes) follow in key order. Parent entries
    /// written by other controllers are preserved. Returns `None` when this
    /// controller has nothing to say about the route.
    pub fn build_route_status(
        &self,
        route: &RouteObject,
        controller_name: &str,
        clock: &dyn Clock,
    ) -> Option<RouteStatus> {
        let report = self.route_report(&route.source())?;
        let namespace = route.namespace();
        let prior = match route {
            RouteObject::Http(r) => r.status.clone(),
            RouteObject::Tcp(r) => r.status.clone(),
        }
        .unwrap_or_default();

        let mut keys = Vec::new();
        for pr in route.parent_refs() {
            let key = parent_ref::normalize(pr, &namespace);
            if report.parents.contains_key(&key) && !keys.contains(&key) {
                keys.push(key);
            }
        }
        for key in report.parents.keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }

        let mut parents: Vec<RouteParentStatus> = prior
            .parents
            .iter()
            .filter(|p| p.controller_name != controller_name)
            .cloned()
            .collect();

        for key in keys {
            let mut set = report.parents.get(&key).cloned().unwrap_or_default();
            route_parent_defaults(&mut set);
            let prior_conditions = prior
                .parents
                .iter()
                .find(|p| {
                    p.controller_name == controller_name
                        && parent_ref::normalize(&p.parent_ref, &namespace) == key
                })
                .map(|p| p.conditions.as_slice())
                .unwrap_or_default();
            parents.push(RouteParentStatus {
                parent_ref: key,
                controller_name: controller_name.to_string(),
                conditions: merge_conditions(&set, prior_conditions, report.observed_generation, clock),
            });
        }

        Some(RouteStatus { parents })
    }

    /// Build the status of a policy from its ancestor reports
    pub fn build_policy_status(
        &self,
        policy: &ObjectSource,
        prior: Option<&PolicyStatus>,
        controller_name: &str,
        clock: &dyn Clock,
    ) -> Option<PolicyStatus> {
        let report = self.policy_report(policy)?;
        let empty = PolicyStatus::default();
        let prior = prior.unwrap_or(&empty);

        let mut ancestors: Vec<PolicyAncestorStatus> = prior
            .ancestors
            .iter()
            .filter(|a| a.controller_name != controller_name)
            .cloned()
            .collect();

        for (ancestor, set) in &report.ancestors {
            let mut set = set.clone();
            set.set_if_absent(positive(condition_type::ACCEPTED, reason::ACCEPTED));
            let prior_conditions = prior
                .ancestors
                .iter()
                .find(|a| a.controller_name == controller_name && &a.ancestor_ref == ancestor)
                .map(|a| a.conditions.as_slice())
                .unwrap_or_default();
            ancestors.push(PolicyAncestorStatus {
                ancestor_ref: ancestor.clone(),
                controller_name: controller_name.to_string(),
                conditions: merge_conditions(&set, prior_conditions, report.observed_generation, clock),
            });
        }

        Some(PolicyStatus { ancestors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway_api::{
        GatewaySpec, HttpRoute, HttpRouteSpec, Listener, ParentReference,
    };
    use crate::query::QueryError;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(hour: u32) -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap())
    }

    fn gateway(listeners: &[&str]) -> Gateway {
        let mut gw = Gateway::new(
            "gw",
            GatewaySpec {
                gateway_class_name: "portico".to_string(),
                listeners: listeners
                    .iter()
                    .map(|n| Listener {
                        name: n.to_string(),
                        hostname: None,
                        port: 80,
                        protocol: "HTTP".to_string(),
                        tls: None,
                        allowed_routes: None,
                    })
                    .collect(),
            },
        );
        gw.metadata.namespace = Some("default".to_string());
        gw.metadata.generation = Some(3);
        gw
    }

    fn find<'a>(conditions: &'a [Condition], type_: &str) -> &'a Condition {
        conditions
            .iter()
            .find(|c| c.type_ == type_)
            .expect("condition present")
    }

    #[test]
    fn test_gateway_positive_defaults() {
        let gw = gateway(&["b", "a"]);
        let reports = ReportMap::new();
        let status = reports.build_gateway_status(&gw, &at(1));

        assert_eq!(find(&status.conditions, "Accepted").status, ConditionStatus::True);
        assert_eq!(find(&status.conditions, "Programmed").reason, "Programmed");
        let names: Vec<&str> = status.listeners.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        let listener = &status.listeners[0];
        assert_eq!(listener.conditions.len(), 4);
        assert_eq!(find(&listener.conditions, "Conflicted").status, ConditionStatus::False);
        assert_eq!(find(&listener.conditions, "Conflicted").reason, "NoConflicts");
        assert_eq!(find(&listener.conditions, "Accepted").observed_generation, Some(3));
    }

    #[test]
    fn test_transition_time_kept_when_unchanged() {
        let mut gw = gateway(&["a"]);
        let reports = ReportMap::new();
        gw.status = Some(reports.build_gateway_status(&gw, &at(1)));

        let again = reports.build_gateway_status(&gw, &at(2));
        assert_eq!(find(&again.conditions, "Accepted").last_transition_time, at(1).0);

        let mut failing = ReportMap::new();
        failing.mark_pending(&gw, "cancelled");
        let changed = failing.build_gateway_status(&gw, &at(2));
        let accepted = find(&changed.conditions, "Accepted");
        assert_eq!(accepted.status, ConditionStatus::False);
        assert_eq!(accepted.reason, "Pending");
        assert_eq!(accepted.last_transition_time, at(2).0);
    }

    #[test]
    fn test_route_parents_follow_spec_order() {
        let mut r = HttpRoute::new(
            "r",
            HttpRouteSpec {
                parent_refs: vec![ParentReference::gateway("z"), ParentReference::gateway("a")],
                ..Default::default()
            },
        );
        r.metadata.namespace = Some("default".to_string());
        let route = RouteObject::Http(Arc::new(r));

        let mut reports = ReportMap::new();
        let report = reports.route(&route);
        report.parent_ref(&ParentReference::gateway("a"));
        report.set_error(&ParentReference::gateway("z"), &QueryError::NoMatchingParent);

        let status = reports
            .build_route_status(&route, "ctrl", &at(1))
            .expect("route status");
        let names: Vec<&str> = status.parents.iter().map(|p| p.parent_ref.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
        assert_eq!(find(&status.parents[0].conditions, "Accepted").status, ConditionStatus::False);
        assert_eq!(find(&status.parents[0].conditions, "ResolvedRefs").status, ConditionStatus::True);
        assert_eq!(find(&status.parents[1].conditions, "Accepted").status, ConditionStatus::True);
        assert_eq!(status.parents[0].parent_ref.namespace.as_deref(), Some("default"));
    }

    #[test]
    fn test_other_controllers_preserved() {
        let mut r = HttpRoute::new(
            "r",
            HttpRouteSpec {
                parent_refs: vec![ParentReference::gateway("gw")],
                ..Default::default()
            },
        );
        r.metadata.namespace = Some("default".to_string());
        r.status = Some(RouteStatus {
            parents: vec![RouteParentStatus {
                parent_ref: ParentReference::gateway("other"),
                controller_name: "someone-else".to_string(),
                conditions: vec![],
            }],
        });
        let route = RouteObject::Http(Arc::new(r));
        let mut reports = ReportMap::new();
        reports.route(&route).parent_ref(&ParentReference::gateway("gw"));

        let status = reports
            .build_route_status(&route, "ctrl", &at(1))
            .expect("route status");
        assert_eq!(status.parents.len(), 2);
        assert_eq!(status.parents[0].controller_name, "someone-else");
    }

    #[test]
    fn test_policy_status_defaults_to_accepted() {
        let policy = ObjectSource::new(
            portico_common::GroupKind::new("gateway.portico.dev", "RoutePolicy"),
            "default",
            "p",
        );
        let mut reports = ReportMap::new();
        reports
            .policy(&policy, Some(1))
            .ancestor(&ParentReference::gateway("gw"));
        let status = reports
            .build_policy_status(&policy, None, "ctrl", &at(1))
            .expect("policy status");
        assert_eq!(status.ancestors.len(), 1);
        assert_eq!(find(&status.ancestors[0].conditions, "Accepted").reason, "Accepted");
        assert!(reports
            .build_policy_status(&ObjectSource::new(policy.group_kind(), "default", "q"), None, "ctrl", &at(1))
            .is_none());
    }
}
