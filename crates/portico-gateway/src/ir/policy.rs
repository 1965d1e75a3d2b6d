//! Policy IR and attachment buckets

use std::collections::BTreeMap;

use portico_common::crd::{
    DirectResponseRouteSpec, HttpListenerPolicySpec, ListenerPolicySpec, RoutePolicySpec,
};
use portico_common::{GroupKind, ObjectSource};

use crate::gateway_api::ParentReference;

/// Where in the IR a policy can be attached
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentPoint {
    /// The whole Gateway
    Gateway,
    /// HTTP-class listeners
    HttpListener,
    /// Listeners of any class
    Listener,
    /// A virtual host
    VirtualHost,
    /// A route rule
    Route,
    /// A backend ref inside a route rule
    HttpBackendRef,
}

/// Typed policy content, one variant per policy kind
#[derive(Clone, Debug, PartialEq)]
pub enum Policy {
    /// Fixed response instead of a backend
    DirectResponse(DirectResponseRouteSpec),
    /// Route behaviour such as timeouts
    Route(RoutePolicySpec),
    /// HTTP connection manager behaviour
    HttpListener(HttpListenerPolicySpec),
    /// Listener behaviour such as buffer limits
    Listener(ListenerPolicySpec),
}

/// A policy object as seen by translation
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyIr {
    /// The policy object
    pub source: ObjectSource,
    /// Its generation, for status
    pub generation: Option<i64>,
    /// Typed content
    pub policy: Policy,
}

/// A policy attached at one point, with the ref it attached through
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyAtt {
    /// The policy
    pub policy: PolicyIr,
    /// The object the policy attached to, reported as its ancestor
    pub ancestor: Option<ParentReference>,
}

/// Policies attached to one IR node, grouped by kind
///
/// Within a kind, later entries take precedence over earlier ones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttachedPolicies {
    policies: BTreeMap<GroupKind, Vec<PolicyAtt>>,
}

impl AttachedPolicies {
    /// Append a policy under its kind
    pub fn push(&mut self, att: PolicyAtt) {
        self.policies
            .entry(att.policy.source.group_kind())
            .or_default()
            .push(att);
    }

    /// Append every policy of `other` after the ones already held
    pub fn extend(&mut self, other: &AttachedPolicies) {
        for atts in other.policies.values() {
            for att in atts {
                self.push(att.clone());
            }
        }
    }

    /// Policies of one kind
    pub fn get(&self, gk: &GroupKind) -> &[PolicyAtt] {
        self.policies.get(gk).map(Vec::as_slice).unwrap_or_default()
    }

    /// Kinds and their policies, in kind order
    pub fn iter(&self) -> impl Iterator<Item = (&GroupKind, &[PolicyAtt])> {
        self.policies.iter().map(|(gk, atts)| (gk, atts.as_slice()))
    }

    /// Check if nothing is attached
    pub fn is_empty(&self) -> bool {
        self.policies.values().all(Vec::is_empty)
    }
}
