//! Extension registry
//!
//! Extensions contribute three things, keyed so lookups never scan:
//!
//! - **Policies** by GroupKind: where they attach, how to find them for a
//!   target, and a [`ProxyTranslationPass`] that applies them at fixed hook
//!   points while the translator lowers the IR
//! - **Upstreams** by GroupKind: backend kinds other than Service
//! - **GatewayClasses** by name: the translator that turns a Gateway of that
//!   class into IR
//!
//! The built-in plugin set is returned by [`ExtensionRegistry::builtin`].

mod direct_response;
mod listener_policy;
mod route_policy;
mod upstream;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::Resource;
use portico_common::config::Settings;
use portico_common::{GroupKind, ObjectSource};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::builder::{Cancelled, PorticoClassTranslator};
use crate::gateway_api::Gateway;
use crate::ir::{
    AttachmentPoint, BackendObjectIr, BackendRefIr, FilterChainCommon, GatewayIr,
    HttpRouteRuleMatchIr, ListenerIr, Policy, PolicyAtt, PolicyIr, VirtualHostIr,
};
use crate::proxy::{self, Cluster, ClusterWeight, HttpFilter, NetworkFilter};
use crate::query::{GatewayQueries, QueryError};
use crate::reports::ReportMap;
use crate::store::{Snapshot, StoredKind, TargetsObjects};
use crate::wellknown::{condition_type, reason};

pub use direct_response::DirectResponsePlugin;
pub use listener_policy::{HttpListenerPolicyPlugin, ListenerPolicyPlugin, COMPRESSOR_FILTER};
pub use route_policy::{RoutePolicyPlugin, ROUTE_POLICY_CONFIG_KEY};
pub use upstream::UpstreamCrdPlugin;

// =============================================================================
// Errors
// =============================================================================

/// Errors a translation pass reports for one application of a policy
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PluginError {
    /// The policy sets an action on a route that already has one
    #[error("{message}")]
    IncompatibleFilters {
        /// What collided
        message: String,
    },

    /// The policy content cannot be applied
    #[error("{message}")]
    Invalid {
        /// What is wrong
        message: String,
    },

    /// The pass has no behaviour at this hook
    #[error("policy cannot be attached here")]
    NotAttachable,
}

impl PluginError {
    /// Shorthand for [`PluginError::Invalid`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Condition reason this error is reported with
    pub fn reason(&self) -> &'static str {
        match self {
            PluginError::IncompatibleFilters { .. } => reason::INCOMPATIBLE_FILTERS,
            PluginError::Invalid { .. } | PluginError::NotAttachable => reason::INVALID,
        }
    }
}

impl From<PluginError> for portico_common::Error {
    fn from(err: PluginError) -> Self {
        portico_common::Error::internal_with_context("plugin", err.to_string())
    }
}

/// Errors raised while assembling a registry
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two policy plugins share a name
    #[error("duplicate plugin name {0}")]
    DuplicateName(String),

    /// Two plugins claim the same policy kind
    #[error("policy kind {0} registered twice")]
    DuplicatePolicy(GroupKind),

    /// Two plugins claim the same backend kind
    #[error("upstream kind {0} registered twice")]
    DuplicateUpstream(GroupKind),

    /// Two plugins claim the same GatewayClass
    #[error("gateway class {0} registered twice")]
    DuplicateGatewayClass(String),
}

impl From<RegistryError> for portico_common::Error {
    fn from(err: RegistryError) -> Self {
        portico_common::Error::config(err.to_string())
    }
}

// =============================================================================
// Hook contexts
// =============================================================================

/// A listener-scope policy being applied to a listener
pub struct ListenerContext<'a> {
    /// Listener being lowered
    pub listener: &'a ListenerIr,
    /// The policy
    pub policy: &'a PolicyIr,
}

/// A policy being applied to a virtual host
pub struct VirtualHostContext<'a> {
    /// Filter chain the virtual host belongs to
    pub filter_chain: &'a FilterChainCommon,
    /// The virtual host
    pub vhost: &'a VirtualHostIr,
    /// The policy
    pub policy: &'a PolicyIr,
}

/// A policy being applied to one emitted route
pub struct RouteContext<'a> {
    /// Rule match the route came from
    pub rule: &'a HttpRouteRuleMatchIr,
    /// The policy
    pub policy: &'a PolicyIr,
}

/// A policy attached to one backend of a route
pub struct RouteBackendContext<'a> {
    /// The backend
    pub backend: &'a BackendRefIr,
    /// The policy
    pub policy: &'a PolicyIr,
}

/// Policies of one kind feeding a filter chain
pub struct FilterChainContext<'a> {
    /// The chain
    pub filter_chain: &'a FilterChainCommon,
    /// Policies of the pass's kind attached to the chain's listeners
    pub policies: &'a [PolicyAtt],
}

/// Position of an HTTP filter in the connection manager chain
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilterStage {
    /// Fault injection
    Fault,
    /// CORS
    Cors,
    /// Web application firewall
    Waf,
    /// Authentication
    AuthN,
    /// Authorization
    AuthZ,
    /// Rate limiting
    RateLimit,
    /// After the request is accepted
    Accepted,
    /// Outbound auth
    OutAuth,
    /// Just before the router
    Route,
}

/// An HTTP filter with its stage
#[derive(Clone, Debug, PartialEq)]
pub struct StagedHttpFilter {
    /// Where it goes
    pub stage: FilterStage,
    /// The filter
    pub filter: HttpFilter,
}

// =============================================================================
// Plugin traits
// =============================================================================

/// Per-translation state of a policy plugin
///
/// The translator creates one pass per policy kind for each Gateway and
/// calls the hooks in this order for every listener:
/// listener, virtual host, route (then route backend), filter chain
/// filters. [`resources_to_add`](Self::resources_to_add) runs once at the end.
pub trait ProxyTranslationPass: Send {
    /// Pass name, for logs
    fn name(&self) -> &str;

    /// Apply a listener-scope policy to the emitted listener
    fn apply_listener_plugin(
        &mut self,
        _ctx: &ListenerContext<'_>,
        _out: &mut proxy::Listener,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    /// Apply a policy to an emitted virtual host
    fn apply_vhost_plugin(
        &mut self,
        _ctx: &VirtualHostContext<'_>,
        _out: &mut proxy::VirtualHost,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    /// Apply a policy to an emitted route
    fn apply_for_route(
        &mut self,
        _ctx: &RouteContext<'_>,
        _out: &mut proxy::Route,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    /// Apply a backend-scope policy to a weighted cluster entry
    fn apply_for_route_backend(
        &mut self,
        _ctx: &RouteBackendContext<'_>,
        _out: &mut ClusterWeight,
    ) -> Result<(), PluginError> {
        Err(PluginError::NotAttachable)
    }

    /// HTTP filters for a connection manager
    fn http_filters(
        &mut self,
        _ctx: &FilterChainContext<'_>,
    ) -> Result<Vec<StagedHttpFilter>, PluginError> {
        Ok(Vec::new())
    }

    /// Upstream HTTP filters for a connection manager
    fn upstream_http_filters(
        &mut self,
        _ctx: &FilterChainContext<'_>,
    ) -> Result<Vec<StagedHttpFilter>, PluginError> {
        Ok(Vec::new())
    }

    /// Network filters placed before the connection manager
    fn network_filters(
        &mut self,
        _ctx: &FilterChainContext<'_>,
    ) -> Result<Vec<NetworkFilter>, PluginError> {
        Ok(Vec::new())
    }

    /// Clusters this pass needs in the output
    fn resources_to_add(&mut self) -> Vec<Cluster> {
        Vec::new()
    }
}

/// A policy kind
pub trait PolicyPlugin: Send + Sync {
    /// Unique plugin name
    fn name(&self) -> &'static str;

    /// Kind of the policy objects
    fn group_kind(&self) -> GroupKind;

    /// Points policies of this kind attach to through target refs
    fn attachment_points(&self) -> &'static [AttachmentPoint];

    /// Policies targeting an object, optionally one section of it
    ///
    /// With `section` unset, only refs without a section name match.
    fn policies_for(
        &self,
        _snapshot: &Snapshot,
        _target: &ObjectSource,
        _section: Option<&str>,
    ) -> Vec<PolicyIr> {
        Vec::new()
    }

    /// Look up a policy by name for an ExtensionRef filter
    ///
    /// Kinds that return `None` for everything cannot be used as extension
    /// refs.
    fn fetch_by_name(&self, _snapshot: &Snapshot, _namespace: &str, _name: &str) -> Option<PolicyIr> {
        None
    }

    /// Whether applying a policy of this kind installs a route action
    fn sets_action(&self) -> bool {
        false
    }

    /// Create the pass for one translation
    fn new_pass(&self, settings: &Settings) -> Box<dyn ProxyTranslationPass>;

    /// Apply a backend-scope policy to the backend's cluster
    fn process_upstream(&self, _policy: &PolicyIr, _out: &mut Cluster) -> Result<(), PluginError> {
        Ok(())
    }
}

/// A backend kind other than Service
pub trait UpstreamPlugin: Send + Sync {
    /// Plugin name
    fn name(&self) -> &'static str;

    /// Kind of the backend objects
    fn group_kind(&self) -> GroupKind;

    /// Resolve a backend ref already cleared by ReferenceGrant checks
    fn resolve(
        &self,
        snapshot: &Snapshot,
        namespace: &str,
        name: &str,
        port: Option<u16>,
    ) -> Result<BackendObjectIr, QueryError>;

    /// Fill in discovery and endpoints of the backend's cluster
    fn init_upstream(&self, backend: &BackendObjectIr, out: &mut Cluster) -> Result<(), PluginError>;
}

/// What a GatewayClass translator works from
pub struct ClassContext<'a> {
    /// Query engine over the snapshot being translated
    pub queries: &'a GatewayQueries<'a>,
    /// Namespace generated resources are written to
    pub write_namespace: &'a str,
    /// Checked between rules; a cancelled token aborts the translation
    pub cancel: &'a CancellationToken,
    /// Time certificates are validated against
    pub now: DateTime<Utc>,
}

/// Turns a Gateway of one GatewayClass into IR
pub trait GatewayClassTranslator: Send + Sync {
    /// Build the IR for `gw`, recording conditions in `reports`
    fn translate_proxy(
        &self,
        ctx: &ClassContext<'_>,
        gw: &Gateway,
        reports: &mut ReportMap,
    ) -> Result<GatewayIr, Cancelled>;
}

/// A bundle of contributions registered together
#[derive(Default)]
pub struct Plugin {
    /// Policy kinds
    pub policies: Vec<Arc<dyn PolicyPlugin>>,
    /// Backend kinds
    pub upstreams: Vec<Arc<dyn UpstreamPlugin>>,
    /// GatewayClass translators by class name
    pub gateway_classes: BTreeMap<String, Arc<dyn GatewayClassTranslator>>,
}

// =============================================================================
// Registry
// =============================================================================

/// Extension lookup tables
#[derive(Default)]
pub struct ExtensionRegistry {
    policies: BTreeMap<GroupKind, Arc<dyn PolicyPlugin>>,
    upstreams: BTreeMap<GroupKind, Arc<dyn UpstreamPlugin>>,
    gateway_classes: BTreeMap<String, Arc<dyn GatewayClassTranslator>>,
}

impl ExtensionRegistry {
    /// Build a registry, rejecting duplicate names, kinds and classes
    pub fn new(plugins: Vec<Plugin>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        let mut names = std::collections::BTreeSet::new();
        for plugin in plugins {
            for policy in plugin.policies {
                if !names.insert(policy.name()) {
                    return Err(RegistryError::DuplicateName(policy.name().to_string()));
                }
                let gk = policy.group_kind();
                if registry.policies.contains_key(&gk) {
                    return Err(RegistryError::DuplicatePolicy(gk));
                }
                registry.policies.insert(gk, policy);
            }
            for upstream in plugin.upstreams {
                let gk = upstream.group_kind();
                if registry.upstreams.contains_key(&gk) {
                    return Err(RegistryError::DuplicateUpstream(gk));
                }
                registry.upstreams.insert(gk, upstream);
            }
            for (class, translator) in plugin.gateway_classes {
                if registry.gateway_classes.contains_key(&class) {
                    return Err(RegistryError::DuplicateGatewayClass(class));
                }
                registry.gateway_classes.insert(class, translator);
            }
        }
        Ok(registry)
    }

    /// Registry with the built-in plugins and the `portico` GatewayClass
    pub fn builtin() -> Self {
        let policies: [Arc<dyn PolicyPlugin>; 4] = [
            Arc::new(DirectResponsePlugin),
            Arc::new(RoutePolicyPlugin),
            Arc::new(HttpListenerPolicyPlugin),
            Arc::new(ListenerPolicyPlugin),
        ];
        let upstreams: [Arc<dyn UpstreamPlugin>; 1] = [Arc::new(UpstreamCrdPlugin)];
        let mut gateway_classes: BTreeMap<String, Arc<dyn GatewayClassTranslator>> = BTreeMap::new();
        gateway_classes.insert(
            portico_common::DEFAULT_GATEWAY_CLASS.to_string(),
            Arc::new(PorticoClassTranslator),
        );
        Self {
            policies: policies.into_iter().map(|p| (p.group_kind(), p)).collect(),
            upstreams: upstreams.into_iter().map(|u| (u.group_kind(), u)).collect(),
            gateway_classes,
        }
    }

    /// Policy plugin for a kind
    pub fn policy_plugin(&self, gk: &GroupKind) -> Option<&Arc<dyn PolicyPlugin>> {
        self.policies.get(gk)
    }

    /// Every policy plugin, in kind order
    pub fn policy_plugins(&self) -> impl Iterator<Item = &Arc<dyn PolicyPlugin>> {
        self.policies.values()
    }

    /// Upstream plugin for a backend kind
    pub fn upstream_plugin(&self, gk: &GroupKind) -> Option<&Arc<dyn UpstreamPlugin>> {
        self.upstreams.get(gk)
    }

    /// Translator for a GatewayClass
    pub fn gateway_class(&self, name: &str) -> Option<&Arc<dyn GatewayClassTranslator>> {
        self.gateway_classes.get(name)
    }
}

// =============================================================================
// Shared helpers for built-in policy kinds
// =============================================================================

/// Wrap a stored policy object
pub(crate) fn policy_ir<P: StoredKind>(obj: &P, policy: Policy) -> PolicyIr {
    PolicyIr {
        source: ObjectSource::from_resource(obj),
        generation: obj.meta().generation,
        policy,
    }
}

/// Policies of kind `P` whose target refs name `target` and `section`
pub(crate) fn targeting<P: TargetsObjects>(
    snapshot: &Snapshot,
    target: &ObjectSource,
    section: Option<&str>,
    convert: impl Fn(&P) -> Policy,
) -> Vec<PolicyIr> {
    snapshot
        .policies_targeting::<P>(target)
        .into_iter()
        .filter(|p| {
            p.target_refs().iter().any(|r| {
                r.name == target.name
                    && r.kind == target.kind
                    && r.section_name.as_deref() == section
            })
        })
        .map(|p| policy_ir(p.as_ref(), convert(&p)))
        .collect()
}

/// Look a policy of kind `P` up by name
pub(crate) fn by_name<P: StoredKind>(
    snapshot: &Snapshot,
    namespace: &str,
    name: &str,
    convert: impl Fn(&P) -> Policy,
) -> Option<PolicyIr> {
    snapshot
        .get::<P>(namespace, name)
        .map(|p| policy_ir(p.as_ref(), convert(p)))
}

/// Record a pass outcome on the policy's ancestor, if it has one
///
/// A policy applies at several hooks per ancestor; once one application
/// failed, later successes do not clear it.
pub(crate) fn report_policy(reports: &mut ReportMap, att: &PolicyAtt, result: &Result<(), PluginError>) {
    let Some(ancestor) = &att.ancestor else {
        return;
    };
    let conditions = reports
        .policy(&att.policy.source, att.policy.generation)
        .ancestor(ancestor);
    match result {
        Ok(()) => conditions.set_if_absent(crate::reports::ReportedCondition::new(
            condition_type::ACCEPTED,
            portico_common::crd::ConditionStatus::True,
            reason::ACCEPTED,
            "",
        )),
        Err(err) => conditions.set(crate::reports::ReportedCondition::new(
            condition_type::ACCEPTED,
            portico_common::crd::ConditionStatus::False,
            reason::INVALID,
            err.to_string(),
        )),
    }
}
