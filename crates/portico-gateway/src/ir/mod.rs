//! Intermediate representation between Gateway API resources and proxy config
//!
//! The builder produces a [`GatewayIr`]: listeners merged by port, each with
//! HTTP and TCP filter chains, HTTP chains holding virtual hosts whose routes
//! are one entry per `HTTPRouteMatch`. Policies hang off the node they
//! attach to. The translator lowers this tree without going back to the
//! snapshot.

mod backend;
mod policy;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use portico_common::ObjectSource;

use crate::gateway_api::{HttpRoute, HttpRouteFilter, HttpRouteMatch, ParentReference, TcpRoute};
use crate::tls::TlsBundle;

pub use backend::{BackendObjectIr, UpstreamIr};
pub use policy::{AttachedPolicies, AttachmentPoint, Policy, PolicyAtt, PolicyIr};

/// Translated Gateway
#[derive(Clone, Debug, Default)]
pub struct GatewayIr {
    /// The Gateway
    pub source: Option<ObjectSource>,
    /// Listeners, one per translated port, in first-seen order
    pub listeners: Vec<ListenerIr>,
    /// Policies attached to the Gateway
    pub attached_policies: AttachedPolicies,
}

/// Listener bound to one translated port
#[derive(Clone, Debug, Default)]
pub struct ListenerIr {
    /// `~`-joined names of the Gateway listeners merged into this one
    pub name: String,
    /// Address to bind
    pub bind_address: String,
    /// Translated port
    pub bind_port: u16,
    /// Names of the Gateway listeners merged into this one, in spec order
    pub gateway_listeners: Vec<String>,
    /// HTTP and HTTPS filter chains
    pub http_filter_chains: Vec<HttpFilterChainIr>,
    /// TCP and TLS passthrough filter chains
    pub tcp_filter_chains: Vec<TcpFilterChainIr>,
    /// Policies attached to the listener
    pub attached_policies: AttachedPolicies,
}

/// Fields every filter chain has
#[derive(Clone, Debug, Default)]
pub struct FilterChainCommon {
    /// Filter chain name
    pub name: String,
    /// SNI server names the chain matches, empty for any
    pub server_names: Vec<String>,
    /// Terminating TLS material
    pub tls: Option<TlsBundle>,
}

/// HTTP connection manager filter chain
#[derive(Clone, Debug, Default)]
pub struct HttpFilterChainIr {
    /// Name, SNI and TLS
    pub common: FilterChainCommon,
    /// Virtual hosts sorted by hostname specificity
    pub vhosts: Vec<VirtualHostIr>,
    /// Policies from the Gateway listeners feeding this chain
    pub attached_policies: AttachedPolicies,
}

/// TCP proxy filter chain for one Gateway listener
#[derive(Clone, Debug, Default)]
pub struct TcpFilterChainIr {
    /// Name, SNI and TLS
    pub common: FilterChainCommon,
    /// The route feeding the chain
    pub route: Option<Arc<TcpRoute>>,
    /// Weighted backends
    pub backends: Vec<BackendRefIr>,
}

/// Virtual host: routes sharing a hostname
#[derive(Clone, Debug, Default)]
pub struct VirtualHostIr {
    /// Sanitized name
    pub name: String,
    /// Hostname, `*` for any
    pub hostname: String,
    /// Routes in match order
    pub rules: Vec<HttpRouteRuleMatchIr>,
    /// Policies attached to the virtual host
    pub attached_policies: AttachedPolicies,
}

/// Kind of a rule's path match, most specific first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathKind {
    /// Exact path
    Exact,
    /// Prefix that only matches whole segments
    PathSeparatedPrefix,
    /// Plain prefix
    Prefix,
    /// Regular expression
    Regex,
}

/// One `HTTPRouteMatch` of one rule, with everything needed to emit a route
#[derive(Clone, Debug)]
pub struct HttpRouteRuleMatchIr {
    /// Route that owns the rule
    pub route: Arc<HttpRoute>,
    /// Ref to report route conditions against
    pub parent_ref: ParentReference,
    /// Rule name, if set
    pub rule_name: Option<String>,
    /// Rule index within its route
    pub rule_index: usize,
    /// Match index within its rule
    pub match_index: usize,
    /// The match
    pub match_: HttpRouteMatch,
    /// Built-in rule filters
    pub filters: Vec<HttpRouteFilter>,
    /// Backends the rule forwards to
    pub backends: Vec<BackendRefIr>,
    /// Whether some backend ref of the rule was dropped as unusable
    pub has_unusable_backends: bool,
    /// Policies attached to the rule
    pub attached_policies: AttachedPolicies,
    /// Policies named by ExtensionRef filters; these win over attached ones
    pub extension_refs: AttachedPolicies,
    /// Extension ref errors, each forcing a 500 response
    pub extension_ref_errors: Vec<String>,
    /// Route creation time, for ordering
    pub created_at: Option<DateTime<Utc>>,
}

impl HttpRouteRuleMatchIr {
    /// Path match kind and value, defaulting to prefix `/`
    pub fn path(&self) -> (PathKind, String) {
        path_of(&self.match_)
    }

    /// Object source of the owning route
    pub fn route_source(&self) -> ObjectSource {
        ObjectSource::from_resource(self.route.as_ref())
    }
}

/// Path match kind and value of an `HTTPRouteMatch`, defaulting to prefix `/`
pub fn path_of(m: &HttpRouteMatch) -> (PathKind, String) {
    use crate::gateway_api::PathMatchType;

    let value = m
        .path
        .as_ref()
        .and_then(|p| p.value.clone())
        .unwrap_or_else(|| "/".to_string());
    let type_ = m.path.as_ref().and_then(|p| p.type_).unwrap_or_default();
    let kind = match type_ {
        PathMatchType::Exact => PathKind::Exact,
        PathMatchType::RegularExpression => PathKind::Regex,
        PathMatchType::PathPrefix if is_path_separated_prefix(&value) => {
            PathKind::PathSeparatedPrefix
        }
        PathMatchType::PathPrefix => PathKind::Prefix,
    };
    (kind, value)
}

/// Whether a prefix is emitted as a path-separated prefix
///
/// Equivalent to `^[^?#]+[^?#/]$`: no query or fragment characters and no
/// trailing slash.
pub fn is_path_separated_prefix(value: &str) -> bool {
    value.chars().count() >= 2
        && !value.contains(['?', '#'])
        && !value.ends_with('/')
}

/// A weighted backend of a rule
#[derive(Clone, Debug, Default)]
pub struct BackendRefIr {
    /// Cluster to send traffic to
    pub cluster_name: String,
    /// Resolved backend; `None` when it failed and traffic goes to the
    /// blackhole cluster
    pub backend: Option<BackendObjectIr>,
    /// Weight, default 1
    pub weight: u32,
    /// Backend level filters
    pub filters: Vec<HttpRouteFilter>,
    /// Policies attached to the backend ref
    pub attached_policies: AttachedPolicies,
}
