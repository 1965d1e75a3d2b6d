//! Proxy configuration tree
//!
//! The translator's output, shaped after the proxy's xDS resources and
//! serialized with snake_case field names. Only the fields translation sets
//! are modelled.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Listeners
// =============================================================================

/// Every resource produced for one Gateway
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyResources {
    /// Listeners, one per translated port
    pub listeners: Vec<Listener>,
    /// Route configurations, one per HTTP filter chain
    pub route_configs: Vec<RouteConfiguration>,
    /// Clusters, sorted by name
    pub clusters: Vec<Cluster>,
}

/// Bound socket
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketAddress {
    /// Address to bind
    pub address: String,
    /// Port to bind
    pub port_value: u16,
}

/// A listener and its filter chains
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    /// Name
    pub name: String,
    /// Bind address
    pub address: SocketAddress,
    /// Filter chains
    pub filter_chains: Vec<FilterChain>,
    /// Listener filters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listener_filters: Vec<ListenerFilter>,
    /// Per connection buffer limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_connection_buffer_limit_bytes: Option<u32>,
}

/// A listener filter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerFilter {
    /// Filter name
    pub name: String,
}

/// Name of the TLS inspector listener filter
pub const TLS_INSPECTOR: &str = "envoy.filters.listener.tls_inspector";

/// Filter chain match criteria
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterChainMatch {
    /// SNI server names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_names: Vec<String>,
}

/// A filter chain
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterChain {
    /// Name
    pub name: String,
    /// Match criteria; `None` matches everything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_chain_match: Option<FilterChainMatch>,
    /// Network filters, terminal filter last
    pub filters: Vec<NetworkFilter>,
    /// Downstream TLS context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_socket: Option<DownstreamTlsContext>,
}

/// Downstream TLS termination settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamTlsContext {
    /// Certificate chain PEM
    pub certificate_chain: String,
    /// Private key PEM
    pub private_key: String,
    /// Trusted CA PEM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_context: Option<String>,
    /// DER OCSP staple
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocsp_staple: Option<Vec<u8>>,
    /// `LENIENT_STAPLING`, `STRICT_STAPLING` or `MUST_STAPLE`
    pub ocsp_staple_policy: String,
}

/// A network filter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkFilter {
    /// Filter name
    pub name: String,
    /// Typed configuration
    pub config: NetworkFilterConfig,
}

/// Network filter configurations
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkFilterConfig {
    /// HTTP connection manager
    HttpConnectionManager(HttpConnectionManager),
    /// TCP proxy
    TcpProxy(TcpProxy),
    /// Extension supplied configuration
    Opaque(serde_json::Value),
}

/// Name of the HTTP connection manager network filter
pub const HTTP_CONNECTION_MANAGER: &str = "envoy.filters.network.http_connection_manager";
/// Name of the TCP proxy network filter
pub const TCP_PROXY: &str = "envoy.filters.network.tcp_proxy";
/// Name of the router HTTP filter
pub const ROUTER: &str = "envoy.filters.http.router";
/// Name of the upstream codec HTTP filter
pub const UPSTREAM_CODEC: &str = "envoy.filters.http.upstream_codec";

/// HTTP connection manager
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpConnectionManager {
    /// Stats prefix
    pub stat_prefix: String,
    /// Normalize request paths
    pub normalize_path: bool,
    /// Name of the route configuration fetched over RDS
    pub route_config_name: String,
    /// HTTP filters, router last
    pub http_filters: Vec<HttpFilter>,
    /// Upstream HTTP filters, upstream codec last
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstream_http_filters: Vec<HttpFilter>,
}

/// An HTTP filter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpFilter {
    /// Filter name
    pub name: String,
    /// Typed configuration
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

impl HttpFilter {
    /// Filter without configuration
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: serde_json::Value::Null,
        }
    }
}

/// TCP proxy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TcpProxy {
    /// Stats prefix
    pub stat_prefix: String,
    /// Where connections go
    pub cluster: ClusterSpecifier,
}

// =============================================================================
// Routes
// =============================================================================

/// Route configuration served over RDS
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteConfiguration {
    /// Name, equal to the filter chain's
    pub name: String,
    /// Virtual hosts
    pub virtual_hosts: Vec<VirtualHost>,
    /// Ignore the port when matching the Host header
    pub ignore_port_in_host_matching: bool,
    /// Largest direct response body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_direct_response_body_size_bytes: Option<u32>,
}

/// TLS requirement of a virtual host
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TlsRequirement {
    /// No requirement
    None,
    /// Every request must use TLS
    All,
}

/// Virtual host
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VirtualHost {
    /// Name
    pub name: String,
    /// Domains served
    pub domains: Vec<String>,
    /// Routes in match order
    pub routes: Vec<Route>,
    /// TLS requirement
    pub require_tls: TlsRequirement,
    /// Per filter configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub typed_per_filter_config: BTreeMap<String, serde_json::Value>,
}

/// Route
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Name
    pub name: String,
    /// Match criteria
    #[serde(rename = "match")]
    pub match_: RouteMatch,
    /// What to do with matching requests; `None` when no action is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<RouteAction>,
    /// Request headers to add or overwrite
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers_to_add: Vec<HeaderValueOption>,
    /// Request headers to remove
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers_to_remove: Vec<String>,
    /// Response headers to add or overwrite
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_headers_to_add: Vec<HeaderValueOption>,
    /// Response headers to remove
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_headers_to_remove: Vec<String>,
    /// Per filter configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub typed_per_filter_config: BTreeMap<String, serde_json::Value>,
}

/// Path part of a route match
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSpecifier {
    /// Prefix
    Prefix(String),
    /// Prefix matching whole segments
    PathSeparatedPrefix(String),
    /// Exact path
    Path(String),
    /// Safe regex
    SafeRegex(String),
}

impl Default for PathSpecifier {
    fn default() -> Self {
        Self::Prefix("/".to_string())
    }
}

/// String matcher
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringMatcher {
    /// Exact value
    Exact(String),
    /// Safe regex
    SafeRegex(String),
    /// Present with any value
    Present,
}

/// Header matcher
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMatcher {
    /// Header name
    pub name: String,
    /// How the value is matched
    pub matcher: StringMatcher,
}

/// Query parameter matcher
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParameterMatcher {
    /// Parameter name
    pub name: String,
    /// How the value is matched
    pub matcher: StringMatcher,
}

/// Route match criteria
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMatch {
    /// Path
    pub path: PathSpecifier,
    /// Headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderMatcher>,
    /// Query parameters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_parameters: Vec<QueryParameterMatcher>,
}

/// Header to add
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderValueOption {
    /// Name
    pub name: String,
    /// Value
    pub value: String,
    /// Append to existing values instead of overwriting
    pub append: bool,
}

/// What a route does
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    /// Forward upstream
    Route(ForwardAction),
    /// Answer with a redirect
    Redirect(RedirectAction),
    /// Answer directly
    DirectResponse(DirectResponseAction),
}

/// Response code when a route's cluster does not exist
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterNotFoundResponseCode {
    /// 503
    ServiceUnavailable,
    /// 404
    NotFound,
    /// 500
    #[default]
    InternalServerError,
}

/// One cluster in a weighted split
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterWeight {
    /// Cluster name
    pub name: String,
    /// Weight
    pub weight: u32,
    /// Request headers to add for this cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers_to_add: Vec<HeaderValueOption>,
    /// Request headers to remove for this cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers_to_remove: Vec<String>,
    /// Per filter configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub typed_per_filter_config: BTreeMap<String, serde_json::Value>,
}

impl ClusterWeight {
    /// Weighted cluster without header changes
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
            request_headers_to_add: Vec::new(),
            request_headers_to_remove: Vec::new(),
            typed_per_filter_config: BTreeMap::new(),
        }
    }
}

/// Cluster selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterSpecifier {
    /// A single cluster
    Cluster(String),
    /// A weighted split
    WeightedClusters(Vec<ClusterWeight>),
}

/// Forwarding action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForwardAction {
    /// Where to send the request
    pub cluster: ClusterSpecifier,
    /// Response code when the cluster is missing
    pub cluster_not_found_response_code: ClusterNotFoundResponseCode,
    /// Upstream timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    /// Prefix to rewrite the matched prefix to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_rewrite: Option<String>,
    /// Full path replacement, as a regex rewrite of the whole path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_path_rewrite: Option<String>,
    /// Host header rewrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_rewrite_literal: Option<String>,
}

impl ForwardAction {
    /// Forward to `cluster` with the default not-found code
    pub fn new(cluster: ClusterSpecifier) -> Self {
        Self {
            cluster,
            cluster_not_found_response_code: ClusterNotFoundResponseCode::InternalServerError,
            timeout_seconds: None,
            prefix_rewrite: None,
            full_path_rewrite: None,
            host_rewrite_literal: None,
        }
    }
}

/// Redirect action
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectAction {
    /// Scheme to redirect to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme_redirect: Option<String>,
    /// Host to redirect to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_redirect: Option<String>,
    /// Port to redirect to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_redirect: Option<u16>,
    /// Path to redirect to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_redirect: Option<String>,
    /// Prefix replacing the matched prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_rewrite: Option<String>,
    /// Response code
    pub response_code: u16,
}

/// Direct response action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectResponseAction {
    /// Status code
    pub status: u16,
    /// Body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

// =============================================================================
// Clusters
// =============================================================================

/// Endpoint discovery type of a cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryType {
    /// Fixed endpoints
    Static,
    /// DNS resolved, all addresses
    StrictDns,
    /// DNS resolved, first address
    LogicalDns,
    /// Endpoints served over EDS
    Eds,
}

/// An endpoint in a cluster's load assignment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host or address
    pub address: String,
    /// Port
    pub port_value: u16,
}

/// Upstream cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Name
    pub name: String,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Discovery type
    pub discovery_type: DiscoveryType,
    /// Load balancing policy
    pub lb_policy: String,
    /// EDS service name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eds_service_name: Option<String>,
    /// Endpoints for non-EDS clusters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<Endpoint>,
    /// SNI sent to the upstream, when TLS is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_tls_sni: Option<String>,
    /// Per connection buffer limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_connection_buffer_limit_bytes: Option<u32>,
    /// Extension metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Cluster {
    /// Cluster with no endpoints yet
    pub fn new(name: impl Into<String>, discovery_type: DiscoveryType, connect_timeout_ms: u64) -> Self {
        Self {
            name: name.into(),
            connect_timeout_ms,
            discovery_type,
            lb_policy: "ROUND_ROBIN".to_string(),
            eds_service_name: None,
            endpoints: Vec::new(),
            upstream_tls_sni: None,
            per_connection_buffer_limit_bytes: None,
            metadata: BTreeMap::new(),
        }
    }
}
