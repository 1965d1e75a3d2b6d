//! Gateway API resource types
//!
//! This module provides the subset of the Gateway API consumed by the
//! translator:
//! - **Gateway**: listeners, TLS and allowed-route configuration
//! - **HTTPRoute / TCPRoute**: parent refs, matches, filters and backends
//! - **ReferenceGrant**: cross-namespace permissions
//!
//! Statuses follow the upstream shapes so they can be written back verbatim.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::Condition;
use crate::wellknown::{normalize_group, GATEWAY_GROUP, SECRET_KIND, SERVICE_KIND};

// =============================================================================
// Label selectors
// =============================================================================

/// Label selector operator
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum LabelSelectorOperator {
    /// Label value must be in the specified set
    In,
    /// Label value must not be in the specified set
    NotIn,
    /// Label must exist (value ignored)
    Exists,
    /// Label must not exist (value ignored)
    DoesNotExist,
}

impl LabelSelectorOperator {
    /// Check if a label value matches this requirement
    ///
    /// - `label_value`: The actual label value (None if label doesn't exist)
    /// - `values`: The values specified in the requirement
    pub fn matches(&self, label_value: Option<&str>, values: &[String]) -> bool {
        match self {
            Self::In => label_value.is_some_and(|v| values.iter().any(|req| req == v)),
            Self::NotIn => {
                label_value.is_none() || !values.iter().any(|req| Some(req.as_str()) == label_value)
            }
            Self::Exists => label_value.is_some(),
            Self::DoesNotExist => label_value.is_none(),
        }
    }
}

/// A single label selector requirement
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// The label key that the selector applies to
    pub key: String,
    /// Operator representing the relationship between label and values
    pub operator: LabelSelectorOperator,
    /// Values for `In` and `NotIn`
    #[serde(default)]
    pub values: Vec<String>,
}

impl LabelSelectorRequirement {
    /// Check if a label set matches this requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key).map(|s| s.as_str());
        self.operator.matches(value, &self.values)
    }
}

/// Kubernetes label selector
///
/// An empty selector matches every label set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Labels that must all be present with the given values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,
    /// Requirements that must all be satisfied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// Check if a label set matches this selector
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        if let Some(match_labels) = &self.match_labels {
            for (key, value) in match_labels {
                if labels.get(key) != Some(value) {
                    return false;
                }
            }
        }
        self.match_expressions.iter().all(|req| req.matches(labels))
    }

    /// Check if this selector is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.match_labels.as_ref().is_none_or(|m| m.is_empty())
            && self.match_expressions.is_empty()
    }
}

// =============================================================================
// Shared reference types
// =============================================================================

/// Reference from a route to the Gateway (or listener) it attaches to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    /// Group of the parent, defaults to the Gateway API group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Kind of the parent, defaults to Gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Namespace of the parent, defaults to the route's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Name of the parent
    pub name: String,
    /// Listener name to attach to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    /// Listener port to attach to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ParentReference {
    /// Parent ref targeting a Gateway by name
    pub fn gateway(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Group with the Gateway API default applied
    pub fn group_or_default(&self) -> &str {
        self.group.as_deref().unwrap_or(GATEWAY_GROUP)
    }

    /// Kind with the Gateway default applied
    pub fn kind_or_default(&self) -> &str {
        self.kind.as_deref().unwrap_or(crate::wellknown::GATEWAY_KIND)
    }
}

/// Reference to a backend object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct BackendObjectReference {
    /// Group of the backend, defaults to core
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Kind of the backend, defaults to Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Name of the backend
    pub name: String,
    /// Namespace of the backend, defaults to the referencing object's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Destination port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl BackendObjectReference {
    /// Reference to a Service port in the referencing object's namespace
    pub fn service(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port: Some(port),
            ..Default::default()
        }
    }

    /// Group with the core default applied
    pub fn group_or_default(&self) -> &str {
        normalize_group(self.group.as_deref())
    }

    /// Kind with the Service default applied
    pub fn kind_or_default(&self) -> &str {
        self.kind.as_deref().unwrap_or(SERVICE_KIND)
    }
}

/// Reference to a Secret holding TLS material
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct SecretObjectReference {
    /// Group of the referent, defaults to core
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Kind of the referent, defaults to Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Name of the referent
    pub name: String,
    /// Namespace of the referent, defaults to the Gateway's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretObjectReference {
    /// Group with the core default applied
    pub fn group_or_default(&self) -> &str {
        normalize_group(self.group.as_deref())
    }

    /// Kind with the Secret default applied
    pub fn kind_or_default(&self) -> &str {
        self.kind.as_deref().unwrap_or(SECRET_KIND)
    }
}

/// Same-namespace reference used by ExtensionRef filters
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    /// Group of the referent
    pub group: String,
    /// Kind of the referent
    pub kind: String,
    /// Name of the referent
    pub name: String,
}

/// A route kind a listener allows
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct RouteGroupKind {
    /// Group, defaults to the Gateway API group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Route kind
    pub kind: String,
}

// =============================================================================
// Gateway
// =============================================================================

/// Gateway specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "Gateway",
    plural = "gateways",
    namespaced,
    status = "GatewayStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// GatewayClass this gateway belongs to
    pub gateway_class_name: String,
    /// Listener configurations
    pub listeners: Vec<Listener>,
}

/// Gateway listener configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    /// Listener name, unique within the gateway
    pub name: String,
    /// Hostname filter; absent or `*` matches every host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Port number
    pub port: u16,
    /// Protocol (HTTP, HTTPS, TLS, TCP, UDP)
    pub protocol: String,
    /// TLS configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<GatewayTlsConfig>,
    /// Which routes may attach
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_routes: Option<AllowedRoutes>,
}

/// TLS mode of a listener
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS is terminated at the gateway
    #[default]
    Terminate,
    /// TLS is passed through to the backend
    Passthrough,
}

/// Gateway TLS configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTlsConfig {
    /// TLS mode, defaults to Terminate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<TlsMode>,
    /// Certificate references; the first one is served
    #[serde(default)]
    pub certificate_refs: Vec<SecretObjectReference>,
    /// Implementation specific options
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// Namespaces from which routes may attach
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum FromNamespaces {
    /// Routes from every namespace
    All,
    /// Routes from the gateway's namespace
    #[default]
    Same,
    /// Routes from namespaces matching a label selector
    Selector,
}

/// Namespace restrictions for attached routes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteNamespaces {
    /// Where routes may come from, defaults to Same
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<FromNamespaces>,
    /// Selector used when `from` is Selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

/// Routes a listener accepts
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllowedRoutes {
    /// Namespace restrictions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<RouteNamespaces>,
    /// Route kinds; replaces the protocol default when non-empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<RouteGroupKind>,
}

/// Gateway status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    /// Gateway level conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Per listener status
    #[serde(default)]
    pub listeners: Vec<ListenerStatus>,
}

/// Status of a single listener
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStatus {
    /// Listener name
    pub name: String,
    /// Route kinds the listener supports
    #[serde(default)]
    pub supported_kinds: Vec<RouteGroupKind>,
    /// Number of routes attached
    pub attached_routes: i32,
    /// Listener conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// =============================================================================
// Route status
// =============================================================================

/// Status shared by every route kind
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    /// One entry per parent ref handled by this controller
    #[serde(default)]
    pub parents: Vec<RouteParentStatus>,
}

/// Status of a route with respect to one parent
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteParentStatus {
    /// The parent ref this status applies to
    pub parent_ref: ParentReference,
    /// Controller writing this entry
    pub controller_name: String,
    /// Conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// =============================================================================
// HTTPRoute
// =============================================================================

/// HTTPRoute specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "HTTPRoute",
    root = "HttpRoute",
    plural = "httproutes",
    namespaced,
    status = "RouteStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    /// Parents this route attaches to
    #[serde(default)]
    pub parent_refs: Vec<ParentReference>,
    /// Hostnames this route serves
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    /// Routing rules
    #[serde(default)]
    pub rules: Vec<HttpRouteRule>,
}

/// One HTTPRoute rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteRule {
    /// Optional rule name, used in generated route names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Request matches; empty means prefix `/`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpRouteMatch>,
    /// Filters applied to matched requests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<HttpRouteFilter>,
    /// Backends receiving matched requests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backend_refs: Vec<HttpBackendRef>,
}

/// Path match type
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum PathMatchType {
    /// Exact path
    Exact,
    /// Path prefix
    #[default]
    PathPrefix,
    /// Regular expression
    RegularExpression,
}

/// Path match
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct HttpPathMatch {
    /// Match type, defaults to PathPrefix
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<PathMatchType>,
    /// Path value, defaults to `/`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Header and query parameter match type
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum StringMatchType {
    /// Exact value
    #[default]
    Exact,
    /// Regular expression
    RegularExpression,
}

/// Header match
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct HttpHeaderMatch {
    /// Match type, defaults to Exact
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<StringMatchType>,
    /// Header name
    pub name: String,
    /// Header value; empty means the header only has to be present
    #[serde(default)]
    pub value: String,
}

/// Query parameter match
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct HttpQueryParamMatch {
    /// Match type, defaults to Exact
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<StringMatchType>,
    /// Parameter name
    pub name: String,
    /// Parameter value; empty means the parameter only has to be present
    #[serde(default)]
    pub value: String,
}

/// One request match
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    /// Path match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<HttpPathMatch>,
    /// Header matches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HttpHeaderMatch>,
    /// Query parameter matches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_params: Vec<HttpQueryParamMatch>,
    /// HTTP method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// Filter types
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum HttpRouteFilterType {
    /// Modify request headers
    RequestHeaderModifier,
    /// Modify response headers
    ResponseHeaderModifier,
    /// Redirect the request
    RequestRedirect,
    /// Rewrite the request URL
    #[serde(rename = "URLRewrite")]
    UrlRewrite,
    /// Mirror the request
    RequestMirror,
    /// Implementation specific extension
    ExtensionRef,
}

/// A header name/value pair
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct HttpHeader {
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
}

/// Header modification
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct HttpHeaderFilter {
    /// Headers to overwrite
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set: Vec<HttpHeader>,
    /// Headers to append
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<HttpHeader>,
    /// Headers to remove
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

/// Path modifier type
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum HttpPathModifierType {
    /// Replace the whole path
    ReplaceFullPath,
    /// Replace the matched prefix
    ReplacePrefixMatch,
}

/// Path modifier used by redirects and rewrites
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct HttpPathModifier {
    /// Modifier type
    #[serde(rename = "type")]
    pub type_: HttpPathModifierType,
    /// Replacement for `ReplaceFullPath`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_full_path: Option<String>,
    /// Replacement for `ReplacePrefixMatch`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_prefix_match: Option<String>,
}

/// Request redirect
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestRedirectFilter {
    /// Scheme of the redirect target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    /// Hostname of the redirect target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Path of the redirect target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<HttpPathModifier>,
    /// Port of the redirect target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Status code, defaults to 302
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

/// URL rewrite
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct HttpUrlRewriteFilter {
    /// Host header rewrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Path rewrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<HttpPathModifier>,
}

/// HTTPRoute filter
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteFilter {
    /// Filter type
    #[serde(rename = "type")]
    pub type_: HttpRouteFilterType,
    /// Request header modification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_header_modifier: Option<HttpHeaderFilter>,
    /// Response header modification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_header_modifier: Option<HttpHeaderFilter>,
    /// Redirect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_redirect: Option<HttpRequestRedirectFilter>,
    /// Rewrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_rewrite: Option<HttpUrlRewriteFilter>,
    /// Extension reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_ref: Option<LocalObjectReference>,
}

impl HttpRouteFilter {
    /// ExtensionRef filter pointing at a same-namespace object
    pub fn extension_ref(
        group: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            type_: HttpRouteFilterType::ExtensionRef,
            request_header_modifier: None,
            response_header_modifier: None,
            request_redirect: None,
            url_rewrite: None,
            extension_ref: Some(LocalObjectReference {
                group: group.into(),
                kind: kind.into(),
                name: name.into(),
            }),
        }
    }
}

/// Backend of an HTTPRoute rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpBackendRef {
    /// The referenced backend
    #[serde(flatten)]
    pub backend: BackendObjectReference,
    /// Relative weight, defaults to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    /// Filters applied when this backend is selected
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<HttpRouteFilter>,
}

impl From<BackendObjectReference> for HttpBackendRef {
    fn from(backend: BackendObjectReference) -> Self {
        Self {
            backend,
            weight: None,
            filters: Vec::new(),
        }
    }
}

// =============================================================================
// TCPRoute
// =============================================================================

/// TCPRoute specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1alpha2",
    kind = "TCPRoute",
    root = "TcpRoute",
    plural = "tcproutes",
    namespaced,
    status = "RouteStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TcpRouteSpec {
    /// Parents this route attaches to
    #[serde(default)]
    pub parent_refs: Vec<ParentReference>,
    /// Routing rules; exactly one is supported
    #[serde(default)]
    pub rules: Vec<TcpRouteRule>,
}

/// One TCPRoute rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TcpRouteRule {
    /// Backends receiving connections
    #[serde(default)]
    pub backend_refs: Vec<BackendRef>,
}

/// Weighted backend reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    /// The referenced backend
    #[serde(flatten)]
    pub backend: BackendObjectReference,
    /// Relative weight, defaults to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

// =============================================================================
// ReferenceGrant
// =============================================================================

/// ReferenceGrant specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1beta1",
    kind = "ReferenceGrant",
    plural = "referencegrants",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceGrantSpec {
    /// Objects allowed to reference
    pub from: Vec<ReferenceGrantFrom>,
    /// Objects that may be referenced
    pub to: Vec<ReferenceGrantTo>,
}

/// Source of a permitted reference
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceGrantFrom {
    /// Group of the referencing object
    pub group: String,
    /// Kind of the referencing object
    pub kind: String,
    /// Namespace of the referencing object
    pub namespace: String,
}

/// Target of a permitted reference
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceGrantTo {
    /// Group of the referenced object
    pub group: String,
    /// Kind of the referenced object
    pub kind: String,
    /// Name of the referenced object; absent allows every name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // =========================================================================
    // Label selectors
    // =========================================================================

    #[test]
    fn test_operator_in() {
        let op = LabelSelectorOperator::In;
        assert!(op.matches(Some("prod"), &["dev".into(), "prod".into()]));
        assert!(!op.matches(Some("staging"), &["dev".into(), "prod".into()]));
        assert!(!op.matches(None, &["dev".into()]));
    }

    #[test]
    fn test_operator_not_in_and_existence() {
        let values = vec!["prod".to_string()];
        assert!(LabelSelectorOperator::NotIn.matches(None, &values));
        assert!(!LabelSelectorOperator::NotIn.matches(Some("prod"), &values));
        assert!(LabelSelectorOperator::Exists.matches(Some("x"), &[]));
        assert!(LabelSelectorOperator::DoesNotExist.matches(None, &[]));
    }

    #[test]
    fn test_selector_requires_all_terms() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("team", "edge")])),
            match_expressions: vec![LabelSelectorRequirement {
                key: "env".to_string(),
                operator: LabelSelectorOperator::In,
                values: vec!["prod".to_string()],
            }],
        };
        assert!(selector.matches(&labels(&[("team", "edge"), ("env", "prod")])));
        assert!(!selector.matches(&labels(&[("team", "edge"), ("env", "dev")])));
        assert!(!selector.matches(&labels(&[("env", "prod")])));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = LabelSelector::default();
        assert!(selector.is_empty());
        assert!(selector.matches(&BTreeMap::new()));
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    #[test]
    fn test_http_route_parses_upstream_yaml() {
        let yaml = r#"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: r
  namespace: default
spec:
  parentRefs:
    - name: test
      sectionName: foo
  hostnames: ["example.com"]
  rules:
    - matches:
        - path: {type: PathPrefix, value: /api}
          headers: [{name: x-env, value: canary}]
          method: GET
      filters:
        - type: ExtensionRef
          extensionRef: {group: gateway.portico.dev, kind: DirectResponseRoute, name: hi}
      backendRefs:
        - name: foo
          port: 8080
          weight: 3
"#;
        let route: HttpRoute = serde_yaml::from_str(yaml).expect("route should parse");
        assert_eq!(route.spec.parent_refs[0].section_name.as_deref(), Some("foo"));
        let rule = &route.spec.rules[0];
        assert_eq!(
            rule.matches[0].path.as_ref().and_then(|p| p.type_),
            Some(PathMatchType::PathPrefix)
        );
        assert_eq!(rule.filters[0].type_, HttpRouteFilterType::ExtensionRef);
        assert_eq!(rule.backend_refs[0].backend.port, Some(8080));
        assert_eq!(rule.backend_refs[0].backend.kind_or_default(), "Service");
        assert_eq!(rule.backend_refs[0].weight, Some(3));
    }

    #[test]
    fn test_gateway_listener_defaults() {
        let yaml = r#"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata: {name: test, namespace: default}
spec:
  gatewayClassName: portico
  listeners:
    - name: https
      port: 443
      protocol: HTTPS
      hostname: east.com
      tls:
        certificateRefs: [{name: east-cert}]
      allowedRoutes:
        namespaces: {from: All}
"#;
        let gw: Gateway = serde_yaml::from_str(yaml).expect("gateway should parse");
        let listener = &gw.spec.listeners[0];
        let tls = listener.tls.as_ref().expect("tls should be set");
        assert_eq!(tls.mode, None);
        assert_eq!(tls.certificate_refs[0].kind_or_default(), "Secret");
        assert_eq!(
            listener
                .allowed_routes
                .as_ref()
                .and_then(|a| a.namespaces.as_ref())
                .and_then(|n| n.from),
            Some(FromNamespaces::All)
        );
    }

    #[test]
    fn test_url_rewrite_filter_type_name() {
        let json = serde_json::to_value(HttpRouteFilterType::UrlRewrite).expect("serialize");
        assert_eq!(json, serde_json::json!("URLRewrite"));
    }
}
