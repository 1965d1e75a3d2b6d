//! Canonical API groups, kinds and index names
//!
//! Everything that compares a resource's group or kind goes through these
//! constants so that defaulting rules (empty group means core) live in one
//! place.

/// Gateway API group
pub const GATEWAY_GROUP: &str = "gateway.networking.k8s.io";

/// Group of the in-project CRDs
pub const PORTICO_GROUP: &str = "gateway.portico.dev";

/// Version of the in-project CRDs
pub const PORTICO_VERSION: &str = "v1alpha1";

/// Kubernetes core group (serialized as the empty string)
pub const CORE_GROUP: &str = "";

/// Gateway kind
pub const GATEWAY_KIND: &str = "Gateway";
/// GatewayClass kind
pub const GATEWAY_CLASS_KIND: &str = "GatewayClass";
/// HTTPRoute kind
pub const HTTP_ROUTE_KIND: &str = "HTTPRoute";
/// TCPRoute kind
pub const TCP_ROUTE_KIND: &str = "TCPRoute";
/// ReferenceGrant kind
pub const REFERENCE_GRANT_KIND: &str = "ReferenceGrant";
/// Service kind
pub const SERVICE_KIND: &str = "Service";
/// Secret kind
pub const SECRET_KIND: &str = "Secret";
/// Namespace kind
pub const NAMESPACE_KIND: &str = "Namespace";

/// DirectResponseRoute kind
pub const DIRECT_RESPONSE_KIND: &str = "DirectResponseRoute";
/// RoutePolicy kind
pub const ROUTE_POLICY_KIND: &str = "RoutePolicy";
/// HttpListenerPolicy kind
pub const HTTP_LISTENER_POLICY_KIND: &str = "HttpListenerPolicy";
/// ListenerPolicy kind
pub const LISTENER_POLICY_KIND: &str = "ListenerPolicy";
/// Upstream kind
pub const UPSTREAM_KIND: &str = "Upstream";
/// GatewayParameters kind
pub const GATEWAY_PARAMETERS_KIND: &str = "GatewayParameters";

/// Index of HTTPRoutes by the gateways their parent refs target
pub const HTTP_ROUTE_TARGET_FIELD: &str = "http-route-target";
/// Index of TCPRoutes by the gateways their parent refs target
pub const TCP_ROUTE_TARGET_FIELD: &str = "tcp-route-target";
/// Index of policies by the object their target ref points at
pub const POLICY_TARGET_FIELD: &str = "policy-target";

/// Secret data key holding the certificate chain
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Secret data key holding the private key
pub const TLS_KEY_KEY: &str = "tls.key";
/// Secret data key holding the root CA
pub const TLS_ROOT_CA_KEY: &str = "ca.crt";
/// Secret data key holding a DER encoded OCSP response
pub const TLS_OCSP_STAPLE_KEY: &str = "tls.ocsp-staple";

/// Listener TLS option selecting the OCSP staple policy
pub const OCSP_STAPLE_POLICY_OPTION: &str = "portico.dev/ocsp-staple-policy";

/// Cluster that routes unresolved backends to nowhere
pub const BLACKHOLE_CLUSTER_NAME: &str = "blackhole_cluster";

/// Listener protocols understood by the builder
pub mod protocol {
    /// Cleartext HTTP
    pub const HTTP: &str = "HTTP";
    /// HTTP over TLS, terminated at the gateway
    pub const HTTPS: &str = "HTTPS";
    /// TLS, routed by SNI
    pub const TLS: &str = "TLS";
    /// Raw TCP
    pub const TCP: &str = "TCP";
    /// Raw UDP
    pub const UDP: &str = "UDP";
}

/// Condition types used on Gateway API status
pub mod condition_type {
    /// Accepted
    pub const ACCEPTED: &str = "Accepted";
    /// Programmed
    pub const PROGRAMMED: &str = "Programmed";
    /// ResolvedRefs
    pub const RESOLVED_REFS: &str = "ResolvedRefs";
    /// Conflicted
    pub const CONFLICTED: &str = "Conflicted";
    /// PartiallyInvalid
    pub const PARTIALLY_INVALID: &str = "PartiallyInvalid";
}

/// Condition reasons used on Gateway API status
pub mod reason {
    /// Accepted
    pub const ACCEPTED: &str = "Accepted";
    /// Programmed
    pub const PROGRAMMED: &str = "Programmed";
    /// ResolvedRefs
    pub const RESOLVED_REFS: &str = "ResolvedRefs";
    /// NoConflicts
    pub const NO_CONFLICTS: &str = "NoConflicts";
    /// Pending
    pub const PENDING: &str = "Pending";
    /// Invalid
    pub const INVALID: &str = "Invalid";
    /// InvalidKind
    pub const INVALID_KIND: &str = "InvalidKind";
    /// RefNotPermitted
    pub const REF_NOT_PERMITTED: &str = "RefNotPermitted";
    /// BackendNotFound
    pub const BACKEND_NOT_FOUND: &str = "BackendNotFound";
    /// UnsupportedValue
    pub const UNSUPPORTED_VALUE: &str = "UnsupportedValue";
    /// UnresolvedReference
    pub const UNRESOLVED_REFERENCE: &str = "UnresolvedReference";
    /// CyclicReference
    pub const CYCLIC_REFERENCE: &str = "CyclicReference";
    /// NotAllowedByListeners
    pub const NOT_ALLOWED_BY_LISTENERS: &str = "NotAllowedByListeners";
    /// NoMatchingParent
    pub const NO_MATCHING_PARENT: &str = "NoMatchingParent";
    /// NoMatchingListenerHostname
    pub const NO_MATCHING_LISTENER_HOSTNAME: &str = "NoMatchingListenerHostname";
    /// MissingSelector
    pub const MISSING_SELECTOR: &str = "MissingSelector";
    /// InvalidCertificateRef
    pub const INVALID_CERTIFICATE_REF: &str = "InvalidCertificateRef";
    /// IncompatibleFilters
    pub const INCOMPATIBLE_FILTERS: &str = "IncompatibleFilters";
    /// UnsupportedProtocol
    pub const UNSUPPORTED_PROTOCOL: &str = "UnsupportedProtocol";
    /// ProtocolConflict
    pub const PROTOCOL_CONFLICT: &str = "ProtocolConflict";
    /// HostnameConflict
    pub const HOSTNAME_CONFLICT: &str = "HostnameConflict";
    /// InvalidRouteKinds
    pub const INVALID_ROUTE_KINDS: &str = "InvalidRouteKinds";
}

/// Returns the group with the core group normalized to the empty string
pub fn normalize_group(group: Option<&str>) -> &str {
    match group {
        None | Some("core") => CORE_GROUP,
        Some(g) => g,
    }
}
