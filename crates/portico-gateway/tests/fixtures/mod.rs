//! Fixtures shared by the translation integration tests
//!
//! Builders for the resources a scenario needs and a [`translate`] helper
//! that runs one Gateway through a [`GatewayTranslator`] with a frozen clock.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::ByteString;
use rcgen::{CertificateParams, KeyPair};

use portico_common::config::Settings;
use portico_common::gateway_api::{
    AllowedRoutes, BackendObjectReference, FromNamespaces, Gateway, GatewaySpec, GatewayTlsConfig,
    HttpBackendRef, HttpPathMatch, HttpRoute, HttpRouteMatch, HttpRouteRule, HttpRouteSpec,
    Listener, ParentReference, PathMatchType, ReferenceGrant, ReferenceGrantFrom,
    ReferenceGrantSpec, ReferenceGrantTo, RouteNamespaces, SecretObjectReference,
};
use portico_common::wellknown::{GATEWAY_GROUP, HTTP_ROUTE_KIND, SERVICE_KIND};
use portico_common::ObjectSource;
use portico_gateway::extensions::ExtensionRegistry;
use portico_gateway::query::RouteObject;
use portico_gateway::reports::{ConditionSet, FixedClock, ReportMap};
use portico_gateway::{GatewayTranslator, ResourceStore, TranslationOutput};
use tokio_util::sync::CancellationToken;

/// Namespace the Gateway lives in
pub const GATEWAY_NS: &str = "infra";

/// Instant every fixture is created at and the clock is frozen to
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid time")
}

pub fn translator() -> GatewayTranslator {
    GatewayTranslator::with_clock(
        Arc::new(ExtensionRegistry::builtin()),
        Settings::default(),
        Arc::new(FixedClock(epoch())),
    )
}

/// Translate `gw` over the current contents of `store`
pub fn translate(store: &ResourceStore, gw: &Gateway) -> TranslationOutput {
    translator().translate(&store.snapshot(), gw, &CancellationToken::new())
}

// =============================================================================
// Gateways
// =============================================================================

/// Listener accepting routes from every namespace
pub fn listener(name: &str, port: u16, protocol: &str, hostname: Option<&str>) -> Listener {
    Listener {
        name: name.to_string(),
        hostname: hostname.map(String::from),
        port,
        protocol: protocol.to_string(),
        tls: None,
        allowed_routes: Some(AllowedRoutes {
            namespaces: Some(RouteNamespaces {
                from: Some(FromNamespaces::All),
                selector: None,
            }),
            kinds: Vec::new(),
        }),
    }
}

/// HTTPS listener terminating with the Secret `secret` in the Gateway namespace
pub fn https_listener(name: &str, port: u16, hostname: &str, secret: &str) -> Listener {
    Listener {
        tls: Some(GatewayTlsConfig {
            mode: None,
            certificate_refs: vec![SecretObjectReference {
                group: None,
                kind: None,
                name: secret.to_string(),
                namespace: None,
            }],
            options: Default::default(),
        }),
        ..listener(name, port, "HTTPS", Some(hostname))
    }
}

pub fn gateway(listeners: Vec<Listener>) -> Gateway {
    let mut gw = Gateway::new(
        "edge",
        GatewaySpec {
            gateway_class_name: portico_common::DEFAULT_GATEWAY_CLASS.to_string(),
            listeners,
        },
    );
    gw.metadata.namespace = Some(GATEWAY_NS.to_string());
    gw.metadata.generation = Some(1);
    gw
}

// =============================================================================
// Routes and backends
// =============================================================================

pub fn service(ns: &str, name: &str) -> Service {
    let mut svc = Service::default();
    svc.metadata.name = Some(name.to_string());
    svc.metadata.namespace = Some(ns.to_string());
    svc
}

/// Ref to the fixture Gateway
pub fn gateway_ref() -> ParentReference {
    ParentReference {
        namespace: Some(GATEWAY_NS.to_string()),
        ..ParentReference::gateway("edge")
    }
}

/// HTTPRoute attached to the fixture Gateway, created `age_secs` after the epoch
pub fn http_route(ns: &str, name: &str, hostnames: &[&str], rules: Vec<HttpRouteRule>) -> HttpRoute {
    let mut route = HttpRoute::new(
        name,
        HttpRouteSpec {
            parent_refs: vec![gateway_ref()],
            hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
            rules,
        },
    );
    route.metadata.namespace = Some(ns.to_string());
    route.metadata.generation = Some(1);
    route.metadata.creation_timestamp = Some(Time(epoch()));
    route
}

/// HTTPRoute with no parent refs, reachable only through delegation
pub fn child_route(ns: &str, name: &str, rules: Vec<HttpRouteRule>) -> HttpRoute {
    let mut route = http_route(ns, name, &[], rules);
    route.spec.parent_refs.clear();
    route
}

pub fn created_at(mut route: HttpRoute, secs: i64) -> HttpRoute {
    route.metadata.creation_timestamp = Some(Time(epoch() + chrono::Duration::seconds(secs)));
    route
}

/// Rule forwarding to a Service, optionally in another namespace
pub fn to_service(ns: Option<&str>, name: &str, port: u16) -> HttpRouteRule {
    HttpRouteRule {
        backend_refs: vec![HttpBackendRef::from(BackendObjectReference {
            namespace: ns.map(String::from),
            ..BackendObjectReference::service(name, port)
        })],
        ..Default::default()
    }
}

/// Rule delegating to another HTTPRoute in the same namespace
pub fn delegate_to(name: &str) -> HttpRouteRule {
    HttpRouteRule {
        backend_refs: vec![HttpBackendRef::from(BackendObjectReference {
            group: Some(GATEWAY_GROUP.to_string()),
            kind: Some(HTTP_ROUTE_KIND.to_string()),
            name: name.to_string(),
            namespace: None,
            port: None,
        })],
        ..Default::default()
    }
}

/// Restrict a rule to one path prefix
pub fn with_prefix(mut rule: HttpRouteRule, prefix: &str) -> HttpRouteRule {
    rule.matches = vec![HttpRouteMatch {
        path: Some(HttpPathMatch {
            type_: Some(PathMatchType::PathPrefix),
            value: Some(prefix.to_string()),
        }),
        ..Default::default()
    }];
    rule
}

/// ReferenceGrant in `to_ns` letting HTTPRoutes in `from_ns` reach Services
pub fn service_grant(from_ns: &str, to_ns: &str) -> ReferenceGrant {
    let mut grant = ReferenceGrant::new(
        "routes-to-services",
        ReferenceGrantSpec {
            from: vec![ReferenceGrantFrom {
                group: GATEWAY_GROUP.to_string(),
                kind: HTTP_ROUTE_KIND.to_string(),
                namespace: from_ns.to_string(),
            }],
            to: vec![ReferenceGrantTo {
                group: String::new(),
                kind: SERVICE_KIND.to_string(),
                name: None,
            }],
        },
    );
    grant.metadata.namespace = Some(to_ns.to_string());
    grant
}

// =============================================================================
// TLS
// =============================================================================

/// TLS Secret holding a fresh self-signed certificate for `host`
pub fn tls_secret(ns: &str, name: &str, host: &str) -> Secret {
    let key = KeyPair::generate().expect("generate key");
    let cert = CertificateParams::new(vec![host.to_string()])
        .expect("params")
        .self_signed(&key)
        .expect("self sign");

    let mut secret = Secret::default();
    secret.metadata.namespace = Some(ns.to_string());
    secret.metadata.name = Some(name.to_string());
    secret.data = Some(
        [
            ("tls.crt".to_string(), ByteString(cert.pem().into_bytes())),
            ("tls.key".to_string(), ByteString(key.serialize_pem().into_bytes())),
        ]
        .into_iter()
        .collect(),
    );
    secret
}

// =============================================================================
// Reports
// =============================================================================

/// Conditions reported for `route` on `parent_ref`
pub fn route_conditions<'r>(
    reports: &'r ReportMap,
    route: &HttpRoute,
    parent_ref: &ParentReference,
) -> Option<&'r ConditionSet> {
    let source = RouteObject::Http(Arc::new(route.clone())).source();
    reports.route_report(&source)?.get(parent_ref)
}

/// Ref a delegated child reports against: the delegating HTTPRoute
pub fn route_parent_ref(ns: &str, name: &str) -> ParentReference {
    ParentReference {
        group: Some(GATEWAY_GROUP.to_string()),
        kind: Some(HTTP_ROUTE_KIND.to_string()),
        namespace: Some(ns.to_string()),
        name: name.to_string(),
        section_name: None,
        port: None,
    }
}

pub fn source_of(route: &HttpRoute) -> ObjectSource {
    ObjectSource::from_resource(route)
}
