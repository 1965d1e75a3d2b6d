//! End-to-end translation scenarios
//!
//! Each test stores a small set of Gateway API resources, translates the
//! fixture Gateway and checks the emitted proxy tree together with the
//! status conditions a user would see.

mod fixtures;

use pretty_assertions::assert_eq;

use fixtures::*;
use portico_common::crd::ConditionStatus;
use portico_common::wellknown::{
    condition_type, reason, DIRECT_RESPONSE_KIND, PORTICO_GROUP,
};
use portico_common::crd::{DirectResponseRoute, DirectResponseRouteSpec};
use portico_common::gateway_api::{HttpRouteFilter, HttpRouteRule};
use portico_gateway::proxy::{
    ClusterSpecifier, DiscoveryType, NetworkFilterConfig, RouteAction, TlsRequirement,
    TLS_INSPECTOR,
};
use portico_gateway::ResourceStore;

fn direct_response(ns: &str, name: &str, status: u16) -> DirectResponseRoute {
    let mut dr = DirectResponseRoute::new(
        name,
        DirectResponseRouteSpec {
            status,
            body: Some(format!("{status}")),
        },
    );
    dr.metadata.namespace = Some(ns.to_string());
    dr
}

fn dr_filter(name: &str) -> HttpRouteFilter {
    HttpRouteFilter::extension_ref(PORTICO_GROUP, DIRECT_RESPONSE_KIND, name)
}

// =============================================================================
// Story Tests: Backends
// =============================================================================

/// Story: A route to a Service in its own namespace yields one route and one
/// EDS cluster named after the Service port
#[test]
fn story_same_namespace_service_backend() {
    let store = ResourceStore::new();
    store.upsert(service("apps", "web"));
    let route = http_route("apps", "web", &["shop.example.com"], vec![to_service(None, "web", 8080)]);
    store.upsert(route.clone());
    let gw = gateway(vec![listener("http", 80, "HTTP", None)]);

    let out = translate(&store, &gw);
    let resources = out.resources.expect("translated");

    assert_eq!(resources.listeners.len(), 1);
    assert_eq!(resources.listeners[0].name, "http");
    let vhosts = &resources.route_configs[0].virtual_hosts;
    assert_eq!(vhosts.len(), 1);
    assert_eq!(vhosts[0].domains, vec!["shop.example.com"]);
    assert_eq!(vhosts[0].routes.len(), 1);
    assert_eq!(
        vhosts[0].routes[0].action,
        Some(RouteAction::Route(portico_gateway::proxy::ForwardAction::new(
            ClusterSpecifier::Cluster("apps-web-8080".to_string())
        )))
    );

    assert_eq!(resources.clusters.len(), 1);
    assert_eq!(resources.clusters[0].name, "apps-web-8080");
    assert_eq!(resources.clusters[0].discovery_type, DiscoveryType::Eds);

    let conditions = route_conditions(&out.reports, &route, &gateway_ref()).expect("reported");
    assert_eq!(
        conditions.get(condition_type::ACCEPTED).map(|c| c.status),
        Some(ConditionStatus::True)
    );
}

/// Story: A cross-namespace backend resolves once the target namespace grants
/// access, and is refused with RefNotPermitted before that
#[test]
fn story_cross_namespace_backend_needs_grant() {
    let store = ResourceStore::new();
    store.upsert(service("backend", "api"));
    let route = http_route("apps", "api", &[], vec![to_service(Some("backend"), "api", 9000)]);
    store.upsert(route.clone());
    let gw = gateway(vec![listener("http", 80, "HTTP", None)]);

    // Without a grant the backend is replaced by the blackhole cluster
    let denied = translate(&store, &gw);
    let resolved = route_conditions(&denied.reports, &route, &gateway_ref())
        .and_then(|c| c.get(condition_type::RESOLVED_REFS))
        .cloned()
        .expect("resolved refs reported");
    assert_eq!(resolved.status, ConditionStatus::False);
    assert_eq!(resolved.reason, reason::REF_NOT_PERMITTED);
    let names: Vec<String> = denied
        .resources
        .expect("translated")
        .clusters
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["blackhole_cluster"]);

    store.upsert(service_grant("apps", "backend"));
    let granted = translate(&store, &gw);
    let resolved = route_conditions(&granted.reports, &route, &gateway_ref())
        .and_then(|c| c.get(condition_type::RESOLVED_REFS))
        .map(|c| c.status);
    assert_ne!(resolved, Some(ConditionStatus::False));
    let names: Vec<String> = granted
        .resources
        .expect("translated")
        .clusters
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["backend-api-9000"]);
}

// =============================================================================
// Story Tests: Hostnames and Listeners
// =============================================================================

/// Story: A route whose hostnames miss every listener is not attached
#[test]
fn story_hostname_mismatch_attaches_nothing() {
    let store = ResourceStore::new();
    store.upsert(service("apps", "web"));
    let route = http_route("apps", "web", &["other.example.org"], vec![to_service(None, "web", 80)]);
    store.upsert(route.clone());
    let gw = gateway(vec![listener("http", 80, "HTTP", Some("*.example.com"))]);

    let out = translate(&store, &gw);
    let resources = out.resources.expect("translated");
    let routes: usize = resources
        .route_configs
        .iter()
        .flat_map(|rc| &rc.virtual_hosts)
        .map(|vh| vh.routes.len())
        .sum();
    assert_eq!(routes, 0);
    assert!(resources.clusters.is_empty());

    let accepted = route_conditions(&out.reports, &route, &gateway_ref())
        .and_then(|c| c.get(condition_type::ACCEPTED))
        .cloned()
        .expect("accepted reported");
    assert_eq!(accepted.status, ConditionStatus::False);
    assert_eq!(accepted.reason, reason::NO_MATCHING_LISTENER_HOSTNAME);
}

/// Story: Two HTTPS listeners on one port merge into one proxy listener with
/// an SNI chain per hostname and no virtual host leaking between them
#[test]
fn story_https_listeners_merge_by_port() {
    let store = ResourceStore::new();
    store.upsert(tls_secret(GATEWAY_NS, "east-cert", "east.com"));
    store.upsert(tls_secret(GATEWAY_NS, "west-cert", "west.com"));
    store.upsert(service("apps", "east"));
    store.upsert(service("apps", "west"));
    store.upsert(http_route("apps", "east", &["east.com"], vec![to_service(None, "east", 80)]));
    store.upsert(http_route("apps", "west", &["west.com"], vec![to_service(None, "west", 80)]));
    let gw = gateway(vec![
        https_listener("east", 443, "east.com", "east-cert"),
        https_listener("west", 443, "west.com", "west-cert"),
    ]);

    let resources = translate(&store, &gw).resources.expect("translated");
    assert_eq!(resources.listeners.len(), 1);
    let l = &resources.listeners[0];
    assert_eq!(l.name, "east~west");
    assert_eq!(l.address.port_value, 8443);
    assert!(l.listener_filters.iter().any(|f| f.name == TLS_INSPECTOR));

    assert_eq!(l.filter_chains.len(), 2);
    for (chain, host) in l.filter_chains.iter().zip(["east.com", "west.com"]) {
        let sni = chain.filter_chain_match.as_ref().expect("sni match");
        assert_eq!(sni.server_names, vec![host.to_string()]);
        assert!(chain.transport_socket.is_some());
        let NetworkFilterConfig::HttpConnectionManager(hcm) = &chain.filters[0].config else {
            panic!("expected connection manager");
        };
        assert_eq!(hcm.route_config_name, chain.name);
    }

    for rc in &resources.route_configs {
        let domains: Vec<&str> = rc
            .virtual_hosts
            .iter()
            .flat_map(|vh| vh.domains.iter().map(String::as_str))
            .collect();
        assert_eq!(domains, vec![format!("{}.com", rc.name)]);
        assert!(rc.virtual_hosts.iter().all(|vh| vh.require_tls == TlsRequirement::All));
    }
}

// =============================================================================
// Story Tests: Extension Refs
// =============================================================================

/// Story: A DirectResponse extension ref answers in place of the backend; a
/// second one on the same rule makes the route answer 500 and report
/// IncompatibleFilters
#[test]
fn story_direct_response_overrides_backend() {
    let store = ResourceStore::new();
    store.upsert(service("apps", "web"));
    store.upsert(direct_response("apps", "maintenance", 503));
    store.upsert(direct_response("apps", "teapot", 418));

    let mut rule = to_service(None, "web", 80);
    rule.filters.push(dr_filter("maintenance"));
    let single = http_route("apps", "single", &["single.example.com"], vec![rule]);
    store.upsert(single.clone());

    let double = http_route(
        "apps",
        "double",
        &["double.example.com"],
        vec![HttpRouteRule {
            filters: vec![dr_filter("maintenance"), dr_filter("teapot")],
            ..Default::default()
        }],
    );
    store.upsert(double.clone());

    let gw = gateway(vec![listener("http", 80, "HTTP", None)]);
    let out = translate(&store, &gw);
    let resources = out.resources.expect("translated");
    let vhost = |host: &str| {
        resources.route_configs[0]
            .virtual_hosts
            .iter()
            .find(|vh| vh.domains == vec![host.to_string()])
            .expect("vhost")
            .clone()
    };

    let single_route = &vhost("single.example.com").routes[0];
    assert!(matches!(
        &single_route.action,
        Some(RouteAction::DirectResponse(dr)) if dr.status == 503
    ));
    assert!(resources.clusters.is_empty());

    let double_route = &vhost("double.example.com").routes[0];
    assert!(matches!(
        &double_route.action,
        Some(RouteAction::DirectResponse(dr)) if dr.status == 500
    ));
    let accepted = route_conditions(&out.reports, &double, &gateway_ref())
        .and_then(|c| c.get(condition_type::ACCEPTED))
        .cloned()
        .expect("accepted reported");
    assert_eq!(accepted.status, ConditionStatus::False);
    assert_eq!(accepted.reason, reason::INCOMPATIBLE_FILTERS);

    let accepted = route_conditions(&out.reports, &single, &gateway_ref())
        .and_then(|c| c.get(condition_type::ACCEPTED))
        .map(|c| c.status);
    assert_eq!(accepted, Some(ConditionStatus::True));
}

// =============================================================================
// Story Tests: Delegation
// =============================================================================

/// Story: A delegation cycle A -> B -> A expands A into B's rules, reports the
/// cycle on the closing edge only, and terminates
#[test]
fn story_delegation_cycle_reported_on_back_edge() {
    let store = ResourceStore::new();
    store.upsert(service("apps", "api"));
    let a = http_route("apps", "a", &["api.example.com"], vec![delegate_to("b")]);
    let b = child_route(
        "apps",
        "b",
        vec![
            with_prefix(to_service(None, "api", 80), "/api"),
            with_prefix(delegate_to("a"), "/loop"),
        ],
    );
    store.upsert(a.clone());
    store.upsert(b.clone());

    let gw = gateway(vec![listener("http", 80, "HTTP", None)]);
    let out = translate(&store, &gw);
    let resources = out.resources.expect("translated");

    let routes = &resources.route_configs[0].virtual_hosts[0].routes;
    assert_eq!(routes.len(), 1);
    assert!(matches!(
        &routes[0].action,
        Some(RouteAction::Route(f)) if f.cluster == ClusterSpecifier::Cluster("apps-api-80".to_string())
    ));

    let back_edge = route_conditions(&out.reports, &b, &route_parent_ref("apps", "a"))
        .and_then(|c| c.get(condition_type::RESOLVED_REFS))
        .cloned()
        .expect("cycle reported on b");
    assert_eq!(back_edge.status, ConditionStatus::False);
    assert_eq!(back_edge.reason, reason::CYCLIC_REFERENCE);

    let root = route_conditions(&out.reports, &a, &gateway_ref())
        .and_then(|c| c.get(condition_type::RESOLVED_REFS))
        .map(|c| c.reason.clone());
    assert_ne!(root.as_deref(), Some(reason::CYCLIC_REFERENCE));
}
