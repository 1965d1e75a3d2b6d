//! Route flattening and virtual host grouping
//!
//! Every `HTTPRouteMatch` of every rule becomes one [`HttpRouteRuleMatchIr`].
//! A rule that delegates contributes the flattened rules of its children
//! instead of its own, unless it also has backends of its own. Children
//! inherit the delegating rule's policies, and theirs are applied after, so
//! the child wins.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use portico_common::{GroupKind, ObjectSource};
use tracing::{debug, warn};

use super::listeners::{backend_weight, ValidListener};
use super::{Cancelled, GatewayIrBuilder};
use crate::backend_map::BackendRefKey;
use crate::gateway_api::{
    HttpBackendRef, HttpRouteFilter, HttpRouteFilterType, HttpRouteMatch, HttpRouteRule,
    LocalObjectReference,
};
use crate::ir::{
    AttachedPolicies, AttachmentPoint, BackendObjectIr, BackendRefIr, HttpRouteRuleMatchIr,
    PolicyAtt, PolicyIr, VirtualHostIr,
};
use crate::query::{by_age, QueryError, RouteInfo};
use crate::reports::ReportMap;
use crate::translator::sanitize_name;
use crate::wellknown::BLACKHOLE_CLUSTER_NAME;

/// Host every route without hostnames is served under
pub const DEFAULT_HOST: &str = "*";

#[derive(Default)]
struct HostRules {
    rules: Vec<HttpRouteRuleMatchIr>,
    seen: BTreeSet<(ObjectSource, usize, usize)>,
    listeners: Vec<String>,
}

/// Filters of a rule after ExtensionRef resolution
#[derive(Default)]
struct RuleFilters {
    filters: Vec<HttpRouteFilter>,
    extension_refs: AttachedPolicies,
    errors: Vec<String>,
}

/// Specificity order of rules within a virtual host
///
/// Path kind, then longer paths, more header matches, more query matches,
/// older routes, and finally route namespace and name. Ties keep rule order.
pub fn compare_rules(a: &HttpRouteRuleMatchIr, b: &HttpRouteRuleMatchIr) -> Ordering {
    let (a_kind, a_path) = a.path();
    let (b_kind, b_path) = b.path();
    a_kind
        .cmp(&b_kind)
        .then_with(|| b_path.len().cmp(&a_path.len()))
        .then_with(|| b.match_.headers.len().cmp(&a.match_.headers.len()))
        .then_with(|| b.match_.query_params.len().cmp(&a.match_.query_params.len()))
        .then_with(|| by_age(a.created_at, b.created_at))
        .then_with(|| {
            let a_route = a.route_source();
            let b_route = b.route_source();
            (a_route.namespace, a_route.name).cmp(&(b_route.namespace, b_route.name))
        })
}

impl GatewayIrBuilder<'_> {
    // =========================================================================
    // Virtual hosts
    // =========================================================================

    /// Group the routes of `parents` into virtual hosts named after `prefix`
    ///
    /// Hosts are ordered most specific first: longer hostnames, then
    /// alphabetically, so `*` comes last.
    pub(super) fn build_vhosts(
        &self,
        prefix: &str,
        parents: &[(&ValidListener<'_>, Vec<&RouteInfo>)],
        reports: &mut ReportMap,
    ) -> Result<Vec<VirtualHostIr>, Cancelled> {
        let mut hosts: BTreeMap<String, HostRules> = BTreeMap::new();
        for (valid, routes) in parents {
            let listener = &valid.listener.name;
            for info in routes {
                let mut rules = Vec::new();
                self.flatten(info, &AttachedPolicies::default(), &mut rules, reports)?;
                if rules.is_empty() {
                    continue;
                }
                let hostnames = if info.hostnames.is_empty() {
                    vec![DEFAULT_HOST.to_string()]
                } else {
                    info.hostnames.clone()
                };
                for host in hostnames {
                    let entry = hosts.entry(host).or_default();
                    if !entry.listeners.contains(listener) {
                        entry.listeners.push(listener.clone());
                    }
                    for rule in &rules {
                        let key = (rule.route_source(), rule.rule_index, rule.match_index);
                        if entry.seen.insert(key) {
                            entry.rules.push(rule.clone());
                        }
                    }
                }
            }
        }

        let mut entries: Vec<(String, HostRules)> = hosts.into_iter().collect();
        entries.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut names = BTreeSet::new();
        let mut vhosts = Vec::with_capacity(entries.len());
        for (hostname, mut entry) in entries {
            let name = sanitize_name(&format!("{prefix}~{hostname}")).into_owned();
            if !names.insert(name.clone()) {
                warn!(vhost = %name, %hostname, "virtual host name already used in filter chain");
                continue;
            }
            entry.rules.sort_by(compare_rules);

            let mut attached_policies = AttachedPolicies::default();
            for listener in &entry.listeners {
                self.attach(
                    AttachmentPoint::VirtualHost,
                    &self.source,
                    Some(listener),
                    &self.gateway_ref(Some(listener)),
                    &mut attached_policies,
                );
            }
            vhosts.push(VirtualHostIr {
                name,
                hostname,
                rules: entry.rules,
                attached_policies,
            });
        }
        Ok(vhosts)
    }

    // =========================================================================
    // Flattening
    // =========================================================================

    /// Append the rule matches of `info` and its delegated children to `out`
    fn flatten(
        &self,
        info: &RouteInfo,
        inherited: &AttachedPolicies,
        out: &mut Vec<HttpRouteRuleMatchIr>,
        reports: &mut ReportMap,
    ) -> Result<(), Cancelled> {
        let Some(route) = info.object.as_http() else {
            return Ok(());
        };
        let source = info.object.source();

        // Touch the parent so the route gets status even if every rule drops.
        reports.route(&info.object).parent_ref(&info.parent_ref);
        for err in &info.delegation_errors {
            reports.route(&info.object).set_error(&info.parent_ref, err);
        }

        let mut route_policies = inherited.clone();
        self.attach(
            AttachmentPoint::Route,
            &source,
            None,
            &self.gateway_ref(None),
            &mut route_policies,
        );

        for (rule_index, rule) in route.spec.rules.iter().enumerate() {
            self.check_cancelled()?;

            let mut rule_policies = route_policies.clone();
            if let Some(rule_name) = &rule.name {
                self.attach(
                    AttachmentPoint::Route,
                    &source,
                    Some(rule_name),
                    &self.gateway_ref(None),
                    &mut rule_policies,
                );
            }

            let mut delegates = false;
            let mut has_unusable_backends = false;
            let mut backends = Vec::new();
            for br in &rule.backend_refs {
                let key = BackendRefKey::new(&br.backend, &source.namespace);
                if let Some(children) = info.children.get(&key) {
                    delegates = true;
                    match children {
                        Ok(children) => {
                            for child in children {
                                self.flatten(child, &rule_policies, out, reports)?;
                            }
                        }
                        Err(err) => reports.route(&info.object).set_error(&info.parent_ref, err),
                    }
                    continue;
                }

                match info.backends.get(&key) {
                    Some(Ok(backend)) => {
                        backends.push(self.backend_ref(backend, br, info, reports));
                    }
                    Some(Err(err)) => {
                        reports.route(&info.object).set_error(&info.parent_ref, err);
                        if matches!(err, QueryError::UnsupportedValue { .. }) {
                            has_unusable_backends = true;
                        } else {
                            backends.push(BackendRefIr {
                                cluster_name: BLACKHOLE_CLUSTER_NAME.to_string(),
                                backend: None,
                                weight: backend_weight(br.weight),
                                ..Default::default()
                            });
                        }
                    }
                    None => debug!(route = %source, backend = %key, "backend ref was not resolved"),
                }
            }

            if delegates && backends.is_empty() && !has_unusable_backends {
                continue;
            }

            let filters = self.rule_filters(rule, info, reports);
            let matches = if rule.matches.is_empty() {
                vec![HttpRouteMatch::default()]
            } else {
                rule.matches.clone()
            };
            for (match_index, match_) in matches.into_iter().enumerate() {
                out.push(HttpRouteRuleMatchIr {
                    route: route.clone(),
                    parent_ref: info.parent_ref.clone(),
                    rule_name: rule.name.clone(),
                    rule_index,
                    match_index,
                    match_,
                    filters: filters.filters.clone(),
                    backends: backends.clone(),
                    has_unusable_backends,
                    attached_policies: rule_policies.clone(),
                    extension_refs: filters.extension_refs.clone(),
                    extension_ref_errors: filters.errors.clone(),
                    created_at: info.object.created_at(),
                });
            }
        }
        Ok(())
    }

    fn backend_ref(
        &self,
        backend: &BackendObjectIr,
        br: &HttpBackendRef,
        info: &RouteInfo,
        reports: &mut ReportMap,
    ) -> BackendRefIr {
        let mut out = BackendRefIr {
            cluster_name: backend.cluster_name.clone(),
            backend: Some(backend.clone()),
            weight: backend_weight(br.weight),
            ..Default::default()
        };
        let namespace = info.object.namespace();
        for filter in &br.filters {
            if filter.type_ != HttpRouteFilterType::ExtensionRef {
                out.filters.push(filter.clone());
                continue;
            }
            let resolved = self.resolve_extension_ref(
                filter.extension_ref.as_ref(),
                &namespace,
                Some(AttachmentPoint::HttpBackendRef),
            );
            match resolved {
                Ok(policy) => out.attached_policies.push(PolicyAtt {
                    policy,
                    ancestor: Some(self.gateway_ref(None)),
                }),
                Err(err) => {
                    warn!(route = %info.object.source(), error = %err, "backend extension ref unresolved");
                    reports.route(&info.object).set_error(&info.parent_ref, &err);
                }
            }
        }
        out
    }

    // =========================================================================
    // ExtensionRef filters
    // =========================================================================

    fn rule_filters(&self, rule: &HttpRouteRule, info: &RouteInfo, reports: &mut ReportMap) -> RuleFilters {
        let namespace = info.object.namespace();
        let mut out = RuleFilters::default();
        for filter in &rule.filters {
            if filter.type_ != HttpRouteFilterType::ExtensionRef {
                out.filters.push(filter.clone());
                continue;
            }
            match self.resolve_extension_ref(filter.extension_ref.as_ref(), &namespace, None) {
                Ok(policy) => out.extension_refs.push(PolicyAtt {
                    policy,
                    ancestor: Some(self.gateway_ref(None)),
                }),
                Err(err) => {
                    warn!(route = %info.object.source(), error = %err, "extension ref unresolved");
                    reports.route(&info.object).set_error(&info.parent_ref, &err);
                    out.errors.push(err.to_string());
                }
            }
        }
        out
    }

    /// Look up the policy an ExtensionRef names
    ///
    /// With `point` set, the policy kind must also attach there.
    fn resolve_extension_ref(
        &self,
        ext: Option<&LocalObjectReference>,
        namespace: &str,
        point: Option<AttachmentPoint>,
    ) -> Result<PolicyIr, QueryError> {
        let Some(ext) = ext else {
            return Err(QueryError::UnsupportedValue {
                message: "ExtensionRef filter without extensionRef".to_string(),
            });
        };
        let gk = GroupKind::new(&ext.group, ext.kind.clone());
        let plugin = self
            .ctx
            .queries
            .registry()
            .policy_plugin(&gk)
            .filter(|p| point.is_none_or(|point| p.attachment_points().contains(&point)))
            .ok_or_else(|| QueryError::InvalidKind {
                group_kind: gk.to_string(),
            })?;
        plugin
            .fetch_by_name(self.snapshot(), namespace, &ext.name)
            .ok_or_else(|| QueryError::NotFound {
                target: ObjectSource::new(gk, namespace, &ext.name).resource_name(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{build, created_at, gateway, http_route, listener, service, to_service};
    use super::*;
    use crate::gateway_api::{
        BackendObjectReference, HttpHeaderMatch, HttpPathMatch, HttpRoute, ParentReference,
        PathMatchType,
    };
    use crate::ir::PathKind;
    use crate::query::RouteObject;
    use crate::store::ResourceStore;
    use crate::wellknown::{
        condition_type, reason, DIRECT_RESPONSE_KIND, GATEWAY_GROUP, HTTP_ROUTE_KIND,
        PORTICO_GROUP, ROUTE_POLICY_KIND,
    };
    use portico_common::crd::{
        DirectResponseRoute, DirectResponseRouteSpec, LocalPolicyTargetReference,
        RoutePolicy, RoutePolicySpec,
    };
    use std::sync::Arc;

    fn path(type_: PathMatchType, value: &str) -> HttpRouteMatch {
        HttpRouteMatch {
            path: Some(HttpPathMatch {
                type_: Some(type_),
                value: Some(value.to_string()),
            }),
            ..Default::default()
        }
    }

    fn delegate(ns: Option<&str>, name: &str) -> HttpRouteRule {
        HttpRouteRule {
            backend_refs: vec![HttpBackendRef::from(BackendObjectReference {
                group: Some(GATEWAY_GROUP.to_string()),
                kind: Some(HTTP_ROUTE_KIND.to_string()),
                name: name.to_string(),
                namespace: ns.map(String::from),
                port: None,
            })],
            ..Default::default()
        }
    }

    fn child(ns: &str, name: &str, rules: Vec<HttpRouteRule>) -> HttpRoute {
        let mut route = http_route(ns, name, &[], rules);
        route.spec.parent_refs.clear();
        route
    }

    fn route_policy(name: &str, target: &str, section: Option<&str>, timeout: u32) -> RoutePolicy {
        let mut p = RoutePolicy::new(
            name,
            RoutePolicySpec {
                target_refs: vec![LocalPolicyTargetReference {
                    group: GATEWAY_GROUP.to_string(),
                    kind: HTTP_ROUTE_KIND.to_string(),
                    name: target.to_string(),
                    section_name: section.map(String::from),
                }],
                timeout: Some(timeout),
            },
        );
        p.metadata.namespace = Some("default".to_string());
        p
    }

    fn rules_of(ir: &crate::ir::GatewayIr) -> &[HttpRouteRuleMatchIr] {
        &ir.listeners[0].http_filter_chains[0].vhosts[0].rules
    }

    fn resolved_refs(reports: &ReportMap, route: &HttpRoute, parent: &ParentReference) -> Option<String> {
        let source = RouteObject::Http(Arc::new(route.clone())).source();
        reports
            .route_report(&source)
            .and_then(|r| r.get(parent))
            .and_then(|c| c.get(condition_type::RESOLVED_REFS))
            .map(|c| c.reason.clone())
    }

    fn http_gateway() -> crate::gateway_api::Gateway {
        gateway(vec![listener("web", 80, "HTTP", None)])
    }

    // =========================================================================
    // Story Tests: Flattening
    // =========================================================================

    /// Story: A rule without matches serves prefix `/` under host `*`
    #[test]
    fn story_rule_without_matches_defaults() {
        let store = ResourceStore::new();
        store.upsert(service("default", "web"));
        store.upsert(http_route("default", "r", &[], vec![to_service("web", 8080)]));

        let (ir, _) = build(&store.snapshot(), &http_gateway());
        let ir = ir.expect("not cancelled");
        let vhost = &ir.listeners[0].http_filter_chains[0].vhosts[0];
        assert_eq!(vhost.hostname, DEFAULT_HOST);
        assert_eq!(vhost.name, "web~*");
        assert_eq!(vhost.rules.len(), 1);
        assert_eq!(vhost.rules[0].path(), (PathKind::Prefix, "/".to_string()));
        assert_eq!(vhost.rules[0].backends[0].cluster_name, "default-web-8080");
    }

    /// Story: Each match of a rule becomes its own entry
    #[test]
    fn story_matches_flatten() {
        let store = ResourceStore::new();
        store.upsert(service("default", "web"));
        let mut rule = to_service("web", 8080);
        rule.matches = vec![
            path(PathMatchType::PathPrefix, "/api"),
            path(PathMatchType::Exact, "/health"),
        ];
        store.upsert(http_route("default", "r", &["example.com"], vec![rule]));

        let (ir, _) = build(&store.snapshot(), &http_gateway());
        let ir = ir.expect("not cancelled");
        let rules = rules_of(&ir);
        let indexes: Vec<usize> = rules.iter().map(|r| r.match_index).collect();
        // Exact sorts ahead of prefix
        assert_eq!(indexes, vec![1, 0]);
    }

    /// Story: A backend that cannot be resolved sends traffic to the blackhole
    #[test]
    fn story_missing_backend_goes_to_blackhole() {
        let store = ResourceStore::new();
        let route = http_route("default", "r", &[], vec![to_service("gone", 80)]);
        store.upsert(route.clone());

        let (ir, reports) = build(&store.snapshot(), &http_gateway());
        let ir = ir.expect("not cancelled");
        let rule = &rules_of(&ir)[0];
        assert_eq!(rule.backends[0].cluster_name, BLACKHOLE_CLUSTER_NAME);
        assert!(rule.backends[0].backend.is_none());
        assert_eq!(
            resolved_refs(&reports, &route, &route.spec.parent_refs[0]).as_deref(),
            Some(reason::BACKEND_NOT_FOUND)
        );
    }

    /// Story: A zero port keeps the route but marks it as having no usable backend
    #[test]
    fn story_zero_port_is_unusable() {
        let store = ResourceStore::new();
        store.upsert(service("default", "web"));
        let route = http_route("default", "r", &[], vec![to_service("web", 0)]);
        store.upsert(route.clone());

        let (ir, reports) = build(&store.snapshot(), &http_gateway());
        let ir = ir.expect("not cancelled");
        let rule = &rules_of(&ir)[0];
        assert!(rule.backends.is_empty());
        assert!(rule.has_unusable_backends);
        assert_eq!(
            resolved_refs(&reports, &route, &route.spec.parent_refs[0]).as_deref(),
            Some(reason::UNSUPPORTED_VALUE)
        );
    }

    // =========================================================================
    // Story Tests: Delegation
    // =========================================================================

    /// Story: A delegating rule is replaced by its child's rules
    #[test]
    fn story_delegation_expands_children() {
        let store = ResourceStore::new();
        store.upsert(service("default", "web"));
        store.upsert(http_route("default", "parent", &[], vec![delegate(None, "child")]));
        store.upsert(child("default", "child", vec![to_service("web", 8080)]));

        let (ir, _) = build(&store.snapshot(), &http_gateway());
        let ir = ir.expect("not cancelled");
        let rules = rules_of(&ir);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].route_source().name, "child");
        assert_eq!(rules[0].parent_ref.kind.as_deref(), Some(HTTP_ROUTE_KIND));
        assert_eq!(rules[0].parent_ref.name, "parent");
    }

    /// Story: A delegation cycle is reported on the edge that closes it
    #[test]
    fn story_cycle_reported_on_back_edge() {
        let store = ResourceStore::new();
        let a = http_route("default", "a", &[], vec![delegate(None, "b")]);
        let b = child("default", "b", vec![delegate(None, "a")]);
        store.upsert(a.clone());
        store.upsert(b.clone());

        let (ir, reports) = build(&store.snapshot(), &http_gateway());
        let ir = ir.expect("not cancelled");
        assert!(ir.listeners[0].http_filter_chains[0].vhosts.is_empty());

        let edge = ParentReference {
            group: Some(GATEWAY_GROUP.to_string()),
            kind: Some(HTTP_ROUTE_KIND.to_string()),
            namespace: Some("default".to_string()),
            name: "a".to_string(),
            section_name: None,
            port: None,
        };
        assert_eq!(
            resolved_refs(&reports, &b, &edge).as_deref(),
            Some(reason::CYCLIC_REFERENCE)
        );
    }

    /// Story: Child policies are applied after the delegating route's
    #[test]
    fn story_child_policies_follow_parent() {
        let store = ResourceStore::new();
        store.upsert(service("default", "web"));
        store.upsert(http_route("default", "parent", &[], vec![delegate(None, "child")]));
        store.upsert(child("default", "child", vec![to_service("web", 8080)]));
        store.upsert(route_policy("outer", "parent", None, 30));
        store.upsert(route_policy("inner", "child", None, 5));

        let (ir, _) = build(&store.snapshot(), &http_gateway());
        let ir = ir.expect("not cancelled");
        let gk = GroupKind::new(PORTICO_GROUP, ROUTE_POLICY_KIND);
        let names: Vec<&str> = rules_of(&ir)[0]
            .attached_policies
            .get(&gk)
            .iter()
            .map(|a| a.policy.source.name.as_str())
            .collect();
        assert_eq!(names, vec!["outer", "inner"]);
    }

    #[test]
    fn test_rule_section_policy_attaches_to_named_rule_only() {
        let store = ResourceStore::new();
        store.upsert(service("default", "web"));
        let mut named = to_service("web", 8080);
        named.name = Some("slow".to_string());
        named.matches = vec![path(PathMatchType::PathPrefix, "/slow")];
        store.upsert(http_route("default", "r", &[], vec![named, to_service("web", 8080)]));
        store.upsert(route_policy("p", "r", Some("slow"), 60));

        let (ir, _) = build(&store.snapshot(), &http_gateway());
        let ir = ir.expect("not cancelled");
        let gk = GroupKind::new(PORTICO_GROUP, ROUTE_POLICY_KIND);
        let rules = rules_of(&ir);
        let slow = rules.iter().find(|r| r.rule_name.as_deref() == Some("slow")).expect("slow rule");
        let other = rules.iter().find(|r| r.rule_name.is_none()).expect("other rule");
        assert_eq!(slow.attached_policies.get(&gk).len(), 1);
        assert!(other.attached_policies.get(&gk).is_empty());
    }

    // =========================================================================
    // Story Tests: Extension Refs
    // =========================================================================

    /// Story: Extension refs resolve by name; unknown ones are reported
    #[test]
    fn story_extension_refs_resolve() {
        let store = ResourceStore::new();
        let mut dr = DirectResponseRoute::new(
            "teapot",
            DirectResponseRouteSpec {
                status: 418,
                body: None,
            },
        );
        dr.metadata.namespace = Some("default".to_string());
        store.upsert(dr);

        let rule = HttpRouteRule {
            filters: vec![
                HttpRouteFilter::extension_ref(PORTICO_GROUP, DIRECT_RESPONSE_KIND, "teapot"),
                HttpRouteFilter::extension_ref(PORTICO_GROUP, DIRECT_RESPONSE_KIND, "missing"),
                HttpRouteFilter::extension_ref("example.com", "Widget", "w"),
            ],
            ..Default::default()
        };
        let route = http_route("default", "r", &[], vec![rule]);
        store.upsert(route.clone());

        let (ir, reports) = build(&store.snapshot(), &http_gateway());
        let ir = ir.expect("not cancelled");
        let rule = &rules_of(&ir)[0];
        let gk = GroupKind::new(PORTICO_GROUP, DIRECT_RESPONSE_KIND);
        assert_eq!(rule.extension_refs.get(&gk).len(), 1);
        assert_eq!(rule.extension_ref_errors.len(), 2);
        // The last error reported wins the ResolvedRefs condition
        assert_eq!(
            resolved_refs(&reports, &route, &route.spec.parent_refs[0]).as_deref(),
            Some(reason::INVALID_KIND)
        );
    }

    // =========================================================================
    // Story Tests: Virtual Hosts
    // =========================================================================

    /// Story: Virtual hosts are ordered by hostname specificity
    #[test]
    fn story_vhosts_sorted_by_specificity() {
        let store = ResourceStore::new();
        store.upsert(service("default", "web"));
        store.upsert(http_route(
            "default",
            "r",
            &["a.example.com", "*.example.com", "api.example.com"],
            vec![to_service("web", 8080)],
        ));
        store.upsert(http_route("default", "any", &[], vec![to_service("web", 8080)]));

        let (ir, _) = build(&store.snapshot(), &http_gateway());
        let ir = ir.expect("not cancelled");
        let hosts: Vec<&str> = ir.listeners[0].http_filter_chains[0]
            .vhosts
            .iter()
            .map(|v| v.hostname.as_str())
            .collect();
        assert_eq!(hosts, vec!["api.example.com", "*.example.com", "a.example.com", "*"]);
    }

    #[test]
    fn test_rule_order_specificity_then_age() {
        let store = ResourceStore::new();
        store.upsert(service("default", "web"));
        let mut headers = to_service("web", 8080);
        headers.matches = vec![HttpRouteMatch {
            headers: vec![HttpHeaderMatch {
                type_: None,
                name: "x-canary".to_string(),
                value: "1".to_string(),
            }],
            ..path(PathMatchType::PathPrefix, "/api")
        }];
        let mut plain = to_service("web", 8080);
        plain.matches = vec![path(PathMatchType::PathPrefix, "/api")];
        let mut longer = to_service("web", 8080);
        longer.matches = vec![path(PathMatchType::PathPrefix, "/api/v2")];
        store.upsert(created_at(http_route("default", "young", &[], vec![plain.clone()]), 10));
        store.upsert(created_at(http_route("default", "old", &[], vec![plain, headers, longer]), 0));

        let (ir, _) = build(&store.snapshot(), &http_gateway());
        let ir = ir.expect("not cancelled");
        let order: Vec<(String, usize)> = rules_of(&ir)
            .iter()
            .map(|r| (r.route_source().name, r.rule_index))
            .collect();
        assert_eq!(
            order,
            vec![
                ("old".to_string(), 2),
                ("old".to_string(), 1),
                ("old".to_string(), 0),
                ("young".to_string(), 0),
            ]
        );
    }
}
