//! Route configuration lowering
//!
//! One route configuration per HTTP filter chain, one proxy route per rule
//! match. A route is built in a fixed order: match, redirect or forward
//! action, built-in filters, then policy passes (attached policies before
//! extension refs so the latter win). Routes that fail are dropped on their
//! own and reported on the route's parent ref.

use portico_common::crd::ConditionStatus;
use tracing::{debug, warn};

use super::clusters::ClusterCollector;
use super::filter_chain::cluster_specifier;
use super::matchers::route_match;
use super::validate::validate_route;
use super::{sanitize_name, ProxyTranslator};
use crate::extensions::{
    report_policy, PluginError, RouteBackendContext, RouteContext, VirtualHostContext,
};
use crate::gateway_api::{
    HttpHeaderFilter, HttpPathModifier, HttpPathModifierType, HttpRequestRedirectFilter,
    HttpRouteFilterType, HttpUrlRewriteFilter,
};
use crate::ir::{
    AttachedPolicies, GatewayIr, HttpFilterChainIr, HttpRouteRuleMatchIr, ListenerIr,
    VirtualHostIr,
};
use crate::proxy::{
    ClusterWeight, DirectResponseAction, ForwardAction, HeaderValueOption, RedirectAction,
    Route, RouteAction, RouteConfiguration, TlsRequirement, VirtualHost,
};
use crate::query::RouteObject;
use crate::reports::{ReportMap, ReportedCondition};
use crate::wellknown::{condition_type, reason};

/// Status of the response installed when an extension ref failed to resolve
pub const EXTENSION_REF_ERROR_STATUS: u16 = 500;

/// Redirect status when the filter sets none
pub const DEFAULT_REDIRECT_CODE: u16 = 302;

/// Message prefix of the condition reported for a dropped route
pub const DROPPED_RULE_PREFIX: &str = "Dropped Rule";

/// Cause reported for a rule that neither forwards, redirects nor answers
pub const NO_ACTION_CAUSE: &str = "no action specified";

fn header_changes(
    filter: &HttpHeaderFilter,
    add: &mut Vec<HeaderValueOption>,
    remove: &mut Vec<String>,
) {
    let option = |append: bool| {
        move |h: &crate::gateway_api::HttpHeader| HeaderValueOption {
            name: h.name.clone(),
            value: h.value.clone(),
            append,
        }
    };
    add.extend(filter.set.iter().map(option(false)));
    add.extend(filter.add.iter().map(option(true)));
    remove.extend(filter.remove.iter().cloned());
}

/// Split a path modifier into (full path, prefix)
fn path_modifier(path: &HttpPathModifier) -> (Option<String>, Option<String>) {
    match path.type_ {
        HttpPathModifierType::ReplaceFullPath => (path.replace_full_path.clone(), None),
        HttpPathModifierType::ReplacePrefixMatch => (None, path.replace_prefix_match.clone()),
    }
}

fn redirect_action(filter: &HttpRequestRedirectFilter) -> RedirectAction {
    let (path_redirect, prefix_rewrite) = filter.path.as_ref().map(path_modifier).unwrap_or_default();
    RedirectAction {
        scheme_redirect: filter.scheme.clone(),
        host_redirect: filter.hostname.clone(),
        port_redirect: filter.port,
        path_redirect,
        prefix_rewrite,
        response_code: filter.status_code.unwrap_or(DEFAULT_REDIRECT_CODE),
    }
}

fn apply_rewrite(filter: &HttpUrlRewriteFilter, action: &mut ForwardAction) {
    if let Some(hostname) = &filter.hostname {
        action.host_rewrite_literal = Some(hostname.clone());
    }
    if let Some(path) = &filter.path {
        let (full, prefix) = path_modifier(path);
        action.full_path_rewrite = full;
        action.prefix_rewrite = prefix;
    }
}

fn route_name(vhost: &str, position: usize, rule: &HttpRouteRuleMatchIr) -> String {
    let mut name = format!("{vhost}-route-{position}");
    if let Some(rule_name) = &rule.rule_name {
        name.push('-');
        name.push_str(rule_name);
    }
    name.push_str(&format!("-matcher-{}", rule.match_index));
    sanitize_name(&name).into_owned()
}

/// Report a dropped route; the cause is both the reason and the message body
fn drop_rule(reports: &mut ReportMap, rule: &HttpRouteRuleMatchIr, route: &str, cause: &str) {
    warn!(route = %route, source = %rule.route_source(), cause, "dropping route");
    reports.route(&RouteObject::Http(rule.route.clone())).set_condition(
        &rule.parent_ref,
        ReportedCondition::new(
            condition_type::PARTIALLY_INVALID,
            ConditionStatus::True,
            cause,
            format!("{DROPPED_RULE_PREFIX}: {cause}"),
        ),
    );
}

impl ProxyTranslator<'_> {
    // =========================================================================
    // Route configuration and virtual hosts
    // =========================================================================

    /// Route configuration served for an HTTP filter chain
    pub(super) fn route_configuration(
        &mut self,
        gateway: &GatewayIr,
        listener: &ListenerIr,
        chain: &HttpFilterChainIr,
        clusters: &mut ClusterCollector<'_>,
        reports: &mut ReportMap,
    ) -> RouteConfiguration {
        let virtual_hosts = chain
            .vhosts
            .iter()
            .map(|vhost| self.virtual_host(gateway, listener, chain, vhost, clusters, reports))
            .collect();
        RouteConfiguration {
            name: sanitize_name(&chain.common.name).into_owned(),
            virtual_hosts,
            ignore_port_in_host_matching: true,
            max_direct_response_body_size_bytes: u32::try_from(
                self.settings.max_direct_response_body_bytes,
            )
            .ok(),
        }
    }

    fn virtual_host(
        &mut self,
        gateway: &GatewayIr,
        listener: &ListenerIr,
        chain: &HttpFilterChainIr,
        vhost: &VirtualHostIr,
        clusters: &mut ClusterCollector<'_>,
        reports: &mut ReportMap,
    ) -> VirtualHost {
        let mut out = VirtualHost {
            name: vhost.name.clone(),
            domains: vec![vhost.hostname.clone()],
            routes: Vec::new(),
            require_tls: if chain.common.tls.is_some() {
                TlsRequirement::All
            } else {
                TlsRequirement::None
            },
            typed_per_filter_config: Default::default(),
        };

        // Outer scopes first so inner ones overwrite what they seeded.
        for scope in [
            &gateway.attached_policies,
            &listener.attached_policies,
            &vhost.attached_policies,
        ] {
            for (gk, atts) in scope.iter() {
                let Some(pass) = self.passes.get_mut(gk) else {
                    warn!(policy_kind = %gk, vhost = %vhost.name, "no translation pass for attached policy");
                    continue;
                };
                for att in atts {
                    let ctx = VirtualHostContext {
                        filter_chain: &chain.common,
                        vhost,
                        policy: &att.policy,
                    };
                    let result = pass.apply_vhost_plugin(&ctx, &mut out);
                    if let Err(err) = &result {
                        warn!(policy = %att.policy.source, vhost = %vhost.name, error = %err, "virtual host policy failed");
                    }
                    report_policy(reports, att, &result);
                }
            }
        }

        for (position, rule) in vhost.rules.iter().enumerate() {
            if let Some(route) = self.route(&out.name, position, rule, clusters, reports) {
                out.routes.push(route);
            }
        }
        out
    }

    // =========================================================================
    // Routes
    // =========================================================================

    /// Lower one rule match; `None` when the route is dropped
    fn route(
        &mut self,
        vhost: &str,
        position: usize,
        rule: &HttpRouteRuleMatchIr,
        clusters: &mut ClusterCollector<'_>,
        reports: &mut ReportMap,
    ) -> Option<Route> {
        let mut out = Route {
            name: route_name(vhost, position, rule),
            match_: route_match(&rule.match_),
            ..Default::default()
        };

        let extension_sets_action = rule.extension_refs.iter().any(|(gk, atts)| {
            !atts.is_empty()
                && self
                    .registry
                    .policy_plugin(gk)
                    .is_some_and(|plugin| plugin.sets_action())
        });

        let mut redirect = None;
        let mut rewrite = None;
        for filter in &rule.filters {
            match filter.type_ {
                HttpRouteFilterType::RequestRedirect => redirect = filter.request_redirect.as_ref(),
                HttpRouteFilterType::UrlRewrite => rewrite = filter.url_rewrite.as_ref(),
                HttpRouteFilterType::RequestHeaderModifier => {
                    if let Some(headers) = &filter.request_header_modifier {
                        header_changes(
                            headers,
                            &mut out.request_headers_to_add,
                            &mut out.request_headers_to_remove,
                        );
                    }
                }
                HttpRouteFilterType::ResponseHeaderModifier => {
                    if let Some(headers) = &filter.response_header_modifier {
                        header_changes(
                            headers,
                            &mut out.response_headers_to_add,
                            &mut out.response_headers_to_remove,
                        );
                    }
                }
                HttpRouteFilterType::RequestMirror | HttpRouteFilterType::ExtensionRef => {
                    debug!(route = %out.name, filter = ?filter.type_, "filter not translated");
                }
            }
        }

        if let Some(redirect) = redirect {
            out.action = Some(RouteAction::Redirect(redirect_action(redirect)));
        } else if !rule.backends.is_empty() && !extension_sets_action {
            let weights = self.backend_weights(rule, reports);
            let mut action = ForwardAction::new(cluster_specifier(weights));
            if let Some(rewrite) = rewrite {
                apply_rewrite(rewrite, &mut action);
            }
            out.action = Some(RouteAction::Route(action));
        }
        if rewrite.is_some() && !matches!(out.action, Some(RouteAction::Route(_))) {
            debug!(route = %out.name, "URL rewrite ignored on a route that does not forward");
        }

        let (incompatible, errors) = self.apply_route_policies(rule, &mut out, reports);

        if !rule.extension_ref_errors.is_empty() {
            out.action = Some(RouteAction::DirectResponse(DirectResponseAction {
                status: EXTENSION_REF_ERROR_STATUS,
                body: None,
            }));
        }

        if let Some(message) = incompatible {
            reports.route(&RouteObject::Http(rule.route.clone())).set_condition(
                &rule.parent_ref,
                ReportedCondition::new(
                    condition_type::ACCEPTED,
                    ConditionStatus::False,
                    reason::INCOMPATIBLE_FILTERS,
                    message,
                ),
            );
        } else if !errors.is_empty() {
            drop_rule(reports, rule, &out.name, &errors.join("; "));
            return None;
        }

        if let Err(err) = validate_route(&out, self.settings.regex_max_program_size) {
            drop_rule(reports, rule, &out.name, &err.to_string());
            return None;
        }

        match &out.action {
            Some(RouteAction::Route(_)) => {
                for backend in &rule.backends {
                    clusters.add(backend, reports);
                }
            }
            Some(_) => {}
            None if rule.has_unusable_backends => {
                debug!(route = %out.name, "route kept without action; its backends are unusable");
            }
            None => {
                drop_rule(reports, rule, &out.name, NO_ACTION_CAUSE);
                return None;
            }
        }
        Some(out)
    }

    /// Run attached policies, then extension refs, over a route
    ///
    /// Returns the incompatible-filters message, if any policy raised one,
    /// and every other failure.
    fn apply_route_policies(
        &mut self,
        rule: &HttpRouteRuleMatchIr,
        out: &mut Route,
        reports: &mut ReportMap,
    ) -> (Option<String>, Vec<String>) {
        let mut incompatible = None;
        let mut errors = Vec::new();
        let scopes: [&AttachedPolicies; 2] = [&rule.attached_policies, &rule.extension_refs];
        for scope in scopes {
            for (gk, atts) in scope.iter() {
                let Some(pass) = self.passes.get_mut(gk) else {
                    warn!(policy_kind = %gk, route = %out.name, "no translation pass for attached policy");
                    continue;
                };
                for att in atts {
                    let ctx = RouteContext {
                        rule,
                        policy: &att.policy,
                    };
                    let result = pass.apply_for_route(&ctx, out);
                    match &result {
                        Ok(()) => {}
                        Err(err @ PluginError::IncompatibleFilters { .. }) => {
                            incompatible = Some(err.to_string());
                        }
                        Err(err) => {
                            errors.push(format!("{}: {err}", att.policy.source.namespaced_name()));
                        }
                    }
                    report_policy(reports, att, &result);
                }
            }
        }
        (incompatible, errors)
    }

    /// Weighted cluster entries for a rule's backends, with backend filters
    /// and backend policies applied
    fn backend_weights(&mut self, rule: &HttpRouteRuleMatchIr, reports: &mut ReportMap) -> Vec<ClusterWeight> {
        let mut weights = Vec::with_capacity(rule.backends.len());
        for backend in &rule.backends {
            let mut weight = ClusterWeight::new(sanitize_name(&backend.cluster_name), backend.weight);
            for filter in &backend.filters {
                match (&filter.type_, &filter.request_header_modifier) {
                    (HttpRouteFilterType::RequestHeaderModifier, Some(headers)) => header_changes(
                        headers,
                        &mut weight.request_headers_to_add,
                        &mut weight.request_headers_to_remove,
                    ),
                    _ => debug!(cluster = %weight.name, filter = ?filter.type_, "backend filter not translated"),
                }
            }
            for (gk, atts) in backend.attached_policies.iter() {
                let Some(pass) = self.passes.get_mut(gk) else {
                    warn!(policy_kind = %gk, cluster = %weight.name, "no translation pass for backend policy");
                    continue;
                };
                for att in atts {
                    let ctx = RouteBackendContext {
                        backend,
                        policy: &att.policy,
                    };
                    let result = pass.apply_for_route_backend(&ctx, &mut weight);
                    if let Err(err) = &result {
                        warn!(policy = %att.policy.source, cluster = %weight.name, error = %err, "backend policy failed");
                    }
                    report_policy(reports, att, &result);
                }
            }
            weights.push(weight);
        }
        weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway_api::HttpHeader;

    #[test]
    fn test_header_changes_set_add_remove() {
        let filter = HttpHeaderFilter {
            set: vec![HttpHeader {
                name: "x-env".to_string(),
                value: "prod".to_string(),
            }],
            add: vec![HttpHeader {
                name: "x-trace".to_string(),
                value: "1".to_string(),
            }],
            remove: vec!["x-internal".to_string()],
        };
        let mut add = Vec::new();
        let mut remove = Vec::new();
        header_changes(&filter, &mut add, &mut remove);
        assert_eq!(add.len(), 2);
        assert!(!add[0].append);
        assert!(add[1].append);
        assert_eq!(remove, vec!["x-internal"]);
    }

    #[test]
    fn test_redirect_defaults_to_302() {
        let filter = HttpRequestRedirectFilter {
            scheme: Some("https".to_string()),
            hostname: None,
            path: Some(HttpPathModifier {
                type_: HttpPathModifierType::ReplacePrefixMatch,
                replace_full_path: None,
                replace_prefix_match: Some("/v2".to_string()),
            }),
            port: None,
            status_code: None,
        };
        let action = redirect_action(&filter);
        assert_eq!(action.response_code, DEFAULT_REDIRECT_CODE);
        assert_eq!(action.prefix_rewrite.as_deref(), Some("/v2"));
        assert!(action.path_redirect.is_none());
        assert_eq!(action.scheme_redirect.as_deref(), Some("https"));
    }

    #[test]
    fn test_rewrite_sets_host_and_full_path() {
        let mut action = ForwardAction::new(crate::proxy::ClusterSpecifier::Cluster("c".to_string()));
        apply_rewrite(
            &HttpUrlRewriteFilter {
                hostname: Some("internal.example.com".to_string()),
                path: Some(HttpPathModifier {
                    type_: HttpPathModifierType::ReplaceFullPath,
                    replace_full_path: Some("/index".to_string()),
                    replace_prefix_match: None,
                }),
            },
            &mut action,
        );
        assert_eq!(action.host_rewrite_literal.as_deref(), Some("internal.example.com"));
        assert_eq!(action.full_path_rewrite.as_deref(), Some("/index"));
        assert!(action.prefix_rewrite.is_none());
    }
}
