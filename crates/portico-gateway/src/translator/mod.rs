//! Proxy translator: IR to listeners, route configurations and clusters
//!
//! A [`ProxyTranslator`] lowers one [`GatewayIr`]. It creates one
//! [`ProxyTranslationPass`] per registered policy kind and calls the pass
//! hooks in a fixed order for every listener:
//!
//! 1. listener policies on the emitted listener
//! 2. virtual host policies, Gateway scope first
//! 3. route policies, then backend policies of each forwarded backend
//! 4. HTTP, upstream HTTP and network filters of each HTTP filter chain
//!
//! After the last listener every pass contributes its extra clusters.

mod clusters;
mod filter_chain;
mod matchers;
mod route_config;
mod sanitize;
mod validate;

use std::collections::BTreeMap;

use portico_common::config::Settings;
use portico_common::crd::ConditionStatus;
use portico_common::GroupKind;
use tracing::{debug, warn};

use crate::extensions::{
    report_policy, ExtensionRegistry, FilterChainContext, ListenerContext, PluginError,
    ProxyTranslationPass, StagedHttpFilter,
};
use crate::gateway_api::Gateway;
use crate::ir::{GatewayIr, HttpFilterChainIr, ListenerIr};
use crate::proxy::{
    FilterChain, Listener, ListenerFilter, NetworkFilter, ProxyResources, RouteConfiguration,
    SocketAddress, TLS_INSPECTOR,
};
use crate::reports::{ReportMap, ReportedCondition};
use crate::wellknown::{condition_type, reason};

pub use clusters::{backend_cluster, blackhole_cluster, ClusterCollector};
pub use filter_chain::{http_connection_manager, ocsp_policy_name, DEFAULT_STAT_PREFIX};
pub use matchers::{route_match, METHOD_HEADER};
pub use route_config::{DROPPED_RULE_PREFIX, EXTENSION_REF_ERROR_STATUS, NO_ACTION_CAUSE};
pub use sanitize::sanitize_name;
pub use validate::{check_path, check_regex, validate_route, RouteValidationError};

use filter_chain::{filter_chain, hcm_filter, tcp_proxy_filter};

/// Lowers a Gateway's IR to proxy resources
pub struct ProxyTranslator<'a> {
    registry: &'a ExtensionRegistry,
    settings: &'a Settings,
    passes: BTreeMap<GroupKind, Box<dyn ProxyTranslationPass>>,
}

impl<'a> ProxyTranslator<'a> {
    /// Create a translator with a fresh pass per registered policy kind
    pub fn new(registry: &'a ExtensionRegistry, settings: &'a Settings) -> Self {
        let passes = registry
            .policy_plugins()
            .map(|plugin| (plugin.group_kind(), plugin.new_pass(settings)))
            .collect();
        Self {
            registry,
            settings,
            passes,
        }
    }

    /// Lower `ir`, recording listener, route and policy conditions in `reports`
    pub fn translate(mut self, gw: &Gateway, ir: &GatewayIr, reports: &mut ReportMap) -> ProxyResources {
        let registry = self.registry;
        let settings = self.settings;
        let mut clusters = ClusterCollector::new(registry, settings);
        let mut out = ProxyResources::default();

        for listener in &ir.listeners {
            let (emitted, route_configs) = self.listener(gw, ir, listener, &mut clusters, reports);
            out.listeners.push(emitted);
            out.route_configs.extend(route_configs);
        }

        let extra = self
            .passes
            .values_mut()
            .flat_map(|pass| pass.resources_to_add())
            .collect();
        out.clusters = clusters.finish(extra);

        debug!(
            listeners = out.listeners.len(),
            route_configs = out.route_configs.len(),
            clusters = out.clusters.len(),
            "translated gateway"
        );
        out
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    fn listener(
        &mut self,
        gw: &Gateway,
        ir: &GatewayIr,
        listener: &ListenerIr,
        clusters: &mut ClusterCollector<'_>,
        reports: &mut ReportMap,
    ) -> (Listener, Vec<RouteConfiguration>) {
        let mut out = Listener {
            name: sanitize_name(&listener.name).into_owned(),
            address: SocketAddress {
                address: listener.bind_address.clone(),
                port_value: listener.bind_port,
            },
            ..Default::default()
        };

        for (gk, atts) in listener.attached_policies.iter() {
            let Some(pass) = self.passes.get_mut(gk) else {
                warn!(policy_kind = %gk, listener = %listener.name, "no translation pass for attached policy");
                continue;
            };
            for att in atts {
                let ctx = ListenerContext {
                    listener,
                    policy: &att.policy,
                };
                let result = pass.apply_listener_plugin(&ctx, &mut out);
                if let Err(err) = &result {
                    warn!(policy = %att.policy.source, listener = %listener.name, error = %err, "listener policy failed");
                }
                report_policy(reports, att, &result);
            }
        }

        let mut route_configs = Vec::with_capacity(listener.http_filter_chains.len());
        for chain in &listener.http_filter_chains {
            route_configs.push(self.route_configuration(ir, listener, chain, clusters, reports));
            let emitted = self.http_filter_chain(gw, listener, chain, reports);
            out.filter_chains.push(emitted);
        }

        for chain in &listener.tcp_filter_chains {
            for backend in &chain.backends {
                clusters.add(backend, reports);
            }
            out.filter_chains.push(filter_chain(
                &chain.common,
                vec![tcp_proxy_filter(&chain.common.name, &chain.backends)],
            ));
        }

        if out.filter_chains.iter().any(|fc| fc.filter_chain_match.is_some()) {
            out.listener_filters.push(ListenerFilter {
                name: TLS_INSPECTOR.to_string(),
            });
        }
        (out, route_configs)
    }

    /// Connection manager filter chain, with filters from every pass
    ///
    /// A pass failure marks the Gateway listeners behind this listener as
    /// not programmed; the chain is still emitted with the filters that did
    /// succeed.
    fn http_filter_chain(
        &mut self,
        gw: &Gateway,
        listener: &ListenerIr,
        chain: &HttpFilterChainIr,
        reports: &mut ReportMap,
    ) -> FilterChain {
        let name = sanitize_name(&chain.common.name).into_owned();
        let mut http_filters = Vec::new();
        let mut upstream_filters = Vec::new();
        let mut network_filters = Vec::new();
        let mut errors = Vec::new();

        for (gk, pass) in self.passes.iter_mut() {
            let policies = chain.attached_policies.get(gk);
            let ctx = FilterChainContext {
                filter_chain: &chain.common,
                policies,
            };
            let result = collect_filters(
                pass.as_mut(),
                &ctx,
                &mut http_filters,
                &mut upstream_filters,
                &mut network_filters,
            );
            if let Err(err) = &result {
                warn!(pass = pass.name(), chain = %name, error = %err, "http plugin failed");
                errors.push(format!("{}: {err}", pass.name()));
            }
            for att in policies {
                report_policy(reports, att, &result);
            }
        }
        for (gk, _) in chain.attached_policies.iter() {
            if !self.passes.contains_key(gk) {
                warn!(policy_kind = %gk, chain = %name, "no translation pass for attached policy");
            }
        }

        if !errors.is_empty() {
            let message = format!("Error processing http plugin: {}", errors.join("; "));
            let report = reports.gateway(gw);
            for gateway_listener in &listener.gateway_listeners {
                report.listener(gateway_listener).set_condition(ReportedCondition::new(
                    condition_type::PROGRAMMED,
                    ConditionStatus::False,
                    reason::INVALID,
                    message.clone(),
                ));
            }
        }

        network_filters.push(hcm_filter(http_connection_manager(
            &name,
            http_filters,
            upstream_filters,
        )));
        filter_chain(&chain.common, network_filters)
    }
}

fn collect_filters(
    pass: &mut dyn ProxyTranslationPass,
    ctx: &FilterChainContext<'_>,
    http: &mut Vec<StagedHttpFilter>,
    upstream: &mut Vec<StagedHttpFilter>,
    network: &mut Vec<NetworkFilter>,
) -> Result<(), PluginError> {
    http.extend(pass.http_filters(ctx)?);
    upstream.extend(pass.upstream_http_filters(ctx)?);
    network.extend(pass.network_filters(ctx)?);
    Ok(())
}
