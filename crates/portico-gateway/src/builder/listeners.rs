//! Listener validation, TLS resolution and per-port merging

use std::collections::BTreeMap;

use portico_common::config::OcspStaplePolicy;
use tracing::{debug, warn};

use super::{Cancelled, GatewayIrBuilder};
use crate::backend_map::BackendRefKey;
use crate::gateway_api::{Listener, ParentReference, RouteGroupKind, TlsMode};
use crate::ir::{
    AttachmentPoint, BackendRefIr, FilterChainCommon, HttpFilterChainIr, ListenerIr,
    TcpFilterChainIr,
};
use crate::parent_ref;
use crate::query::{by_age, QueryError, RouteInfo, RoutesForGateway};
use crate::reports::{ListenerReport, ReportMap, ReportedCondition};
use crate::tls::{self, TlsBundle};
use crate::wellknown::{
    condition_type, protocol, reason, GATEWAY_GROUP, HTTP_ROUTE_KIND, OCSP_STAPLE_POLICY_OPTION,
    TCP_ROUTE_KIND,
};
use portico_common::crd::ConditionStatus;

// =============================================================================
// Listener classes
// =============================================================================

/// How a validated listener is translated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ListenerClass {
    /// Cleartext HTTP; every such listener on a port shares one chain
    Http,
    /// HTTP over terminated TLS, one chain per listener
    Https,
    /// Plain TCP proxy
    Tcp,
    /// TLS terminated at the gateway, then TCP proxied
    TlsTerminate,
    /// TLS passed through, matched on SNI only
    TlsPassthrough,
}

impl ListenerClass {
    /// Classify a listener, or say why it cannot be translated
    fn of(listener: &Listener) -> Result<Self, (&'static str, String)> {
        let mode = listener
            .tls
            .as_ref()
            .and_then(|t| t.mode)
            .unwrap_or_default();
        match listener.protocol.as_str() {
            protocol::HTTP => Ok(Self::Http),
            protocol::HTTPS if mode == TlsMode::Passthrough => Err((
                reason::UNSUPPORTED_VALUE,
                "HTTPS listeners must terminate TLS; use protocol TLS for passthrough".to_string(),
            )),
            protocol::HTTPS => Ok(Self::Https),
            protocol::TLS if mode == TlsMode::Passthrough => Ok(Self::TlsPassthrough),
            protocol::TLS => Ok(Self::TlsTerminate),
            protocol::TCP => Ok(Self::Tcp),
            other => Err((
                reason::UNSUPPORTED_PROTOCOL,
                format!("protocol {other} is not supported"),
            )),
        }
    }

    /// Route kind the listener serves
    pub(super) fn route_kind(self) -> &'static str {
        match self {
            Self::Http | Self::Https => HTTP_ROUTE_KIND,
            Self::Tcp | Self::TlsTerminate | Self::TlsPassthrough => TCP_ROUTE_KIND,
        }
    }

    /// Server name the listener's filter chain matches on; `None` for
    /// chains without an SNI match
    fn server_name(self, listener: &Listener) -> Option<String> {
        match self {
            Self::Http | Self::Tcp => None,
            Self::Https | Self::TlsTerminate | Self::TlsPassthrough => listener.hostname.clone(),
        }
    }

    fn conflicts_with(self, other: Self) -> bool {
        !(self == Self::Http && other == Self::Http)
    }
}

/// A listener that passed validation
#[derive(Clone, Debug)]
pub(super) struct ValidListener<'a> {
    /// Gateway listener
    pub listener: &'a Listener,
    /// How it is translated
    pub class: ListenerClass,
    /// Translated port
    pub port: u16,
}

/// Group listeners by translated port, ports in first-seen order
pub(super) fn group_by_port<'v, 'a>(
    listeners: &'v [ValidListener<'a>],
) -> Vec<(u16, Vec<&'v ValidListener<'a>>)> {
    let mut groups: Vec<(u16, Vec<&ValidListener<'a>>)> = Vec::new();
    for listener in listeners {
        match groups.iter_mut().find(|(port, _)| *port == listener.port) {
            Some((_, members)) => members.push(listener),
            None => groups.push((listener.port, vec![listener])),
        }
    }
    groups
}

/// Why a listener's certificate could not be used
struct TlsFailure {
    reason: &'static str,
    message: String,
}

impl TlsFailure {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            reason: reason::INVALID_CERTIFICATE_REF,
            message: message.into(),
        }
    }

    fn report(&self, report: &mut ListenerReport) {
        report.set_condition(ReportedCondition::new(
            condition_type::RESOLVED_REFS,
            ConditionStatus::False,
            self.reason,
            self.message.clone(),
        ));
        report.set_condition(ReportedCondition::new(
            condition_type::PROGRAMMED,
            ConditionStatus::False,
            reason::INVALID,
            self.message.clone(),
        ));
    }
}

fn conflict(report: &mut ListenerReport, reason: &str, message: String) {
    report.set_condition(ReportedCondition::new(
        condition_type::CONFLICTED,
        ConditionStatus::True,
        reason,
        message.clone(),
    ));
    report.reject(reason, message);
}

/// Weight of a backend ref; missing and zero weights count as 1
pub(super) fn backend_weight(weight: Option<u32>) -> u32 {
    weight.filter(|w| *w > 0).unwrap_or(1)
}

impl GatewayIrBuilder<'_> {
    // =========================================================================
    // Validation
    // =========================================================================

    /// Check every listener and return the ones that can be translated
    ///
    /// Listeners sharing a name are all rejected. After that, listeners are
    /// taken in spec order and a listener whose filter chain would match the
    /// same connections as an earlier one on its port is rejected as
    /// conflicted; only cleartext HTTP listeners share a chain.
    pub(super) fn validate_listeners(&self, reports: &mut ReportMap) -> Vec<ValidListener<'_>> {
        let settings = self.ctx.queries.settings();
        let mut by_name: BTreeMap<&str, Vec<&Listener>> = BTreeMap::new();
        for listener in &self.gw.spec.listeners {
            by_name.entry(listener.name.as_str()).or_default().push(listener);
        }

        let mut claims: BTreeMap<(u16, Option<String>), (&str, ListenerClass)> = BTreeMap::new();
        let mut valid = Vec::new();

        for listener in &self.gw.spec.listeners {
            let report = reports.gateway(self.gw).listener(&listener.name);

            let same_name = &by_name[listener.name.as_str()];
            if same_name.len() > 1 {
                let reason = if same_name.iter().any(|l| l.protocol != listener.protocol) {
                    reason::PROTOCOL_CONFLICT
                } else {
                    reason::HOSTNAME_CONFLICT
                };
                warn!(gateway = %self.source, listener = %listener.name, "duplicate listener name");
                conflict(
                    report,
                    reason,
                    format!("listener name {} is used more than once", listener.name),
                );
                continue;
            }

            let class = match ListenerClass::of(listener) {
                Ok(class) => class,
                Err((reason, message)) => {
                    warn!(gateway = %self.source, listener = %listener.name, %message, "listener rejected");
                    report.reject(reason, message);
                    continue;
                }
            };

            let (supported, unsupported): (Vec<RouteGroupKind>, Vec<RouteGroupKind>) =
                parent_ref::allowed_kinds(listener).into_iter().partition(|k| {
                    k.group.as_deref().unwrap_or(GATEWAY_GROUP) == GATEWAY_GROUP
                        && k.kind == class.route_kind()
                });
            report.supported_kinds = supported;
            if !unsupported.is_empty() {
                let kinds: Vec<&str> = unsupported.iter().map(|k| k.kind.as_str()).collect();
                report.set_condition(ReportedCondition::new(
                    condition_type::RESOLVED_REFS,
                    ConditionStatus::False,
                    reason::INVALID_ROUTE_KINDS,
                    format!(
                        "route kinds {} are not supported on {} listeners",
                        kinds.join(", "),
                        listener.protocol
                    ),
                ));
            }

            let port = settings.translate_port(listener.port);
            let key = (port, class.server_name(listener));
            if let Some((owner, owner_class)) = claims.get(&key) {
                if class.conflicts_with(*owner_class) {
                    let reason = if *owner_class == class {
                        reason::HOSTNAME_CONFLICT
                    } else {
                        reason::PROTOCOL_CONFLICT
                    };
                    warn!(
                        gateway = %self.source,
                        listener = %listener.name,
                        owner = %owner,
                        port = listener.port,
                        "listener conflicts with an earlier listener"
                    );
                    conflict(
                        report,
                        reason,
                        format!(
                            "listener {} matches the same connections as {} on port {}",
                            listener.name, owner, listener.port
                        ),
                    );
                    continue;
                }
            } else {
                claims.insert(key, (listener.name.as_str(), class));
            }

            valid.push(ValidListener {
                listener,
                class,
                port,
            });
        }
        valid
    }

    // =========================================================================
    // Merging
    // =========================================================================

    /// Build the merged listener for one port
    ///
    /// Returns `None` when no Gateway listener on the port produced a chain.
    pub(super) fn build_listener(
        &self,
        port: u16,
        group: &[&ValidListener<'_>],
        attached: &RoutesForGateway,
        reports: &mut ReportMap,
    ) -> Result<Option<ListenerIr>, Cancelled> {
        let names: Vec<String> = group.iter().map(|v| v.listener.name.clone()).collect();
        let mut ir = ListenerIr {
            name: names.join("~"),
            bind_address: self.ctx.queries.settings().bind_address.clone(),
            bind_port: port,
            gateway_listeners: names,
            ..Default::default()
        };
        self.attach_listener_scope(
            AttachmentPoint::Listener,
            ir.gateway_listeners.iter().map(String::as_str),
            &mut ir.attached_policies,
        );

        let mut http_parents = Vec::new();
        for valid in group {
            let routes = self.admitted_routes(valid, attached, reports);
            match valid.class {
                ListenerClass::Http => http_parents.push((*valid, routes)),
                ListenerClass::Https => {
                    if let Some(chain) = self.https_chain(valid, routes, reports)? {
                        ir.http_filter_chains.push(chain);
                    }
                }
                ListenerClass::Tcp | ListenerClass::TlsTerminate | ListenerClass::TlsPassthrough => {
                    if let Some(chain) = self.tcp_chain(valid, &routes, reports)? {
                        ir.tcp_filter_chains.push(chain);
                    }
                }
            }
        }

        if let Some((first, _)) = http_parents.first() {
            let mut chain = HttpFilterChainIr {
                common: FilterChainCommon {
                    name: first.listener.name.clone(),
                    ..Default::default()
                },
                ..Default::default()
            };
            self.attach_listener_scope(
                AttachmentPoint::HttpListener,
                http_parents.iter().map(|(v, _)| v.listener.name.as_str()),
                &mut chain.attached_policies,
            );
            chain.vhosts = self.build_vhosts(&ir.name, &http_parents, reports)?;
            ir.http_filter_chains.insert(0, chain);
        }

        if ir.http_filter_chains.is_empty() && ir.tcp_filter_chains.is_empty() {
            return Ok(None);
        }
        Ok(Some(ir))
    }

    /// Routes of the listener's kind, recording the attached route count
    fn admitted_routes<'r>(
        &self,
        valid: &ValidListener<'_>,
        attached: &'r RoutesForGateway,
        reports: &mut ReportMap,
    ) -> Vec<&'r RouteInfo> {
        let name = valid.listener.name.as_str();
        let report = reports.gateway(self.gw).listener(name);
        let result = attached.listener_results.get(name);
        if let Some(err) = result.and_then(|r| r.error.as_ref()) {
            report.reject(err.reason(), err.to_string());
        }

        let kind = valid.class.route_kind();
        let routes: Vec<&RouteInfo> = attached
            .routes_for(name)
            .iter()
            .filter(|info| match kind {
                HTTP_ROUTE_KIND => info.object.as_http().is_some(),
                _ => info.object.as_tcp().is_some(),
            })
            .collect();
        report.attached_routes = i32::try_from(routes.len()).unwrap_or(i32::MAX);
        routes
    }

    // =========================================================================
    // Filter chains
    // =========================================================================

    fn https_chain(
        &self,
        valid: &ValidListener<'_>,
        routes: Vec<&RouteInfo>,
        reports: &mut ReportMap,
    ) -> Result<Option<HttpFilterChainIr>, Cancelled> {
        let listener = valid.listener;
        let bundle = match self.resolve_tls(listener) {
            Ok(bundle) => bundle,
            Err(failure) => {
                warn!(gateway = %self.source, listener = %listener.name, error = %failure.message, "dropping TLS filter chain");
                failure.report(reports.gateway(self.gw).listener(&listener.name));
                return Ok(None);
            }
        };

        let mut chain = HttpFilterChainIr {
            common: FilterChainCommon {
                name: listener.name.clone(),
                server_names: listener.hostname.iter().cloned().collect(),
                tls: Some(bundle),
            },
            ..Default::default()
        };
        self.attach_listener_scope(
            AttachmentPoint::HttpListener,
            [listener.name.as_str()],
            &mut chain.attached_policies,
        );
        chain.vhosts = self.build_vhosts(&listener.name, &[(valid, routes)], reports)?;
        Ok(Some(chain))
    }

    /// TCP chain fed by the oldest TCPRoute attached to the listener
    fn tcp_chain(
        &self,
        valid: &ValidListener<'_>,
        routes: &[&RouteInfo],
        reports: &mut ReportMap,
    ) -> Result<Option<TcpFilterChainIr>, Cancelled> {
        self.check_cancelled()?;
        let listener = valid.listener;

        let Some((info, route)) = routes
            .iter()
            .filter_map(|info| info.object.as_tcp().map(|route| (*info, route)))
            .min_by(|(a, _), (b, _)| {
                by_age(a.object.created_at(), b.object.created_at())
                    .then_with(|| a.object.namespace().cmp(&b.object.namespace()))
                    .then_with(|| a.object.name().cmp(&b.object.name()))
            })
        else {
            debug!(gateway = %self.source, listener = %listener.name, "no TCPRoute attached");
            return Ok(None);
        };

        let namespace = info.object.namespace();
        let name = info.object.name();
        let parents: Vec<ParentReference> = route
            .spec
            .parent_refs
            .iter()
            .filter(|pr| parent_ref::targets_gateway(pr, &namespace, self.gw))
            .cloned()
            .collect();
        let route_report = reports.route(&info.object);

        if route.spec.rules.len() != 1 {
            let message = format!(
                "TCPRoute must have exactly one rule, found {}",
                route.spec.rules.len()
            );
            warn!(route = %info.object.source(), %message, "TCPRoute not translated");
            for pr in &parents {
                route_report.set_condition(
                    pr,
                    ReportedCondition::new(
                        condition_type::ACCEPTED,
                        ConditionStatus::False,
                        reason::UNSUPPORTED_VALUE,
                        message.clone(),
                    ),
                );
            }
            return Ok(None);
        }
        for pr in &parents {
            route_report.set_condition(
                pr,
                ReportedCondition::new(
                    condition_type::ACCEPTED,
                    ConditionStatus::True,
                    reason::ACCEPTED,
                    "",
                ),
            );
        }

        let mut backends = Vec::new();
        for br in &route.spec.rules[0].backend_refs {
            let key = BackendRefKey::new(&br.backend, &namespace);
            match info.backends.get(&key) {
                Some(Ok(backend)) => backends.push(BackendRefIr {
                    cluster_name: backend.cluster_name.clone(),
                    backend: Some(backend.clone()),
                    weight: backend_weight(br.weight),
                    ..Default::default()
                }),
                Some(Err(err)) => {
                    for pr in &parents {
                        route_report.set_error(pr, err);
                    }
                }
                None => {}
            }
        }
        if backends.is_empty() {
            debug!(route = %info.object.source(), "TCPRoute has no usable backends");
            return Ok(None);
        }

        let tls = match valid.class {
            ListenerClass::TlsTerminate => match self.resolve_tls(listener) {
                Ok(bundle) => Some(bundle),
                Err(failure) => {
                    warn!(gateway = %self.source, listener = %listener.name, error = %failure.message, "dropping TLS filter chain");
                    failure.report(reports.gateway(self.gw).listener(&listener.name));
                    return Ok(None);
                }
            },
            _ => None,
        };

        Ok(Some(TcpFilterChainIr {
            common: FilterChainCommon {
                name: format!("{namespace}.{name}-rule-0"),
                server_names: valid.class.server_name(listener).into_iter().collect(),
                tls,
            },
            route: Some(route.clone()),
            backends,
        }))
    }

    // =========================================================================
    // TLS
    // =========================================================================

    /// Load and check the certificate a terminating listener serves
    fn resolve_tls(&self, listener: &Listener) -> Result<TlsBundle, TlsFailure> {
        let Some(config) = listener.tls.as_ref() else {
            return Err(TlsFailure::invalid(format!(
                "listener {} terminates TLS but has no tls configuration",
                listener.name
            )));
        };
        let Some(cert_ref) = config.certificate_refs.first() else {
            return Err(TlsFailure::invalid(format!(
                "listener {} has no certificate refs",
                listener.name
            )));
        };

        let policy = match config.options.get(OCSP_STAPLE_POLICY_OPTION) {
            Some(value) => value
                .parse::<OcspStaplePolicy>()
                .map_err(|e| TlsFailure::invalid(e.to_string()))?,
            None => self.ctx.queries.settings().default_ocsp_staple_policy,
        };

        let secret = self
            .ctx
            .queries
            .secret_for_ref(&self.source, cert_ref)
            .map_err(|err| TlsFailure {
                reason: match err {
                    QueryError::MissingReferenceGrant { .. } => reason::REF_NOT_PERMITTED,
                    _ => reason::INVALID_CERTIFICATE_REF,
                },
                message: err.to_string(),
            })?;

        tls::bundle_from_secret(&secret, policy, self.ctx.now)
            .map_err(|err| TlsFailure::invalid(format!("certificate {}: {err}", cert_ref.name)))
    }
}
