//! Top-level translation entry point
//!
//! [`GatewayTranslator`] owns the extension registry, settings and clock and
//! runs one Gateway at a time through its class translator and the proxy
//! translator. Each Gateway collects reports into its own map; a cancelled
//! translation discards them and marks the Gateway pending instead, so a
//! half-finished pass never writes partial route or policy status.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::ResourceExt;
use portico_common::config::Settings;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::extensions::{ClassContext, ExtensionRegistry};
use crate::gateway_api::{Gateway, GatewayStatus, RouteStatus};
use crate::proxy::ProxyResources;
use crate::query::{GatewayQueries, RouteObject};
use crate::reports::{Clock, ReportMap, SystemClock};
use crate::store::Snapshot;
use crate::translator::ProxyTranslator;
use crate::QualifiedName;

/// Message on Gateways whose translation was cancelled
pub const PENDING_MESSAGE: &str = "translation cancelled before completion";

/// Result of translating one Gateway
#[derive(Debug, Default)]
pub struct TranslationOutput {
    /// Proxy configuration; `None` when the Gateway was skipped or cancelled
    pub resources: Option<ProxyResources>,
    /// Conditions recorded while translating
    pub reports: ReportMap,
}

/// Result of translating every Gateway in a snapshot
#[derive(Debug, Default)]
pub struct TranslationSet {
    /// Proxy configuration per Gateway
    pub proxies: BTreeMap<QualifiedName, ProxyResources>,
    /// Conditions from every Gateway, merged
    pub reports: ReportMap,
}

/// Output for a Gateway whose translation was cancelled: no resources and
/// only the pending condition, whatever was recorded before
fn pending(gw: &Gateway) -> TranslationOutput {
    warn!(
        gateway = %gw.name_any(),
        namespace = %gw.namespace().unwrap_or_default(),
        "translation cancelled, marking gateway pending"
    );
    let mut reports = ReportMap::new();
    reports.mark_pending(gw, PENDING_MESSAGE);
    TranslationOutput {
        resources: None,
        reports,
    }
}

/// Translates Gateways to proxy configuration
pub struct GatewayTranslator {
    registry: Arc<ExtensionRegistry>,
    settings: Settings,
    clock: Arc<dyn Clock>,
}

impl GatewayTranslator {
    /// Translator over `registry` reading the wall clock
    pub fn new(registry: Arc<ExtensionRegistry>, settings: Settings) -> Self {
        Self::with_clock(registry, settings, Arc::new(SystemClock))
    }

    /// Translator with an explicit clock, for certificate checks and
    /// condition timestamps
    pub fn with_clock(registry: Arc<ExtensionRegistry>, settings: Settings, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            settings,
            clock,
        }
    }

    /// Settings in effect
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Translate one Gateway
    ///
    /// Gateways of a class with no registered translator are skipped with a
    /// log and leave no report.
    pub fn translate(&self, snapshot: &Snapshot, gw: &Gateway, cancel: &CancellationToken) -> TranslationOutput {
        let class = &gw.spec.gateway_class_name;
        let Some(class_translator) = self.registry.gateway_class(class) else {
            info!(
                gateway = %gw.name_any(),
                namespace = %gw.namespace().unwrap_or_default(),
                gateway_class = %class,
                "no translator for GatewayClass, skipping"
            );
            return TranslationOutput::default();
        };

        if cancel.is_cancelled() {
            return pending(gw);
        }

        let queries = GatewayQueries::new(snapshot, &self.registry, &self.settings);
        let ctx = ClassContext {
            queries: &queries,
            write_namespace: &self.settings.write_namespace,
            cancel,
            now: self.clock.now(),
        };

        let mut reports = ReportMap::new();
        let ir = match class_translator.translate_proxy(&ctx, gw, &mut reports) {
            Ok(ir) => ir,
            Err(cancelled) => {
                debug!(gateway = %gw.name_any(), error = %cancelled, "gateway build cancelled");
                return pending(gw);
            }
        };
        if cancel.is_cancelled() {
            return pending(gw);
        }

        let resources = ProxyTranslator::new(&self.registry, &self.settings).translate(gw, &ir, &mut reports);
        TranslationOutput {
            resources: Some(resources),
            reports,
        }
    }

    /// Translate every Gateway in the snapshot, in namespace/name order
    ///
    /// Once `cancel` fires, the Gateways not yet finished are marked pending.
    pub fn translate_all(&self, snapshot: &Snapshot, cancel: &CancellationToken) -> TranslationSet {
        let mut set = TranslationSet::default();
        for gw in snapshot.list::<Gateway>() {
            let key = (gw.namespace().unwrap_or_default(), gw.name_any());
            let out = self.translate(snapshot, gw, cancel);
            set.reports.merge(out.reports);
            if let Some(resources) = out.resources {
                set.proxies.insert(key, resources);
            }
        }
        debug!(gateways = set.proxies.len(), "translated snapshot");
        set
    }

    /// Status for a Gateway from `reports`
    pub fn gateway_status(&self, reports: &ReportMap, gw: &Gateway) -> GatewayStatus {
        reports.build_gateway_status(gw, self.clock.as_ref())
    }

    /// Status for a route from `reports`; `None` when nothing was reported
    pub fn route_status(&self, reports: &ReportMap, route: &RouteObject) -> Option<RouteStatus> {
        reports.build_route_status(route, &self.settings.controller_name, self.clock.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::testing::{gateway, http_route, listener, now, service, to_service};
    use crate::reports::FixedClock;
    use crate::store::ResourceStore;
    use crate::wellknown::{condition_type, reason};
    use portico_common::crd::ConditionStatus;

    fn translator() -> GatewayTranslator {
        GatewayTranslator::with_clock(
            Arc::new(ExtensionRegistry::builtin()),
            Settings::default(),
            Arc::new(FixedClock(now())),
        )
    }

    fn web_store() -> ResourceStore {
        let store = ResourceStore::new();
        store.upsert(service("default", "web"));
        store.upsert(http_route("default", "r", &[], vec![to_service("web", 8080)]));
        store.upsert(gateway(vec![listener("web", 80, "HTTP", None)]));
        store
    }

    // =========================================================================
    // Story Tests: Entry Point
    // =========================================================================

    /// Story: A Gateway of the built-in class produces proxy resources and
    /// an accepted status
    #[test]
    fn story_translate_builtin_class() {
        let store = web_store();
        let gw = gateway(vec![listener("web", 80, "HTTP", None)]);
        let t = translator();
        let out = t.translate(&store.snapshot(), &gw, &CancellationToken::new());

        let resources = out.resources.expect("translated");
        assert_eq!(resources.listeners.len(), 1);
        let status = t.gateway_status(&out.reports, &gw);
        let accepted = status
            .conditions
            .iter()
            .find(|c| c.type_ == condition_type::ACCEPTED)
            .expect("accepted");
        assert_eq!(accepted.status, ConditionStatus::True);
        assert_eq!(status.listeners[0].attached_routes, 1);
    }

    /// Story: Gateways of other classes are left alone
    #[test]
    fn story_unknown_class_skipped() {
        let store = web_store();
        let mut gw = gateway(vec![listener("web", 80, "HTTP", None)]);
        gw.spec.gateway_class_name = "someone-else".to_string();
        let out = translator().translate(&store.snapshot(), &gw, &CancellationToken::new());
        assert!(out.resources.is_none());
        assert!(out.reports.gateway_report("default", "gw").is_none());
        assert_eq!(out.reports.reported_routes().count(), 0);
    }

    /// Story: A cancelled translation produces no resources and marks the
    /// Gateway pending without partial route status
    #[test]
    fn story_cancelled_gateway_pending() {
        let store = web_store();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let set = translator().translate_all(&store.snapshot(), &cancel);

        assert!(set.proxies.is_empty());
        let report = set.reports.gateway_report("default", "gw").expect("reported");
        let accepted = report.conditions.get(condition_type::ACCEPTED).expect("accepted");
        assert_eq!(accepted.status, ConditionStatus::False);
        assert_eq!(accepted.reason, reason::PENDING);
        assert_eq!(set.reports.reported_routes().count(), 0);
    }

    /// Story: Workers translating one frozen snapshot agree with each other
    /// while the live store keeps changing underneath them
    #[tokio::test]
    async fn story_snapshot_translation_on_workers() {
        let store = Arc::new(web_store());
        let snapshot = Arc::new(store.snapshot());
        let t = Arc::new(translator());

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..10 {
                    store.upsert(http_route("default", &format!("extra-{i}"), &[], vec![to_service("web", 8080)]));
                }
            })
        };
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let (t, snapshot) = (t.clone(), snapshot.clone());
                tokio::task::spawn_blocking(move || {
                    let gw = gateway(vec![listener("web", 80, "HTTP", None)]);
                    t.translate(&snapshot, &gw, &CancellationToken::new()).resources
                })
            })
            .collect();

        writer.await.expect("writer task");
        let mut outputs = Vec::new();
        for worker in workers {
            outputs.push(worker.await.expect("worker task").expect("translated"));
        }
        assert!(outputs.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(outputs[0].route_configs[0].virtual_hosts[0].routes.len(), 1);
        assert_eq!(store.snapshot().list::<crate::gateway_api::HttpRoute>().count(), 11);
    }

    /// Story: Once cancelled, every Gateway left in the snapshot is pending,
    /// including one with no routes that would otherwise finish at once
    #[test]
    fn story_cancelled_before_start_marks_every_gateway_pending() {
        let store = web_store();
        let mut quiet = gateway(vec![listener("idle", 9090, "HTTP", Some("idle.example.com"))]);
        quiet.metadata.name = Some("quiet".to_string());
        store.upsert(quiet.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let t = translator();
        let direct = t.translate(&store.snapshot(), &quiet, &cancel);
        assert!(direct.resources.is_none());

        let set = t.translate_all(&store.snapshot(), &cancel);
        assert!(set.proxies.is_empty());
        for name in ["gw", "quiet"] {
            let report = set.reports.gateway_report("default", name).expect("reported");
            let accepted = report.conditions.get(condition_type::ACCEPTED).expect("accepted");
            assert_eq!(accepted.status, ConditionStatus::False, "{name}");
            assert_eq!(accepted.reason, reason::PENDING, "{name}");
            assert!(report.listeners.is_empty(), "{name} has partial listener status");
        }
        assert_eq!(set.reports.reported_routes().count(), 0);
    }

    #[test]
    fn test_translate_all_keys_by_gateway() {
        let store = web_store();
        let set = translator().translate_all(&store.snapshot(), &CancellationToken::new());
        let keys: Vec<_> = set.proxies.keys().cloned().collect();
        assert_eq!(keys, vec![("default".to_string(), "gw".to_string())]);
    }
}
