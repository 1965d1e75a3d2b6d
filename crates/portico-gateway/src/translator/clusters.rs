//! Cluster emission for referenced backends

use std::collections::BTreeMap;

use portico_common::config::Settings;
use tracing::{debug, warn};

use super::sanitize_name;
use crate::extensions::{report_policy, ExtensionRegistry, PluginError};
use crate::ir::{BackendObjectIr, BackendRefIr, UpstreamIr};
use crate::proxy::{Cluster, DiscoveryType};
use crate::reports::ReportMap;
use crate::wellknown::BLACKHOLE_CLUSTER_NAME;

/// Cluster every failed backend ref points at; it has no endpoints
pub fn blackhole_cluster(settings: &Settings) -> Cluster {
    Cluster::new(BLACKHOLE_CLUSTER_NAME, DiscoveryType::Static, settings.cluster_connect_timeout_ms)
}

/// Cluster for a resolved backend
///
/// Services are discovered over EDS under the cluster name; other kinds are
/// filled in by their upstream plugin.
pub fn backend_cluster(
    backend: &BackendObjectIr,
    registry: &ExtensionRegistry,
    settings: &Settings,
) -> Result<Cluster, PluginError> {
    let name = sanitize_name(&backend.cluster_name).into_owned();
    if backend.upstream == UpstreamIr::Service {
        let mut cluster = Cluster::new(&name, DiscoveryType::Eds, settings.cluster_connect_timeout_ms);
        cluster.eds_service_name = Some(name);
        return Ok(cluster);
    }

    let gk = backend.source.group_kind();
    let plugin = registry
        .upstream_plugin(&gk)
        .ok_or_else(|| PluginError::invalid(format!("no upstream plugin for {gk}")))?;
    let mut cluster = Cluster::new(name, DiscoveryType::Eds, settings.cluster_connect_timeout_ms);
    plugin.init_upstream(backend, &mut cluster)?;
    Ok(cluster)
}

/// Collects the clusters referenced while lowering one Gateway
pub struct ClusterCollector<'a> {
    registry: &'a ExtensionRegistry,
    settings: &'a Settings,
    clusters: BTreeMap<String, Cluster>,
    blackhole: bool,
}

impl<'a> ClusterCollector<'a> {
    /// Empty collector
    pub fn new(registry: &'a ExtensionRegistry, settings: &'a Settings) -> Self {
        Self {
            registry,
            settings,
            clusters: BTreeMap::new(),
            blackhole: false,
        }
    }

    /// Record the cluster a backend ref points at and run its backend
    /// policies over it
    pub fn add(&mut self, backend_ref: &BackendRefIr, reports: &mut ReportMap) {
        let Some(backend) = &backend_ref.backend else {
            if backend_ref.cluster_name == BLACKHOLE_CLUSTER_NAME {
                self.blackhole = true;
            }
            return;
        };

        let name = sanitize_name(&backend.cluster_name).into_owned();
        if !self.clusters.contains_key(&name) {
            match backend_cluster(backend, self.registry, self.settings) {
                Ok(cluster) => {
                    self.clusters.insert(name.clone(), cluster);
                }
                Err(err) => {
                    warn!(backend = %backend.source, error = %err, "failed to initialise cluster");
                    return;
                }
            }
        }
        let Some(cluster) = self.clusters.get_mut(&name) else {
            return;
        };

        for (gk, atts) in backend_ref.attached_policies.iter() {
            let Some(plugin) = self.registry.policy_plugin(gk) else {
                warn!(policy_kind = %gk, cluster = %name, "no plugin for backend policy");
                continue;
            };
            for att in atts {
                let result = plugin.process_upstream(&att.policy, cluster);
                if let Err(err) = &result {
                    warn!(policy = %att.policy.source, cluster = %name, error = %err, "backend policy failed");
                }
                report_policy(reports, att, &result);
            }
        }
    }

    /// Clusters sorted by name, with `extra` merged in and the blackhole
    /// cluster added when referenced
    ///
    /// The first cluster seen under a name wins.
    pub fn finish(mut self, extra: Vec<Cluster>) -> Vec<Cluster> {
        if self.blackhole {
            self.clusters
                .entry(BLACKHOLE_CLUSTER_NAME.to_string())
                .or_insert_with(|| blackhole_cluster(self.settings));
        }
        for cluster in extra {
            if self.clusters.contains_key(&cluster.name) {
                debug!(cluster = %cluster.name, "duplicate cluster dropped");
                continue;
            }
            self.clusters.insert(cluster.name.clone(), cluster);
        }
        self.clusters.into_values().collect()
    }
}
