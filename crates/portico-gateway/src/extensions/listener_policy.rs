//! ListenerPolicy and HttpListenerPolicy

use portico_common::config::Settings;
use portico_common::crd::{HttpListenerPolicy, ListenerPolicy};
use portico_common::{GroupKind, ObjectSource};
use serde_json::json;

use super::{
    by_name, targeting, FilterChainContext, FilterStage, ListenerContext, PluginError,
    PolicyPlugin, ProxyTranslationPass, RouteBackendContext, StagedHttpFilter,
};
use crate::ir::{AttachmentPoint, Policy, PolicyIr};
use crate::proxy::{Cluster, ClusterWeight, HttpFilter, Listener};
use crate::store::Snapshot;

/// HTTP filter added for `compress: true`
pub const COMPRESSOR_FILTER: &str = "envoy.filters.http.compressor";

// =============================================================================
// ListenerPolicy
// =============================================================================

/// Policy plugin for `ListenerPolicy`
///
/// Sets connection buffer limits on listeners, and on backend clusters when
/// named by a backend ExtensionRef.
pub struct ListenerPolicyPlugin;

fn convert_listener(policy: &ListenerPolicy) -> Policy {
    Policy::Listener(policy.spec.clone())
}

fn buffer_limit(policy: &PolicyIr) -> Result<Option<u32>, PluginError> {
    match &policy.policy {
        Policy::Listener(spec) => Ok(spec.per_connection_buffer_limit_bytes),
        _ => Err(PluginError::invalid(format!(
            "internal error: expected ListenerPolicy, got {}",
            policy.source
        ))),
    }
}

impl PolicyPlugin for ListenerPolicyPlugin {
    fn name(&self) -> &'static str {
        "listener_policy"
    }

    fn group_kind(&self) -> GroupKind {
        GroupKind::of::<ListenerPolicy>()
    }

    fn attachment_points(&self) -> &'static [AttachmentPoint] {
        &[AttachmentPoint::Listener, AttachmentPoint::HttpBackendRef]
    }

    fn policies_for(
        &self,
        snapshot: &Snapshot,
        target: &ObjectSource,
        section: Option<&str>,
    ) -> Vec<PolicyIr> {
        targeting::<ListenerPolicy>(snapshot, target, section, convert_listener)
    }

    fn fetch_by_name(&self, snapshot: &Snapshot, namespace: &str, name: &str) -> Option<PolicyIr> {
        by_name::<ListenerPolicy>(snapshot, namespace, name, convert_listener)
    }

    fn new_pass(&self, _settings: &Settings) -> Box<dyn ProxyTranslationPass> {
        Box::new(ListenerPolicyPass)
    }

    fn process_upstream(&self, policy: &PolicyIr, out: &mut Cluster) -> Result<(), PluginError> {
        if let Some(limit) = buffer_limit(policy)? {
            out.per_connection_buffer_limit_bytes = Some(limit);
        }
        Ok(())
    }
}

struct ListenerPolicyPass;

impl ProxyTranslationPass for ListenerPolicyPass {
    fn name(&self) -> &str {
        "listener_policy"
    }

    fn apply_listener_plugin(
        &mut self,
        ctx: &ListenerContext<'_>,
        out: &mut Listener,
    ) -> Result<(), PluginError> {
        if let Some(limit) = buffer_limit(ctx.policy)? {
            out.per_connection_buffer_limit_bytes = Some(limit);
        }
        Ok(())
    }

    // The limit lives on the cluster; see process_upstream.
    fn apply_for_route_backend(
        &mut self,
        ctx: &RouteBackendContext<'_>,
        _out: &mut ClusterWeight,
    ) -> Result<(), PluginError> {
        buffer_limit(ctx.policy).map(|_| ())
    }
}

// =============================================================================
// HttpListenerPolicy
// =============================================================================

/// Policy plugin for `HttpListenerPolicy`
pub struct HttpListenerPolicyPlugin;

fn convert_http(policy: &HttpListenerPolicy) -> Policy {
    Policy::HttpListener(policy.spec.clone())
}

impl PolicyPlugin for HttpListenerPolicyPlugin {
    fn name(&self) -> &'static str {
        "http_listener_policy"
    }

    fn group_kind(&self) -> GroupKind {
        GroupKind::of::<HttpListenerPolicy>()
    }

    fn attachment_points(&self) -> &'static [AttachmentPoint] {
        &[AttachmentPoint::HttpListener]
    }

    fn policies_for(
        &self,
        snapshot: &Snapshot,
        target: &ObjectSource,
        section: Option<&str>,
    ) -> Vec<PolicyIr> {
        targeting::<HttpListenerPolicy>(snapshot, target, section, convert_http)
    }

    fn new_pass(&self, _settings: &Settings) -> Box<dyn ProxyTranslationPass> {
        Box::new(HttpListenerPolicyPass)
    }
}

struct HttpListenerPolicyPass;

impl ProxyTranslationPass for HttpListenerPolicyPass {
    fn name(&self) -> &str {
        "http_listener_policy"
    }

    fn http_filters(
        &mut self,
        ctx: &FilterChainContext<'_>,
    ) -> Result<Vec<StagedHttpFilter>, PluginError> {
        let mut compress = false;
        for att in ctx.policies {
            match &att.policy.policy {
                Policy::HttpListener(spec) => compress |= spec.compress,
                _ => {
                    return Err(PluginError::invalid(format!(
                        "internal error: expected HttpListenerPolicy, got {}",
                        att.policy.source
                    )))
                }
            }
        }
        if !compress {
            return Ok(Vec::new());
        }
        Ok(vec![StagedHttpFilter {
            stage: FilterStage::Route,
            filter: HttpFilter {
                name: COMPRESSOR_FILTER.to_string(),
                config: json!({ "compressor_library": "gzip" }),
            },
        }])
    }
}
