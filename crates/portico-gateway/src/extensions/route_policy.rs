//! RoutePolicy: route timeouts
//!
//! Attached to a Gateway it seeds a default on every virtual host; attached
//! to a section of the Gateway it applies to the virtual hosts that listener
//! feeds; attached to an HTTPRoute (or a rule of it, by section name) it sets
//! the timeout on the emitted routes. Inner scopes are applied last.

use portico_common::config::Settings;
use portico_common::crd::RoutePolicy;
use portico_common::{GroupKind, ObjectSource};
use serde_json::json;

use super::{
    by_name, targeting, PluginError, PolicyPlugin, ProxyTranslationPass, RouteContext,
    VirtualHostContext,
};
use crate::ir::{AttachmentPoint, Policy, PolicyIr};
use crate::proxy::{Route, RouteAction, VirtualHost};
use crate::store::Snapshot;

/// Virtual host config key holding the default route timeout
pub const ROUTE_POLICY_CONFIG_KEY: &str = "portico.route_policy";

/// Policy plugin for `RoutePolicy`
pub struct RoutePolicyPlugin;

fn convert(policy: &RoutePolicy) -> Policy {
    Policy::Route(policy.spec.clone())
}

impl PolicyPlugin for RoutePolicyPlugin {
    fn name(&self) -> &'static str {
        "route_policy"
    }

    fn group_kind(&self) -> GroupKind {
        GroupKind::of::<RoutePolicy>()
    }

    fn attachment_points(&self) -> &'static [AttachmentPoint] {
        &[
            AttachmentPoint::Gateway,
            AttachmentPoint::VirtualHost,
            AttachmentPoint::Route,
        ]
    }

    fn policies_for(
        &self,
        snapshot: &Snapshot,
        target: &ObjectSource,
        section: Option<&str>,
    ) -> Vec<PolicyIr> {
        targeting::<RoutePolicy>(snapshot, target, section, convert)
    }

    fn fetch_by_name(&self, snapshot: &Snapshot, namespace: &str, name: &str) -> Option<PolicyIr> {
        by_name::<RoutePolicy>(snapshot, namespace, name, convert)
    }

    fn new_pass(&self, _settings: &Settings) -> Box<dyn ProxyTranslationPass> {
        Box::new(RoutePolicyPass)
    }
}

struct RoutePolicyPass;

fn timeout_of(policy: &PolicyIr) -> Result<Option<u32>, PluginError> {
    match &policy.policy {
        Policy::Route(spec) => Ok(spec.timeout),
        _ => Err(PluginError::invalid(format!(
            "internal error: expected RoutePolicy, got {}",
            policy.source
        ))),
    }
}

impl ProxyTranslationPass for RoutePolicyPass {
    fn name(&self) -> &str {
        "route_policy"
    }

    fn apply_vhost_plugin(
        &mut self,
        ctx: &VirtualHostContext<'_>,
        out: &mut VirtualHost,
    ) -> Result<(), PluginError> {
        if let Some(timeout) = timeout_of(ctx.policy)? {
            out.typed_per_filter_config.insert(
                ROUTE_POLICY_CONFIG_KEY.to_string(),
                json!({ "timeout_seconds": timeout }),
            );
        }
        Ok(())
    }

    fn apply_for_route(&mut self, ctx: &RouteContext<'_>, out: &mut Route) -> Result<(), PluginError> {
        let Some(timeout) = timeout_of(ctx.policy)? else {
            return Ok(());
        };
        // Timeouts only mean something on forwarded routes.
        if let Some(RouteAction::Route(action)) = &mut out.action {
            action.timeout_seconds = Some(timeout);
        }
        Ok(())
    }
}
