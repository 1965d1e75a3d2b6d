//! DirectResponseRoute: answer from the gateway through an ExtensionRef

use portico_common::config::Settings;
use portico_common::crd::DirectResponseRoute;
use portico_common::GroupKind;
use tracing::warn;

use super::{by_name, PluginError, PolicyPlugin, ProxyTranslationPass, RouteContext};
use crate::ir::{AttachmentPoint, Policy, PolicyIr};
use crate::proxy::{DirectResponseAction, Route, RouteAction};
use crate::store::Snapshot;

/// Status of the response that replaces conflicting actions
pub const CONFLICT_STATUS: u16 = 500;

/// Policy plugin for `DirectResponseRoute`
///
/// Only reachable through ExtensionRef filters; it has no target refs.
pub struct DirectResponsePlugin;

impl PolicyPlugin for DirectResponsePlugin {
    fn name(&self) -> &'static str {
        "direct_response"
    }

    fn group_kind(&self) -> GroupKind {
        GroupKind::of::<DirectResponseRoute>()
    }

    fn attachment_points(&self) -> &'static [AttachmentPoint] {
        &[]
    }

    fn fetch_by_name(&self, snapshot: &Snapshot, namespace: &str, name: &str) -> Option<PolicyIr> {
        by_name::<DirectResponseRoute>(snapshot, namespace, name, |dr| {
            Policy::DirectResponse(dr.spec.clone())
        })
    }

    fn sets_action(&self) -> bool {
        true
    }

    fn new_pass(&self, settings: &Settings) -> Box<dyn ProxyTranslationPass> {
        Box::new(DirectResponsePass {
            max_body_bytes: settings.max_direct_response_body_bytes,
        })
    }
}

struct DirectResponsePass {
    max_body_bytes: usize,
}

impl ProxyTranslationPass for DirectResponsePass {
    fn name(&self) -> &str {
        "direct_response"
    }

    fn apply_for_route(&mut self, ctx: &RouteContext<'_>, out: &mut Route) -> Result<(), PluginError> {
        let Policy::DirectResponse(spec) = &ctx.policy.policy else {
            return Err(PluginError::invalid(format!(
                "internal error: expected DirectResponseRoute, got {}",
                ctx.policy.source
            )));
        };

        if let Some(existing) = &out.action {
            let kind = match existing {
                RouteAction::Route(_) => "route",
                RouteAction::Redirect(_) => "redirect",
                RouteAction::DirectResponse(_) => "direct_response",
            };
            warn!(
                route = %out.name,
                policy = %ctx.policy.source.namespaced_name(),
                existing = kind,
                "direct response conflicts with existing action"
            );
            out.action = Some(RouteAction::DirectResponse(DirectResponseAction {
                status: CONFLICT_STATUS,
                body: None,
            }));
            return Err(PluginError::IncompatibleFilters {
                message: format!("DirectResponse cannot be applied to route with existing action: {kind}"),
            });
        }

        spec.validate()
            .map_err(|e| PluginError::invalid(e.to_string()))?;
        if let Some(body) = &spec.body {
            if body.len() > self.max_body_bytes {
                return Err(PluginError::invalid(format!(
                    "direct response body is {} bytes, limit is {}",
                    body.len(),
                    self.max_body_bytes
                )));
            }
        }

        out.action = Some(RouteAction::DirectResponse(DirectResponseAction {
            status: spec.status,
            body: spec.body.clone(),
        }));
        Ok(())
    }
}
