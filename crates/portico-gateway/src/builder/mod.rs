//! IR builder for the built-in GatewayClass
//!
//! Turns one Gateway into a [`GatewayIr`]:
//!
//! 1. Attach routes through the query engine and report the parent refs
//!    that did not attach
//! 2. Validate listeners: duplicate names, protocols, route kinds, and
//!    filter chain matches that would collide on a port
//! 3. Merge the surviving listeners by translated port
//! 4. Flatten routes, following delegation, into per-host virtual hosts
//! 5. Attach policies at Gateway, listener, virtual host, route and backend
//!    scope
//!
//! Cancellation is checked between rules; a cancelled build returns
//! [`Cancelled`] and leaves partial reports behind for the caller to discard
//! or mark pending.

mod listeners;
mod routes;

use kube::ResourceExt;
use portico_common::ObjectSource;
use thiserror::Error;
use tracing::debug;

use crate::extensions::{ClassContext, GatewayClassTranslator};
use crate::gateway_api::{Gateway, ParentReference};
use crate::ir::{AttachedPolicies, AttachmentPoint, GatewayIr, PolicyAtt};
use crate::reports::ReportMap;
use crate::store::Snapshot;
use crate::wellknown::{GATEWAY_GROUP, GATEWAY_KIND};

use listeners::group_by_port;

/// The cancellation token fired while a Gateway was being translated
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("translation cancelled")]
pub struct Cancelled;

impl From<Cancelled> for portico_common::Error {
    fn from(err: Cancelled) -> Self {
        portico_common::Error::internal_with_context("translate", err.to_string())
    }
}

/// Translator for the built-in `portico` GatewayClass
#[derive(Clone, Copy, Debug, Default)]
pub struct PorticoClassTranslator;

impl GatewayClassTranslator for PorticoClassTranslator {
    fn translate_proxy(
        &self,
        ctx: &ClassContext<'_>,
        gw: &Gateway,
        reports: &mut ReportMap,
    ) -> Result<GatewayIr, Cancelled> {
        GatewayIrBuilder::new(ctx, gw).build(reports)
    }
}

/// Builds the IR of one Gateway
pub(crate) struct GatewayIrBuilder<'a> {
    ctx: &'a ClassContext<'a>,
    gw: &'a Gateway,
    source: ObjectSource,
}

impl<'a> GatewayIrBuilder<'a> {
    /// Create a builder for `gw`
    pub(crate) fn new(ctx: &'a ClassContext<'a>, gw: &'a Gateway) -> Self {
        Self {
            ctx,
            gw,
            source: ObjectSource::from_resource(gw),
        }
    }

    /// Build the IR, recording listener and route conditions in `reports`
    pub(crate) fn build(&self, reports: &mut ReportMap) -> Result<GatewayIr, Cancelled> {
        self.check_cancelled()?;

        let attached = self.ctx.queries.routes_for_gateway(self.gw);
        for err in &attached.route_errors {
            reports.route(&err.route).set_error(&err.parent_ref, &err.error);
        }

        let mut ir = GatewayIr {
            source: Some(self.source.clone()),
            ..Default::default()
        };
        self.attach(
            AttachmentPoint::Gateway,
            &self.source,
            None,
            &self.gateway_ref(None),
            &mut ir.attached_policies,
        );

        let valid = self.validate_listeners(reports);
        let settings = self.ctx.queries.settings();
        for (port, group) in group_by_port(&valid) {
            if let Some(listener) = self.build_listener(port, &group, &attached, reports)? {
                ir.listeners.push(listener);
            } else {
                debug!(
                    gateway = %self.gw.name_any(),
                    port,
                    bind_address = %settings.bind_address,
                    "listener has no filter chains"
                );
            }
        }
        Ok(ir)
    }

    fn snapshot(&self) -> &'a Snapshot {
        self.ctx.queries.snapshot()
    }

    fn check_cancelled(&self) -> Result<(), Cancelled> {
        if self.ctx.cancel.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Ref to this Gateway, optionally scoped to one listener
    ///
    /// Used as the ancestor policies report against.
    fn gateway_ref(&self, section: Option<&str>) -> ParentReference {
        ParentReference {
            group: Some(GATEWAY_GROUP.to_string()),
            kind: Some(GATEWAY_KIND.to_string()),
            namespace: Some(self.gw.namespace().unwrap_or_default()),
            name: self.gw.name_any(),
            section_name: section.map(String::from),
            port: None,
        }
    }

    /// Collect the policies of every kind that attaches at `point` and
    /// targets `target` (and `section`)
    fn attach(
        &self,
        point: AttachmentPoint,
        target: &ObjectSource,
        section: Option<&str>,
        ancestor: &ParentReference,
        out: &mut AttachedPolicies,
    ) {
        let plugins = self
            .ctx
            .queries
            .registry()
            .policy_plugins()
            .filter(|p| p.attachment_points().contains(&point));
        for plugin in plugins {
            for policy in plugin.policies_for(self.snapshot(), target, section) {
                debug!(
                    policy = %policy.source,
                    target = %target,
                    section = section.unwrap_or_default(),
                    ?point,
                    "policy attached"
                );
                out.push(PolicyAtt {
                    policy,
                    ancestor: Some(ancestor.clone()),
                });
            }
        }
    }

    /// Gateway-wide policies at `point` followed by those naming each of
    /// `listeners` as section
    fn attach_listener_scope<'l>(
        &self,
        point: AttachmentPoint,
        listeners: impl IntoIterator<Item = &'l str>,
        out: &mut AttachedPolicies,
    ) {
        self.attach(point, &self.source, None, &self.gateway_ref(None), out);
        for name in listeners {
            self.attach(
                point,
                &self.source,
                Some(name),
                &self.gateway_ref(Some(name)),
                out,
            );
        }
    }
}
