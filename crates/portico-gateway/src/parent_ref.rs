//! Parent-ref matching and listener admission rules
//!
//! These are the per-listener filters a route passes through before it is
//! attached: kind, namespace, parent-ref section/port. Hostname intersection
//! lives in [`crate::hostname`].

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::gateway_api::{FromNamespaces, Gateway, Listener, ParentReference, RouteGroupKind};
use crate::query::QueryError;
use crate::wellknown::{
    protocol, GATEWAY_GROUP, GATEWAY_KIND, HTTP_ROUTE_KIND, TCP_ROUTE_KIND,
};

/// Fill in the defaults of a parent ref so it can be used as a map key
pub fn normalize(parent_ref: &ParentReference, route_namespace: &str) -> ParentReference {
    ParentReference {
        group: Some(parent_ref.group_or_default().to_string()),
        kind: Some(parent_ref.kind_or_default().to_string()),
        namespace: Some(
            parent_ref
                .namespace
                .clone()
                .unwrap_or_else(|| route_namespace.to_string()),
        ),
        name: parent_ref.name.clone(),
        section_name: parent_ref.section_name.clone(),
        port: parent_ref.port,
    }
}

/// Whether a route's parent ref points at this Gateway
pub fn targets_gateway(parent_ref: &ParentReference, route_namespace: &str, gw: &Gateway) -> bool {
    let gw_namespace = gw.namespace().unwrap_or_default();
    parent_ref.group_or_default() == GATEWAY_GROUP
        && parent_ref.kind_or_default() == GATEWAY_KIND
        && parent_ref.namespace.as_deref().unwrap_or(route_namespace) == gw_namespace
        && parent_ref.name == gw.name_any()
}

/// Whether the section name and port of a parent ref select this listener
pub fn matches_listener(parent_ref: &ParentReference, listener: &Listener) -> bool {
    if let Some(section) = &parent_ref.section_name {
        if section != &listener.name {
            return false;
        }
    }
    if let Some(port) = parent_ref.port {
        if port != listener.port {
            return false;
        }
    }
    true
}

/// Route kinds a listener accepts
///
/// Explicit `allowedRoutes.kinds` replace the protocol default; their group
/// defaults to the Gateway API group.
pub fn allowed_kinds(listener: &Listener) -> Vec<RouteGroupKind> {
    if let Some(allowed) = &listener.allowed_routes {
        if !allowed.kinds.is_empty() {
            return allowed
                .kinds
                .iter()
                .map(|k| RouteGroupKind {
                    group: Some(k.group.clone().unwrap_or_else(|| GATEWAY_GROUP.to_string())),
                    kind: k.kind.clone(),
                })
                .collect();
        }
    }

    let default_kind = match listener.protocol.as_str() {
        protocol::HTTP | protocol::HTTPS => Some(HTTP_ROUTE_KIND),
        protocol::TLS | protocol::TCP => Some(TCP_ROUTE_KIND),
        protocol::UDP => None,
        _ => Some(HTTP_ROUTE_KIND),
    };
    default_kind
        .map(|kind| RouteGroupKind {
            group: Some(GATEWAY_GROUP.to_string()),
            kind: kind.to_string(),
        })
        .into_iter()
        .collect()
}

/// Whether a listener admits routes of the given group and kind
pub fn kind_allowed(listener: &Listener, group: &str, kind: &str) -> bool {
    allowed_kinds(listener)
        .iter()
        .any(|k| k.kind == kind && k.group.as_deref().unwrap_or(GATEWAY_GROUP) == group)
}

/// Whether a listener admits routes from `route_namespace`
///
/// Returns [`QueryError::MissingSelector`] when the listener asks for a
/// selector but does not provide one; such a listener admits nothing.
pub fn namespace_allowed(
    listener: &Listener,
    gw_namespace: &str,
    route_namespace: &str,
    namespace_labels: Option<&BTreeMap<String, String>>,
) -> Result<bool, QueryError> {
    let namespaces = listener
        .allowed_routes
        .as_ref()
        .and_then(|a| a.namespaces.as_ref());
    let from = namespaces.and_then(|n| n.from).unwrap_or_default();

    match from {
        FromNamespaces::All => Ok(true),
        FromNamespaces::Same => Ok(gw_namespace == route_namespace),
        FromNamespaces::Selector => {
            let selector = namespaces
                .and_then(|n| n.selector.as_ref())
                .ok_or_else(|| QueryError::MissingSelector {
                    listener: listener.name.clone(),
                })?;
            let empty = BTreeMap::new();
            Ok(selector.matches(namespace_labels.unwrap_or(&empty)))
        }
    }
}
