//! Route-to-listener attachment

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::ResourceExt;
use portico_common::GroupKind;
use tracing::{debug, warn};

use super::{GatewayQueries, QueryError, RouteInfo, RouteObject};
use crate::backend_map::{BackendMap, BackendRefKey};
use crate::gateway_api::{Gateway, Listener, ParentReference, TcpRoute};
use crate::hostname;
use crate::parent_ref;
use crate::query::ResolvedBackend;
use crate::wellknown::{GATEWAY_GROUP, HTTP_ROUTE_KIND, TCP_ROUTE_KIND};

/// Routes attached to one listener
#[derive(Clone, Debug, Default)]
pub struct ListenerResult {
    /// Attached routes in attachment order
    pub routes: Vec<RouteInfo>,
    /// Listener level configuration error; such a listener admits nothing
    pub error: Option<QueryError>,
}

/// A parent ref of a route that did not attach
#[derive(Clone, Debug)]
pub struct RouteError {
    /// The route
    pub route: RouteObject,
    /// The parent ref as declared on the route
    pub parent_ref: ParentReference,
    /// Why it did not attach
    pub error: QueryError,
}

/// Result of attaching every route that targets a gateway
#[derive(Clone, Debug, Default)]
pub struct RoutesForGateway {
    /// Per listener results, keyed by listener name
    pub listener_results: BTreeMap<String, ListenerResult>,
    /// Parent refs that failed to attach
    pub route_errors: Vec<RouteError>,
}

impl RoutesForGateway {
    /// Routes attached to a listener, empty when unknown
    pub fn routes_for(&self, listener: &str) -> &[RouteInfo] {
        self.listener_results
            .get(listener)
            .map(|r| r.routes.as_slice())
            .unwrap_or_default()
    }
}

/// Per listener admission rules computed once per gateway
struct ListenerAdmission<'l> {
    listener: &'l Listener,
    namespace_rule: Result<(), QueryError>,
}

impl GatewayQueries<'_> {
    /// Attach every HTTPRoute and TCPRoute targeting `gw` to its listeners
    ///
    /// For each parent ref naming the gateway, a route passes four filters
    /// per listener: kind, namespace, parent-ref section/port and (HTTP only)
    /// hostname intersection. A parent ref that passes none reports the
    /// first filter nothing passed.
    pub fn routes_for_gateway(&self, gw: &Gateway) -> RoutesForGateway {
        let gw_key = (gw.namespace().unwrap_or_default(), gw.name_any());
        let mut result = RoutesForGateway::default();

        let admissions: Vec<ListenerAdmission<'_>> = gw
            .spec
            .listeners
            .iter()
            .map(|listener| {
                // Probe the selector once; the route namespace is irrelevant here.
                let namespace_rule =
                    parent_ref::namespace_allowed(listener, &gw_key.0, &gw_key.0, None).map(|_| ());
                let entry = result
                    .listener_results
                    .entry(listener.name.clone())
                    .or_default();
                if let Err(err) = &namespace_rule {
                    warn!(gateway = %gw_key.1, listener = %listener.name, error = %err, "listener admits no routes");
                    entry.error = Some(err.clone());
                }
                ListenerAdmission {
                    listener,
                    namespace_rule,
                }
            })
            .collect();

        for route in self.snapshot.http_routes_targeting(&gw_key) {
            self.attach_route(gw, &admissions, RouteObject::Http(route), &mut result);
        }
        if self.settings.enable_tcp_routes {
            for route in self.snapshot.tcp_routes_targeting(&gw_key) {
                self.attach_route(gw, &admissions, RouteObject::Tcp(route), &mut result);
            }
        }

        result
    }

    fn attach_route(
        &self,
        gw: &Gateway,
        admissions: &[ListenerAdmission<'_>],
        route: RouteObject,
        result: &mut RoutesForGateway,
    ) {
        let route_ns = route.namespace();
        let gw_ns = gw.namespace().unwrap_or_default();
        let kind = match route {
            RouteObject::Http(_) => HTTP_ROUTE_KIND,
            RouteObject::Tcp(_) => TCP_ROUTE_KIND,
        };
        let ns_labels = self.snapshot.namespace_labels(&route_ns);

        for pr in route.parent_refs() {
            if !parent_ref::targets_gateway(pr, &route_ns, gw) {
                continue;
            }

            let mut any_routes_allowed = false;
            let mut any_listener_matched = false;
            let mut any_hosts_matched = false;

            for admission in admissions {
                let listener = admission.listener;
                if admission.namespace_rule.is_err() {
                    continue;
                }
                if !parent_ref::kind_allowed(listener, GATEWAY_GROUP, kind) {
                    continue;
                }
                match parent_ref::namespace_allowed(listener, &gw_ns, &route_ns, ns_labels) {
                    Ok(true) => {}
                    Ok(false) | Err(_) => continue,
                }
                any_routes_allowed = true;

                if !parent_ref::matches_listener(pr, listener) {
                    continue;
                }
                any_listener_matched = true;

                let hostnames = match &route {
                    RouteObject::Http(http) => {
                        match hostname::intersect(listener.hostname.as_deref(), &http.spec.hostnames) {
                            Some(hosts) => hosts,
                            None => continue,
                        }
                    }
                    RouteObject::Tcp(_) => Vec::new(),
                };
                any_hosts_matched = true;

                let info = match &route {
                    RouteObject::Http(http) => self.route_chain(http.clone(), hostnames, pr.clone()),
                    RouteObject::Tcp(tcp) => self.tcp_route_info(tcp.clone(), pr.clone()),
                };
                debug!(
                    route = %route.source(),
                    listener = %listener.name,
                    "route attached"
                );
                if let Some(entry) = result.listener_results.get_mut(&listener.name) {
                    entry.routes.push(info);
                }
            }

            let error = if !any_routes_allowed {
                Some(QueryError::NotAllowedByListeners {
                    kind: kind.to_string(),
                    namespace: route_ns.clone(),
                })
            } else if !any_listener_matched {
                Some(QueryError::NoMatchingParent)
            } else if !any_hosts_matched {
                Some(QueryError::NoMatchingListenerHostname)
            } else {
                None
            };
            if let Some(error) = error {
                debug!(route = %route.source(), error = %error, "route did not attach");
                result.route_errors.push(RouteError {
                    route: route.clone(),
                    parent_ref: pr.clone(),
                    error,
                });
            }
        }
    }

    /// Resolve the backends of a TCPRoute; TCPRoutes do not delegate
    fn tcp_route_info(&self, route: Arc<TcpRoute>, parent_ref: ParentReference) -> RouteInfo {
        let object = RouteObject::Tcp(route.clone());
        let from = object.source();
        let mut backends = BackendMap::new();
        for rule in &route.spec.rules {
            for br in &rule.backend_refs {
                let key = BackendRefKey::new(&br.backend, &from.namespace);
                match self.backend_for_ref(&from, &br.backend) {
                    Ok(ResolvedBackend::Upstream(b)) => backends.add(key, b),
                    Ok(ResolvedBackend::Route(_)) => backends.add_error(
                        key,
                        QueryError::InvalidKind {
                            group_kind: GroupKind::new(GATEWAY_GROUP, HTTP_ROUTE_KIND).to_string(),
                        },
                    ),
                    Err(err) => backends.add_error(key, err),
                }
            }
        }
        RouteInfo {
            object,
            parent_ref: parent_ref.clone(),
            listener_parent_ref: parent_ref,
            hostnames: Vec::new(),
            backends,
            children: BackendMap::new(),
            delegation_errors: Vec::new(),
        }
    }
}
