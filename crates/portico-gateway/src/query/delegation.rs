//! Delegated HTTPRoute expansion
//!
//! A rule whose backend ref names an HTTPRoute delegates to that route, or to
//! every HTTPRoute in a namespace when the name is `""` or `"*"`. Expansion is
//! depth-first. The routes on the current path detect back edges, which are
//! reported as cycles. Each (child, delegating route) pair is expanded once
//! per chain and shared afterwards, so a child reached through several
//! delegation paths costs one expansion rather than one per path.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kube::ResourceExt;
use portico_common::{GroupKind, ObjectSource};
use tracing::{debug, warn};

use super::{GatewayQueries, QueryError, RouteInfo, RouteObject};
use crate::backend_map::{BackendMap, BackendRefKey};
use crate::gateway_api::{BackendObjectReference, HttpRoute, ParentReference};
use crate::query::ResolvedBackend;
use crate::wellknown::{GATEWAY_GROUP, HTTP_ROUTE_KIND};
use crate::QualifiedName;

/// Names that select every HTTPRoute in the target namespace
const WILDCARD_NAMES: [&str; 2] = ["", "*"];

impl GatewayQueries<'_> {
    /// Resolve a route and the full tree of routes it delegates to
    ///
    /// `hostnames` are the listener-intersected hostnames; delegated children
    /// inherit them. `parent_ref` is the Gateway ref the route attached
    /// through.
    pub fn route_chain(
        &self,
        route: Arc<HttpRoute>,
        hostnames: Vec<String>,
        parent_ref: ParentReference,
    ) -> RouteInfo {
        let mut walk = Walk::default();
        self.expand(route, &hostnames, parent_ref.clone(), &parent_ref, &mut walk)
    }

    fn expand(
        &self,
        route: Arc<HttpRoute>,
        hostnames: &[String],
        parent_ref: ParentReference,
        listener_parent_ref: &ParentReference,
        walk: &mut Walk,
    ) -> RouteInfo {
        let key = route_key(&route);
        walk.path.insert(key.clone());

        let object = RouteObject::Http(route.clone());
        let from = object.source();
        let mut backends = BackendMap::new();
        let mut children = BackendMap::new();
        let mut delegation_errors = Vec::new();

        for rule in &route.spec.rules {
            for br in &rule.backend_refs {
                let ref_key = BackendRefKey::new(&br.backend, &from.namespace);

                if !is_route_ref(&br.backend) {
                    match self.backend_for_ref(&from, &br.backend) {
                        Ok(ResolvedBackend::Upstream(b)) => backends.add(ref_key, b),
                        Ok(ResolvedBackend::Route(_)) => {}
                        Err(err) => {
                            debug!(route = %from, backend = %ref_key, error = %err, "backend unresolved");
                            backends.add_error(ref_key, err);
                        }
                    }
                    continue;
                }

                let targets = match self.delegation_targets(&from, &br.backend) {
                    Ok(targets) => targets,
                    Err(err) => {
                        debug!(route = %from, target = %ref_key, error = %err, "delegation unresolved");
                        children.add_error(ref_key, err);
                        continue;
                    }
                };

                let child_parent = ParentReference {
                    group: Some(GATEWAY_GROUP.to_string()),
                    kind: Some(HTTP_ROUTE_KIND.to_string()),
                    namespace: Some(from.namespace.clone()),
                    name: from.name.clone(),
                    section_name: None,
                    port: None,
                };

                let mut resolved = Vec::new();
                let mut cycles = Vec::new();
                for child in targets {
                    let child_key = route_key(&child);
                    if walk.path.contains(&child_key) {
                        warn!(route = %from, child = %format!("{}/{}", child_key.0, child_key.1), "delegation cycle");
                        cycles.push(QueryError::CyclicReference {
                            target: format!("{}/{}", child_key.0, child_key.1),
                        });
                        continue;
                    }
                    let memo_key = (child_key, key.clone());
                    if let Some(done) = walk.expanded.get(&memo_key) {
                        resolved.push(done.clone());
                        continue;
                    }
                    let info = Arc::new(self.expand(
                        child,
                        hostnames,
                        child_parent.clone(),
                        listener_parent_ref,
                        walk,
                    ));
                    walk.expanded.insert(memo_key, info.clone());
                    resolved.push(info);
                }

                if resolved.is_empty() {
                    let err = cycles.into_iter().next().unwrap_or_else(|| {
                        QueryError::UnresolvedReference {
                            target: ref_key.to_string(),
                        }
                    });
                    children.add_error(ref_key, err);
                } else {
                    delegation_errors.extend(cycles);
                    children.add(ref_key, resolved);
                }
            }
        }

        walk.path.remove(&key);

        RouteInfo {
            object,
            parent_ref,
            listener_parent_ref: listener_parent_ref.clone(),
            hostnames: hostnames.to_vec(),
            backends,
            children,
            delegation_errors,
        }
    }

    /// Routes a delegation ref selects, excluding the delegating route
    fn delegation_targets(
        &self,
        from: &ObjectSource,
        backend: &BackendObjectReference,
    ) -> Result<Vec<Arc<HttpRoute>>, QueryError> {
        let gk = GroupKind::new(GATEWAY_GROUP, HTTP_ROUTE_KIND);
        let namespace = backend.namespace.as_deref().unwrap_or(&from.namespace);

        if !WILDCARD_NAMES.contains(&backend.name.as_str()) {
            return match self.backend_for_ref(from, backend)? {
                ResolvedBackend::Route(route) => Ok(vec![route]),
                ResolvedBackend::Upstream(_) => Err(QueryError::InvalidKind {
                    group_kind: gk.to_string(),
                }),
            };
        }

        self.reference_allowed(from, &gk, namespace, "*")?;
        let routes: Vec<Arc<HttpRoute>> = self
            .snapshot
            .list_in::<HttpRoute>(namespace)
            .filter(|r| !(namespace == from.namespace && r.name_any() == from.name))
            .cloned()
            .collect();
        if routes.is_empty() {
            return Err(QueryError::UnresolvedReference {
                target: format!("{namespace}/*"),
            });
        }
        Ok(routes)
    }
}

/// Traversal state for one route chain
///
/// A cached subtree keeps the cycles found on the path that first expanded
/// it. Those are cycles in the delegation graph whichever path reaches the
/// child later.
#[derive(Default)]
struct Walk {
    /// Routes on the current delegation path
    path: BTreeSet<QualifiedName>,
    /// Finished expansions keyed by (child, delegating route)
    expanded: BTreeMap<(QualifiedName, QualifiedName), Arc<RouteInfo>>,
}

fn route_key(route: &HttpRoute) -> QualifiedName {
    (route.namespace().unwrap_or_default(), route.name_any())
}

fn is_route_ref(backend: &BackendObjectReference) -> bool {
    backend.group_or_default() == GATEWAY_GROUP && backend.kind_or_default() == HTTP_ROUTE_KIND
}
