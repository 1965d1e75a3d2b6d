//! Resource store and immutable snapshots
//!
//! Watch handlers write into a [`ResourceStore`] concurrently. Each
//! translation works from a [`Snapshot`]: a frozen, sorted copy of the store
//! plus the indices the query engine needs. Snapshots are cheap to share
//! across threads and never change after they are built.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use k8s_openapi::api::core::v1::{Namespace, Secret, Service};
use kube::{Resource, ResourceExt};
use portico_common::crd::{
    DirectResponseRoute, GatewayParameters, HttpListenerPolicy, ListenerPolicy,
    LocalPolicyTargetReference, RoutePolicy, Upstream,
};
use portico_common::{GroupKind, ObjectSource};
use tracing::debug;

use crate::gateway_api::{Gateway, HttpRoute, ParentReference, ReferenceGrant, TcpRoute};
use crate::wellknown::{GATEWAY_GROUP, GATEWAY_KIND};
use crate::QualifiedName;

/// A resource kind the store can hold
pub trait StoredKind: Resource<DynamicType = ()> + Clone + Send + Sync + 'static {
    /// The live map for this kind
    fn live(store: &ResourceStore) -> &DashMap<QualifiedName, Arc<Self>>;
    /// The frozen map for this kind
    fn frozen(snapshot: &Snapshot) -> &BTreeMap<QualifiedName, Arc<Self>>;
}

/// A policy kind that attaches to objects through target refs
pub trait TargetsObjects: StoredKind {
    /// Objects this policy targets, in its own namespace
    fn target_refs(&self) -> &[LocalPolicyTargetReference];
}

impl TargetsObjects for RoutePolicy {
    fn target_refs(&self) -> &[LocalPolicyTargetReference] {
        &self.spec.target_refs
    }
}

impl TargetsObjects for HttpListenerPolicy {
    fn target_refs(&self) -> &[LocalPolicyTargetReference] {
        &self.spec.target_refs
    }
}

impl TargetsObjects for ListenerPolicy {
    fn target_refs(&self) -> &[LocalPolicyTargetReference] {
        &self.spec.target_refs
    }
}

fn key_of<K: Resource>(obj: &K) -> QualifiedName {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

macro_rules! stored_kinds {
    ($($ty:ty => $field:ident),* $(,)?) => {
        /// Concurrent store of every resource kind the translator reads
        #[derive(Default)]
        pub struct ResourceStore {
            $($field: DashMap<QualifiedName, Arc<$ty>>,)*
        }

        /// Immutable point-in-time view of a [`ResourceStore`]
        #[derive(Clone, Debug, Default)]
        pub struct Snapshot {
            $($field: BTreeMap<QualifiedName, Arc<$ty>>,)*
            http_route_targets: BTreeMap<QualifiedName, Vec<QualifiedName>>,
            tcp_route_targets: BTreeMap<QualifiedName, Vec<QualifiedName>>,
            policy_targets: BTreeMap<GroupKind, BTreeMap<ObjectSource, Vec<QualifiedName>>>,
        }

        impl ResourceStore {
            fn freeze(&self) -> Snapshot {
                Snapshot {
                    $($field: self
                        .$field
                        .iter()
                        .map(|entry| (entry.key().clone(), entry.value().clone()))
                        .collect(),)*
                    ..Default::default()
                }
            }
        }

        $(
            impl StoredKind for $ty {
                fn live(store: &ResourceStore) -> &DashMap<QualifiedName, Arc<Self>> {
                    &store.$field
                }
                fn frozen(snapshot: &Snapshot) -> &BTreeMap<QualifiedName, Arc<Self>> {
                    &snapshot.$field
                }
            }
        )*
    };
}

stored_kinds! {
    Gateway => gateways,
    HttpRoute => http_routes,
    TcpRoute => tcp_routes,
    ReferenceGrant => reference_grants,
    Service => services,
    Secret => secrets,
    Namespace => namespaces,
    DirectResponseRoute => direct_responses,
    RoutePolicy => route_policies,
    HttpListenerPolicy => http_listener_policies,
    ListenerPolicy => listener_policies,
    Upstream => upstreams,
    GatewayParameters => gateway_parameters,
}

impl ResourceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object
    pub fn upsert<K: StoredKind>(&self, obj: K) {
        let key = key_of(&obj);
        debug!(kind = %K::kind(&()), namespace = %key.0, name = %key.1, "store upsert");
        K::live(self).insert(key, Arc::new(obj));
    }

    /// Remove an object, returning it if it was present
    pub fn delete<K: StoredKind>(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        K::live(self)
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|(_, v)| v)
    }

    /// Freeze the current contents and build indices
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = self.freeze();
        snapshot.http_route_targets = index_parent_refs(&snapshot.http_routes, |r| {
            r.spec.parent_refs.as_slice()
        });
        snapshot.tcp_route_targets = index_parent_refs(&snapshot.tcp_routes, |r| {
            r.spec.parent_refs.as_slice()
        });
        let route_policy_index = index_policy_targets(&snapshot.route_policies);
        let http_listener_index = index_policy_targets(&snapshot.http_listener_policies);
        let listener_index = index_policy_targets(&snapshot.listener_policies);
        snapshot
            .policy_targets
            .insert(GroupKind::of::<RoutePolicy>(), route_policy_index);
        snapshot
            .policy_targets
            .insert(GroupKind::of::<HttpListenerPolicy>(), http_listener_index);
        snapshot
            .policy_targets
            .insert(GroupKind::of::<ListenerPolicy>(), listener_index);
        snapshot
    }
}

/// Parent-ref target index: gateway -> routes whose parent refs name it
fn index_parent_refs<R: StoredKind>(
    routes: &BTreeMap<QualifiedName, Arc<R>>,
    parent_refs: impl Fn(&R) -> &[ParentReference],
) -> BTreeMap<QualifiedName, Vec<QualifiedName>> {
    let mut index: BTreeMap<QualifiedName, BTreeSet<QualifiedName>> = BTreeMap::new();
    for (key, route) in routes {
        for pr in parent_refs(route) {
            if pr.group_or_default() != GATEWAY_GROUP || pr.kind_or_default() != GATEWAY_KIND {
                continue;
            }
            let ns = pr.namespace.clone().unwrap_or_else(|| key.0.clone());
            index
                .entry((ns, pr.name.clone()))
                .or_default()
                .insert(key.clone());
        }
    }
    index
        .into_iter()
        .map(|(gw, routes)| (gw, routes.into_iter().collect()))
        .collect()
}

/// Policy target index: target object -> policies naming it
fn index_policy_targets<P: TargetsObjects>(
    policies: &BTreeMap<QualifiedName, Arc<P>>,
) -> BTreeMap<ObjectSource, Vec<QualifiedName>> {
    let mut index: BTreeMap<ObjectSource, BTreeSet<QualifiedName>> = BTreeMap::new();
    for (key, policy) in policies {
        for target in policy.target_refs() {
            let source = ObjectSource::new(
                GroupKind::new(&target.group, target.kind.clone()),
                key.0.clone(),
                target.name.clone(),
            );
            index.entry(source).or_default().insert(key.clone());
        }
    }
    index
        .into_iter()
        .map(|(target, policies)| (target, policies.into_iter().collect()))
        .collect()
}

impl Snapshot {
    /// Fetch an object by namespace and name
    pub fn get<K: StoredKind>(&self, namespace: &str, name: &str) -> Option<&Arc<K>> {
        K::frozen(self).get(&(namespace.to_string(), name.to_string()))
    }

    /// Every object of a kind, ordered by (namespace, name)
    pub fn list<K: StoredKind>(&self) -> impl Iterator<Item = &Arc<K>> {
        K::frozen(self).values()
    }

    /// Every object of a kind in one namespace, ordered by name
    pub fn list_in<'a, K: StoredKind>(
        &'a self,
        namespace: &'a str,
    ) -> impl Iterator<Item = &'a Arc<K>> + 'a {
        K::frozen(self)
            .iter()
            .filter(move |((ns, _), _)| ns == namespace)
            .map(|(_, v)| v)
    }

    /// Labels of a namespace, if the namespace is known
    pub fn namespace_labels(&self, namespace: &str) -> Option<&BTreeMap<String, String>> {
        self.get::<Namespace>("", namespace)
            .and_then(|ns| ns.metadata.labels.as_ref())
    }

    /// HTTPRoutes whose parent refs name the gateway
    pub fn http_routes_targeting(&self, gateway: &QualifiedName) -> Vec<Arc<HttpRoute>> {
        self.lookup_index(&self.http_route_targets, gateway)
    }

    /// TCPRoutes whose parent refs name the gateway
    pub fn tcp_routes_targeting(&self, gateway: &QualifiedName) -> Vec<Arc<TcpRoute>> {
        self.lookup_index(&self.tcp_route_targets, gateway)
    }

    fn lookup_index<K: StoredKind>(
        &self,
        index: &BTreeMap<QualifiedName, Vec<QualifiedName>>,
        gateway: &QualifiedName,
    ) -> Vec<Arc<K>> {
        index
            .get(gateway)
            .into_iter()
            .flatten()
            .filter_map(|key| K::frozen(self).get(key).cloned())
            .collect()
    }

    /// Policies of kind `P` whose target refs name `target`
    pub fn policies_targeting<P: TargetsObjects>(&self, target: &ObjectSource) -> Vec<Arc<P>> {
        self.policy_targets
            .get(&GroupKind::of::<P>())
            .and_then(|index| index.get(target))
            .into_iter()
            .flatten()
            .filter_map(|key| P::frozen(self).get(key).cloned())
            .collect()
    }
}
