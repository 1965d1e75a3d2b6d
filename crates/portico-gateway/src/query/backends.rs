//! Backend and Secret resolution with ReferenceGrant enforcement

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Secret, Service};
use portico_common::{GroupKind, ObjectSource};
use tracing::debug;

use super::{GatewayQueries, QueryError};
use crate::gateway_api::{BackendObjectReference, HttpRoute, ReferenceGrant, SecretObjectReference};
use crate::ir::{BackendObjectIr, UpstreamIr};
use crate::wellknown::{normalize_group, GATEWAY_GROUP, HTTP_ROUTE_KIND, SECRET_KIND, SERVICE_KIND};

/// What a backend ref resolved to
#[derive(Clone, Debug)]
pub enum ResolvedBackend {
    /// A backend that becomes a cluster
    Upstream(BackendObjectIr),
    /// An HTTPRoute the rule delegates to
    Route(Arc<HttpRoute>),
}

impl GatewayQueries<'_> {
    /// Check whether `from` may reference `to_kind` `to_namespace/to_name`
    ///
    /// Same-namespace references are always allowed. Otherwise a
    /// ReferenceGrant in the target namespace must list the referencing
    /// group/kind/namespace in `from` and the target in `to`.
    pub fn reference_allowed(
        &self,
        from: &ObjectSource,
        to_kind: &GroupKind,
        to_namespace: &str,
        to_name: &str,
    ) -> Result<(), QueryError> {
        if from.namespace == to_namespace {
            return Ok(());
        }

        let target = ObjectSource::new(to_kind.clone(), to_namespace, to_name);
        let permitted = self
            .snapshot
            .list_in::<ReferenceGrant>(to_namespace)
            .any(|grant| {
                let from_ok = grant.spec.from.iter().any(|f| {
                    normalize_group(Some(&f.group)) == from.group
                        && f.kind == from.kind
                        && f.namespace == from.namespace
                });
                let to_ok = grant.spec.to.iter().any(|t| {
                    normalize_group(Some(&t.group)) == to_kind.group
                        && t.kind == to_kind.kind
                        && t.name.as_deref().is_none_or(|n| n == to_name)
                });
                from_ok && to_ok
            });

        if permitted {
            Ok(())
        } else {
            debug!(from = %from, target = %target, "cross-namespace reference not permitted");
            Err(QueryError::MissingReferenceGrant {
                from_namespace: from.namespace.clone(),
                target: target.resource_name(),
            })
        }
    }

    /// Resolve a backend ref made by `from`
    ///
    /// Checks run in order: kind, permission, value, existence.
    pub fn backend_for_ref(
        &self,
        from: &ObjectSource,
        backend: &BackendObjectReference,
    ) -> Result<ResolvedBackend, QueryError> {
        let gk = GroupKind::new(backend.group_or_default(), backend.kind_or_default());
        let namespace = backend.namespace.as_deref().unwrap_or(&from.namespace);
        let target = ObjectSource::new(gk.clone(), namespace, &backend.name);

        if gk.group == GATEWAY_GROUP && gk.kind == HTTP_ROUTE_KIND {
            self.reference_allowed(from, &gk, namespace, &backend.name)?;
            return self
                .snapshot
                .get::<HttpRoute>(namespace, &backend.name)
                .cloned()
                .map(ResolvedBackend::Route)
                .ok_or_else(|| QueryError::NotFound {
                    target: target.resource_name(),
                });
        }

        if gk.group.is_empty() && gk.kind == SERVICE_KIND {
            self.reference_allowed(from, &gk, namespace, &backend.name)?;
            let port = match backend.port {
                Some(port) if port != 0 => port,
                _ => {
                    return Err(QueryError::UnsupportedValue {
                        message: format!(
                            "Service backend {} requires a non-zero port",
                            target.namespaced_name()
                        ),
                    })
                }
            };
            let Some(svc) = self.snapshot.get::<Service>(namespace, &backend.name) else {
                return Err(QueryError::NotFound {
                    target: target.resource_name(),
                });
            };
            return Ok(ResolvedBackend::Upstream(service_backend(svc, namespace, port)));
        }

        match self.registry.upstream_plugin(&gk) {
            Some(plugin) => {
                self.reference_allowed(from, &gk, namespace, &backend.name)?;
                plugin
                    .resolve(self.snapshot, namespace, &backend.name, backend.port)
                    .map(ResolvedBackend::Upstream)
            }
            None => Err(QueryError::InvalidKind {
                group_kind: gk.to_string(),
            }),
        }
    }

    /// Resolve a certificate ref made by a Gateway
    pub fn secret_for_ref(
        &self,
        from: &ObjectSource,
        secret_ref: &SecretObjectReference,
    ) -> Result<Arc<Secret>, QueryError> {
        let gk = GroupKind::new(secret_ref.group_or_default(), secret_ref.kind_or_default());
        if !gk.group.is_empty() || gk.kind != SECRET_KIND {
            return Err(QueryError::InvalidKind {
                group_kind: gk.to_string(),
            });
        }
        let namespace = secret_ref.namespace.as_deref().unwrap_or(&from.namespace);
        self.reference_allowed(from, &gk, namespace, &secret_ref.name)?;
        self.snapshot
            .get::<Secret>(namespace, &secret_ref.name)
            .cloned()
            .ok_or_else(|| QueryError::NotFound {
                target: ObjectSource::new(gk, namespace, &secret_ref.name).resource_name(),
            })
    }
}

/// Backend IR for a Service port
fn service_backend(svc: &Service, namespace: &str, port: u16) -> BackendObjectIr {
    let name = svc.metadata.name.clone().unwrap_or_default();
    BackendObjectIr {
        source: ObjectSource::new(GroupKind::new("", SERVICE_KIND), namespace, &name),
        port,
        cluster_name: format!("{namespace}-{name}-{port}"),
        canonical_hostname: format!("{name}.{namespace}.svc.cluster.local"),
        upstream: UpstreamIr::Service,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::ExtensionRegistry;
    use crate::gateway_api::{ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo};
    use crate::store::ResourceStore;
    use portico_common::config::Settings;

    fn service(ns: &str, name: &str) -> Service {
        let mut svc = Service::default();
        svc.metadata.name = Some(name.to_string());
        svc.metadata.namespace = Some(ns.to_string());
        svc
    }

    fn grant(ns: &str, from_ns: &str, to_kind: &str, to_name: Option<&str>) -> ReferenceGrant {
        let mut g = ReferenceGrant::new(
            "allow",
            ReferenceGrantSpec {
                from: vec![ReferenceGrantFrom {
                    group: GATEWAY_GROUP.to_string(),
                    kind: "HTTPRoute".to_string(),
                    namespace: from_ns.to_string(),
                }],
                to: vec![ReferenceGrantTo {
                    group: "".to_string(),
                    kind: to_kind.to_string(),
                    name: to_name.map(String::from),
                }],
            },
        );
        g.metadata.namespace = Some(ns.to_string());
        g
    }

    fn route_source(ns: &str) -> ObjectSource {
        ObjectSource::new(GroupKind::new(GATEWAY_GROUP, "HTTPRoute"), ns, "r")
    }

    fn cross_ns_ref() -> BackendObjectReference {
        BackendObjectReference {
            namespace: Some("default2".to_string()),
            ..BackendObjectReference::service("foo", 8080)
        }
    }

    fn resolve(store: &ResourceStore, from: &ObjectSource, r: &BackendObjectReference) -> Result<ResolvedBackend, QueryError> {
        let snapshot = store.snapshot();
        let registry = ExtensionRegistry::builtin();
        let settings = Settings::default();
        let queries = GatewayQueries::new(&snapshot, &registry, &settings);
        queries.backend_for_ref(from, r)
    }

    #[test]
    fn test_same_namespace_service() {
        let store = ResourceStore::new();
        store.upsert(service("default", "foo"));
        let resolved = resolve(&store, &route_source("default"), &BackendObjectReference::service("foo", 8080))
            .expect("service should resolve");
        match resolved {
            ResolvedBackend::Upstream(b) => {
                assert_eq!(b.cluster_name, "default-foo-8080");
                assert_eq!(b.canonical_hostname, "foo.default.svc.cluster.local");
            }
            ResolvedBackend::Route(_) => panic!("expected upstream"),
        }
    }

    #[test]
    fn test_cross_namespace_requires_grant() {
        let store = ResourceStore::new();
        store.upsert(service("default2", "foo"));
        let err = resolve(&store, &route_source("default"), &cross_ns_ref()).unwrap_err();
        assert!(matches!(err, QueryError::MissingReferenceGrant { .. }));

        store.upsert(grant("default2", "default", "Service", None));
        assert!(resolve(&store, &route_source("default"), &cross_ns_ref()).is_ok());
    }

    #[test]
    fn test_grant_must_match_from_and_to() {
        let store = ResourceStore::new();
        store.upsert(service("default2", "foo"));
        // Wrong source namespace.
        store.upsert(grant("default2", "elsewhere", "Service", None));
        assert!(resolve(&store, &route_source("default"), &cross_ns_ref()).is_err());

        // Right namespace, wrong target name.
        store.upsert(grant("default2", "default", "Service", Some("bar")));
        let err = resolve(&store, &route_source("default"), &cross_ns_ref()).unwrap_err();
        assert_eq!(err.reason(), "RefNotPermitted");
    }

    #[test]
    fn test_grant_in_wrong_namespace_ignored() {
        let store = ResourceStore::new();
        store.upsert(service("default2", "foo"));
        store.upsert(grant("default", "default", "Service", None));
        assert!(resolve(&store, &route_source("default"), &cross_ns_ref()).is_err());
    }

    #[test]
    fn test_missing_after_permission_is_not_found() {
        let store = ResourceStore::new();
        store.upsert(grant("default2", "default", "Service", None));
        let err = resolve(&store, &route_source("default"), &cross_ns_ref()).unwrap_err();
        assert!(matches!(err, QueryError::NotFound { .. }));
    }

    #[test]
    fn test_zero_port_is_unsupported() {
        let store = ResourceStore::new();
        store.upsert(service("default", "foo"));
        let err = resolve(&store, &route_source("default"), &BackendObjectReference::service("foo", 0))
            .unwrap_err();
        assert_eq!(err.reason(), "UnsupportedValue");

        let no_port = BackendObjectReference {
            name: "foo".to_string(),
            ..Default::default()
        };
        let err = resolve(&store, &route_source("default"), &no_port).unwrap_err();
        assert_eq!(err.reason(), "UnsupportedValue");
    }

    #[test]
    fn test_unknown_kind_is_invalid() {
        let store = ResourceStore::new();
        let r = BackendObjectReference {
            group: Some("example.com".to_string()),
            kind: Some("Bucket".to_string()),
            name: "b".to_string(),
            namespace: None,
            port: Some(80),
        };
        let err = resolve(&store, &route_source("default"), &r).unwrap_err();
        assert!(matches!(err, QueryError::InvalidKind { .. }));
    }

    #[test]
    fn test_secret_for_ref() {
        let store = ResourceStore::new();
        let mut secret = Secret::default();
        secret.metadata.name = Some("cert".to_string());
        secret.metadata.namespace = Some("default".to_string());
        store.upsert(secret);

        let snapshot = store.snapshot();
        let registry = ExtensionRegistry::builtin();
        let settings = Settings::default();
        let queries = GatewayQueries::new(&snapshot, &registry, &settings);
        let gw = ObjectSource::new(GroupKind::new(GATEWAY_GROUP, "Gateway"), "default", "test");

        let ok = SecretObjectReference {
            name: "cert".to_string(),
            ..Default::default()
        };
        assert!(queries.secret_for_ref(&gw, &ok).is_ok());

        let cross = SecretObjectReference {
            name: "cert".to_string(),
            namespace: Some("certs".to_string()),
            ..Default::default()
        };
        assert_eq!(
            queries.secret_for_ref(&gw, &cross).unwrap_err().reason(),
            "RefNotPermitted"
        );

        let wrong_kind = SecretObjectReference {
            name: "cert".to_string(),
            kind: Some("ConfigMap".to_string()),
            ..Default::default()
        };
        assert_eq!(
            queries.secret_for_ref(&gw, &wrong_kind).unwrap_err().reason(),
            "InvalidKind"
        );
    }
}
