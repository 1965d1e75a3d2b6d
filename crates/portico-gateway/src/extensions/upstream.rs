//! Upstream CRD backends
//!
//! A static upstream becomes a `STRICT_DNS` cluster to its host and port; an
//! AWS upstream becomes a `LOGICAL_DNS` cluster to the regional Lambda
//! endpoint over TLS.

use portico_common::crd::Upstream;
use portico_common::{GroupKind, ObjectSource};

use super::{PluginError, UpstreamPlugin};
use crate::ir::{BackendObjectIr, UpstreamIr};
use crate::proxy::{Cluster, DiscoveryType, Endpoint};
use crate::query::QueryError;
use crate::store::Snapshot;

/// Port of AWS Lambda endpoints
pub const AWS_LAMBDA_PORT: u16 = 443;

/// Cluster metadata key naming the credentials Secret
pub const AWS_SECRET_METADATA_KEY: &str = "aws.secret_ref";

/// Upstream plugin for the `Upstream` CRD
pub struct UpstreamCrdPlugin;

impl UpstreamPlugin for UpstreamCrdPlugin {
    fn name(&self) -> &'static str {
        "upstream"
    }

    fn group_kind(&self) -> GroupKind {
        GroupKind::of::<Upstream>()
    }

    fn resolve(
        &self,
        snapshot: &Snapshot,
        namespace: &str,
        name: &str,
        _port: Option<u16>,
    ) -> Result<BackendObjectIr, QueryError> {
        let source = ObjectSource::new(self.group_kind(), namespace, name);
        let Some(upstream) = snapshot.get::<Upstream>(namespace, name) else {
            return Err(QueryError::NotFound {
                target: source.resource_name(),
            });
        };

        let (upstream_ir, port) = match (&upstream.spec.static_, &upstream.spec.aws) {
            (Some(s), _) => (
                UpstreamIr::Static {
                    hostname: s.hostname.clone(),
                    port: s.port,
                },
                s.port,
            ),
            (None, Some(aws)) => (
                UpstreamIr::Aws {
                    region: aws.region.clone(),
                    secret_ref: aws.secret_ref.clone(),
                },
                AWS_LAMBDA_PORT,
            ),
            (None, None) => {
                return Err(QueryError::UnsupportedValue {
                    message: format!("Upstream {} has neither static nor aws set", source.namespaced_name()),
                })
            }
        };

        Ok(BackendObjectIr {
            cluster_name: format!("upstream_{namespace}_{name}"),
            canonical_hostname: upstream.spec.hostname().unwrap_or_default(),
            source,
            port,
            upstream: upstream_ir,
        })
    }

    fn init_upstream(&self, backend: &BackendObjectIr, out: &mut Cluster) -> Result<(), PluginError> {
        match &backend.upstream {
            UpstreamIr::Static { hostname, port } => {
                out.discovery_type = DiscoveryType::StrictDns;
                out.endpoints = vec![Endpoint {
                    address: hostname.clone(),
                    port_value: *port,
                }];
            }
            UpstreamIr::Aws { secret_ref, .. } => {
                out.discovery_type = DiscoveryType::LogicalDns;
                out.endpoints = vec![Endpoint {
                    address: backend.canonical_hostname.clone(),
                    port_value: AWS_LAMBDA_PORT,
                }];
                out.upstream_tls_sni = Some(backend.canonical_hostname.clone());
                out.metadata
                    .insert(AWS_SECRET_METADATA_KEY.to_string(), secret_ref.clone());
            }
            UpstreamIr::Service => {
                return Err(PluginError::invalid(format!(
                    "{} is not an Upstream backend",
                    backend.source
                )))
            }
        }
        Ok(())
    }
}
