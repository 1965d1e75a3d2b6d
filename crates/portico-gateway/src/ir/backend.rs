//! Backend IR: what a resolved backend ref turns into

use portico_common::ObjectSource;

/// How the proxy reaches a backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamIr {
    /// Kubernetes Service, discovered through EDS
    Service,
    /// Fixed host and port resolved through DNS
    Static {
        /// DNS name
        hostname: String,
        /// Port
        port: u16,
    },
    /// AWS Lambda endpoint for a region
    Aws {
        /// AWS region
        region: String,
        /// Secret holding the credentials
        secret_ref: String,
    },
}

/// A backend ready to become a cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendObjectIr {
    /// Object the backend was resolved from
    pub source: ObjectSource,
    /// Port, 0 when the kind has no port
    pub port: u16,
    /// Name of the cluster routes point at
    pub cluster_name: String,
    /// Host name the backend answers to
    pub canonical_hostname: String,
    /// How to reach it
    pub upstream: UpstreamIr,
}
