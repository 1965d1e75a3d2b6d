//! Common types for Portico: resource definitions, errors, configuration and telemetry

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod gateway_api;
pub mod source;
pub mod telemetry;
pub mod wellknown;

pub use error::Error;
pub use source::{GroupKind, ObjectSource};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace where generated resources are written when none is configured
pub const DEFAULT_WRITE_NAMESPACE: &str = "portico-system";

/// Controller name reported on route and policy status
pub const DEFAULT_CONTROLLER_NAME: &str = "portico.dev/gateway-controller";

/// GatewayClass handled by the built-in translator
pub const DEFAULT_GATEWAY_CLASS: &str = "portico";
