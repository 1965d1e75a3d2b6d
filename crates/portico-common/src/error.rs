//! Error types for the Portico translator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the resource or subsystem it relates to so log
//! lines and status messages can point at the offending object.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Portico operations
#[derive(Debug, Error)]
pub enum Error {
    /// Validation error for a resource spec
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Canonical name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.listeners[0].tls")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Configuration loading error
    #[error("configuration error: {message}")]
    Config {
        /// Description of what failed
        message: String,
        /// Setting or environment variable that failed (if known)
        key: Option<String>,
    },

    /// TLS material could not be used
    #[error("tls error for {secret}: {message}")]
    Tls {
        /// Secret reference in `namespace.name` form
        secret: String,
        /// Description of what failed
        message: String,
    },

    /// Translation of a gateway failed
    #[error("translation error for {gateway}: {message}")]
    Translation {
        /// Gateway being translated
        gateway: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "builder", "translator", "store")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    ///
    /// For simple validation errors without resource context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            key: None,
        }
    }

    /// Create a configuration error for a specific key
    pub fn config_for_key(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            key: Some(key.into()),
        }
    }

    /// Create a TLS error for a secret
    pub fn tls(secret: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Tls {
            secret: secret.into(),
            message: msg.into(),
        }
    }

    /// Create a translation error for a gateway
    pub fn translation(gateway: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Translation {
            gateway: gateway.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Errors caused by resource content need a spec change and are not
    /// retryable. Internal errors may succeed on the next reconcile.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Config { .. } => false,
            Error::Tls { .. } => false,
            Error::Translation { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Get the resource name if this error is associated with one
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::Validation { resource, .. } => Some(resource),
            Error::Tls { secret, .. } => Some(secret),
            Error::Translation { gateway, .. } => Some(gateway),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(err.to_string())
    }
}
