//! DirectResponseRoute: answer a request from the gateway itself

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Largest body a DirectResponseRoute may carry
pub const MAX_DIRECT_RESPONSE_BODY_BYTES: usize = 4096;

/// Fixed response returned when a route references this object as an ExtensionRef
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.portico.dev",
    version = "v1alpha1",
    kind = "DirectResponseRoute",
    plural = "directresponseroutes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DirectResponseRouteSpec {
    /// HTTP status code, 200 to 599
    pub status: u16,
    /// Response body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl DirectResponseRouteSpec {
    /// Validate status range and body size
    pub fn validate(&self) -> Result<(), Error> {
        if !(200..=599).contains(&self.status) {
            return Err(Error::validation_for_field(
                "DirectResponseRoute",
                "spec.status",
                format!("status {} is outside 200-599", self.status),
            ));
        }
        if let Some(body) = &self.body {
            if body.len() > MAX_DIRECT_RESPONSE_BODY_BYTES {
                return Err(Error::validation_for_field(
                    "DirectResponseRoute",
                    "spec.body",
                    format!(
                        "body is {} bytes, limit is {}",
                        body.len(),
                        MAX_DIRECT_RESPONSE_BODY_BYTES
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bounds() {
        let ok = DirectResponseRouteSpec {
            status: 200,
            body: None,
        };
        assert!(ok.validate().is_ok());
        let upper = DirectResponseRouteSpec {
            status: 599,
            body: None,
        };
        assert!(upper.validate().is_ok());
        let low = DirectResponseRouteSpec {
            status: 199,
            body: None,
        };
        assert!(low.validate().is_err());
        let high = DirectResponseRouteSpec {
            status: 600,
            body: None,
        };
        assert!(high.validate().is_err());
    }

    #[test]
    fn test_body_limit() {
        let at_limit = DirectResponseRouteSpec {
            status: 200,
            body: Some("a".repeat(MAX_DIRECT_RESPONSE_BODY_BYTES)),
        };
        assert!(at_limit.validate().is_ok());
        let over = DirectResponseRouteSpec {
            status: 200,
            body: Some("a".repeat(MAX_DIRECT_RESPONSE_BODY_BYTES + 1)),
        };
        let err = over.validate().unwrap_err();
        assert!(err.to_string().contains("spec") || err.to_string().contains("limit"));
    }
}
