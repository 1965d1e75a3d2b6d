//! Upstream: a backend that is not a Kubernetes Service

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Opaque backend descriptor; exactly one variant must be set
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.portico.dev",
    version = "v1alpha1",
    kind = "Upstream",
    plural = "upstreams",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamSpec {
    /// Fixed host and port
    #[serde(rename = "static", default, skip_serializing_if = "Option::is_none")]
    pub static_: Option<StaticUpstream>,
    /// AWS Lambda in a region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsUpstream>,
}

impl UpstreamSpec {
    /// Canonical hostname of the backend
    pub fn hostname(&self) -> Option<String> {
        if let Some(s) = &self.static_ {
            return Some(s.hostname.clone());
        }
        self.aws
            .as_ref()
            .map(|aws| format!("lambda.{}.amazonaws.com", aws.region))
    }
}

/// Static host
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StaticUpstream {
    /// DNS name or IP
    pub hostname: String,
    /// Port
    pub port: u16,
}

/// AWS Lambda
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsUpstream {
    /// AWS region
    pub region: String,
    /// Secret in the same namespace with credentials
    pub secret_ref: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_per_variant() {
        let spec = UpstreamSpec {
            static_: Some(StaticUpstream {
                hostname: "example.org".to_string(),
                port: 443,
            }),
            aws: None,
        };
        assert_eq!(spec.hostname().as_deref(), Some("example.org"));

        let spec = UpstreamSpec {
            static_: None,
            aws: Some(AwsUpstream {
                region: "us-east-1".to_string(),
                secret_ref: "creds".to_string(),
            }),
        };
        assert_eq!(
            spec.hostname().as_deref(),
            Some("lambda.us-east-1.amazonaws.com")
        );
        assert_eq!(UpstreamSpec::default().hostname(), None);
    }

    #[test]
    fn test_static_field_name() {
        let spec: UpstreamSpec =
            serde_json::from_str(r#"{"static":{"hostname":"h","port":80}}"#).expect("parse");
        assert_eq!(spec.static_.map(|s| s.port), Some(80));
    }
}
