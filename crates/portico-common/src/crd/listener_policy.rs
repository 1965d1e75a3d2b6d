//! Listener scoped policies

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{LocalPolicyTargetReference, PolicyStatus};

/// Settings applied to every listener built from the targeted Gateway
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.portico.dev",
    version = "v1alpha1",
    kind = "ListenerPolicy",
    plural = "listenerpolicies",
    namespaced,
    status = "PolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ListenerPolicySpec {
    /// Objects this policy attaches to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_refs: Vec<LocalPolicyTargetReference>,
    /// Soft limit on the per-connection buffer size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_connection_buffer_limit_bytes: Option<u32>,
}

/// Settings applied to the HTTP connection manager of HTTP listeners
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.portico.dev",
    version = "v1alpha1",
    kind = "HttpListenerPolicy",
    plural = "httplistenerpolicies",
    namespaced,
    status = "PolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HttpListenerPolicySpec {
    /// Objects this policy attaches to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_refs: Vec<LocalPolicyTargetReference>,
    /// Enable response compression
    #[serde(default)]
    pub compress: bool,
}
