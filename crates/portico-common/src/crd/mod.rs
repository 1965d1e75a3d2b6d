//! Custom Resource Definitions owned by Portico
//!
//! Extension refs, attached policies and opaque upstreams all live in the
//! `gateway.portico.dev` group.

mod direct_response;
mod gateway_parameters;
mod listener_policy;
mod route_policy;
mod types;
mod upstream;

pub use direct_response::{
    DirectResponseRoute, DirectResponseRouteSpec, MAX_DIRECT_RESPONSE_BODY_BYTES,
};
pub use gateway_parameters::{
    GatewayParameters, GatewayParametersSpec, GatewayParametersStatus, Image, KubernetesProxyConfig,
};
pub use listener_policy::{
    HttpListenerPolicy, HttpListenerPolicySpec, ListenerPolicy, ListenerPolicySpec,
};
pub use route_policy::{RoutePolicy, RoutePolicySpec};
pub use types::{
    Condition, ConditionStatus, LocalPolicyTargetReference, PolicyAncestorStatus, PolicyStatus,
};
pub use upstream::{AwsUpstream, StaticUpstream, Upstream, UpstreamSpec};
