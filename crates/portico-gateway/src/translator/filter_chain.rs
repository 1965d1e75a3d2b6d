//! Filter chain assembly
//!
//! HTTP chains end in a connection manager that fetches its routes over RDS
//! under the chain's own name; TCP chains end in a TCP proxy.

use portico_common::config::OcspStaplePolicy;

use super::sanitize_name;
use crate::extensions::StagedHttpFilter;
use crate::ir::{BackendRefIr, FilterChainCommon};
use crate::proxy::{
    ClusterSpecifier, ClusterWeight, DownstreamTlsContext, FilterChain, FilterChainMatch,
    HttpConnectionManager, HttpFilter, NetworkFilter, NetworkFilterConfig, TcpProxy,
    HTTP_CONNECTION_MANAGER, ROUTER, TCP_PROXY, UPSTREAM_CODEC,
};
use crate::tls::TlsBundle;

/// Stats prefix of a connection manager whose chain has no name
pub const DEFAULT_STAT_PREFIX: &str = "http";

/// Connection manager for an HTTP filter chain
///
/// Filters are ordered by stage with the router last. Upstream filters, when
/// any, end with the upstream codec.
pub fn http_connection_manager(
    chain_name: &str,
    mut filters: Vec<StagedHttpFilter>,
    mut upstream_filters: Vec<StagedHttpFilter>,
) -> HttpConnectionManager {
    filters.sort_by_key(|f| f.stage);
    upstream_filters.sort_by_key(|f| f.stage);

    let mut http_filters: Vec<HttpFilter> = filters.into_iter().map(|f| f.filter).collect();
    http_filters.push(HttpFilter::named(ROUTER));

    let mut upstream_http_filters: Vec<HttpFilter> =
        upstream_filters.into_iter().map(|f| f.filter).collect();
    if !upstream_http_filters.is_empty() {
        upstream_http_filters.push(HttpFilter::named(UPSTREAM_CODEC));
    }

    let stat_prefix = if chain_name.is_empty() {
        DEFAULT_STAT_PREFIX.to_string()
    } else {
        chain_name.to_string()
    };
    HttpConnectionManager {
        stat_prefix,
        normalize_path: true,
        route_config_name: chain_name.to_string(),
        http_filters,
        upstream_http_filters,
    }
}

/// Proxy spelling of an OCSP staple policy
pub fn ocsp_policy_name(policy: OcspStaplePolicy) -> &'static str {
    match policy {
        OcspStaplePolicy::Lenient => "LENIENT_STAPLING",
        OcspStaplePolicy::Strict => "STRICT_STAPLING",
        OcspStaplePolicy::MustStaple => "MUST_STAPLE",
    }
}

fn downstream_tls(bundle: &TlsBundle) -> DownstreamTlsContext {
    DownstreamTlsContext {
        certificate_chain: bundle.cert_chain.clone(),
        private_key: bundle.private_key.clone(),
        validation_context: bundle.root_ca.clone(),
        ocsp_staple: bundle.ocsp_staple.clone(),
        ocsp_staple_policy: ocsp_policy_name(bundle.ocsp_policy).to_string(),
    }
}

/// Filter chain shell: name, SNI match and TLS
pub fn filter_chain(common: &FilterChainCommon, filters: Vec<NetworkFilter>) -> FilterChain {
    let filter_chain_match = (!common.server_names.is_empty()).then(|| FilterChainMatch {
        server_names: common.server_names.clone(),
    });
    FilterChain {
        name: sanitize_name(&common.name).into_owned(),
        filter_chain_match,
        filters,
        transport_socket: common.tls.as_ref().map(downstream_tls),
    }
}

/// Connection manager network filter
pub fn hcm_filter(hcm: HttpConnectionManager) -> NetworkFilter {
    NetworkFilter {
        name: HTTP_CONNECTION_MANAGER.to_string(),
        config: NetworkFilterConfig::HttpConnectionManager(hcm),
    }
}

/// One cluster, or a weighted split when there are several
pub fn cluster_specifier(weights: Vec<ClusterWeight>) -> ClusterSpecifier {
    match <[ClusterWeight; 1]>::try_from(weights) {
        Ok([only])
            if only.request_headers_to_add.is_empty()
                && only.request_headers_to_remove.is_empty()
                && only.typed_per_filter_config.is_empty() =>
        {
            ClusterSpecifier::Cluster(only.name)
        }
        Ok([only]) => ClusterSpecifier::WeightedClusters(vec![only]),
        Err(weights) => ClusterSpecifier::WeightedClusters(weights),
    }
}

/// TCP proxy network filter for a chain's backends
pub fn tcp_proxy_filter(chain_name: &str, backends: &[BackendRefIr]) -> NetworkFilter {
    let weights = backends
        .iter()
        .map(|b| ClusterWeight::new(sanitize_name(&b.cluster_name), b.weight))
        .collect();
    NetworkFilter {
        name: TCP_PROXY.to_string(),
        config: NetworkFilterConfig::TcpProxy(TcpProxy {
            stat_prefix: sanitize_name(chain_name).into_owned(),
            cluster: cluster_specifier(weights),
        }),
    }
}
