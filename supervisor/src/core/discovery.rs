use std::collections::HashSet;
use tracing::debug;

use common::constants::NODE_NAME_LEN_LIMIT;

use crate::core::cluster::ClusterSpec;
use crate::core::error::SupervisorError;
use crate::core::platform::{EndpointSlice, Platform, Pod, Workload};

/// Deterministic peer list used before any replica is addressable.
///
/// Fails as a whole on the first name over the platform limit.
pub fn bootstrap_nodes(spec: &ClusterSpec, replicas: u32) -> Result<Vec<String>, SupervisorError> {
    let mut nodes = Vec::with_capacity(replicas as usize);
    for ordinal in 0..replicas {
        let node_name = format!("{}.{}", spec.pod_name(ordinal), spec.service_name());
        if node_name.len() > NODE_NAME_LEN_LIMIT {
            return Err(SupervisorError::NameTooLong {
                name: node_name,
                limit: NODE_NAME_LEN_LIMIT,
            });
        }
        nodes.push(format!(
            "{}:{}:{}",
            node_name, spec.peering_port, spec.api_port
        ));
    }
    Ok(nodes)
}

/// Triples for every endpoint backed by a live pod, in slice order.
///
/// Slices with no live endpoint at all are dropped.
pub fn live_endpoints(slices: &[EndpointSlice], pods: &[Pod], spec: &ClusterSpec) -> Vec<String> {
    let live_ips: HashSet<&str> = pods.iter().filter_map(Pod::live_ip).collect();

    let is_live = |addresses: &[String]| {
        addresses
            .first()
            .map(|a| live_ips.contains(a.as_str()))
            .unwrap_or(false)
    };

    let mut nodes = Vec::new();
    for slice in slices {
        let kept = slice.endpoints.iter().any(|e| {
            e.target_ref
                .as_ref()
                .map(|t| t.kind == "Pod")
                .unwrap_or(false)
                && is_live(&e.addresses)
        });
        if !kept {
            debug!(slice = %slice.key, "skipping slice without live endpoints");
            continue;
        }

        for endpoint in &slice.endpoints {
            if !is_live(&endpoint.addresses) {
                continue;
            }
            if let Some(addr) = endpoint.addresses.first() {
                nodes.push(format!("{}:{}:{}", addr, spec.peering_port, spec.api_port));
            }
        }
    }
    nodes
}

/// Live discovery against the platform for the given workload.
pub async fn live_nodes(
    platform: &dyn Platform,
    spec: &ClusterSpec,
    workload: &Workload,
) -> Result<Vec<String>, SupervisorError> {
    let slices = platform
        .list_endpoint_slices(&workload.key.namespace, &workload.service_name)
        .await?;
    let pods = platform
        .list_pods(&workload.key.namespace, &workload.selector)
        .await?;

    let nodes = live_endpoints(&slices, &pods, spec);
    debug!(workload = %workload.key, count = nodes.len(), "discovered live nodes");
    Ok(nodes)
}
