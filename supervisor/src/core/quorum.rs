use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use tracing::{debug, error, info, instrument};

use crate::core::cluster::ClusterSpec;
use crate::core::cluster_status::{ClusterStatus, cluster_status};
use crate::core::error::SupervisorError;
use crate::core::membership::{self, MembershipUpdate};
use crate::core::node::{NodeEndpoint, NodeStatus};
use crate::core::platform::{MembershipRecord, ObjectKey, Platform, Workload};
use crate::core::probe::ProbeOptions;
use crate::core::readiness::{ReadinessGateReason, readiness_condition, update_pod_readiness_gate};
use crate::core::state::SupervisorState;
use crate::core::workload::{fresh_workload, purge_workload_pods, scale_workload};

/// Majority of the currently available nodes.
pub fn min_required_nodes(available_nodes: usize) -> usize {
    available_nodes / 2 + 1
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionQuorum {
    QuorumReady,
    QuorumNotReady,
    QuorumNotReadyWaitATerm,
    QuorumDowngraded,
    QuorumUpgraded,
    QuorumNeedsAttentionMemoryOrDiskIssue,
    QuorumNeedsAttentionClusterIsLagging,
    QuorumQueuedWrites,
}

impl ConditionQuorum {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionQuorum::QuorumReady => "QuorumReady",
            ConditionQuorum::QuorumNotReady => "QuorumNotReady",
            ConditionQuorum::QuorumNotReadyWaitATerm => "QuorumNotReadyWaitATerm",
            ConditionQuorum::QuorumDowngraded => "QuorumDowngraded",
            ConditionQuorum::QuorumUpgraded => "QuorumUpgraded",
            ConditionQuorum::QuorumNeedsAttentionMemoryOrDiskIssue => {
                "QuorumNeedsAttentionMemoryOrDiskIssue"
            }
            ConditionQuorum::QuorumNeedsAttentionClusterIsLagging => {
                "QuorumNeedsAttentionClusterIsLagging"
            }
            ConditionQuorum::QuorumQueuedWrites => "QuorumQueuedWrites",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ConditionQuorum::QuorumReady => "quorum is ready",
            ConditionQuorum::QuorumNotReady => "quorum is not ready",
            ConditionQuorum::QuorumNotReadyWaitATerm => "quorum is not ready, waiting a term",
            ConditionQuorum::QuorumDowngraded => "quorum downgraded to a single node",
            ConditionQuorum::QuorumUpgraded => "quorum upgraded",
            ConditionQuorum::QuorumNeedsAttentionMemoryOrDiskIssue => {
                "a node is out of memory or disk, manual intervention required"
            }
            ConditionQuorum::QuorumNeedsAttentionClusterIsLagging => {
                "queued writes exceed the healthy write lag"
            }
            ConditionQuorum::QuorumQueuedWrites => "upgrade deferred until queued writes drain",
        }
    }
}

impl Display for ConditionQuorum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired vs. available membership for one tick.
#[derive(Clone, Debug)]
pub struct Quorum {
    pub min_required_nodes: usize,
    pub available_nodes: usize,
    /// Pod name to IP for every live pod of the workload.
    pub nodes: BTreeMap<String, String>,
    pub record: MembershipRecord,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuorumOutcome {
    pub condition: ConditionQuorum,
    /// Membership size after a resize, 0 when nothing was resized.
    pub size: usize,
}

impl QuorumOutcome {
    fn of(condition: ConditionQuorum) -> Self {
        Self { condition, size: 0 }
    }
}

fn waits_for_old_workload(spec: &ClusterSpec, record: &MembershipRecord) -> bool {
    record
        .nodes_list
        .as_deref()
        .map(|list| list.split(',').any(|n| n == spec.workload_name()))
        .unwrap_or(false)
}

/// Refreshes the membership record from live discovery and snapshots the quorum.
pub async fn get_quorum(
    platform: &dyn Platform,
    spec: &ClusterSpec,
    workload: &Workload,
) -> Result<Quorum, SupervisorError> {
    let record = match membership::read(platform, &spec.membership_key()).await? {
        Some(record) => record,
        None => membership::create(platform, spec).await?,
    };

    let outcome = match membership::update(platform, spec, &record, None, false).await? {
        MembershipUpdate::Applied(outcome) => outcome,
        MembershipUpdate::OwnerGone => {
            return Err(SupervisorError::not_found("workload", spec.workload_key()));
        }
    };

    let nodes = platform
        .list_pods(&workload.key.namespace, &workload.selector)
        .await?
        .iter()
        .filter_map(|p| p.live_ip().map(|ip| (p.key.name.clone(), ip.to_string())))
        .collect();

    Ok(Quorum {
        min_required_nodes: min_required_nodes(outcome.available_nodes),
        available_nodes: outcome.available_nodes,
        nodes,
        record: outcome.record,
    })
}

/// One quorum decision for the cluster: probe, classify, then grow, shrink or hold.
#[instrument(name = "quorum.reconcile", skip_all, fields(cluster = %spec.key()))]
pub async fn reconcile_quorum(
    ctx: &SupervisorState,
    spec: &ClusterSpec,
) -> Result<QuorumOutcome, SupervisorError> {
    info!("reconciling quorum health");
    let platform = ctx.platform.as_ref();

    let workload = fresh_workload(platform, &spec.workload_key()).await?;
    let quorum = get_quorum(platform, spec, &workload).await?;
    info!(
        min_required_nodes = quorum.min_required_nodes,
        available_nodes = quorum.available_nodes,
        "calculated quorum"
    );

    let opts = ProbeOptions::for_cluster(spec);
    let mut endpoints = Vec::with_capacity(quorum.nodes.len());
    let mut statuses: BTreeMap<String, NodeStatus> = BTreeMap::new();
    let mut queued_writes = 0u64;

    // Sorted by pod name for reproducible logs.
    for (pod_name, ip) in &quorum.nodes {
        let node = NodeEndpoint {
            pod_name: pod_name.clone(),
            ip: ip.clone(),
            peering_port: spec.peering_port,
            api_port: spec.api_port,
        };

        let status = match ctx.prober.status(&node, &opts).await {
            Ok(status) => status,
            Err(e) => {
                error!(node = node.short_name(), ip = %ip, "fetching node status failed: {}", e);
                NodeStatus::unreachable()
            }
        };
        queued_writes = queued_writes.max(status.queued_writes);

        debug!(
            node = node.short_name(),
            state = %status.state,
            ip = %ip,
            queued_writes = status.queued_writes,
            committed_index = status.committed_index,
            "reporting node status"
        );
        statuses.insert(pod_name.clone(), status);
        endpoints.push(node);
    }

    let status = cluster_status(&statuses);
    debug!(status = %status, "reporting cluster status");

    if status == ClusterStatus::SplitBrain {
        if waits_for_old_workload(spec, &quorum.record) {
            return Ok(QuorumOutcome::of(ConditionQuorum::QuorumNotReadyWaitATerm));
        }
        return downgrade_quorum(
            platform,
            spec,
            &quorum.record,
            workload.ready_replicas as usize,
            quorum.min_required_nodes,
        )
        .await;
    }

    let mut needs_attention = false;
    let mut unhealthy = 0usize;
    for node in &endpoints {
        let node_status = statuses
            .get(&node.pod_name)
            .copied()
            .unwrap_or_else(NodeStatus::unreachable);
        let health = ctx.prober.health(node, &opts).await;

        let (reason, condition) = readiness_condition(node, &node_status, &health);
        match reason {
            ReadinessGateReason::NodeHealthy => {}
            ReadinessGateReason::NodeNotHealthy => unhealthy += 1,
            ReadinessGateReason::NodeNotRecoverable => {
                unhealthy += 1;
                needs_attention = true;
            }
        }

        let pod_key = ObjectKey::new(&spec.namespace, &node.pod_name);
        update_pod_readiness_gate(platform, &pod_key, condition).await?;
    }

    if needs_attention {
        return Ok(QuorumOutcome::of(
            ConditionQuorum::QuorumNeedsAttentionMemoryOrDiskIssue,
        ));
    }

    let min_required = quorum.min_required_nodes;
    let available = quorum.available_nodes;
    let healthy = available.saturating_sub(unhealthy);
    info!(
        min_required_nodes = min_required,
        available_nodes = available,
        healthy_nodes = healthy,
        "evaluated quorum"
    );

    if queued_writes > spec.healthy_write_lag() {
        return Ok(QuorumOutcome::of(
            ConditionQuorum::QuorumNeedsAttentionClusterIsLagging,
        ));
    }

    if status == ClusterStatus::ElectionDeadlock {
        if waits_for_old_workload(spec, &quorum.record) {
            return Ok(QuorumOutcome::of(ConditionQuorum::QuorumNotReadyWaitATerm));
        }
        return downgrade_quorum(platform, spec, &quorum.record, healthy, min_required).await;
    }

    if status == ClusterStatus::NotReady {
        if available == 1 {
            let failed = statuses
                .get(&spec.pod_name(0))
                .map(|s| !s.state.is_reachable())
                .unwrap_or(false);
            if failed {
                info!("purging quorum");
                purge_workload_pods(platform, &workload).await?;
                return Ok(QuorumOutcome::of(ConditionQuorum::QuorumNotReady));
            }
            return Ok(QuorumOutcome::of(ConditionQuorum::QuorumNotReadyWaitATerm));
        }

        if min_required > healthy {
            return Ok(QuorumOutcome::of(ConditionQuorum::QuorumNotReadyWaitATerm));
        }
    }

    if status == ClusterStatus::Ok && workload.spec_replicas < spec.replicas {
        if queued_writes > 0 {
            return Ok(QuorumOutcome::of(ConditionQuorum::QuorumQueuedWrites));
        }
        return upgrade_quorum(platform, spec, &quorum.record).await;
    }

    if healthy < min_required {
        return Ok(QuorumOutcome::of(ConditionQuorum::QuorumNotReady));
    }
    Ok(QuorumOutcome::of(ConditionQuorum::QuorumReady))
}

/// Shrinks membership to a single node, or purges every pod when no node is healthy
/// and a single node would already be a majority.
pub async fn downgrade_quorum(
    platform: &dyn Platform,
    spec: &ClusterSpec,
    record: &MembershipRecord,
    healthy_nodes: usize,
    min_required_nodes: usize,
) -> Result<QuorumOutcome, SupervisorError> {
    info!("downgrading quorum");
    let workload = fresh_workload(platform, &spec.workload_key()).await?;

    if healthy_nodes == 0 && min_required_nodes == 1 {
        info!("purging quorum");
        purge_workload_pods(platform, &workload).await?;
        return Ok(QuorumOutcome::of(ConditionQuorum::QuorumNotReady));
    }

    let desired = 1;
    scale_workload(platform, &workload.key, desired).await?;

    let size = match membership::update(platform, spec, record, Some(desired), true).await? {
        MembershipUpdate::Applied(outcome) => outcome.available_nodes,
        MembershipUpdate::OwnerGone => 0,
    };

    Ok(QuorumOutcome {
        condition: ConditionQuorum::QuorumDowngraded,
        size,
    })
}

/// Grows the workload to the target, or by one replica with incremental recovery.
pub async fn upgrade_quorum(
    platform: &dyn Platform,
    spec: &ClusterSpec,
    record: &MembershipRecord,
) -> Result<QuorumOutcome, SupervisorError> {
    info!(incremental = spec.incremental_quorum_recovery, "upgrading quorum");
    let workload = fresh_workload(platform, &spec.workload_key()).await?;

    let size = if spec.incremental_quorum_recovery {
        (workload.status_replicas + 1).min(spec.replicas)
    } else {
        spec.replicas
    };

    scale_workload(platform, &workload.key, size).await?;
    membership::update(platform, spec, record, Some(size), true).await?;

    Ok(QuorumOutcome {
        condition: ConditionQuorum::QuorumUpgraded,
        size: size as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_of_available_nodes() {
        let table = [(1, 1), (3, 2), (5, 3), (7, 4)];
        for (available, expected) in table {
            assert_eq!(min_required_nodes(available), expected, "n={}", available);
        }
    }

    #[test]
    fn reasons_serialize_as_their_names() {
        let json = serde_json::to_string(&ConditionQuorum::QuorumNotReadyWaitATerm).unwrap();
        assert_eq!(json, "\"QuorumNotReadyWaitATerm\"");
        assert_eq!(
            ConditionQuorum::QuorumNeedsAttentionClusterIsLagging.to_string(),
            "QuorumNeedsAttentionClusterIsLagging"
        );
    }

    #[test]
    fn legacy_key_must_name_the_workload_exactly() {
        let spec = ClusterSpec::new("search", "ts", 3);
        let mut record = MembershipRecord {
            key: spec.membership_key(),
            owner: spec.workload_name(),
            nodes: String::new(),
            fallback: String::new(),
            nodes_list: Some("other-sts,ts-sts".to_string()),
            resource_version: 1,
        };
        assert!(waits_for_old_workload(&spec, &record));

        record.nodes_list = Some("ts-sts-0,ts".to_string());
        assert!(!waits_for_old_workload(&spec, &record));

        record.nodes_list = None;
        assert!(!waits_for_old_workload(&spec, &record));
    }
}
