mod common;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use supervisor::core::cluster::ClusterSpec;
use supervisor::core::membership::split_members;
use supervisor::core::node::{NodeEndpoint, NodeHealth, NodeState, NodeStatus, ResourceError};
use supervisor::core::platform::{Platform, Workload};
use supervisor::core::probe::{NodeProber, ProbeError, ProbeOptions};
use supervisor::core::quorum::{ConditionQuorum, downgrade_quorum, reconcile_quorum};
use supervisor::core::readiness::update_pod_readiness_gate;
use supervisor::core::state::SupervisorState;
use supervisor::core::store::KvPlatform;

use crate::common::{
    ScriptedNode, ScriptedProber, TestSupervisor, exhausted, healthy, init_tracing, node, status,
    unreachable_node,
};

fn gate<'a>(pod: &'a supervisor::core::platform::Pod) -> &'a supervisor::core::platform::Condition {
    pod.conditions
        .iter()
        .find(|c| c.type_ == "RaftQuorumReady")
        .expect("readiness gate missing")
}

#[tokio::test]
async fn healthy_cluster_is_ready() -> Result<()> {
    init_tracing();
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 3);
    let pods = ts.provision(&spec, 3).await?;

    ts.script(&pods[0], node(NodeState::Leader));
    ts.script(&pods[1], node(NodeState::Follower));
    ts.script(&pods[2], node(NodeState::Follower));

    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_eq!(outcome.condition, ConditionQuorum::QuorumReady);

    for pod in ts.pods(&spec).await? {
        let cond = gate(&pod);
        assert!(cond.status, "{} should be ready", pod.key);
        assert_eq!(cond.reason, "NodeHealthy");
    }
    let leader = ts.pods(&spec).await?.remove(0);
    assert_eq!(gate(&leader).message, "node's role is now: LEADER");

    // Probed in pod-name order.
    let calls = ts.prober.status_calls.lock().unwrap().clone();
    assert_eq!(calls, vec!["ts-sts-0", "ts-sts-1", "ts-sts-2"]);
    Ok(())
}

#[tokio::test]
async fn one_unreachable_node_keeps_quorum() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 3);
    let pods = ts.provision(&spec, 3).await?;

    ts.script(&pods[0], node(NodeState::Leader));
    ts.script(&pods[1], node(NodeState::Follower));
    ts.script(&pods[2], unreachable_node());

    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_eq!(outcome.condition, ConditionQuorum::QuorumReady);

    let pods = ts.pods(&spec).await?;
    assert_eq!(gate(&pods[2]).reason, "NodeNotHealthy");
    assert!(!gate(&pods[2]).status);
    assert!(gate(&pods[0]).status);
    Ok(())
}

#[tokio::test]
async fn out_of_disk_needs_attention_without_mutation() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 3);
    let pods = ts.provision(&spec, 3).await?;

    ts.script(&pods[0], node(NodeState::Leader));
    ts.script(
        &pods[1],
        ScriptedNode {
            status: Some(status(NodeState::Follower, 0)),
            health: Some(exhausted(ResourceError::OutOfDisk)),
        },
    );
    ts.script(&pods[2], node(NodeState::Follower));

    let before = ts.record(&spec).await?;
    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_eq!(
        outcome.condition,
        ConditionQuorum::QuorumNeedsAttentionMemoryOrDiskIssue
    );

    assert_eq!(ts.record(&spec).await?, before);
    assert_eq!(ts.workload(&spec).await?.spec_replicas, 3);

    let pods = ts.pods(&spec).await?;
    let cond = gate(&pods[1]);
    assert_eq!(cond.reason, "NodeNotRecoverable");
    assert_eq!(cond.message, "node is failing: OUT_OF_DISK");
    Ok(())
}

#[tokio::test]
async fn incremental_upgrade_adds_one_replica() -> Result<()> {
    init_tracing();
    let ts = TestSupervisor::new()?;
    let mut spec = ClusterSpec::new("search", "ts", 3);
    spec.incremental_quorum_recovery = true;
    let pods = ts.provision(&spec, 1).await?;
    ts.script(&pods[0], node(NodeState::Leader));

    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_eq!(outcome.condition, ConditionQuorum::QuorumUpgraded);
    assert_eq!(outcome.size, 2);

    assert_eq!(ts.workload(&spec).await?.spec_replicas, 2);
    let record = ts.record(&spec).await?;
    assert_eq!(split_members(&record.nodes).len(), 2);
    assert_eq!(
        split_members(&record.fallback),
        vec!["ts-sts-0.ts-sts-svc:8107:8108", "ts-sts-1.ts-sts-svc:8107:8108"]
    );
    Ok(())
}

#[tokio::test]
async fn full_upgrade_jumps_to_target() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 5);
    let pods = ts.provision(&spec, 1).await?;
    ts.script(&pods[0], node(NodeState::Leader));

    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_eq!(outcome.condition, ConditionQuorum::QuorumUpgraded);
    assert_eq!(outcome.size, 5);
    assert_eq!(ts.workload(&spec).await?.spec_replicas, 5);
    assert_eq!(split_members(&ts.record(&spec).await?.nodes).len(), 5);
    Ok(())
}

#[tokio::test]
async fn queued_writes_defer_upgrade() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 3);
    let pods = ts.provision(&spec, 1).await?;
    ts.script(
        &pods[0],
        ScriptedNode {
            status: Some(status(NodeState::Leader, 10)),
            health: Some(healthy()),
        },
    );

    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_eq!(outcome.condition, ConditionQuorum::QuorumQueuedWrites);
    assert_eq!(ts.workload(&spec).await?.spec_replicas, 1);
    Ok(())
}

#[tokio::test]
async fn write_backlog_over_threshold_is_lagging() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let mut spec = ClusterSpec::new("search", "ts", 3);
    spec.healthy_write_lag = Some(100);
    let pods = ts.provision(&spec, 3).await?;

    ts.script(&pods[0], node(NodeState::Leader));
    ts.script(
        &pods[1],
        ScriptedNode {
            status: Some(status(NodeState::Follower, 101)),
            health: Some(healthy()),
        },
    );
    ts.script(&pods[2], node(NodeState::Follower));

    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_eq!(
        outcome.condition,
        ConditionQuorum::QuorumNeedsAttentionClusterIsLagging
    );
    Ok(())
}

#[tokio::test]
async fn split_brain_downgrades_to_one_node() -> Result<()> {
    init_tracing();
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 3);
    let pods = ts.provision(&spec, 3).await?;

    ts.script(&pods[0], node(NodeState::Leader));
    ts.script(&pods[1], node(NodeState::Leader));
    ts.script(&pods[2], node(NodeState::Follower));

    let before = ts.record(&spec).await?;
    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_eq!(outcome.condition, ConditionQuorum::QuorumDowngraded);
    assert_eq!(outcome.size, 1);

    assert_eq!(ts.workload(&spec).await?.spec_replicas, 1);
    let record = ts.record(&spec).await?;
    assert!(record.resource_version > before.resource_version);
    assert_eq!(split_members(&record.nodes).len(), 1);
    assert_eq!(record.fallback, "ts-sts-0.ts-sts-svc:8107:8108");
    Ok(())
}

#[tokio::test]
async fn split_brain_waits_while_legacy_key_names_workload() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 3);
    let pods = ts.provision(&spec, 3).await?;

    let mut record = ts.record(&spec).await?;
    record.nodes_list = Some("ts-sts".to_string());
    ts.platform.update_membership(record).await?;

    ts.script(&pods[0], node(NodeState::Leader));
    ts.script(&pods[1], node(NodeState::Leader));
    ts.script(&pods[2], node(NodeState::Follower));

    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_eq!(outcome.condition, ConditionQuorum::QuorumNotReadyWaitATerm);
    assert_eq!(ts.workload(&spec).await?.spec_replicas, 3);
    Ok(())
}

#[tokio::test]
async fn election_deadlock_downgrades() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 3);
    let pods = ts.provision(&spec, 3).await?;

    for pod in &pods {
        ts.script(pod, node(NodeState::Candidate));
    }

    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_eq!(outcome.condition, ConditionQuorum::QuorumDowngraded);
    assert_eq!(ts.workload(&spec).await?.spec_replicas, 1);
    Ok(())
}

#[tokio::test]
async fn lost_majority_waits_a_term() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 3);
    let pods = ts.provision(&spec, 3).await?;

    ts.script(&pods[0], node(NodeState::Leader));
    ts.script(&pods[1], unreachable_node());
    ts.script(&pods[2], unreachable_node());

    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_eq!(outcome.condition, ConditionQuorum::QuorumNotReadyWaitATerm);
    assert_eq!(ts.workload(&spec).await?.spec_replicas, 3);
    Ok(())
}

#[tokio::test]
async fn single_unreachable_node_is_purged() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 1);
    let pods = ts.provision(&spec, 1).await?;
    let old_ip = pods[0].ip.clone();
    ts.script(&pods[0], unreachable_node());

    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_eq!(outcome.condition, ConditionQuorum::QuorumNotReady);

    // Recreated by the controller with a fresh address.
    let pods = ts.pods(&spec).await?;
    assert_eq!(pods.len(), 1);
    assert_ne!(pods[0].ip, old_ip);
    Ok(())
}

#[tokio::test]
async fn single_candidate_waits_a_term() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 1);
    let pods = ts.provision(&spec, 1).await?;
    ts.script(&pods[0], node(NodeState::Candidate));

    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_eq!(outcome.condition, ConditionQuorum::QuorumNotReadyWaitATerm);
    assert_eq!(ts.pods(&spec).await?[0].ip, pods[0].ip);
    Ok(())
}

#[tokio::test]
async fn unchanged_inputs_reproduce_the_decision() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 3);
    let pods = ts.provision(&spec, 3).await?;
    ts.script(&pods[0], node(NodeState::Leader));
    ts.script(&pods[1], node(NodeState::Follower));
    ts.script(&pods[2], node(NodeState::Follower));

    let first = reconcile_quorum(&ts.state, &spec).await?;
    let record = ts.record(&spec).await?;
    let workload = ts.workload(&spec).await?;
    let pods = ts.pods(&spec).await?;

    let second = reconcile_quorum(&ts.state, &spec).await?;

    assert_eq!(first, second);
    assert_eq!(ts.record(&spec).await?, record);
    assert_eq!(ts.workload(&spec).await?, workload);
    // Gates already in place are not rewritten.
    assert_eq!(ts.pods(&spec).await?, pods);
    Ok(())
}

#[tokio::test]
async fn leaderless_followers_are_not_downgraded() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 3);
    let pods = ts.provision(&spec, 3).await?;
    for pod in &pods {
        ts.script(pod, node(NodeState::Follower));
    }

    let outcome = reconcile_quorum(&ts.state, &spec).await?;
    assert_ne!(outcome.condition, ConditionQuorum::QuorumDowngraded);
    assert_eq!(ts.workload(&spec).await?.spec_replicas, 3);
    assert_eq!(split_members(&ts.record(&spec).await?.nodes).len(), 3);
    Ok(())
}

#[tokio::test]
async fn downgrade_without_healthy_nodes_purges_pods() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 3);
    let before = ts.provision(&spec, 3).await?;
    let record = ts.record(&spec).await?;

    let outcome = downgrade_quorum(ts.platform.as_ref(), &spec, &record, 0, 1).await?;
    assert_eq!(outcome.condition, ConditionQuorum::QuorumNotReady);

    // Replicas untouched, every pod recreated with a new address.
    assert_eq!(ts.workload(&spec).await?.spec_replicas, 3);
    let after = ts.pods(&spec).await?;
    assert_eq!(after.len(), 3);
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.key, new.key);
        assert_ne!(old.ip, new.ip);
    }
    assert_eq!(ts.record(&spec).await?, record);
    Ok(())
}

/// Scales the workload down while the last pod's health is being checked, so its
/// readiness gate has no pod left to land on.
struct ShrinkingProber {
    inner: Arc<ScriptedProber>,
    platform: Arc<KvPlatform>,
    spec: ClusterSpec,
    vanishing: String,
}

#[async_trait]
impl NodeProber for ShrinkingProber {
    async fn health(&self, node: &NodeEndpoint, opts: &ProbeOptions) -> Result<NodeHealth, ProbeError> {
        if node.pod_name == self.vanishing {
            if let Ok(Some(workload)) = self.platform.get_workload(&self.spec.workload_key()).await {
                let shrunk = Workload {
                    spec_replicas: workload.spec_replicas - 1,
                    ..workload
                };
                let _ = self.platform.update_workload(shrunk).await;
            }
        }
        self.inner.health(node, opts).await
    }

    async fn status(&self, node: &NodeEndpoint, opts: &ProbeOptions) -> Result<NodeStatus, ProbeError> {
        self.inner.status(node, opts).await
    }
}

#[tokio::test]
async fn vanished_pod_does_not_fail_the_decision() -> Result<()> {
    let ts = TestSupervisor::new()?;
    let spec = ClusterSpec::new("search", "ts", 3);
    let pods = ts.provision(&spec, 3).await?;
    ts.script(&pods[0], node(NodeState::Leader));
    ts.script(&pods[1], node(NodeState::Follower));
    ts.script(&pods[2], node(NodeState::Follower));

    let state = SupervisorState {
        platform: ts.platform.clone(),
        prober: Arc::new(ShrinkingProber {
            inner: ts.prober.clone(),
            platform: ts.platform.clone(),
            spec: spec.clone(),
            vanishing: "ts-sts-2".to_string(),
        }),
    };

    let outcome = reconcile_quorum(&state, &spec).await?;
    assert_eq!(outcome.condition, ConditionQuorum::QuorumReady);

    let remaining = ts.pods(&spec).await?;
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|p| gate(p).status));

    // Patching a pod that never existed is just as harmless.
    let cond = gate(&remaining[0]).clone();
    update_pod_readiness_gate(ts.platform.as_ref(), &spec.pod_key(9), cond).await?;
    Ok(())
}
