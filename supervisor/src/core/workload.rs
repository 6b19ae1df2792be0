use tracing::{debug, error, info, instrument, warn};

use common::constants::QUORUM_READINESS_GATE_CONDITION;

use crate::core::cluster::{Cluster, ClusterSpec};
use crate::core::error::SupervisorError;
use crate::core::membership;
use crate::core::platform::{ObjectKey, Platform, Workload};
use crate::core::quorum::ConditionQuorum;
use crate::core::template_hash::composite_hash;

/// Outcomes after which the workload is left alone until the next quorum decision.
pub const SKIP_REASONS: [ConditionQuorum; 5] = [
    ConditionQuorum::QuorumDowngraded,
    ConditionQuorum::QuorumUpgraded,
    ConditionQuorum::QuorumNeedsAttentionMemoryOrDiskIssue,
    ConditionQuorum::QuorumNotReady,
    ConditionQuorum::QuorumNotReadyWaitATerm,
];

/// Outcomes that hold back growth until the write backlog drains. Template changes still
/// roll out.
pub const HOLD_GROWTH_REASONS: [ConditionQuorum; 2] = [
    ConditionQuorum::QuorumNeedsAttentionClusterIsLagging,
    ConditionQuorum::QuorumQueuedWrites,
];

pub async fn fresh_workload(
    platform: &dyn Platform,
    key: &ObjectKey,
) -> Result<Workload, SupervisorError> {
    platform.get_workload(key).await?.ok_or_else(|| {
        error!(workload = %key, "unable to fetch workload");
        SupervisorError::not_found("workload", key)
    })
}

/// Sets the declared replica count. A workload already at `desired` is not written.
pub async fn scale_workload(
    platform: &dyn Platform,
    key: &ObjectKey,
    desired: u32,
) -> Result<Workload, SupervisorError> {
    let workload = fresh_workload(platform, key).await?;
    if workload.spec_replicas == desired {
        debug!(workload = %key, replicas = desired, "workload already scaled to desired replicas");
        return Ok(workload);
    }

    let scaled = Workload {
        spec_replicas: desired,
        ..workload
    };
    platform
        .update_workload(scaled)
        .await
        .inspect_err(|e| error!(workload = %key, "updating workload replicas failed: {}", e))
}

/// Deletes every pod of the workload so the platform recreates them from scratch.
pub async fn purge_workload_pods(
    platform: &dyn Platform,
    workload: &Workload,
) -> Result<(), SupervisorError> {
    let pods = platform
        .list_pods(&workload.key.namespace, &workload.selector)
        .await?;

    for pod in pods {
        platform
            .delete_pod(&pod.key)
            .await
            .inspect_err(|e| error!(pod = %pod.key, "failed to delete pod: {}", e))?;
    }
    Ok(())
}

fn last_reason_in(cluster: &Cluster, reasons: &[ConditionQuorum]) -> bool {
    cluster
        .condition(QUORUM_READINESS_GATE_CONDITION)
        .map(|c| reasons.iter().any(|r| r.as_str() == c.reason))
        .unwrap_or(false)
}

fn log_lag_thresholds(spec: &ClusterSpec) {
    debug!(
        read = spec.healthy_read_lag(),
        write = spec.healthy_write_lag(),
        "reporting lag thresholds"
    );
}

/// Creates the workload, or brings replicas and template back to the cluster's
/// declaration unless the last quorum decision asked to hold off.
#[instrument(name = "workload.sync", skip_all, fields(cluster = %cluster.spec.key()))]
pub async fn sync_workload(
    platform: &dyn Platform,
    cluster: &Cluster,
) -> Result<Workload, SupervisorError> {
    let spec = &cluster.spec;
    let hash = composite_hash(&spec.template)?;
    let key = spec.workload_key();

    let Some(current) = platform.get_workload(&key).await? else {
        debug!(workload = %key, "creating workload");
        let created = platform
            .create_workload(Workload::for_cluster(spec, Some(hash)))
            .await
            .inspect_err(|e| error!(workload = %key, "creating workload failed: {}", e))?;
        log_lag_thresholds(spec);
        return Ok(created);
    };

    if last_reason_in(cluster, &SKIP_REASONS) {
        log_lag_thresholds(spec);
        return Ok(current);
    }

    let mut replicas = spec.replicas;
    if replicas > current.spec_replicas && last_reason_in(cluster, &HOLD_GROWTH_REASONS) {
        info!(
            workload = %key,
            declared = current.spec_replicas,
            target = spec.replicas,
            "holding replicas until queued writes drain"
        );
        replicas = current.spec_replicas;
    }

    let drifted = current.spec_replicas != replicas
        || current.template_hash.as_deref() != Some(hash.as_str());
    if !drifted {
        log_lag_thresholds(spec);
        return Ok(current);
    }

    info!(
        workload = %key,
        replicas,
        declared = current.spec_replicas,
        "updating workload"
    );
    let desired = Workload {
        spec_replicas: replicas,
        template_hash: Some(hash),
        service_name: spec.service_name(),
        selector: spec.selector(),
        ..current
    };
    let updated = platform
        .update_workload(desired)
        .await
        .inspect_err(|e| error!(workload = %key, "updating workload failed: {}", e))?;

    match membership::read(platform, &spec.membership_key()).await? {
        Some(record) => {
            if let Err(e) =
                membership::update(platform, spec, &record, Some(updated.spec_replicas), true).await
            {
                warn!(membership = %record.key, "unable to resize membership record: {}", e);
            }
        }
        None => debug!("no membership record to resize"),
    }

    log_lag_thresholds(spec);
    Ok(updated)
}
