use tracing::{info, instrument};

use common::constants::QUORUM_READINESS_GATE_CONDITION;

use crate::core::error::SupervisorError;
use crate::core::membership::{MembershipSync, force_pods_membership_refresh, reconcile_membership};
use crate::core::platform::{Condition, ObjectKey};
use crate::core::quorum::{ConditionQuorum, QuorumOutcome, reconcile_quorum};
use crate::core::state::SupervisorState;
use crate::core::workload::sync_workload;

#[derive(Clone, Debug)]
pub struct TickOutcome {
    pub cluster: ObjectKey,
    pub membership: MembershipSync,
    pub quorum: QuorumOutcome,
}

/// One reconciliation tick for one cluster.
///
/// Membership, workload and quorum are re-derived from live state every time, so a
/// tick that fails halfway is repaired by the next one.
#[instrument(name = "supervisor.tick", skip(ctx), fields(cluster = %key))]
pub async fn reconcile_cluster(
    ctx: &SupervisorState,
    key: &ObjectKey,
) -> Result<TickOutcome, SupervisorError> {
    let platform = ctx.platform.as_ref();
    let cluster = platform
        .get_cluster(key)
        .await?
        .ok_or_else(|| SupervisorError::not_found("cluster", key))?;
    let spec = &cluster.spec;
    spec.validate()?;

    let membership = reconcile_membership(platform, spec).await?;
    if membership == MembershipSync::Updated {
        force_pods_membership_refresh(platform, spec).await?;
    }

    sync_workload(platform, &cluster).await?;

    let quorum = reconcile_quorum(ctx, spec).await?;

    let condition = Condition {
        type_: QUORUM_READINESS_GATE_CONDITION.to_string(),
        status: quorum.condition == ConditionQuorum::QuorumReady,
        reason: quorum.condition.as_str().to_string(),
        message: quorum.condition.message().to_string(),
        last_transition_time: None,
    };
    platform
        .set_cluster_condition(key, condition, quorum.condition.as_str())
        .await?;

    info!(reason = %quorum.condition, size = quorum.size, "reconciled cluster");

    Ok(TickOutcome {
        cluster: key.clone(),
        membership,
        quorum,
    })
}
