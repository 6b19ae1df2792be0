use std::fmt::Display;
use tracing::{debug, error, warn};

use common::constants::QUORUM_READINESS_GATE_CONDITION;
use common::time_utils::utc_now_rfc3339;

use crate::core::error::SupervisorError;
use crate::core::node::{NodeEndpoint, NodeHealth, NodeStatus};
use crate::core::platform::{Condition, ObjectKey, Platform, replace_condition};
use crate::core::probe::ProbeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadinessGateReason {
    NodeHealthy,
    NodeNotHealthy,
    NodeNotRecoverable,
}

impl ReadinessGateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessGateReason::NodeHealthy => "NodeHealthy",
            ReadinessGateReason::NodeNotHealthy => "NodeNotHealthy",
            ReadinessGateReason::NodeNotRecoverable => "NodeNotRecoverable",
        }
    }
}

impl Display for ReadinessGateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gate condition for one node from its status and health probe.
pub fn readiness_condition(
    node: &NodeEndpoint,
    status: &NodeStatus,
    health: &Result<NodeHealth, ProbeError>,
) -> (ReadinessGateReason, Condition) {
    let mut reason = ReadinessGateReason::NodeHealthy;
    let mut message = format!("node's role is now: {}", status.state);

    match health {
        Err(e) => {
            error!(node = node.short_name(), ip = %node.ip, "fetching node health failed: {}", e);
            reason = ReadinessGateReason::NodeNotHealthy;
        }
        Ok(h) if h.is_unrecoverable() => {
            if let Some(resource_error) = h.resource_error {
                error!(
                    node = node.short_name(),
                    "health check reported a blocking node error: {}, quorum cannot be recovered automatically",
                    resource_error
                );
                message = format!("node is failing: {}", resource_error);
            }
            reason = ReadinessGateReason::NodeNotRecoverable;
        }
        Ok(h) if !h.ok => reason = ReadinessGateReason::NodeNotHealthy,
        Ok(_) => {}
    }

    debug!(
        node = node.short_name(),
        ip = %node.ip,
        healthy = reason == ReadinessGateReason::NodeHealthy,
        "reporting node health"
    );

    let condition = Condition {
        type_: QUORUM_READINESS_GATE_CONDITION.to_string(),
        status: reason == ReadinessGateReason::NodeHealthy,
        reason: reason.as_str().to_string(),
        message,
        last_transition_time: None,
    };
    (reason, condition)
}

/// Replaces the gate condition on the pod. A missing pod is not an error, and an
/// unchanged gate is not written.
pub async fn update_pod_readiness_gate(
    platform: &dyn Platform,
    pod_key: &ObjectKey,
    condition: Condition,
) -> Result<(), SupervisorError> {
    let Some(pod) = platform.get_pod(pod_key).await? else {
        warn!(pod = %pod_key, "unable to fetch pod for readiness gate");
        return Ok(());
    };

    let conditions = replace_condition(&pod.conditions, condition, utc_now_rfc3339());
    if conditions == pod.conditions {
        debug!(pod = %pod_key, "readiness gate unchanged");
        return Ok(());
    }

    match platform.patch_pod_conditions(pod_key, conditions).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            warn!(pod = %pod_key, "pod vanished before readiness gate patch");
            Ok(())
        }
        Err(e) => {
            error!(pod = %pod_key, "updating pod readiness gate condition failed: {}", e);
            Err(e)
        }
    }
}
