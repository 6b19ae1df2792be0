use std::collections::BTreeMap;
use std::fmt::Display;

use crate::core::node::{NodeState, NodeStatus};
use crate::core::quorum::min_required_nodes;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterStatus {
    Ok,
    NotReady,
    SplitBrain,
    ElectionDeadlock,
}

impl Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterStatus::Ok => write!(f, "OK"),
            ClusterStatus::NotReady => write!(f, "NOT_READY"),
            ClusterStatus::SplitBrain => write!(f, "SPLIT_BRAIN"),
            ClusterStatus::ElectionDeadlock => write!(f, "ELECTION_DEADLOCK"),
        }
    }
}

/// Synthesizes one cluster status from the statuses observed this tick.
///
/// - more than one leader: split brain
/// - one leader: ok when a majority of nodes is reachable, otherwise not ready
/// - no leader among more than one node, with a reachable majority that includes at
///   least one candidate: election deadlock
/// - anything else, including a leaderless majority of followers mid re-election: not ready
pub fn cluster_status(statuses: &BTreeMap<String, NodeStatus>) -> ClusterStatus {
    let total = statuses.len();
    if total == 0 {
        return ClusterStatus::NotReady;
    }

    let majority = min_required_nodes(total);
    let leaders = statuses
        .values()
        .filter(|s| s.state == NodeState::Leader)
        .count();
    let reachable = statuses.values().filter(|s| s.state.is_reachable()).count();
    let candidates = statuses
        .values()
        .filter(|s| s.state == NodeState::Candidate)
        .count();

    match leaders {
        0 if total > 1 && reachable >= majority && candidates > 0 => {
            ClusterStatus::ElectionDeadlock
        }
        0 => ClusterStatus::NotReady,
        1 if reachable >= majority => ClusterStatus::Ok,
        1 => ClusterStatus::NotReady,
        _ => ClusterStatus::SplitBrain,
    }
}
