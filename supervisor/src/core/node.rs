use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::Ipv4Addr;

use common::url_utils::node_api_url;

/// One replica's network identity for the current tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub pod_name: String,
    pub ip: String,
    pub peering_port: u16,
    pub api_port: u16,
}

impl NodeEndpoint {
    pub fn short_name(&self) -> &str {
        short_name(&self.pod_name)
    }

    /// `host:peeringPort:apiPort` as consumed by the consensus engine.
    pub fn triple(&self) -> String {
        format!("{}:{}:{}", self.ip, self.peering_port, self.api_port)
    }

    pub fn api_url(&self) -> String {
        node_api_url(&self.ip, self.api_port)
    }
}

/// Host id of a raft endpoint: the IP as-is, or the first DNS label.
pub fn short_name(raft_endpoint: &str) -> &str {
    let host = raft_endpoint
        .split_once(':')
        .map(|(host, _)| host)
        .unwrap_or(raft_endpoint);

    if host.parse::<Ipv4Addr>().is_ok() {
        return host;
    }

    match host.find('.') {
        Some(idx) => &host[..idx],
        None => host,
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NodeState {
    #[serde(rename = "LEADER")]
    Leader,
    #[serde(rename = "FOLLOWER")]
    Follower,
    #[serde(rename = "CANDIDATE")]
    Candidate,
    #[serde(rename = "ERROR")]
    ErrorState,
    #[serde(rename = "UNREACHABLE")]
    UnreachableState,
}

impl NodeState {
    /// Unknown role strings are treated as errors.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LEADER" => NodeState::Leader,
            "FOLLOWER" => NodeState::Follower,
            "CANDIDATE" => NodeState::Candidate,
            "UNREACHABLE" => NodeState::UnreachableState,
            _ => NodeState::ErrorState,
        }
    }

    pub fn is_reachable(self) -> bool {
        !matches!(self, NodeState::ErrorState | NodeState::UnreachableState)
    }
}

impl Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Leader => write!(f, "LEADER"),
            NodeState::Follower => write!(f, "FOLLOWER"),
            NodeState::Candidate => write!(f, "CANDIDATE"),
            NodeState::ErrorState => write!(f, "ERROR"),
            NodeState::UnreachableState => write!(f, "UNREACHABLE"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeStatus {
    pub state: NodeState,
    pub queued_writes: u64,
    pub committed_index: u64,
}

impl NodeStatus {
    pub fn unreachable() -> Self {
        Self {
            state: NodeState::UnreachableState,
            queued_writes: 0,
            committed_index: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResourceError {
    #[serde(rename = "OUT_OF_MEMORY")]
    OutOfMemory,
    #[serde(rename = "OUT_OF_DISK")]
    OutOfDisk,
}

impl ResourceError {
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "OUT_OF_MEMORY" => Some(ResourceError::OutOfMemory),
            "OUT_OF_DISK" => Some(ResourceError::OutOfDisk),
            _ => None,
        }
    }
}

impl Display for ResourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceError::OutOfMemory => write!(f, "OUT_OF_MEMORY"),
            ResourceError::OutOfDisk => write!(f, "OUT_OF_DISK"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeHealth {
    pub ok: bool,
    pub resource_error: Option<ResourceError>,
}

impl NodeHealth {
    /// Out of memory or disk: nothing the supervisor does will fix it.
    pub fn is_unrecoverable(&self) -> bool {
        !self.ok && self.resource_error.is_some()
    }
}
