use serde::{Deserialize, Serialize};

/// Body of a node's `GET /health`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_error: Option<String>,
}

/// Body of a node's `GET /status`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub state: String,
    #[serde(default)]
    pub queued_writes: u64,
    #[serde(default)]
    pub committed_index: u64,
}

#[derive(Serialize, Deserialize)]
pub struct PodReport {
    pub phase: String,
    pub ip: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MembershipResponse {
    pub nodes: Vec<String>,
    pub fallback: Vec<String>,
}
