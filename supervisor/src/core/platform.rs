use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::core::cluster::{Cluster, ClusterSpec};
use crate::core::error::SupervisorError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
    #[serde(default)]
    pub last_transition_time: Option<String>,
}

/// Replaces the condition of the same type, keeping every other type in place.
///
/// The transition time is carried over while the status stays the same and set to
/// `now` when it flips or the type is new.
pub fn replace_condition(existing: &[Condition], mut new: Condition, now: String) -> Vec<Condition> {
    let previous = existing.iter().find(|c| c.type_ == new.type_);
    if new.last_transition_time.is_none() {
        new.last_transition_time = match previous {
            Some(prev) if prev.status == new.status => prev.last_transition_time.clone(),
            _ => None,
        }
        .or(Some(now));
    }

    let mut out = Vec::with_capacity(existing.len() + 1);
    let mut placed = false;
    for c in existing {
        if c.type_ != new.type_ {
            out.push(c.clone());
        } else if !placed {
            out.push(new.clone());
            placed = true;
        }
    }
    if !placed {
        out.push(new);
    }
    out
}

/// Replicated server workload (one pod per ordinal behind a headless service).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    pub key: ObjectKey,
    pub spec_replicas: u32,
    #[serde(default)]
    pub status_replicas: u32,
    #[serde(default)]
    pub ready_replicas: u32,
    pub service_name: String,
    pub selector: BTreeMap<String, String>,
    #[serde(default)]
    pub template_hash: Option<String>,
    #[serde(default)]
    pub resource_version: u64,
}

impl Workload {
    pub fn for_cluster(spec: &ClusterSpec, template_hash: Option<String>) -> Self {
        Self {
            key: spec.workload_key(),
            spec_replicas: spec.replicas,
            status_replicas: 0,
            ready_replicas: 0,
            service_name: spec.service_name(),
            selector: spec.selector(),
            template_hash,
            resource_version: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Pending" => Some(PodPhase::Pending),
            "Running" => Some(PodPhase::Running),
            "Succeeded" => Some(PodPhase::Succeeded),
            "Failed" => Some(PodPhase::Failed),
            "Unknown" => Some(PodPhase::Unknown),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Pod {
    pub key: ObjectKey,
    pub labels: BTreeMap<String, String>,
    pub phase: PodPhase,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub terminating: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub resource_version: u64,
}

impl Pod {
    /// Running or pending, not being deleted, and addressable.
    pub fn live_ip(&self) -> Option<&str> {
        if self.terminating {
            return None;
        }
        match self.phase {
            PodPhase::Running | PodPhase::Pending => self.ip.as_deref().filter(|ip| !ip.is_empty()),
            _ => None,
        }
    }

    pub fn matches(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).map(|l| l == v).unwrap_or(false))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetRef {
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub addresses: Vec<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub target_ref: Option<TargetRef>,
}

/// Service-registration record for a headless service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointSlice {
    pub key: ObjectKey,
    pub service_name: String,
    pub endpoints: Vec<Endpoint>,
}

/// The peer-discovery artifact every cluster node reads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MembershipRecord {
    pub key: ObjectKey,
    /// Name of the workload this record belongs to.
    pub owner: String,
    pub nodes: String,
    pub fallback: String,
    /// Legacy single-list key still written by older deployments.
    #[serde(default, rename = "nodeslist")]
    pub nodes_list: Option<String>,
    #[serde(default)]
    pub resource_version: u64,
}

/// The hosting platform's object store.
///
/// Writes of versioned objects are conditional on `resource_version` and fail with
/// [`SupervisorError::Conflict`] when the stored object moved on.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn apply_cluster(&self, spec: ClusterSpec) -> Result<Cluster, SupervisorError>;
    async fn get_cluster(&self, key: &ObjectKey) -> Result<Option<Cluster>, SupervisorError>;
    async fn list_clusters(&self) -> Result<Vec<Cluster>, SupervisorError>;
    /// Merges `condition` into the cluster status. Nothing is written when neither the
    /// conditions nor the phase change.
    async fn set_cluster_condition(
        &self,
        key: &ObjectKey,
        condition: Condition,
        phase: &str,
    ) -> Result<Cluster, SupervisorError>;

    async fn get_workload(&self, key: &ObjectKey) -> Result<Option<Workload>, SupervisorError>;
    async fn create_workload(&self, workload: Workload) -> Result<Workload, SupervisorError>;
    async fn update_workload(&self, workload: Workload) -> Result<Workload, SupervisorError>;

    async fn list_endpoint_slices(
        &self,
        namespace: &str,
        service_name: &str,
    ) -> Result<Vec<EndpointSlice>, SupervisorError>;
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, SupervisorError>;
    async fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>, SupervisorError>;
    async fn delete_pod(&self, key: &ObjectKey) -> Result<(), SupervisorError>;
    async fn patch_pod_conditions(
        &self,
        key: &ObjectKey,
        conditions: Vec<Condition>,
    ) -> Result<Pod, SupervisorError>;
    async fn annotate_pod(
        &self,
        key: &ObjectKey,
        annotation: &str,
        value: &str,
    ) -> Result<Pod, SupervisorError>;
    async fn report_pod(
        &self,
        key: &ObjectKey,
        phase: PodPhase,
        ip: Option<String>,
    ) -> Result<Pod, SupervisorError>;

    async fn get_membership(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<MembershipRecord>, SupervisorError>;
    async fn create_membership(
        &self,
        record: MembershipRecord,
    ) -> Result<MembershipRecord, SupervisorError>;
    async fn update_membership(
        &self,
        record: MembershipRecord,
    ) -> Result<MembershipRecord, SupervisorError>;
    async fn delete_membership(&self, key: &ObjectKey) -> Result<(), SupervisorError>;
}
