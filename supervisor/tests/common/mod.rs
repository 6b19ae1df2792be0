#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use tempfile::TempDir;

use supervisor::core::cluster::ClusterSpec;
use supervisor::core::membership;
use supervisor::core::node::{NodeEndpoint, NodeHealth, NodeState, NodeStatus, ResourceError};
use supervisor::core::platform::{MembershipRecord, Platform, Pod, PodPhase, Workload};
use supervisor::core::probe::{NodeProber, ProbeError, ProbeOptions};
use supervisor::core::state::SupervisorState;
use supervisor::core::store::KvPlatform;
use supervisor::core::template_hash::composite_hash;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("supervisor=debug")
        .try_init();
}

/// What a fake node answers. `None` means the probe fails.
#[derive(Clone, Debug, Default)]
pub struct ScriptedNode {
    pub status: Option<NodeStatus>,
    pub health: Option<NodeHealth>,
}

/// In-process prober keyed by node IP. Unknown IPs are unreachable.
#[derive(Default)]
pub struct ScriptedProber {
    nodes: Mutex<HashMap<String, ScriptedNode>>,
    pub status_calls: Mutex<Vec<String>>,
}

impl ScriptedProber {
    pub fn set(&self, ip: &str, node: ScriptedNode) {
        self.nodes.lock().unwrap().insert(ip.to_string(), node);
    }

    fn lookup(&self, ip: &str) -> ScriptedNode {
        self.nodes.lock().unwrap().get(ip).cloned().unwrap_or_default()
    }

    fn unavailable(node: &NodeEndpoint) -> ProbeError {
        ProbeError::Status {
            url: node.api_url(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[async_trait]
impl NodeProber for ScriptedProber {
    async fn health(&self, node: &NodeEndpoint, _opts: &ProbeOptions) -> Result<NodeHealth, ProbeError> {
        self.lookup(&node.ip).health.ok_or_else(|| Self::unavailable(node))
    }

    async fn status(&self, node: &NodeEndpoint, _opts: &ProbeOptions) -> Result<NodeStatus, ProbeError> {
        self.status_calls.lock().unwrap().push(node.pod_name.clone());
        self.lookup(&node.ip).status.ok_or_else(|| Self::unavailable(node))
    }
}

pub fn status(state: NodeState, queued_writes: u64) -> NodeStatus {
    NodeStatus {
        state,
        queued_writes,
        committed_index: 42,
    }
}

pub fn healthy() -> NodeHealth {
    NodeHealth {
        ok: true,
        resource_error: None,
    }
}

pub fn exhausted(resource_error: ResourceError) -> NodeHealth {
    NodeHealth {
        ok: false,
        resource_error: Some(resource_error),
    }
}

pub fn node(state: NodeState) -> ScriptedNode {
    ScriptedNode {
        status: Some(status(state, 0)),
        health: Some(healthy()),
    }
}

pub fn unreachable_node() -> ScriptedNode {
    ScriptedNode::default()
}

pub struct TestSupervisor {
    pub state: SupervisorState,
    pub platform: Arc<KvPlatform>,
    pub prober: Arc<ScriptedProber>,
    pub data_dir: TempDir,
}

impl TestSupervisor {
    pub fn new() -> Result<Self> {
        let data_dir = TempDir::new()?;
        let platform = Arc::new(KvPlatform::open(&data_dir.path().join("index"))?);
        let prober = Arc::new(ScriptedProber::default());

        let state = SupervisorState {
            platform: platform.clone(),
            prober: prober.clone(),
        };

        Ok(Self {
            state,
            platform,
            prober,
            data_dir,
        })
    }

    /// Applies the cluster, runs its workload at `live` replicas with every pod Running,
    /// and brings the membership record in line with the live pods.
    pub async fn provision(&self, spec: &ClusterSpec, live: u32) -> Result<Vec<Pod>> {
        self.platform.apply_cluster(spec.clone()).await?;

        let mut workload = Workload::for_cluster(spec, Some(composite_hash(&spec.template)?));
        workload.spec_replicas = live;
        self.platform.create_workload(workload).await?;

        for pod in self.pods(spec).await? {
            self.platform
                .report_pod(&pod.key, PodPhase::Running, None)
                .await?;
        }

        let record = membership::create(self.platform.as_ref(), spec).await?;
        membership::update(self.platform.as_ref(), spec, &record, None, false).await?;

        self.pods(spec).await
    }

    pub async fn pods(&self, spec: &ClusterSpec) -> Result<Vec<Pod>> {
        let mut pods = self
            .platform
            .list_pods(&spec.namespace, &spec.selector())
            .await?;
        pods.sort_by(|a, b| a.key.name.cmp(&b.key.name));
        Ok(pods)
    }

    pub fn script(&self, pod: &Pod, node: ScriptedNode) {
        let ip = pod.ip.as_deref().unwrap_or_default();
        self.prober.set(ip, node);
    }

    pub async fn workload(&self, spec: &ClusterSpec) -> Result<Workload> {
        self.platform
            .get_workload(&spec.workload_key())
            .await?
            .ok_or_else(|| anyhow::anyhow!("workload missing"))
    }

    pub async fn record(&self, spec: &ClusterSpec) -> Result<MembershipRecord> {
        self.platform
            .get_membership(&spec.membership_key())
            .await?
            .ok_or_else(|| anyhow::anyhow!("membership record missing"))
    }
}
