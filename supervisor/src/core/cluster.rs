use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use common::constants::{
    DEFAULT_API_PORT, DEFAULT_HEALTH_PROBE_TIMEOUT_MS, DEFAULT_PEERING_PORT,
    HEALTHY_READ_LAG_DEFAULT, HEALTHY_WRITE_LAG_DEFAULT,
};

use crate::core::error::SupervisorError;
use crate::core::platform::{Condition, ObjectKey};

const ALLOWED_REPLICAS: [u32; 4] = [1, 3, 5, 7];
const MIN_PROBE_TIMEOUT_MS: u64 = 500;
const MAX_PROBE_TIMEOUT_MS: u64 = 60_000;
const MIN_PORT_EXCLUSIVE: u16 = 1024;

/// Desired state of one search cluster, as applied by an operator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClusterSpec {
    pub name: String,
    pub namespace: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_peering_port")]
    pub peering_port: u16,
    #[serde(default = "default_probe_timeout")]
    pub health_probe_timeout_ms: u64,
    #[serde(default)]
    pub incremental_quorum_recovery: bool,
    #[serde(default)]
    pub healthy_write_lag: Option<u64>,
    #[serde(default)]
    pub healthy_read_lag: Option<u64>,
    #[serde(default)]
    pub admin_api_key: Option<String>,
    #[serde(default)]
    pub template: WorkloadTemplate,
}

/// Opaque server template. Only its content hash is used here.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkloadTemplate {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
    #[serde(default)]
    pub additional_config: Option<BTreeMap<String, String>>,
}

fn default_replicas() -> u32 {
    3
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_peering_port() -> u16 {
    DEFAULT_PEERING_PORT
}

fn default_probe_timeout() -> u64 {
    DEFAULT_HEALTH_PROBE_TIMEOUT_MS
}

impl ClusterSpec {
    pub fn new(namespace: &str, name: &str, replicas: u32) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            replicas,
            api_port: DEFAULT_API_PORT,
            peering_port: DEFAULT_PEERING_PORT,
            health_probe_timeout_ms: DEFAULT_HEALTH_PROBE_TIMEOUT_MS,
            incremental_quorum_recovery: false,
            healthy_write_lag: None,
            healthy_read_lag: None,
            admin_api_key: None,
            template: WorkloadTemplate::default(),
        }
    }

    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.name.is_empty() || self.namespace.is_empty() {
            return Err(SupervisorError::InvalidSpec(
                "name and namespace are required".to_string(),
            ));
        }
        if !ALLOWED_REPLICAS.contains(&self.replicas) {
            return Err(SupervisorError::InvalidSpec(format!(
                "replicas must be one of {:?}, got {}",
                ALLOWED_REPLICAS, self.replicas
            )));
        }
        for (label, port) in [("apiPort", self.api_port), ("peeringPort", self.peering_port)] {
            if port <= MIN_PORT_EXCLUSIVE {
                return Err(SupervisorError::InvalidSpec(format!(
                    "{label} must be greater than {MIN_PORT_EXCLUSIVE}, got {port}"
                )));
            }
        }
        if !(MIN_PROBE_TIMEOUT_MS..=MAX_PROBE_TIMEOUT_MS).contains(&self.health_probe_timeout_ms) {
            return Err(SupervisorError::InvalidSpec(format!(
                "healthProbeTimeoutInMilliseconds must be within {MIN_PROBE_TIMEOUT_MS}..={MAX_PROBE_TIMEOUT_MS}, got {}",
                self.health_probe_timeout_ms
            )));
        }
        Ok(())
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health_probe_timeout_ms)
    }

    pub fn healthy_write_lag(&self) -> u64 {
        self.healthy_write_lag.unwrap_or(HEALTHY_WRITE_LAG_DEFAULT)
    }

    pub fn healthy_read_lag(&self) -> u64 {
        self.healthy_read_lag.unwrap_or(HEALTHY_READ_LAG_DEFAULT)
    }

    pub fn workload_name(&self) -> String {
        format!("{}-sts", self.name)
    }

    pub fn workload_key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.workload_name())
    }

    pub fn service_name(&self) -> String {
        format!("{}-sts-svc", self.name)
    }

    pub fn membership_key(&self) -> ObjectKey {
        membership_key_for(&self.namespace, &self.name)
    }

    pub fn pod_name(&self, ordinal: u32) -> String {
        format!("{}-{}", self.workload_name(), ordinal)
    }

    pub fn pod_key(&self, ordinal: u32) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.pod_name(ordinal))
    }

    /// Label set the workload selects its pods with.
    pub fn selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), format!("{}-sts", self.name))])
    }
}

pub fn membership_key_for(namespace: &str, cluster: &str) -> ObjectKey {
    ObjectKey::new(namespace, &format!("{}-nodeslist", cluster))
}

/// Stored cluster object: the applied spec plus what the supervisor reports back.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub spec: ClusterSpec,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub resource_version: u64,
}

impl Cluster {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}
