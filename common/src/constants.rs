pub const CLUSTER_KEY_PREFIX: &str = "cluster";
pub const WORKLOAD_KEY_PREFIX: &str = "workload";
pub const POD_KEY_PREFIX: &str = "pod";
pub const SLICE_KEY_PREFIX: &str = "slice";
pub const MEMBERSHIP_KEY_PREFIX: &str = "membership";
pub const IPAM_KEY: &str = "ipam:next";

/// Condition type written on pods (readiness gate) and on the cluster object.
pub const QUORUM_READINESS_GATE_CONDITION: &str = "RaftQuorumReady";

/// Hard limit on addressable node names.
pub const NODE_NAME_LEN_LIMIT: usize = 64;

pub const HEALTHY_WRITE_LAG_DEFAULT: u64 = 500;
pub const HEALTHY_READ_LAG_DEFAULT: u64 = 1000;

pub const DEFAULT_API_PORT: u16 = 8108;
pub const DEFAULT_PEERING_PORT: u16 = 8107;
pub const DEFAULT_HEALTH_PROBE_TIMEOUT_MS: u64 = 500;

pub const API_KEY_HEADER: &str = "X-TYPESENSE-API-KEY";

pub const FORCE_MEMBERSHIP_UPDATE_ANNOTATION: &str =
    "supervisor.io/forced-membership-update-time";
