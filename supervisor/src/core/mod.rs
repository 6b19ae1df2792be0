pub mod cluster;
pub mod cluster_status;
pub mod discovery;
pub mod error;
pub mod membership;
pub mod meta;
pub mod node;
pub mod platform;
pub mod probe;
pub mod quorum;
pub mod readiness;
pub mod reconcile;
pub mod resync;
pub mod routes;
pub mod state;
pub mod store;
pub mod template_hash;
pub mod workload;
