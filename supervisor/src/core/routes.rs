use axum::{
    Router,
    extract::{Json, Path, State},
    middleware,
    routing::{get, put},
};
use tracing::info;

use common::api_error::ApiError;
use common::schemas::{MembershipResponse, PodReport};
use common::trace_middleware::trace_context_middleware;

use crate::core::cluster::{Cluster, ClusterSpec, membership_key_for};
use crate::core::membership::split_members;
use crate::core::platform::{ObjectKey, Pod, PodPhase};
use crate::core::state::SupervisorState;

pub fn admin_router(state: SupervisorState) -> Router {
    Router::new()
        .route("/admin/clusters", get(list_clusters))
        .route(
            "/admin/clusters/{namespace}/{name}",
            put(apply_cluster).get(get_cluster),
        )
        .route("/admin/pods/{namespace}/{name}/status", put(report_pod))
        .route("/membership/{namespace}/{name}", get(get_membership))
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn(trace_context_middleware))
        .with_state(state)
}

// PUT /admin/clusters/{namespace}/{name}
#[tracing::instrument(name = "admin.apply_cluster", skip(ctx, spec))]
pub async fn apply_cluster(
    Path((namespace, name)): Path<(String, String)>,
    State(ctx): State<SupervisorState>,
    Json(spec): Json<ClusterSpec>,
) -> Result<Json<Cluster>, ApiError> {
    if spec.namespace != namespace || spec.name != name {
        return Err(ApiError::Invalid(format!(
            "body names {}/{}, path names {}/{}",
            spec.namespace, spec.name, namespace, name
        )));
    }

    let cluster = ctx.platform.apply_cluster(spec).await?;
    info!(cluster = %cluster.spec.key(), replicas = cluster.spec.replicas, "applied cluster");
    Ok(Json(cluster))
}

// GET /admin/clusters/{namespace}/{name}
pub async fn get_cluster(
    Path((namespace, name)): Path<(String, String)>,
    State(ctx): State<SupervisorState>,
) -> Result<Json<Cluster>, ApiError> {
    ctx.platform
        .get_cluster(&ObjectKey::new(&namespace, &name))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

// GET /admin/clusters
pub async fn list_clusters(
    State(ctx): State<SupervisorState>,
) -> Result<Json<Vec<Cluster>>, ApiError> {
    Ok(Json(ctx.platform.list_clusters().await?))
}

// PUT /admin/pods/{namespace}/{name}/status
/// Lets the platform adapter report where a pod runs and in which phase.
#[tracing::instrument(name = "admin.report_pod", skip(ctx, report))]
pub async fn report_pod(
    Path((namespace, name)): Path<(String, String)>,
    State(ctx): State<SupervisorState>,
    Json(report): Json<PodReport>,
) -> Result<Json<Pod>, ApiError> {
    let phase = PodPhase::parse(&report.phase)
        .ok_or_else(|| ApiError::Invalid(format!("unknown pod phase: {}", report.phase)))?;

    let pod = ctx
        .platform
        .report_pod(&ObjectKey::new(&namespace, &name), phase, report.ip)
        .await?;
    Ok(Json(pod))
}

// GET /membership/{namespace}/{name}
/// The membership artifact of cluster `name`, as read by its nodes.
pub async fn get_membership(
    Path((namespace, name)): Path<(String, String)>,
    State(ctx): State<SupervisorState>,
) -> Result<Json<MembershipResponse>, ApiError> {
    let record = ctx
        .platform
        .get_membership(&membership_key_for(&namespace, &name))
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(MembershipResponse {
        nodes: split_members(&record.nodes),
        fallback: split_members(&record.fallback),
    }))
}

// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}
