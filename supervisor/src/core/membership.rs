use tracing::{debug, error, info, instrument, warn};

use common::constants::FORCE_MEMBERSHIP_UPDATE_ANNOTATION;
use common::time_utils::utc_now_rfc3339;

use crate::core::cluster::ClusterSpec;
use crate::core::discovery::{bootstrap_nodes, live_nodes};
use crate::core::error::SupervisorError;
use crate::core::platform::{MembershipRecord, ObjectKey, Platform};

pub fn join_members(nodes: &[String]) -> String {
    nodes.join(",")
}

/// Inverse of [`join_members`]. Empty segments are dropped.
pub fn split_members(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Clone, Debug)]
pub struct UpdateOutcome {
    pub record: MembershipRecord,
    pub available_nodes: usize,
    pub updated: bool,
}

#[derive(Clone, Debug)]
pub enum MembershipUpdate {
    Applied(UpdateOutcome),
    /// The owning workload is gone and the record was deleted.
    OwnerGone,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipSync {
    Created,
    Unchanged,
    Updated,
    OwnerGone,
}

pub async fn read(
    platform: &dyn Platform,
    key: &ObjectKey,
) -> Result<Option<MembershipRecord>, SupervisorError> {
    platform.get_membership(key).await
}

/// Writes the bootstrap record. An existing record is returned untouched.
pub async fn create(
    platform: &dyn Platform,
    spec: &ClusterSpec,
) -> Result<MembershipRecord, SupervisorError> {
    let nodes = join_members(&bootstrap_nodes(spec, spec.replicas)?);
    let record = MembershipRecord {
        key: spec.membership_key(),
        owner: spec.workload_name(),
        nodes: nodes.clone(),
        fallback: nodes,
        nodes_list: None,
        resource_version: 0,
    };

    match platform.create_membership(record).await {
        Ok(created) => Ok(created),
        Err(SupervisorError::AlreadyExists { .. }) => {
            let key = spec.membership_key();
            platform
                .get_membership(&key)
                .await?
                .ok_or_else(|| SupervisorError::not_found("membership", key))
        }
        Err(e) => Err(e),
    }
}

/// Recomputes `nodes` from live discovery and `fallback` from the bootstrap naming for
/// `desired_replicas` (the workload's declared replicas when `None`).
///
/// Only writes when either field changed. `resize_op` silences the per-tick logging.
pub async fn update(
    platform: &dyn Platform,
    spec: &ClusterSpec,
    record: &MembershipRecord,
    desired_replicas: Option<u32>,
    resize_op: bool,
) -> Result<MembershipUpdate, SupervisorError> {
    let Some(workload) = platform.get_workload(&spec.workload_key()).await? else {
        info!(membership = %record.key, "owning workload is gone, deleting membership record");
        platform.delete_membership(&record.key).await?;
        return Ok(MembershipUpdate::OwnerGone);
    };

    let replicas = desired_replicas.unwrap_or(workload.spec_replicas);
    let nodes = live_nodes(platform, spec, &workload).await?;
    let fallback = bootstrap_nodes(spec, replicas)?;

    let available_nodes = nodes.len();
    if available_nodes == 0 {
        warn!(membership = %record.key, "empty quorum configuration");
        return Err(SupervisorError::EmptyQuorum);
    }

    let desired = MembershipRecord {
        nodes: join_members(&nodes),
        fallback: join_members(&fallback),
        nodes_list: None,
        ..record.clone()
    };

    if !resize_op {
        let mut current = split_members(&record.nodes);
        current.sort();
        debug!(size = current.len(), nodes = ?current, "current quorum configuration");
    }

    if record.nodes == desired.nodes && record.fallback == desired.fallback {
        return Ok(MembershipUpdate::Applied(UpdateOutcome {
            record: record.clone(),
            available_nodes,
            updated: false,
        }));
    }

    if !resize_op {
        let mut sorted = nodes.clone();
        sorted.sort();
        info!(size = available_nodes, nodes = ?sorted, "updating quorum configuration");
    }

    let stored = platform
        .update_membership(desired)
        .await
        .inspect_err(|e| error!(membership = %record.key, "updating quorum configuration failed: {}", e))?;

    Ok(MembershipUpdate::Applied(UpdateOutcome {
        record: stored,
        available_nodes,
        updated: true,
    }))
}

/// First step of a tick: bootstrap the record or refresh it from live discovery.
#[instrument(name = "membership.reconcile", skip_all, fields(cluster = %spec.key()))]
pub async fn reconcile_membership(
    platform: &dyn Platform,
    spec: &ClusterSpec,
) -> Result<MembershipSync, SupervisorError> {
    let Some(record) = read(platform, &spec.membership_key()).await? else {
        debug!("creating membership record");
        create(platform, spec).await?;
        return Ok(MembershipSync::Created);
    };

    match update(platform, spec, &record, None, false).await? {
        MembershipUpdate::OwnerGone => Ok(MembershipSync::OwnerGone),
        MembershipUpdate::Applied(outcome) if outcome.updated => Ok(MembershipSync::Updated),
        MembershipUpdate::Applied(_) => Ok(MembershipSync::Unchanged),
    }
}

/// Stamps every workload pod so nodes re-read the mounted membership artifact.
pub async fn force_pods_membership_refresh(
    platform: &dyn Platform,
    spec: &ClusterSpec,
) -> Result<(), SupervisorError> {
    let pods = platform.list_pods(&spec.namespace, &spec.selector()).await?;
    let now = utc_now_rfc3339();

    for pod in pods {
        platform
            .annotate_pod(&pod.key, FORCE_MEMBERSHIP_UPDATE_ANNOTATION, &now)
            .await
            .inspect_err(|e| error!(pod = %pod.key, "patching pod annotations failed: {}", e))?;
    }
    Ok(())
}
