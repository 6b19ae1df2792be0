use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use common::constants::{
    CLUSTER_KEY_PREFIX, IPAM_KEY, MEMBERSHIP_KEY_PREFIX, POD_KEY_PREFIX, SLICE_KEY_PREFIX,
    WORKLOAD_KEY_PREFIX,
};
use common::time_utils::utc_now_rfc3339;

use crate::core::cluster::{Cluster, ClusterSpec};
use crate::core::error::SupervisorError;
use crate::core::meta::KvDb;
use crate::core::platform::{
    Condition, Endpoint, EndpointSlice, MembershipRecord, ObjectKey, Platform, Pod, PodPhase,
    TargetRef, Workload, replace_condition,
};

fn object_key(prefix: &str, key: &ObjectKey) -> String {
    format!("{}:{}/{}", prefix, key.namespace, key.name)
}

fn namespace_prefix(prefix: &str, namespace: &str) -> String {
    format!("{}:{}/", prefix, namespace)
}

fn pod_ordinal(workload: &Workload, pod: &Pod) -> Option<u32> {
    pod.key
        .name
        .strip_prefix(&format!("{}-", workload.key.name))?
        .parse()
        .ok()
}

/// [`Platform`] over a local RocksDB index.
///
/// Besides storing objects it stands in for the platform's workload controller: scaling
/// a workload creates or removes ordinal pods, deleting a pod recreates it with a new
/// address, and the headless service's endpoint slice always mirrors the pods.
pub struct KvPlatform {
    db: KvDb,
    write_lock: Mutex<()>,
}

impl KvPlatform {
    pub fn new(db: KvDb) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(KvDb::open(path)?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, SupervisorError> {
        self.write_lock
            .lock()
            .map_err(|e| SupervisorError::Store(anyhow::anyhow!("store lock poisoned: {}", e)))
    }

    fn allocate_ip(&self) -> Result<String, SupervisorError> {
        let next: u32 = self.db.get(IPAM_KEY)?.unwrap_or(1);
        self.db.put(IPAM_KEY, &(next + 1))?;
        Ok(format!(
            "10.{}.{}.{}",
            (next >> 16) & 0xff,
            (next >> 8) & 0xff,
            next & 0xff
        ))
    }

    fn pods_of(&self, workload: &Workload) -> Result<Vec<Pod>, SupervisorError> {
        let pods: Vec<Pod> = self
            .db
            .scan_prefix(&namespace_prefix(POD_KEY_PREFIX, &workload.key.namespace))?;
        Ok(pods
            .into_iter()
            .filter(|p| p.matches(&workload.selector))
            .collect())
    }

    fn owner_of(&self, pod: &Pod) -> Result<Option<Workload>, SupervisorError> {
        let workloads: Vec<Workload> = self
            .db
            .scan_prefix(&namespace_prefix(WORKLOAD_KEY_PREFIX, &pod.key.namespace))?;
        Ok(workloads.into_iter().find(|w| pod.matches(&w.selector)))
    }

    fn new_pod(&self, workload: &Workload, ordinal: u32) -> Result<Pod, SupervisorError> {
        Ok(Pod {
            key: ObjectKey::new(
                &workload.key.namespace,
                &format!("{}-{}", workload.key.name, ordinal),
            ),
            labels: workload.selector.clone(),
            phase: PodPhase::Pending,
            ip: Some(self.allocate_ip()?),
            terminating: false,
            conditions: vec![],
            annotations: BTreeMap::new(),
            resource_version: 1,
        })
    }

    /// Brings pods in line with the declared replica count, then persists the workload.
    fn materialize(&self, workload: Workload) -> Result<Workload, SupervisorError> {
        let pods = self.pods_of(&workload)?;

        for pod in &pods {
            let surplus = pod_ordinal(&workload, pod)
                .map(|o| o >= workload.spec_replicas)
                .unwrap_or(true);
            if surplus {
                debug!(pod = %pod.key, "removing surplus pod");
                self.db.delete(&object_key(POD_KEY_PREFIX, &pod.key))?;
            }
        }

        for ordinal in 0..workload.spec_replicas {
            let exists = pods
                .iter()
                .any(|p| pod_ordinal(&workload, p) == Some(ordinal));
            if !exists {
                let pod = self.new_pod(&workload, ordinal)?;
                debug!(pod = %pod.key, ip = ?pod.ip, "creating pod");
                self.db.put(&object_key(POD_KEY_PREFIX, &pod.key), &pod)?;
            }
        }

        self.sync_status(workload)
    }

    /// Recounts replicas, rebuilds the service's endpoint slice and stores the workload.
    fn sync_status(&self, mut workload: Workload) -> Result<Workload, SupervisorError> {
        let mut pods = self.pods_of(&workload)?;
        pods.sort_by(|a, b| a.key.name.cmp(&b.key.name));

        workload.status_replicas = pods.iter().filter(|p| !p.terminating).count() as u32;
        workload.ready_replicas = pods
            .iter()
            .filter(|p| !p.terminating && p.phase == PodPhase::Running)
            .count() as u32;

        let slice = EndpointSlice {
            key: ObjectKey::new(
                &workload.key.namespace,
                &format!("{}-slice", workload.service_name),
            ),
            service_name: workload.service_name.clone(),
            endpoints: pods
                .iter()
                .filter_map(|p| {
                    let ip = p.ip.clone()?;
                    Some(Endpoint {
                        addresses: vec![ip],
                        hostname: Some(p.key.name.clone()),
                        target_ref: Some(TargetRef {
                            kind: "Pod".to_string(),
                            name: p.key.name.clone(),
                        }),
                    })
                })
                .collect(),
        };
        self.db.put(&object_key(SLICE_KEY_PREFIX, &slice.key), &slice)?;
        self.db
            .put(&object_key(WORKLOAD_KEY_PREFIX, &workload.key), &workload)?;

        Ok(workload)
    }

    fn touch_owner(&self, pod: &Pod) -> Result<(), SupervisorError> {
        if let Some(mut owner) = self.owner_of(pod)? {
            owner.resource_version += 1;
            self.sync_status(owner)?;
        }
        Ok(())
    }

    fn load_pod(&self, key: &ObjectKey) -> Result<Pod, SupervisorError> {
        self.db
            .get::<Pod>(&object_key(POD_KEY_PREFIX, key))?
            .ok_or_else(|| SupervisorError::not_found("pod", key))
    }
}

#[async_trait]
impl Platform for KvPlatform {
    async fn apply_cluster(&self, spec: ClusterSpec) -> Result<Cluster, SupervisorError> {
        spec.validate()?;
        let _guard = self.lock()?;
        let db_key = object_key(CLUSTER_KEY_PREFIX, &spec.key());

        let cluster = match self.db.get::<Cluster>(&db_key)? {
            Some(existing) => Cluster {
                spec,
                conditions: existing.conditions,
                phase: existing.phase,
                resource_version: existing.resource_version + 1,
            },
            None => Cluster {
                spec,
                conditions: vec![],
                phase: None,
                resource_version: 1,
            },
        };
        self.db.put(&db_key, &cluster)?;
        Ok(cluster)
    }

    async fn get_cluster(&self, key: &ObjectKey) -> Result<Option<Cluster>, SupervisorError> {
        Ok(self.db.get(&object_key(CLUSTER_KEY_PREFIX, key))?)
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, SupervisorError> {
        Ok(self.db.scan_prefix(&format!("{}:", CLUSTER_KEY_PREFIX))?)
    }

    async fn set_cluster_condition(
        &self,
        key: &ObjectKey,
        condition: Condition,
        phase: &str,
    ) -> Result<Cluster, SupervisorError> {
        let _guard = self.lock()?;
        let db_key = object_key(CLUSTER_KEY_PREFIX, key);
        let mut cluster = self
            .db
            .get::<Cluster>(&db_key)?
            .ok_or_else(|| SupervisorError::not_found("cluster", key))?;

        let conditions = replace_condition(&cluster.conditions, condition, utc_now_rfc3339());
        if conditions == cluster.conditions && cluster.phase.as_deref() == Some(phase) {
            return Ok(cluster);
        }

        cluster.conditions = conditions;
        cluster.phase = Some(phase.to_string());
        cluster.resource_version += 1;
        self.db.put(&db_key, &cluster)?;
        Ok(cluster)
    }

    async fn get_workload(&self, key: &ObjectKey) -> Result<Option<Workload>, SupervisorError> {
        Ok(self.db.get(&object_key(WORKLOAD_KEY_PREFIX, key))?)
    }

    async fn create_workload(&self, mut workload: Workload) -> Result<Workload, SupervisorError> {
        let _guard = self.lock()?;
        let db_key = object_key(WORKLOAD_KEY_PREFIX, &workload.key);
        if self.db.get::<Workload>(&db_key)?.is_some() {
            return Err(SupervisorError::AlreadyExists {
                kind: "workload",
                key: workload.key.to_string(),
            });
        }
        workload.resource_version = 1;
        self.materialize(workload)
    }

    async fn update_workload(&self, mut workload: Workload) -> Result<Workload, SupervisorError> {
        let _guard = self.lock()?;
        let db_key = object_key(WORKLOAD_KEY_PREFIX, &workload.key);
        let current = self
            .db
            .get::<Workload>(&db_key)?
            .ok_or_else(|| SupervisorError::not_found("workload", &workload.key))?;

        if current.resource_version != workload.resource_version {
            return Err(SupervisorError::Conflict {
                kind: "workload",
                key: workload.key.to_string(),
            });
        }
        workload.resource_version = current.resource_version + 1;
        self.materialize(workload)
    }

    async fn list_endpoint_slices(
        &self,
        namespace: &str,
        service_name: &str,
    ) -> Result<Vec<EndpointSlice>, SupervisorError> {
        let slices: Vec<EndpointSlice> = self
            .db
            .scan_prefix(&namespace_prefix(SLICE_KEY_PREFIX, namespace))?;
        Ok(slices
            .into_iter()
            .filter(|s| s.service_name == service_name)
            .collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, SupervisorError> {
        let pods: Vec<Pod> = self
            .db
            .scan_prefix(&namespace_prefix(POD_KEY_PREFIX, namespace))?;
        Ok(pods.into_iter().filter(|p| p.matches(selector)).collect())
    }

    async fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>, SupervisorError> {
        Ok(self.db.get(&object_key(POD_KEY_PREFIX, key))?)
    }

    async fn delete_pod(&self, key: &ObjectKey) -> Result<(), SupervisorError> {
        let _guard = self.lock()?;
        let pod = self.load_pod(key)?;
        self.db.delete(&object_key(POD_KEY_PREFIX, key))?;

        if let Some(mut owner) = self.owner_of(&pod)? {
            // The controller replaces deleted replicas that are still declared.
            if let Some(ordinal) =
                pod_ordinal(&owner, &pod).filter(|o| *o < owner.spec_replicas)
            {
                let replacement = self.new_pod(&owner, ordinal)?;
                debug!(pod = %replacement.key, ip = ?replacement.ip, "recreating pod");
                self.db
                    .put(&object_key(POD_KEY_PREFIX, &replacement.key), &replacement)?;
            }
            owner.resource_version += 1;
            self.sync_status(owner)?;
        }
        Ok(())
    }

    async fn patch_pod_conditions(
        &self,
        key: &ObjectKey,
        conditions: Vec<Condition>,
    ) -> Result<Pod, SupervisorError> {
        let _guard = self.lock()?;
        let mut pod = self.load_pod(key)?;
        pod.conditions = conditions;
        pod.resource_version += 1;
        self.db.put(&object_key(POD_KEY_PREFIX, key), &pod)?;
        Ok(pod)
    }

    async fn annotate_pod(
        &self,
        key: &ObjectKey,
        annotation: &str,
        value: &str,
    ) -> Result<Pod, SupervisorError> {
        let _guard = self.lock()?;
        let mut pod = self.load_pod(key)?;
        pod.annotations
            .insert(annotation.to_string(), value.to_string());
        pod.resource_version += 1;
        self.db.put(&object_key(POD_KEY_PREFIX, key), &pod)?;
        Ok(pod)
    }

    async fn report_pod(
        &self,
        key: &ObjectKey,
        phase: PodPhase,
        ip: Option<String>,
    ) -> Result<Pod, SupervisorError> {
        let _guard = self.lock()?;
        let mut pod = self.load_pod(key)?;
        pod.phase = phase;
        if ip.is_some() {
            pod.ip = ip;
        }
        pod.resource_version += 1;
        self.db.put(&object_key(POD_KEY_PREFIX, key), &pod)?;
        self.touch_owner(&pod)?;
        Ok(pod)
    }

    async fn get_membership(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<MembershipRecord>, SupervisorError> {
        Ok(self.db.get(&object_key(MEMBERSHIP_KEY_PREFIX, key))?)
    }

    async fn create_membership(
        &self,
        mut record: MembershipRecord,
    ) -> Result<MembershipRecord, SupervisorError> {
        let _guard = self.lock()?;
        let db_key = object_key(MEMBERSHIP_KEY_PREFIX, &record.key);
        if self.db.get::<MembershipRecord>(&db_key)?.is_some() {
            return Err(SupervisorError::AlreadyExists {
                kind: "membership",
                key: record.key.to_string(),
            });
        }
        record.resource_version = 1;
        self.db.put(&db_key, &record)?;
        Ok(record)
    }

    async fn update_membership(
        &self,
        mut record: MembershipRecord,
    ) -> Result<MembershipRecord, SupervisorError> {
        let _guard = self.lock()?;
        let db_key = object_key(MEMBERSHIP_KEY_PREFIX, &record.key);
        let current = self
            .db
            .get::<MembershipRecord>(&db_key)?
            .ok_or_else(|| SupervisorError::not_found("membership", &record.key))?;

        if current.resource_version != record.resource_version {
            return Err(SupervisorError::Conflict {
                kind: "membership",
                key: record.key.to_string(),
            });
        }
        record.resource_version = current.resource_version + 1;
        self.db.put(&db_key, &record)?;
        Ok(record)
    }

    async fn delete_membership(&self, key: &ObjectKey) -> Result<(), SupervisorError> {
        let _guard = self.lock()?;
        self.db.delete(&object_key(MEMBERSHIP_KEY_PREFIX, key))?;
        Ok(())
    }
}
