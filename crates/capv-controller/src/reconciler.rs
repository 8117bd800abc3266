use crate::compose::{compose, name_list, Composition};
use crate::topology::is_control_plane_initialized;
use crate::{
    ControllerConfig, ControllerError, GateDecision, Membership, NameGenerator, Result, Topology,
    ZoneMap,
};
use capv_client::Client;
use capv_core::{Cluster, ObjectKey, Resource, VirtualMachineGroup};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing left to do until the next event
    Done,
    /// Check the cluster again after the delay
    RequeueAfter(Duration),
}

/// Keeps the VirtualMachineGroup of each cluster in line with its worker machines
pub struct VirtualMachineGroupReconciler<C: Client> {
    client: Arc<C>,
    naming: NameGenerator,
    config: ControllerConfig,
}

impl<C: Client> VirtualMachineGroupReconciler<C> {
    pub fn new(client: Arc<C>, config: ControllerConfig) -> Self {
        Self {
            client,
            naming: NameGenerator::new(),
            config,
        }
    }

    /// Reconcile the cluster identified by `key`
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(cluster) = self
            .client
            .get_opt::<Cluster>(key)
            .await
            .map_err(|e| ControllerError::store("get Cluster", key, e))?
        else {
            debug!("Cluster {} not found, nothing to do", key);
            return Ok(Action::Done);
        };

        if cluster.is_deleting() {
            debug!("Cluster {} is being deleted, skipping", key);
            return Ok(Action::Done);
        }

        if !is_control_plane_initialized(&cluster) {
            info!("Waiting for the control plane of cluster {} to be initialized", key);
            return Ok(Action::RequeueAfter(self.config.requeue_after));
        }

        let attempts = self.config.conflict_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.reconcile_group(&cluster).await {
                Err(e) if e.is_conflict() && attempt < attempts => {
                    warn!(
                        "Conflict writing VirtualMachineGroup {} (attempt {}/{}), retrying",
                        key, attempt, attempts
                    );
                    attempt += 1;
                    tokio::time::sleep(self.config.conflict_retry_delay).await;
                }
                result => return result,
            }
        }
    }

    /// Read everything fresh, compose the desired group and write it
    async fn reconcile_group(&self, cluster: &Cluster) -> Result<Action> {
        let key = cluster.object_key();

        let existing = self
            .client
            .get_opt::<VirtualMachineGroup>(&key)
            .await
            .map_err(|e| ControllerError::store("get VirtualMachineGroup", &key, e))?;
        let topology = Topology::load(self.client.as_ref(), cluster).await?;
        let membership = Membership::load(self.client.as_ref(), cluster, &self.naming).await?;

        if existing.is_none() {
            if let GateDecision::Wait { .. } = GateDecision::evaluate(&topology, &membership) {
                return Ok(Action::RequeueAfter(self.config.requeue_after));
            }
        }

        let zones = ZoneMap::resolve(&topology, existing.as_ref(), &membership.vm_to_md);
        let Composition { group, diff } = compose(cluster, &membership, &zones, existing.as_ref())?;

        match existing {
            None => {
                info!(
                    members = %name_list(&diff.added),
                    "Creating VirtualMachineGroup {}", key
                );
                self.client
                    .create(group)
                    .await
                    .map_err(|e| ControllerError::store("create VirtualMachineGroup", &key, e))?;
            }
            Some(existing) if existing == group => {
                debug!("VirtualMachineGroup {} is up to date", key);
            }
            Some(_) => {
                if !diff.is_empty() {
                    info!(
                        added_members = %name_list(&diff.added),
                        deleted_members = %name_list(&diff.removed),
                        "Updating VirtualMachineGroup {}", key
                    );
                }
                self.client
                    .update(group)
                    .await
                    .map_err(|e| ControllerError::store("update VirtualMachineGroup", &key, e))?;
            }
        }

        Ok(Action::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capv_client::{ClientError, ListParams, ResourceStore};
    use capv_core::labels::{
        zone_annotation_key, CLUSTER_NAME_LABEL, CONTROL_PLANE_INITIALIZED_CONDITION,
        MACHINE_DEPLOYMENT_NAME_LABEL, PLACEMENT_READY_CONDITION,
    };
    use capv_core::{
        ClusterStatus, Condition, MachineDeployment, MemberKind, PlacementStatus, VSphereMachine,
        VirtualMachineGroupMemberStatus, VirtualMachineGroupStatus,
    };
    use capv_storage::RedbBackend;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    fn make_store() -> (tempfile::TempDir, Arc<ResourceStore>) {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::new(dir.path().join("test.redb")).unwrap();
        (dir, Arc::new(ResourceStore::new(Arc::new(backend))))
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            conflict_retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn key() -> ObjectKey {
        ObjectKey::new("ns1", "c1")
    }

    fn initialized_cluster() -> Cluster {
        let mut cluster = Cluster::new("ns1", "c1");
        cluster.status = Some(ClusterStatus {
            conditions: vec![Condition::true_(CONTROL_PLANE_INITIALIZED_CONDITION)],
            ..Default::default()
        });
        cluster
    }

    fn md(name: &str, replicas: i32, zone: Option<&str>) -> MachineDeployment {
        let mut md = MachineDeployment::new("ns1", name);
        md.set_label(CLUSTER_NAME_LABEL, "c1");
        md.spec.cluster_name = "c1".to_string();
        md.spec.replicas = Some(replicas);
        md.spec.template.spec.failure_domain = zone.map(str::to_string);
        md
    }

    fn machine(name: &str, md: &str) -> VSphereMachine {
        let mut machine = VSphereMachine::new("ns1", name);
        machine.set_label(CLUSTER_NAME_LABEL, "c1");
        machine.set_label(MACHINE_DEPLOYMENT_NAME_LABEL, md);
        machine
    }

    fn ready_member(name: &str, zone: &str) -> VirtualMachineGroupMemberStatus {
        VirtualMachineGroupMemberStatus {
            name: name.to_string(),
            kind: MemberKind::VirtualMachine,
            placement: Some(PlacementStatus {
                zone: zone.to_string(),
            }),
            conditions: vec![Condition::true_(PLACEMENT_READY_CONDITION)],
        }
    }

    /// c1 with md1 (2 replicas) and md2 (1 replica, zone1), machines m1..m3
    async fn seed_scenario(store: &ResourceStore) {
        store.create(initialized_cluster()).await.unwrap();
        store.create(md("md1", 2, None)).await.unwrap();
        store.create(md("md2", 1, Some("zone1"))).await.unwrap();
        store.create(machine("m1", "md1")).await.unwrap();
        store.create(machine("m2", "md1")).await.unwrap();
        store.create(machine("m3", "md2")).await.unwrap();
    }

    async fn group(store: &ResourceStore) -> Option<VirtualMachineGroup> {
        store.get_opt::<VirtualMachineGroup>(&key()).await.unwrap()
    }

    fn members(group: &VirtualMachineGroup) -> Vec<&str> {
        group.member_names().collect()
    }

    async fn report_placement(store: &ResourceStore, ready: Vec<VirtualMachineGroupMemberStatus>) {
        let mut vmg = group(store).await.unwrap();
        vmg.status = Some(VirtualMachineGroupStatus {
            members: ready,
            ..Default::default()
        });
        store.update_status(vmg).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_cluster_is_done() {
        let (_dir, store) = make_store();
        let reconciler = VirtualMachineGroupReconciler::new(store, config());
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Action::Done);
    }

    #[tokio::test]
    async fn test_deleting_cluster_is_done() {
        let (_dir, store) = make_store();
        let mut cluster = initialized_cluster();
        cluster.metadata.finalizers = Some(vec!["cluster.x-k8s.io/cluster".to_string()]);
        store.create(cluster).await.unwrap();
        store.delete::<Cluster>(&key()).await.unwrap();

        let reconciler = VirtualMachineGroupReconciler::new(store.clone(), config());
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Action::Done);
        assert!(group(&store).await.is_none());
    }

    #[tokio::test]
    async fn test_uninitialized_control_plane_requeues() {
        let (_dir, store) = make_store();
        store.create(Cluster::new("ns1", "c1")).await.unwrap();
        store.create(md("md1", 1, None)).await.unwrap();
        store.create(machine("m1", "md1")).await.unwrap();

        let reconciler = VirtualMachineGroupReconciler::new(store.clone(), config());
        assert_eq!(
            reconciler.reconcile(&key()).await.unwrap(),
            Action::RequeueAfter(Duration::from_secs(10))
        );
        assert!(group(&store).await.is_none());
    }

    #[tokio::test]
    async fn test_gate_waits_for_all_machines() {
        let (_dir, store) = make_store();
        store.create(initialized_cluster()).await.unwrap();
        store.create(md("md1", 2, None)).await.unwrap();
        store.create(machine("m1", "md1")).await.unwrap();

        let reconciler = VirtualMachineGroupReconciler::new(store.clone(), config());
        assert!(matches!(
            reconciler.reconcile(&key()).await.unwrap(),
            Action::RequeueAfter(_)
        ));
        assert!(group(&store).await.is_none());

        store.create(machine("m2", "md1")).await.unwrap();
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Action::Done);
        assert_eq!(members(&group(&store).await.unwrap()), vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_gate_waits_without_replicas() {
        let (_dir, store) = make_store();
        store.create(initialized_cluster()).await.unwrap();
        store.create(md("md1", 0, None)).await.unwrap();

        let reconciler = VirtualMachineGroupReconciler::new(store.clone(), config());
        assert!(matches!(
            reconciler.reconcile(&key()).await.unwrap(),
            Action::RequeueAfter(_)
        ));
        assert!(group(&store).await.is_none());
    }

    #[tokio::test]
    async fn test_initial_creation_and_follow_up_placement() {
        let (_dir, store) = make_store();
        seed_scenario(&store).await;
        let reconciler = VirtualMachineGroupReconciler::new(store.clone(), config());

        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Action::Done);
        let created = group(&store).await.unwrap();
        assert_eq!(members(&created), vec!["m1", "m2", "m3"]);
        assert_eq!(
            created.metadata.annotations,
            Some(std::collections::BTreeMap::from([(
                zone_annotation_key("md2"),
                "zone1".to_string()
            )]))
        );
        assert_eq!(created.label(CLUSTER_NAME_LABEL), Some("c1"));
        let cluster = store.get::<Cluster>(&key()).await.unwrap();
        let owners = created.metadata.owner_references.clone().unwrap();
        assert_eq!(owners[0].uid, cluster.uid().unwrap());

        report_placement(
            &store,
            vec![
                ready_member("m1", "zone4"),
                ready_member("m2", "zone4"),
                ready_member("m3", "zone1"),
            ],
        )
        .await;

        reconciler.reconcile(&key()).await.unwrap();
        let updated = group(&store).await.unwrap();
        assert_eq!(updated.annotation(&zone_annotation_key("md1")), Some("zone4"));
        assert_eq!(updated.annotation(&zone_annotation_key("md2")), Some("zone1"));
        assert_eq!(members(&updated), vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let (_dir, store) = make_store();
        seed_scenario(&store).await;
        let reconciler = VirtualMachineGroupReconciler::new(store.clone(), config());

        reconciler.reconcile(&key()).await.unwrap();
        let first = group(&store).await.unwrap();
        reconciler.reconcile(&key()).await.unwrap();
        reconciler.reconcile(&key()).await.unwrap();
        let again = group(&store).await.unwrap();

        assert_eq!(again.spec, first.spec);
        assert_eq!(again.metadata.annotations, first.metadata.annotations);
        assert_eq!(again.metadata.resource_version, first.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_committed_zone_survives_status_flip() {
        let (_dir, store) = make_store();
        seed_scenario(&store).await;
        let reconciler = VirtualMachineGroupReconciler::new(store.clone(), config());
        reconciler.reconcile(&key()).await.unwrap();

        report_placement(&store, vec![ready_member("m1", "zone4")]).await;
        reconciler.reconcile(&key()).await.unwrap();

        report_placement(&store, vec![ready_member("m1", "zone7"), ready_member("m2", "zone9")]).await;
        reconciler.reconcile(&key()).await.unwrap();
        report_placement(&store, vec![]).await;
        reconciler.reconcile(&key()).await.unwrap();

        let vmg = group(&store).await.unwrap();
        assert_eq!(vmg.annotation(&zone_annotation_key("md1")), Some("zone4"));
    }

    #[tokio::test]
    async fn test_explicit_zone_overrides_inferred() {
        let (_dir, store) = make_store();
        seed_scenario(&store).await;
        let reconciler = VirtualMachineGroupReconciler::new(store.clone(), config());
        reconciler.reconcile(&key()).await.unwrap();

        report_placement(&store, vec![ready_member("m1", "zone4")]).await;
        reconciler.reconcile(&key()).await.unwrap();

        let mut md1 = store
            .get::<MachineDeployment>(&ObjectKey::new("ns1", "md1"))
            .await
            .unwrap();
        md1.spec.template.spec.failure_domain = Some("zone2".to_string());
        store.update(md1).await.unwrap();
        reconciler.reconcile(&key()).await.unwrap();

        let vmg = group(&store).await.unwrap();
        assert_eq!(vmg.annotation(&zone_annotation_key("md1")), Some("zone2"));
    }

    #[tokio::test]
    async fn test_new_members_wait_for_zone() {
        let (_dir, store) = make_store();
        seed_scenario(&store).await;
        let reconciler = VirtualMachineGroupReconciler::new(store.clone(), config());
        reconciler.reconcile(&key()).await.unwrap();

        // md1 has no zone yet, md2 is pinned to zone1
        store.create(machine("m4", "md1")).await.unwrap();
        store.create(machine("m5", "md2")).await.unwrap();
        reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(
            members(&group(&store).await.unwrap()),
            vec!["m1", "m2", "m3", "m5"]
        );

        report_placement(&store, vec![ready_member("m2", "zone4")]).await;
        reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(
            members(&group(&store).await.unwrap()),
            vec!["m1", "m2", "m3", "m4", "m5"]
        );
    }

    #[tokio::test]
    async fn test_deleted_machine_deployment_is_dropped() {
        let (_dir, store) = make_store();
        seed_scenario(&store).await;
        let reconciler = VirtualMachineGroupReconciler::new(store.clone(), config());
        reconciler.reconcile(&key()).await.unwrap();

        let mut vmg = group(&store).await.unwrap();
        vmg.set_label("team", "a");
        vmg.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert("note".to_string(), "keep".to_string());
        store.update(vmg).await.unwrap();

        store
            .delete::<MachineDeployment>(&ObjectKey::new("ns1", "md2"))
            .await
            .unwrap();
        store
            .delete::<VSphereMachine>(&ObjectKey::new("ns1", "m3"))
            .await
            .unwrap();
        reconciler.reconcile(&key()).await.unwrap();

        let vmg = group(&store).await.unwrap();
        assert_eq!(members(&vmg), vec!["m1", "m2"]);
        assert_eq!(vmg.annotation(&zone_annotation_key("md2")), None);
        assert_eq!(vmg.annotation("note"), Some("keep"));
        assert_eq!(vmg.label("team"), Some("a"));
    }

    #[tokio::test]
    async fn test_bad_naming_template_aborts_without_write() {
        let (_dir, store) = make_store();
        store.create(initialized_cluster()).await.unwrap();
        store.create(md("md1", 1, None)).await.unwrap();
        let mut m1 = machine("m1", "md1");
        m1.spec.naming_strategy = Some(capv_core::VirtualMachineNamingStrategy {
            template: Some("{{ machine.missing }}".to_string()),
        });
        store.create(m1).await.unwrap();

        let reconciler = VirtualMachineGroupReconciler::new(store.clone(), config());
        let err = reconciler.reconcile(&key()).await.unwrap_err();
        assert!(matches!(err, ControllerError::NamingFailed { .. }));
        assert!(group(&store).await.is_none());
    }

    /// Store wrapper failing the first `conflicts` group writes with a conflict
    struct ConflictingClient {
        inner: Arc<ResourceStore>,
        conflicts: AtomicU32,
    }

    impl ConflictingClient {
        fn conflict<R: Resource>(&self, resource: &R) -> Option<ClientError> {
            if R::KIND != VirtualMachineGroup::KIND {
                return None;
            }
            self.conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .ok()
                .map(|_| ClientError::conflict(resource.object_key(), "stale", "fresh"))
        }
    }

    #[async_trait::async_trait]
    impl Client for ConflictingClient {
        async fn get<R: Resource>(&self, key: &ObjectKey) -> capv_client::Result<R> {
            self.inner.get(key).await
        }

        async fn list<R: Resource>(&self, params: &ListParams) -> capv_client::Result<Vec<R>> {
            self.inner.list(params).await
        }

        async fn create<R: Resource>(&self, resource: R) -> capv_client::Result<R> {
            if let Some(err) = self.conflict(&resource) {
                return Err(err);
            }
            self.inner.create(resource).await
        }

        async fn update<R: Resource>(&self, resource: R) -> capv_client::Result<R> {
            if let Some(err) = self.conflict(&resource) {
                return Err(err);
            }
            self.inner.update(resource).await
        }

        async fn update_status<R: Resource>(&self, resource: R) -> capv_client::Result<R> {
            self.inner.update_status(resource).await
        }

        async fn delete<R: Resource>(&self, key: &ObjectKey) -> capv_client::Result<()> {
            self.inner.delete::<R>(key).await
        }
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let (_dir, store) = make_store();
        seed_scenario(&store).await;
        let client = Arc::new(ConflictingClient {
            inner: store.clone(),
            conflicts: AtomicU32::new(2),
        });

        let reconciler = VirtualMachineGroupReconciler::new(client, config());
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Action::Done);
        assert_eq!(members(&group(&store).await.unwrap()), vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_conflicts_give_up_after_retries() {
        let (_dir, store) = make_store();
        seed_scenario(&store).await;
        let client = Arc::new(ConflictingClient {
            inner: store.clone(),
            conflicts: AtomicU32::new(100),
        });

        let reconciler = VirtualMachineGroupReconciler::new(client.clone(), config());
        let err = reconciler.reconcile(&key()).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(client.conflicts.load(Ordering::SeqCst), 95);
        assert!(group(&store).await.is_none());
    }
}
