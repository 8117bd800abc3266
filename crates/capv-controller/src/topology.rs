use crate::{ControllerError, Result};
use capv_client::{Client, ListParams};
use capv_core::labels::{CLUSTER_NAME_LABEL, CONTROL_PLANE_INITIALIZED_CONDITION};
use capv_core::{is_condition_true, Cluster, MachineDeployment, Resource};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Live worker topology of a cluster
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Non-deleting MachineDeployments, sorted by name
    pub machine_deployments: Vec<MachineDeployment>,
    /// Sum of replicas over `machine_deployments`; unset counts as zero
    pub expected_replicas: i64,
    /// Explicit failure domain per MachineDeployment, non-empty values only
    pub explicit_zones: BTreeMap<String, String>,
}

impl Topology {
    /// Build the topology from the MachineDeployments labelled with the cluster
    pub fn from_machine_deployments(
        cluster: &Cluster,
        machine_deployments: Vec<MachineDeployment>,
    ) -> Result<Self> {
        let mut live: Vec<MachineDeployment> = machine_deployments
            .into_iter()
            .filter(|md| !md.is_deleting())
            .collect();
        live.sort_by(|a, b| a.name().cmp(b.name()));

        let mut expected_replicas = 0i64;
        let mut explicit_zones = BTreeMap::new();
        for md in &live {
            let replicas = md.spec.replicas.unwrap_or(0);
            if replicas < 0 {
                return Err(ControllerError::invalid_topology(
                    cluster.object_key(),
                    format!("MachineDeployment {} has negative replicas {}", md.name(), replicas),
                ));
            }
            expected_replicas += i64::from(replicas);

            if let Some(zone) = md.failure_domain() {
                explicit_zones.insert(md.name().to_string(), zone.to_string());
            }
        }

        Ok(Self {
            machine_deployments: live,
            expected_replicas,
            explicit_zones,
        })
    }

    /// List and read the MachineDeployments of `cluster`
    pub async fn load<C: Client>(client: &C, cluster: &Cluster) -> Result<Self> {
        validate_cluster_topology(cluster)?;

        let params = ListParams::namespaced(cluster.namespace())
            .with_label(CLUSTER_NAME_LABEL, cluster.name());
        let machine_deployments: Vec<MachineDeployment> = client
            .list(&params)
            .await
            .map_err(|e| ControllerError::store("list MachineDeployments of", cluster.object_key(), e))?;

        let topology = Self::from_machine_deployments(cluster, machine_deployments)?;
        debug!(
            "Cluster {} has {} live MachineDeployments expecting {} replicas",
            cluster.object_key(),
            topology.machine_deployments.len(),
            topology.expected_replicas
        );
        Ok(topology)
    }

    /// Whether `name` is a live MachineDeployment
    pub fn is_live(&self, name: &str) -> bool {
        self.machine_deployments
            .binary_search_by(|md| md.name().cmp(name))
            .is_ok()
    }

    /// Names of the live MachineDeployments, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.machine_deployments.iter().map(|md| md.name())
    }
}

/// Whether the control plane of `cluster` has been initialized
pub fn is_control_plane_initialized(cluster: &Cluster) -> bool {
    is_condition_true(cluster.conditions(), CONTROL_PLANE_INITIALIZED_CONDITION)
}

/// Check the declared worker topology, when the cluster has one
pub fn validate_cluster_topology(cluster: &Cluster) -> Result<()> {
    let Some(workers) = cluster
        .spec
        .topology
        .as_ref()
        .and_then(|t| t.workers.as_ref())
    else {
        return Ok(());
    };

    let mut seen = BTreeSet::new();
    for md in &workers.machine_deployments {
        if md.name.is_empty() {
            return Err(ControllerError::invalid_topology(
                cluster.object_key(),
                "worker MachineDeployment with empty name",
            ));
        }
        if !seen.insert(md.name.as_str()) {
            return Err(ControllerError::invalid_topology(
                cluster.object_key(),
                format!("duplicate worker MachineDeployment name {}", md.name),
            ));
        }
        if let Some(replicas) = md.replicas.filter(|r| *r < 0) {
            return Err(ControllerError::invalid_topology(
                cluster.object_key(),
                format!("worker MachineDeployment {} has negative replicas {}", md.name, replicas),
            ));
        }
    }
    Ok(())
}
