use crate::{ControllerError, NameGenerator, Result};
use capv_client::{Client, ListParams};
use capv_core::labels::{CLUSTER_NAME_LABEL, MACHINE_DEPLOYMENT_NAME_LABEL};
use capv_core::{Cluster, Resource, VSphereMachine};
use std::collections::BTreeMap;

/// Worker machines of a cluster and the VM names they resolve to
#[derive(Debug, Clone, Default)]
pub struct Membership {
    /// Non-deleting machines, sorted by name
    pub machines: Vec<VSphereMachine>,
    /// VM name to MachineDeployment name, for non-deleting machines
    pub vm_to_md: BTreeMap<String, String>,
    /// Deletion-marked machines, machine name to MachineDeployment name
    pub pending_deletion: BTreeMap<String, String>,
}

impl Membership {
    /// Resolve VM names for `machines`. Machines without a deployment label are skipped.
    pub fn from_machines(machines: Vec<VSphereMachine>, naming: &NameGenerator) -> Result<Self> {
        let mut membership = Self::default();

        for machine in machines {
            let Some(md) = machine
                .label(MACHINE_DEPLOYMENT_NAME_LABEL)
                .filter(|md| !md.is_empty())
                .map(str::to_string)
            else {
                continue;
            };

            if machine.is_deleting() {
                membership
                    .pending_deletion
                    .insert(machine.name().to_string(), md);
                continue;
            }

            let vm_name = naming.vm_name(machine.name(), machine.naming_template())?;
            membership.vm_to_md.insert(vm_name, md);
            membership.machines.push(machine);
        }

        membership.machines.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(membership)
    }

    /// List the worker machines of `cluster` and resolve their VM names
    pub async fn load<C: Client>(
        client: &C,
        cluster: &Cluster,
        naming: &NameGenerator,
    ) -> Result<Self> {
        let params = ListParams::namespaced(cluster.namespace())
            .with_label(CLUSTER_NAME_LABEL, cluster.name())
            .with_label_exists(MACHINE_DEPLOYMENT_NAME_LABEL);
        let machines: Vec<VSphereMachine> = client
            .list(&params)
            .await
            .map_err(|e| ControllerError::store("list VSphereMachines of", cluster.object_key(), e))?;

        Self::from_machines(machines, naming)
    }

    /// VM names of all non-deleting machines, sorted
    pub fn vm_names(&self) -> impl Iterator<Item = &str> {
        self.vm_to_md.keys().map(String::as_str)
    }

    /// Number of non-deleting machines whose MachineDeployment passes `is_live`
    pub fn count_in(&self, is_live: impl Fn(&str) -> bool) -> i64 {
        self.machines
            .iter()
            .filter_map(|machine| machine.label(MACHINE_DEPLOYMENT_NAME_LABEL))
            .filter(|md| is_live(md))
            .count() as i64
    }

    /// Whether a deletion-marked machine belongs to a MachineDeployment passing `is_live`
    pub fn has_pending_deletion_in(&self, is_live: impl Fn(&str) -> bool) -> bool {
        self.pending_deletion.values().any(|md| is_live(md))
    }
}
