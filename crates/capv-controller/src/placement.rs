//! Zone memory for MachineDeployments
//!
//! Committed zones live in annotations on the VirtualMachineGroup, one key
//! per MachineDeployment under the zone prefix. An explicit failure domain
//! always wins; otherwise a committed zone is kept, and a zone is adopted
//! from the first placement-ready member of the MachineDeployment.

use crate::Topology;
use capv_core::labels::{
    is_zone_annotation, machine_deployment_from_zone_annotation, zone_annotation_key,
};
use capv_core::{Resource, VirtualMachineGroup};
use std::collections::BTreeMap;
use tracing::info;

/// Zone per MachineDeployment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneMap(BTreeMap<String, String>);

impl ZoneMap {
    /// Create an empty zone map
    pub fn new() -> Self {
        Self::default()
    }

    /// Read committed zones from annotations; empty values are ignored
    pub fn from_annotations(annotations: Option<&BTreeMap<String, String>>) -> Self {
        let zones = annotations
            .into_iter()
            .flatten()
            .filter(|(_, zone)| !zone.is_empty())
            .filter_map(|(key, zone)| {
                machine_deployment_from_zone_annotation(key).map(|md| (md.to_string(), zone.clone()))
            })
            .collect();
        Self(zones)
    }

    /// Replace every zone annotation with the entries of this map
    pub fn apply_to_annotations(&self, annotations: &mut BTreeMap<String, String>) {
        annotations.retain(|key, _| !is_zone_annotation(key));
        for (md, zone) in &self.0 {
            annotations.insert(zone_annotation_key(md), zone.clone());
        }
    }

    /// Compute the zone of every live MachineDeployment.
    ///
    /// Without an existing group only explicit zones are known.
    pub fn resolve(
        topology: &Topology,
        existing: Option<&VirtualMachineGroup>,
        vm_to_md: &BTreeMap<String, String>,
    ) -> Self {
        let mut zones = Self::new();

        let Some(group) = existing else {
            for (md, zone) in &topology.explicit_zones {
                zones.insert(md.clone(), zone.clone());
            }
            return zones;
        };

        let committed = Self::from_annotations(group.metadata().annotations.as_ref());

        for md in topology.names() {
            if let Some(zone) = topology.explicit_zones.get(md) {
                zones.insert(md.to_string(), zone.clone());
                continue;
            }

            if let Some(zone) = committed.get(md) {
                zones.insert(md.to_string(), zone.to_string());
                continue;
            }

            let placed = group.status_members().iter().find_map(|member| {
                let zone = member.ready_zone()?;
                (vm_to_md.get(&member.name).map(String::as_str) == Some(md)).then_some(zone)
            });
            if let Some(zone) = placed {
                info!(
                    "MachineDeployment {} has been placed to failure domain {}",
                    md, zone
                );
                zones.insert(md.to_string(), zone.to_string());
            }
        }

        zones
    }

    /// Set the zone of a MachineDeployment
    pub fn insert(&mut self, machine_deployment: String, zone: String) {
        self.0.insert(machine_deployment, zone);
    }

    /// Zone of a MachineDeployment, if known
    pub fn get(&self, machine_deployment: &str) -> Option<&str> {
        self.0.get(machine_deployment).map(String::as_str)
    }

    /// Whether a MachineDeployment has a zone
    pub fn contains(&self, machine_deployment: &str) -> bool {
        self.0.contains_key(machine_deployment)
    }

    /// Iterate over MachineDeployment and zone pairs, sorted by MachineDeployment
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(md, zone)| (md.as_str(), zone.as_str()))
    }

    /// Number of MachineDeployments with a zone
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
