//! Well-known label, annotation and condition names

/// Label carrying the name of the Cluster an object belongs to
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label carrying the name of the MachineDeployment a machine belongs to
pub const MACHINE_DEPLOYMENT_NAME_LABEL: &str = "cluster.x-k8s.io/deployment-name";

/// Label restricting which objects a controller manager instance handles
pub const WATCH_FILTER_LABEL: &str = "cluster.x-k8s.io/watch-filter";

/// Prefix of the VirtualMachineGroup annotations recording the zone of each MachineDeployment.
/// Full key: `<prefix>/<MachineDeploymentName>`.
pub const ZONE_ANNOTATION_PREFIX: &str = "zone.vmware.infrastructure.cluster.x-k8s.io";

/// Cluster condition set once the control plane has been initialized
pub const CONTROL_PLANE_INITIALIZED_CONDITION: &str = "ControlPlaneInitialized";

/// VirtualMachineGroup member condition set once placement has completed
pub const PLACEMENT_READY_CONDITION: &str = "PlacementReady";

/// Build the zone annotation key for a MachineDeployment
pub fn zone_annotation_key(machine_deployment: &str) -> String {
    format!("{}/{}", ZONE_ANNOTATION_PREFIX, machine_deployment)
}

/// Whether `key` lies under the zone annotation prefix, even with an empty MachineDeployment name
pub fn is_zone_annotation(key: &str) -> bool {
    key.strip_prefix(ZONE_ANNOTATION_PREFIX)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Return the MachineDeployment name if `key` is a zone annotation key
pub fn machine_deployment_from_zone_annotation(key: &str) -> Option<&str> {
    key.strip_prefix(ZONE_ANNOTATION_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|md| !md.is_empty())
}
