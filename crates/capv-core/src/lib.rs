//! CAPV Core - Resource model for the VirtualMachineGroup placement controller
//!
//! This crate provides:
//! - Typed Cluster API, VSphereMachine and VirtualMachineGroup resources
//! - Error types with miette diagnostics
//! - Resource keys, watch events and the type registry (scheme)
//! - Serialization helpers

pub mod error;
pub mod events;
pub mod labels;
pub mod resources;
pub mod scheme;
pub mod types;

// Re-export commonly used types
pub use error::{CapvError, Result};
pub use events::{ResourceEvent, WatchEventType};
pub use resources::{
    is_condition_true, is_valid_name, validate_base, BootOrderGroup, Cluster, ClusterSpec,
    ClusterStatus, ClusterTopology, Condition, GroupMember, MachineDeployment,
    MachineDeploymentSpec, MachineDeploymentTopology, MachineSpec, MachineTemplateSpec,
    MemberKind, PlacementStatus, Resource, ResourceError, VSphereMachine, VSphereMachineSpec,
    VirtualMachineGroup, VirtualMachineGroupMemberStatus, VirtualMachineGroupSpec,
    VirtualMachineGroupStatus, VirtualMachineNamingStrategy, WorkersTopology,
};
pub use scheme::{Scheme, TypeInfo};
pub use types::{GroupVersionKind, ObjectKey, ResourceKey, ResourceVersion};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};

/// Serialize a resource to JSON
pub fn to_json<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_json::to_string(resource).map_err(|e| {
        CapvError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        CapvError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a resource to YAML
pub fn to_yaml<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_yaml::to_string(resource).map_err(|e| {
        CapvError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Split a multi-document YAML stream into JSON values, skipping empty documents
pub fn yaml_documents(data: &str) -> Result<Vec<serde_json::Value>> {
    use serde::Deserialize;

    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(data) {
        let value = serde_json::Value::deserialize(document).map_err(|e| {
            CapvError::serialization_error(
                format!("Failed to deserialize from YAML: {}", e),
                Some(Box::new(e)),
            )
        })?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_serialization() {
        let cluster = Cluster::new("default", "c1");

        let json = to_json(&cluster).unwrap();
        assert!(json.contains("\"kind\":\"Cluster\""));

        let deserialized: Cluster = from_json(&json).unwrap();
        assert_eq!(deserialized.metadata.name, Some("c1".to_string()));
    }

    #[test]
    fn test_yaml_documents_skips_empty() {
        let yaml = r#"
apiVersion: cluster.x-k8s.io/v1beta2
kind: Cluster
metadata:
  name: c1
  namespace: default
---
---
apiVersion: cluster.x-k8s.io/v1beta2
kind: MachineDeployment
metadata:
  name: md1
  namespace: default
"#;
        let docs = yaml_documents(yaml).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["kind"], "Cluster");
        assert_eq!(docs[1]["kind"], "MachineDeployment");
    }

    #[test]
    fn test_yaml_roundtrip_keeps_member_kind() {
        let mut vmg = VirtualMachineGroup::new("default", "c1");
        vmg.spec.boot_order = vec![BootOrderGroup {
            members: vec![GroupMember::virtual_machine("m1")],
        }];

        let yaml = to_yaml(&vmg).unwrap();
        assert!(yaml.contains("kind: VirtualMachine"));
        assert!(yaml.contains("bootOrder"));
    }
}
