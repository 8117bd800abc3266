pub mod cluster;
pub mod conditions;
pub mod machine_deployment;
pub mod virtual_machine_group;
pub mod vsphere_machine;

pub use cluster::{Cluster, ClusterSpec, ClusterStatus, ClusterTopology, MachineDeploymentTopology, WorkersTopology};
pub use conditions::{is_condition_true, Condition};
pub use machine_deployment::{MachineDeployment, MachineDeploymentSpec, MachineSpec, MachineTemplateSpec};
pub use virtual_machine_group::{
    BootOrderGroup, GroupMember, MemberKind, PlacementStatus, VirtualMachineGroup,
    VirtualMachineGroupMemberStatus, VirtualMachineGroupSpec, VirtualMachineGroupStatus,
};
pub use vsphere_machine::{VSphereMachine, VSphereMachineSpec, VirtualMachineNamingStrategy};

use crate::{CapvError, GroupVersionKind, ObjectKey, ResourceKey, ResourceVersion};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// Base validation for all resources
pub fn validate_base(metadata: &ObjectMeta) -> Result<(), ResourceError> {
    let name = metadata
        .name
        .as_ref()
        .ok_or_else(|| ResourceError::MissingField("metadata.name".to_string()))?;

    if !is_valid_name(name) {
        return Err(ResourceError::InvalidName(name.clone()));
    }

    match metadata.namespace.as_deref() {
        None | Some("") => Err(ResourceError::MissingField("metadata.namespace".to_string())),
        Some(ns) if !is_valid_name(ns) => Err(ResourceError::InvalidNamespace(ns.to_string())),
        Some(_) => Ok(()),
    }
}

/// A namespaced, typed resource held by the store.
///
/// Every kind handled by the controller is namespaced, so `namespace()`
/// and `name()` are always meaningful once `validate()` has passed.
pub trait Resource:
    Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// apiVersion, e.g. "cluster.x-k8s.io/v1beta2"
    const API_VERSION: &'static str;

    /// Kind, e.g. "Cluster"
    const KIND: &'static str;

    /// Extra names accepted on the command line besides the lowercase kind
    const SHORT_NAMES: &'static [&'static str] = &[];

    /// Get the metadata of this resource
    fn metadata(&self) -> &ObjectMeta;

    /// Get mutable metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// GroupVersionKind of the type
    fn type_gvk() -> GroupVersionKind
    where
        Self: Sized,
    {
        GroupVersionKind::from_api_version_kind(Self::API_VERSION, Self::KIND)
    }

    /// Get the GroupVersionKind
    fn gvk(&self) -> GroupVersionKind
    where
        Self: Sized,
    {
        Self::type_gvk()
    }

    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    /// Get the ResourceKey
    fn resource_key(&self) -> Result<ResourceKey, ResourceError>
    where
        Self: Sized,
    {
        let metadata = self.metadata();
        let name = metadata
            .name
            .as_ref()
            .ok_or_else(|| ResourceError::MissingField("metadata.name".to_string()))?;
        let namespace = metadata.namespace.clone().unwrap_or_default();

        Ok(ResourceKey::new(self.gvk(), namespace, name))
    }

    fn object_key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), self.name())
    }

    /// Get the resource version
    fn resource_version(&self) -> Option<ResourceVersion> {
        self.metadata()
            .resource_version
            .as_ref()
            .map(ResourceVersion::new)
    }

    /// Set the resource version
    fn set_resource_version(&mut self, version: ResourceVersion) {
        self.metadata_mut().resource_version = Some(version.0);
    }

    /// Get the UID
    fn uid(&self) -> Option<&str> {
        self.metadata().uid.as_deref()
    }

    /// Set the UID
    fn set_uid(&mut self, uid: String) {
        self.metadata_mut().uid = Some(uid);
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.metadata()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>)
    where
        Self: Sized,
    {
        self.metadata_mut()
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }

    /// Whether the resource carries a deletion timestamp
    fn is_deleting(&self) -> bool {
        self.metadata().deletion_timestamp.is_some()
    }

    /// Validate the resource
    fn validate(&self) -> Result<(), ResourceError> {
        validate_base(self.metadata())
    }
}

/// Resource-related errors
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid resource name: {0}")]
    InvalidName(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ResourceError> for CapvError {
    fn from(err: ResourceError) -> Self {
        let suggestion = match &err {
            ResourceError::MissingField(field) => format!("Set {} on the resource", field),
            ResourceError::InvalidName(_) | ResourceError::InvalidNamespace(_) => {
                "Names must be lowercase alphanumeric, '-' or '.', and start and end with an alphanumeric character".to_string()
            }
            ResourceError::ValidationFailed(_) => "Fix the resource and try again".to_string(),
        };
        CapvError::invalid_resource(err.to_string(), suggestion)
    }
}

/// Validate a Kubernetes resource name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    let bytes = name.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return false;
    }

    bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-' || *b == b'.')
}

/// Metadata for a new namespaced object
pub(crate) fn new_metadata(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}
