use super::{new_metadata, Condition, Resource};
use crate::labels::PLACEMENT_READY_CONDITION;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// vm-operator VirtualMachineGroup: boot order and zone placement of a
/// cluster's worker VMs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineGroup {
    #[serde(default = "VirtualMachineGroup::api_version_default")]
    pub api_version: String,
    #[serde(default = "VirtualMachineGroup::kind_default")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VirtualMachineGroupSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VirtualMachineGroupStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineGroupSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boot_order: Vec<BootOrderGroup>,
}

/// Members powered on together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootOrderGroup {
    #[serde(default)]
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub name: String,
    #[serde(default)]
    pub kind: MemberKind,
}

impl GroupMember {
    pub fn virtual_machine(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::VirtualMachine,
        }
    }
}

/// Kind of a group member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberKind {
    #[default]
    VirtualMachine,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineGroupStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<VirtualMachineGroupMemberStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Placement reported for one member by the placement subsystem
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineGroupMemberStatus {
    pub name: String,
    #[serde(default)]
    pub kind: MemberKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<PlacementStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl VirtualMachineGroupMemberStatus {
    /// Zone of a member whose placement is ready and non-empty
    pub fn ready_zone(&self) -> Option<&str> {
        if !super::is_condition_true(&self.conditions, PLACEMENT_READY_CONDITION) {
            return None;
        }
        self.placement
            .as_ref()
            .map(|p| p.zone.as_str())
            .filter(|zone| !zone.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementStatus {
    #[serde(default)]
    pub zone: String,
}

impl VirtualMachineGroup {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            api_version: Self::API_VERSION.to_string(),
            kind: Self::KIND.to_string(),
            metadata: new_metadata(namespace, name),
            spec: VirtualMachineGroupSpec::default(),
            status: None,
        }
    }

    fn api_version_default() -> String {
        Self::API_VERSION.to_string()
    }

    fn kind_default() -> String {
        Self::KIND.to_string()
    }

    /// Names of all members across boot-order groups, in boot order
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.spec
            .boot_order
            .iter()
            .flat_map(|group| group.members.iter())
            .map(|member| member.name.as_str())
    }

    /// Status members, in status order
    pub fn status_members(&self) -> &[VirtualMachineGroupMemberStatus] {
        self.status
            .as_ref()
            .map(|s| s.members.as_slice())
            .unwrap_or_default()
    }
}

impl Resource for VirtualMachineGroup {
    const API_VERSION: &'static str = "vmoperator.vmware.com/v1alpha2";
    const KIND: &'static str = "VirtualMachineGroup";
    const SHORT_NAMES: &'static [&'static str] = &["vmg"];

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
