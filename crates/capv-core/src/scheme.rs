//! Registry of the resource kinds the store and CLI understand

use crate::{CapvError, GroupVersionKind, Resource, Result};
use crate::{Cluster, MachineDeployment, VSphereMachine, VirtualMachineGroup};
use std::collections::BTreeMap;

/// Registered kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub gvk: GroupVersionKind,
    /// Lowercase kind, plural and short names accepted by `resolve_alias`
    pub aliases: Vec<String>,
}

/// Type registry, populated explicitly at startup
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    types: BTreeMap<GroupVersionKind, TypeInfo>,
}

impl Scheme {
    /// Empty scheme
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheme holding Cluster, MachineDeployment, VSphereMachine and VirtualMachineGroup
    pub fn with_defaults() -> Self {
        let mut scheme = Self::new();
        scheme.register_defaults();
        scheme
    }

    pub fn register_defaults(&mut self) {
        self.register::<Cluster>();
        self.register::<MachineDeployment>();
        self.register::<VSphereMachine>();
        self.register::<VirtualMachineGroup>();
    }

    /// Register a resource type; registering twice is a no-op
    pub fn register<R: Resource>(&mut self) {
        let gvk = R::type_gvk();
        let lower = R::KIND.to_ascii_lowercase();
        let mut aliases = vec![format!("{}s", lower), lower];
        aliases.extend(R::SHORT_NAMES.iter().map(|s| s.to_string()));

        self.types
            .entry(gvk.clone())
            .or_insert(TypeInfo { gvk, aliases });
    }

    pub fn is_registered(&self, gvk: &GroupVersionKind) -> bool {
        self.types.contains_key(gvk)
    }

    /// Resolve an apiVersion/kind pair from a manifest
    pub fn resolve(&self, api_version: &str, kind: &str) -> Result<GroupVersionKind> {
        let gvk = GroupVersionKind::from_api_version_kind(api_version, kind);
        if self.is_registered(&gvk) {
            Ok(gvk)
        } else {
            Err(CapvError::invalid_kind(gvk.to_string()))
        }
    }

    /// Resolve a command-line kind name such as "vmg" or "clusters"
    pub fn resolve_alias(&self, name: &str) -> Result<GroupVersionKind> {
        let needle = name.to_ascii_lowercase();
        self.types
            .values()
            .find(|info| info.aliases.iter().any(|a| *a == needle))
            .map(|info| info.gvk.clone())
            .ok_or_else(|| CapvError::invalid_kind(name))
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeInfo> {
        self.types.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_scheme_resolves_nothing() {
        let scheme = Scheme::new();
        assert!(scheme
            .resolve("cluster.x-k8s.io/v1beta2", "Cluster")
            .is_err());
    }

    #[test]
    fn test_register_defaults() {
        let scheme = Scheme::with_defaults();
        assert_eq!(scheme.types().count(), 4);

        let gvk = scheme
            .resolve("vmoperator.vmware.com/v1alpha2", "VirtualMachineGroup")
            .unwrap();
        assert_eq!(gvk, VirtualMachineGroup::type_gvk());

        let err = scheme
            .resolve("vmoperator.vmware.com/v1alpha1", "VirtualMachineGroup")
            .unwrap_err();
        assert!(matches!(err, CapvError::InvalidKind { .. }));
    }

    #[test]
    fn test_register_twice_is_noop() {
        let mut scheme = Scheme::with_defaults();
        scheme.register::<Cluster>();
        assert_eq!(scheme.types().count(), 4);
    }

    #[test]
    fn test_resolve_alias() {
        let scheme = Scheme::with_defaults();
        assert_eq!(scheme.resolve_alias("vmg").unwrap().kind, "VirtualMachineGroup");
        assert_eq!(scheme.resolve_alias("Clusters").unwrap().kind, "Cluster");
        assert_eq!(scheme.resolve_alias("md").unwrap().kind, "MachineDeployment");
        assert_eq!(
            scheme.resolve_alias("vspheremachine").unwrap().kind,
            "VSphereMachine"
        );
        assert!(scheme.resolve_alias("pod").is_err());
    }
}
