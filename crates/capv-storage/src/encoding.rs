use crate::{Result, StorageError};
use capv_core::{GroupVersionKind, ResourceKey};

/// Key encoder for storage keys
///
/// Resources are stored under `{api_version}/{kind}/{namespace}/{name}`.
/// The apiVersion of every CAPV kind contains a `/`, so keys are parsed
/// from the right.
pub struct KeyEncoder;

impl KeyEncoder {
    /// Encode a resource key
    pub fn encode_resource_key(key: &ResourceKey) -> String {
        key.storage_key()
    }

    /// Encode a prefix for scanning resources of a kind, optionally in one namespace
    pub fn encode_prefix(gvk: &GroupVersionKind, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!("{}/{}/{}/", gvk.api_version(), gvk.kind, ns),
            None => format!("{}/{}/", gvk.api_version(), gvk.kind),
        }
    }

    /// Parse a storage key back into a resource key
    pub fn parse_key(key: &str) -> Result<ResourceKey> {
        let mut parts = key.rsplitn(4, '/');
        let name = parts.next();
        let namespace = parts.next();
        let kind = parts.next();
        let api_version = parts.next();

        match (api_version, kind, namespace, name) {
            (Some(api_version), Some(kind), Some(namespace), Some(name))
                if !api_version.is_empty()
                    && !kind.is_empty()
                    && !namespace.is_empty()
                    && !name.is_empty() =>
            {
                Ok(ResourceKey::new(
                    GroupVersionKind::from_api_version_kind(api_version, kind),
                    namespace,
                    name,
                ))
            }
            _ => Err(StorageError::invalid_key(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vmg_gvk() -> GroupVersionKind {
        GroupVersionKind::from_api_version_kind("vmoperator.vmware.com/v1alpha2", "VirtualMachineGroup")
    }

    #[test]
    fn test_encode_resource_key() {
        let key = ResourceKey::new(vmg_gvk(), "default", "c1");
        assert_eq!(
            KeyEncoder::encode_resource_key(&key),
            "vmoperator.vmware.com/v1alpha2/VirtualMachineGroup/default/c1"
        );
    }

    #[test]
    fn test_encode_prefix() {
        assert_eq!(
            KeyEncoder::encode_prefix(&vmg_gvk(), Some("default")),
            "vmoperator.vmware.com/v1alpha2/VirtualMachineGroup/default/"
        );
        assert_eq!(
            KeyEncoder::encode_prefix(&vmg_gvk(), None),
            "vmoperator.vmware.com/v1alpha2/VirtualMachineGroup/"
        );
    }

    #[test]
    fn test_parse_key() {
        let key = KeyEncoder::parse_key("cluster.x-k8s.io/v1beta2/MachineDeployment/ns1/md1").unwrap();
        assert_eq!(key.gvk.group, "cluster.x-k8s.io");
        assert_eq!(key.gvk.version, "v1beta2");
        assert_eq!(key.gvk.kind, "MachineDeployment");
        assert_eq!(key.namespace, "ns1");
        assert_eq!(key.name, "md1");
    }

    #[test]
    fn test_parse_key_rejects_short_keys() {
        assert!(KeyEncoder::parse_key("Cluster/ns1/c1").is_err());
        assert!(KeyEncoder::parse_key("v1/Cluster//c1").is_err());
    }
}
