use serde::{Deserialize, Serialize};
use std::fmt;

/// GroupVersionKind uniquely identifies a resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group (e.g., "cluster.x-k8s.io")
    pub group: String,
    /// API version (e.g., "v1beta2")
    pub version: String,
    /// Resource kind (e.g., "MachineDeployment")
    pub kind: String,
}

impl GroupVersionKind {
    /// Create a new GVK
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Create a GVK from apiVersion and kind
    /// apiVersion format: "v1" or "group/version"
    pub fn from_api_version_kind(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };

        Self {
            group,
            version,
            kind: kind.to_string(),
        }
    }

    /// Get the apiVersion string (group/version or just version)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Namespace and name of an object, independent of its kind.
///
/// The work queue is keyed by the `ObjectKey` of a Cluster; the
/// VirtualMachineGroup of that cluster shares the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace/name`; a bare name lands in the "default" namespace
    pub fn parse(value: &str) -> Option<Self> {
        match value.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Some(Self::new(ns, name))
            }
            Some(_) => None,
            None if !value.is_empty() => Some(Self::new("default", value)),
            None => None,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// ResourceKey uniquely identifies a specific resource instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// GroupVersionKind of the resource
    pub gvk: GroupVersionKind,
    /// Namespace
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ResourceKey {
    /// Create a new ResourceKey
    pub fn new(
        gvk: GroupVersionKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            gvk,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a ResourceKey from a kind and an object key
    pub fn from_object_key(gvk: GroupVersionKind, key: &ObjectKey) -> Self {
        Self::new(gvk, key.namespace.clone(), key.name.clone())
    }

    /// Namespace and name only
    pub fn object_key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Get the storage key encoding: {api_version}/{kind}/{namespace}/{name}
    pub fn storage_key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.gvk.api_version(),
            self.gvk.kind,
            self.namespace,
            self.name
        )
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.gvk.kind, self.namespace, self.name)
    }
}

/// Resource version - opaque token compared on optimistic updates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVersion(pub String);

impl ResourceVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ResourceVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
