use super::{new_metadata, Resource};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Per-node VSphereMachine (vm-operator flavour)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachine {
    #[serde(default = "VSphereMachine::api_version_default")]
    pub api_version: String,
    #[serde(default = "VSphereMachine::kind_default")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VSphereMachineSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naming_strategy: Option<VirtualMachineNamingStrategy>,
}

/// How the VM name is derived from the machine name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineNamingStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl VSphereMachine {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            api_version: Self::API_VERSION.to_string(),
            kind: Self::KIND.to_string(),
            metadata: new_metadata(namespace, name),
            spec: VSphereMachineSpec::default(),
        }
    }

    fn api_version_default() -> String {
        Self::API_VERSION.to_string()
    }

    fn kind_default() -> String {
        Self::KIND.to_string()
    }

    /// Naming template, if one is configured
    pub fn naming_template(&self) -> Option<&str> {
        self.spec
            .naming_strategy
            .as_ref()
            .and_then(|s| s.template.as_deref())
    }
}

impl Resource for VSphereMachine {
    const API_VERSION: &'static str = "vmware.infrastructure.cluster.x-k8s.io/v1beta2";
    const KIND: &'static str = "VSphereMachine";
    const SHORT_NAMES: &'static [&'static str] = &["vspm"];

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_template() {
        let yaml = r#"
apiVersion: vmware.infrastructure.cluster.x-k8s.io/v1beta2
kind: VSphereMachine
metadata:
  name: m1
  namespace: default
spec:
  namingStrategy:
    template: '{{ machine.name }}-vm'
"#;
        let machine: VSphereMachine = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(machine.naming_template(), Some("{{ machine.name }}-vm"));
        assert_eq!(VSphereMachine::new("default", "m2").naming_template(), None);
    }
}
