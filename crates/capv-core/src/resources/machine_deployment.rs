use super::{new_metadata, Resource, ResourceError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Cluster API MachineDeployment, a horizontally scalable worker group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeployment {
    #[serde(default = "MachineDeployment::api_version_default")]
    pub api_version: String,
    #[serde(default = "MachineDeployment::kind_default")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: MachineDeploymentSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
    /// Desired number of machines, unset counts as zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub template: MachineTemplateSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateSpec {
    #[serde(default)]
    pub spec: MachineSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Explicit zone; an empty string means unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,
}

impl MachineDeployment {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            api_version: Self::API_VERSION.to_string(),
            kind: Self::KIND.to_string(),
            metadata: new_metadata(namespace, name),
            spec: MachineDeploymentSpec::default(),
        }
    }

    fn api_version_default() -> String {
        Self::API_VERSION.to_string()
    }

    fn kind_default() -> String {
        Self::KIND.to_string()
    }

    /// Explicit failure domain, treating an empty string as unset
    pub fn failure_domain(&self) -> Option<&str> {
        self.spec
            .template
            .spec
            .failure_domain
            .as_deref()
            .filter(|fd| !fd.is_empty())
    }
}

impl Resource for MachineDeployment {
    const API_VERSION: &'static str = "cluster.x-k8s.io/v1beta2";
    const KIND: &'static str = "MachineDeployment";
    const SHORT_NAMES: &'static [&'static str] = &["md"];

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn validate(&self) -> Result<(), ResourceError> {
        super::validate_base(&self.metadata)?;

        if let Some(replicas) = self.spec.replicas {
            if replicas < 0 {
                return Err(ResourceError::ValidationFailed(format!(
                    "spec.replicas must not be negative, got {}",
                    replicas
                )));
            }
        }

        Ok(())
    }
}
