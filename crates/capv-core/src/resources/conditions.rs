use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};

/// Status condition as reported on Cluster and VirtualMachineGroup status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

impl Condition {
    pub fn new(type_: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
            reason: None,
            message: None,
            last_transition_time: Some(Time(chrono::Utc::now())),
        }
    }

    /// Condition with status "True"
    pub fn true_(type_: impl Into<String>) -> Self {
        Self::new(type_, "True")
    }

    /// Condition with status "False"
    pub fn false_(type_: impl Into<String>) -> Self {
        Self::new(type_, "False")
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Whether `conditions` holds a condition of `type_` with status "True"
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.type_ == type_)
        .map(Condition::is_true)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_lookup() {
        let conditions = vec![
            Condition::false_("Ready"),
            Condition::true_("PlacementReady"),
        ];
        assert!(is_condition_true(&conditions, "PlacementReady"));
        assert!(!is_condition_true(&conditions, "Ready"));
        assert!(!is_condition_true(&conditions, "Missing"));
    }

    #[test]
    fn test_condition_type_field_name() {
        let json = serde_json::to_value(Condition::true_("PlacementReady")).unwrap();
        assert_eq!(json["type"], "PlacementReady");
        assert_eq!(json["status"], "True");
        assert!(json.get("reason").is_none());
    }
}
