use std::collections::BTreeMap;

/// List options: namespace scoping plus an equality/existence label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    /// Restrict to one namespace; `None` lists across all namespaces
    pub namespace: Option<String>,
    /// Labels that must be present with exactly these values
    pub match_labels: BTreeMap<String, String>,
    /// Labels that must be present with a non-empty value
    pub has_labels: Vec<String>,
}

impl ListParams {
    /// List in every namespace
    pub fn all() -> Self {
        Self::default()
    }

    /// List in one namespace
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn with_label_exists(mut self, key: impl Into<String>) -> Self {
        self.has_labels.push(key.into());
        self
    }

    /// Whether an object with `labels` satisfies the selector
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let lookup = |key: &str| labels.and_then(|l| l.get(key)).map(String::as_str);

        self.match_labels
            .iter()
            .all(|(key, value)| lookup(key) == Some(value.as_str()))
            && self
                .has_labels
                .iter()
                .all(|key| lookup(key).is_some_and(|v| !v.is_empty()))
    }
}
