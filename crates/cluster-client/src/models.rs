//! Addressing types shared by the trait, the kube-backed client and the mock

use std::fmt;

use crds::IntentKind;
use serde_json::Value;

/// Namespaced address of one intent object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntentRef {
    /// Which CRD the intent belongs to
    pub kind: IntentKind,
    /// Namespace of the intent
    pub namespace: String,
    /// Name of the intent
    pub name: String,
}

impl IntentRef {
    /// Build a reference
    pub fn new(kind: IntentKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for IntentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Read `metadata.resourceVersion` from a raw object
pub fn resource_version(object: &Value) -> Option<&str> {
    object.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

/// Read `metadata.finalizers` from a raw object
pub fn finalizers(object: &Value) -> Vec<String> {
    object
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|f| f.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Render a label map as an equality-based selector (`k1=v1,k2=v2`)
pub fn label_selector<'a, I>(labels: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    labels
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_label_selector_is_sorted_and_joined() {
        let mut labels = BTreeMap::new();
        labels.insert("tier".to_string(), "backend".to_string());
        labels.insert("app".to_string(), "worker".to_string());
        assert_eq!(label_selector(&labels), "app=worker,tier=backend");
        assert_eq!(label_selector(&BTreeMap::new()), "");
    }

    #[test]
    fn test_metadata_accessors() {
        let obj = json!({"metadata": {"resourceVersion": "7", "finalizers": ["a", "b"]}});
        assert_eq!(resource_version(&obj), Some("7"));
        assert_eq!(finalizers(&obj), vec!["a", "b"]);
        assert!(finalizers(&json!({})).is_empty());
    }
}
