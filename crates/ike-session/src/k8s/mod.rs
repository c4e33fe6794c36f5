//! Core Kubernetes kinds: workloads and the Services in front of them

mod service;
mod workload;

pub use service::ServiceLocator;
pub use workload::{WorkloadLocator, WorkloadModificator};

use std::collections::BTreeMap;

use serde_json::Value;

/// Read a JSON object of strings (labels, selectors); anything else is empty
pub(crate) fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_map_keeps_only_string_values() {
        let value = json!({"app": "ratings", "replicas": 1});
        let map = string_map(Some(&value));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("app").map(String::as_str), Some("ratings"));
        assert!(string_map(None).is_empty());
        assert!(string_map(Some(&json!("scalar"))).is_empty());
    }
}
