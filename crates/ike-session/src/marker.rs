//! Bookkeeping stamped on the objects a session touches
//!
//! Two pieces of metadata make every change traceable back to its session:
//!
//! - a **reference marker** label, one per (session, ref), whose value is the
//!   action taken and the ref hash at the time (`create-1a2b3c4d`). Locators
//!   list by the label key to find what a ref did and flip the action to
//!   undo it.
//! - a **back-reference** annotation listing `namespace/name` of every
//!   Session that touched the object, so changes to the object can requeue
//!   those Sessions.

use std::collections::BTreeMap;

use kube::api::ObjectMeta;

use crate::model::StatusAction;

/// Prefix of every reference marker label
pub const MARKER_PREFIX: &str = "maistra.io.";

/// Annotation listing the Sessions that touched an object
pub const BACK_REFERENCE_ANNOTATION: &str = "maistra.io/istio-workspaces";

const MARKER_NAME_MAX: usize = 40;

/// Join `parts` with `-`, shortening each so the result fits in `max` chars
///
/// Every part keeps an equal share of the room so no single long part
/// pushes the others out.
pub fn concat_to_max(max: usize, parts: &[&str]) -> String {
    let joined = parts.join("-");
    if joined.len() <= max || parts.is_empty() {
        return joined;
    }
    let separators = parts.len() - 1;
    let share = max.saturating_sub(separators) / parts.len();
    parts
        .iter()
        .map(|p| p.chars().take(share).collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

/// Label key recording what `reference` of `session` did to an object
pub fn marker_key(session: &str, reference: &str) -> String {
    let name = concat_to_max(MARKER_NAME_MAX, &[session, reference]).replace('/', "-");
    format!("{MARKER_PREFIX}{name}-X")
}

/// Selector listing objects carrying `key`
pub fn marker_selector(key: &str) -> String {
    key.to_string()
}

/// Record `action` and `hash` under `key`
pub fn add_marker(meta: &mut ObjectMeta, key: &str, action: StatusAction, hash: &str) {
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), format!("{action}-{hash}"));
}

/// Recorded (action, hash) under `key`; hash is empty when it was not recorded
pub fn get_marker(meta: &ObjectMeta, key: &str) -> (String, String) {
    let value = meta
        .labels
        .as_ref()
        .and_then(|l| l.get(key))
        .cloned()
        .unwrap_or_default();
    let parts: Vec<&str> = value.split('-').collect();
    match parts.as_slice() {
        [action, hash] => (action.to_string(), hash.to_string()),
        _ => (parts.first().map(|s| s.to_string()).unwrap_or_default(), String::new()),
    }
}

/// Drop the marker under `key`
pub fn remove_marker(meta: &mut ObjectMeta, key: &str) {
    if let Some(labels) = meta.labels.as_mut() {
        labels.remove(key);
        if labels.is_empty() {
            meta.labels = None;
        }
    }
}

fn session_reference(namespace: &str, session: &str) -> String {
    format!("{namespace}/{session}")
}

/// Add the Session to the back-reference annotation
pub fn add_back_reference(meta: &mut ObjectMeta, namespace: &str, session: &str) {
    let reference = session_reference(namespace, session);
    let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
    let mut references: Vec<String> = annotations
        .get(BACK_REFERENCE_ANNOTATION)
        .map(|v| {
            v.split(',')
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if !references.contains(&reference) {
        references.push(reference);
    }
    annotations.insert(BACK_REFERENCE_ANNOTATION.to_string(), references.join(","));
}

/// Remove the Session from the back-reference annotation
pub fn remove_back_reference(meta: &mut ObjectMeta, namespace: &str, session: &str) {
    let reference = session_reference(namespace, session);
    let Some(annotations) = meta.annotations.as_mut() else {
        return;
    };
    let remaining: Vec<&str> = annotations
        .get(BACK_REFERENCE_ANNOTATION)
        .map(|v| {
            v.split(',')
                .filter(|r| !r.is_empty() && *r != reference)
                .collect()
        })
        .unwrap_or_default();
    if remaining.is_empty() {
        annotations.remove(BACK_REFERENCE_ANNOTATION);
    } else {
        let joined = remaining.join(",");
        annotations.insert(BACK_REFERENCE_ANNOTATION.to_string(), joined);
    }
    if annotations.is_empty() {
        meta.annotations = None;
    }
}

/// Sessions listed in the back-reference annotation as (namespace, name)
pub fn back_references(meta: &ObjectMeta) -> Vec<(String, String)> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(BACK_REFERENCE_ANNOTATION))
        .map(|v| {
            v.split(',')
                .filter_map(|r| r.split_once('/'))
                .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
                .map(|(ns, name)| (ns.to_string(), name.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod markers {
        use super::*;

        #[test]
        fn key_is_prefixed_and_suffixed() {
            let key = marker_key("my-session", "ratings-v1");
            assert_eq!(key, "maistra.io.my-session-ratings-v1-X");
        }

        #[test]
        fn key_never_contains_a_slash() {
            let key = marker_key("s", "deployment/ratings-v1");
            assert_eq!(key, "maistra.io.s-deployment-ratings-v1-X");
        }

        #[test]
        fn long_names_are_shortened_to_fit_a_label() {
            let session = "a".repeat(50);
            let reference = "b".repeat(50);
            let key = marker_key(&session, &reference);
            let name = key
                .strip_prefix(MARKER_PREFIX)
                .and_then(|k| k.strip_suffix("-X"))
                .unwrap_or_default();
            assert!(name.len() <= 40, "{name}");
            assert!(name.starts_with('a') && name.ends_with('b'));
            assert!(key.len() <= 63);
        }

        #[test]
        fn add_get_remove() {
            let mut meta = ObjectMeta::default();
            let key = marker_key("s", "ratings");
            add_marker(&mut meta, &key, StatusAction::Modify, "1a2b3c4d");

            assert_eq!(
                get_marker(&meta, &key),
                ("modify".to_string(), "1a2b3c4d".to_string())
            );

            remove_marker(&mut meta, &key);
            assert!(meta.labels.is_none());
            assert_eq!(get_marker(&meta, &key), (String::new(), String::new()));
        }

        #[test]
        fn value_without_hash_yields_empty_hash() {
            let mut meta = ObjectMeta::default();
            meta.labels = Some(BTreeMap::from([("k".to_string(), "create".to_string())]));
            assert_eq!(get_marker(&meta, "k"), ("create".to_string(), String::new()));
        }

        #[test]
        fn removing_keeps_other_labels() {
            let mut meta = ObjectMeta::default();
            meta.labels = Some(BTreeMap::from([("app".to_string(), "ratings".to_string())]));
            add_marker(&mut meta, "k", StatusAction::Create, "h");
            remove_marker(&mut meta, "k");
            assert_eq!(meta.labels.map(|l| l.len()), Some(1));
        }
    }

    mod back_reference {
        use super::*;

        #[test]
        fn add_is_idempotent_and_accumulates() {
            let mut meta = ObjectMeta::default();
            add_back_reference(&mut meta, "bookinfo", "s1");
            add_back_reference(&mut meta, "bookinfo", "s1");
            add_back_reference(&mut meta, "bookinfo", "s2");

            let value = meta
                .annotations
                .as_ref()
                .and_then(|a| a.get(BACK_REFERENCE_ANNOTATION))
                .cloned();
            assert_eq!(value.as_deref(), Some("bookinfo/s1,bookinfo/s2"));
            assert_eq!(back_references(&meta).len(), 2);
        }

        #[test]
        fn remove_drops_the_annotation_when_empty() {
            let mut meta = ObjectMeta::default();
            add_back_reference(&mut meta, "bookinfo", "s1");
            add_back_reference(&mut meta, "bookinfo", "s2");

            remove_back_reference(&mut meta, "bookinfo", "s1");
            assert_eq!(
                back_references(&meta),
                vec![("bookinfo".to_string(), "s2".to_string())]
            );

            remove_back_reference(&mut meta, "bookinfo", "s2");
            remove_back_reference(&mut meta, "bookinfo", "s2");
            assert!(meta.annotations.is_none());
        }

        #[test]
        fn malformed_entries_are_ignored() {
            let mut meta = ObjectMeta::default();
            meta.annotations = Some(BTreeMap::from([(
                BACK_REFERENCE_ANNOTATION.to_string(),
                "nonamespace,,bookinfo/s1,/x".to_string(),
            )]));
            assert_eq!(
                back_references(&meta),
                vec![("bookinfo".to_string(), "s1".to_string())]
            );
        }
    }

    #[test]
    fn concat_keeps_short_input() {
        assert_eq!(concat_to_max(40, &["a", "b"]), "a-b");
        assert_eq!(concat_to_max(5, &["abcdef", "ghijkl"]), "ab-gh");
    }
}
