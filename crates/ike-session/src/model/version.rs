//! Workload versions derived from located entries

use ike_common::kube_utils::short_hash;

use super::{LocatorStatusStore, WORKLOAD_KINDS};

/// Returned when no located workload carries a `version` label
pub const UNKNOWN_VERSION: &str = "unknown";

const VERSION_LABEL: &str = "version";

fn first_version(store: &LocatorStatusStore, undo: bool) -> Option<&str> {
    store
        .query(&WORKLOAD_KINDS)
        .into_iter()
        .filter(|e| e.action.is_undo() == undo)
        .find_map(|e| e.labels.get(VERSION_LABEL).map(String::as_str))
}

/// Version of the workload the ref targets
pub fn version(store: &LocatorStatusStore) -> String {
    first_version(store, false)
        .unwrap_or(UNKNOWN_VERSION)
        .to_string()
}

/// Short digest of a version, the prefix of every session version
pub fn version_sha(version: &str) -> String {
    short_hash(version)
}

/// Version given to the session's clone: `sha8(version)-session`
pub fn created_version(store: &LocatorStatusStore, session: &str) -> String {
    match first_version(store, false) {
        Some(v) => format!("{}-{}", version_sha(v), session),
        None => UNKNOWN_VERSION.to_string(),
    }
}

/// Version of the clone a reverting pass removes
///
/// Without a clone left to delete (strategies that never clone, or a clone
/// removed by an earlier interrupted revert) the version is derived from
/// the original, the same way [`created_version`] named it.
pub fn deleted_version(store: &LocatorStatusStore, session: &str) -> String {
    match first_version(store, true) {
        Some(v) => v.to_string(),
        None => created_version(store, session),
    }
}
