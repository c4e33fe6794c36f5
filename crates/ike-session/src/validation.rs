//! Checks a forward pass must pass before anything is modified
//!
//! Each validator yields a condition sourced from the Session itself, so a
//! ref that locates nothing shows up in status instead of silently doing
//! nothing.

use ike_common::crd::{Condition, ConditionSource, ConditionStatus};

use crate::model::{LocatorStatusStore, Ref, WORKLOAD_KINDS};

/// Reason of every validation condition
pub const VALIDATION_REASON: &str = "Validation";

/// Validator over the located store
pub type Validator = fn(&LocatorStatusStore) -> Result<(), String>;

/// Registered validators by condition type
pub const VALIDATORS: [(&str, Validator); 1] = [("TargetFound", target_found)];

/// True when an entry of `kind` was located
pub fn resource_found(store: &LocatorStatusStore, kind: &str) -> bool {
    !store.query(&[kind]).is_empty()
}

/// Some Deployment or DeploymentConfig was located
pub fn target_found(store: &LocatorStatusStore) -> Result<(), String> {
    if WORKLOAD_KINDS.iter().any(|kind| resource_found(store, kind)) {
        Ok(())
    } else {
        Err("no target Deployment or DeploymentConfig found".to_string())
    }
}

/// Run every validator; returns whether all passed and one condition each
pub fn validate(
    session: &str,
    reference: &Ref,
    store: &LocatorStatusStore,
) -> (bool, Vec<Condition>) {
    let mut passed = true;
    let conditions = VALIDATORS
        .iter()
        .map(|(type_, validator)| {
            let source = ConditionSource {
                kind: "Session".to_string(),
                name: session.to_string(),
                ref_: Some(reference.kind_name.to_string()),
            };
            match validator(store) {
                Ok(()) => Condition::new(
                    source,
                    *type_,
                    ConditionStatus::True,
                    VALIDATION_REASON,
                    format!("{} passed for {}", type_, reference.kind_name),
                ),
                Err(message) => {
                    passed = false;
                    Condition::new(source, *type_, ConditionStatus::False, VALIDATION_REASON, message)
                }
            }
        })
        .collect();
    (passed, conditions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LocatorStatus, StatusAction};
    use std::collections::BTreeMap;

    fn reference() -> Ref {
        Ref::new("ratings-v1", "bookinfo", "prepared-image", BTreeMap::new())
    }

    #[test]
    fn located_deployment_passes() {
        let mut store = LocatorStatusStore::new();
        store.report(LocatorStatus::new("Deployment", "bookinfo", "ratings-v1", StatusAction::Located));

        let (passed, conditions) = validate("s", &reference(), &store);
        assert!(passed);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, "TargetFound");
        assert_eq!(conditions[0].status, ConditionStatus::True);
        assert_eq!(conditions[0].source.kind, "Session");
        assert_eq!(conditions[0].source.ref_.as_deref(), Some("ratings-v1"));
    }

    #[test]
    fn services_alone_are_not_a_target() {
        let mut store = LocatorStatusStore::new();
        store.report(LocatorStatus::new("Service", "bookinfo", "ratings", StatusAction::Located));

        let (passed, conditions) = validate("s", &reference(), &store);
        assert!(!passed);
        assert!(conditions[0].is_failed());
        assert_eq!(conditions[0].reason, VALIDATION_REASON);
        assert_eq!(
            conditions[0].message,
            "no target Deployment or DeploymentConfig found"
        );
    }

    #[test]
    fn deployment_config_counts() {
        let mut store = LocatorStatusStore::new();
        store.report(LocatorStatus::new("DeploymentConfig", "bookinfo", "ratings", StatusAction::Create));
        assert!(target_found(&store).is_ok());
        assert!(resource_found(&store, "deploymentconfig"));
    }
}
