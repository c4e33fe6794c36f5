//! Status bookkeeping for Session passes
//!
//! Conditions are keyed by source and type, so a later pass over the same
//! object replaces what an earlier pass recorded.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;

use ike_common::crd::{
    Condition, ConditionSource, ConditionStatus, ConditionTarget, LabeledRefResource, RefResource,
    RefStatus, SessionState, SessionStatus,
};

use crate::model::{KindName, ModificatorStatus, StatusAction};

/// Reason for conditions about created, deleted or located objects
pub const REASON_HANDLED: &str = "Handled";
/// Reason for conditions about modified or reverted objects
pub const REASON_CONFIGURED: &str = "Configured";
/// Prop listing hosts exposed on a gateway
pub const PROP_HOSTS: &str = "hosts";

/// Replace the condition with the same key, or append
pub fn upsert(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.same_key(&condition)) {
        Some(existing) => {
            // keep the transition time while the status holds
            let since = existing.last_transition_time;
            let unchanged = existing.status == condition.status;
            *existing = condition;
            if unchanged {
                existing.last_transition_time = since;
            }
        }
        None => conditions.push(condition),
    }
}

/// Condition describing one modificator outcome
pub fn modification_condition(ref_name: &str, status: &ModificatorStatus) -> Condition {
    let located = &status.located;
    let reason = match located.action {
        StatusAction::Create | StatusAction::Delete | StatusAction::Located => REASON_HANDLED,
        StatusAction::Modify | StatusAction::Revert => REASON_CONFIGURED,
    };
    let outcome = match &status.error {
        Some(error) if !status.success => error.clone(),
        _ => "ok".to_string(),
    };
    let condition = Condition::new(
        ConditionSource {
            kind: located.kind.clone(),
            name: located.name.clone(),
            ref_: Some(ref_name.to_string()),
        },
        format!("{}{}", located.action.title(), located.kind),
        ConditionStatus::from_success(status.success),
        reason,
        format!(
            "{}/{} modified to satisfy {}: {}",
            located.kind, located.name, ref_name, outcome
        ),
    );
    match &status.target {
        Some(target) => condition.with_target(ConditionTarget {
            kind: target.kind.clone(),
            name: target.name.clone(),
        }),
        None => condition,
    }
}

/// Drop every condition produced for `ref_name`
pub fn purge_ref(conditions: &mut Vec<Condition>, ref_name: &str) {
    conditions.retain(|c| c.source.ref_.as_deref() != Some(ref_name));
}

/// Resource entry for a successful outcome
///
/// Created objects are recorded under the clone's name.
pub fn resource_of(status: &ModificatorStatus) -> RefResource {
    let (kind, name) = match &status.target {
        Some(target) => (target.kind.clone(), target.name.clone()),
        None => (status.located.kind.clone(), status.located.name.clone()),
    };
    RefResource {
        kind,
        name,
        action: status.located.action.as_str().to_string(),
        prop: status.prop.clone(),
        last_transition_time: Some(Utc::now()),
    }
}

/// Labeled entry for a located workload
pub fn target_of(kind: &str, name: &str, labels: &BTreeMap<String, String>) -> LabeledRefResource {
    LabeledRefResource {
        resource: RefResource {
            kind: kind.to_string(),
            name: name.to_string(),
            action: StatusAction::Located.as_str().to_string(),
            prop: BTreeMap::new(),
            last_transition_time: Some(Utc::now()),
        },
        labels: labels.clone(),
    }
}

/// Carry props of the previous application into this one
///
/// Gateway hosts are only reported by the pass that added them, so hosts
/// recorded before are unioned with the new ones.
pub fn merge_resources(previous: &[RefResource], current: Vec<RefResource>) -> Vec<RefResource> {
    current
        .into_iter()
        .map(|mut resource| {
            let earlier = previous.iter().find(|p| {
                p.kind == resource.kind && p.name == resource.name && p.action == resource.action
            });
            if let Some(earlier) = earlier {
                for (key, value) in &earlier.prop {
                    if key == PROP_HOSTS {
                        let merged = split_hosts(value)
                            .chain(resource.prop.get(PROP_HOSTS).into_iter().flat_map(|v| split_hosts(v)))
                            .collect::<BTreeSet<_>>();
                        let joined = merged.into_iter().collect::<Vec<_>>().join(",");
                        resource.prop.insert(key.clone(), joined);
                    } else {
                        resource.prop.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
                if resource.prop == earlier.prop {
                    resource.last_transition_time = earlier.last_transition_time;
                }
            }
            resource
        })
        .collect()
}

/// Keep the recorded time of targets that did not change
pub fn merge_targets(
    previous: &[LabeledRefResource],
    current: Vec<LabeledRefResource>,
) -> Vec<LabeledRefResource> {
    current
        .into_iter()
        .map(|mut target| {
            let earlier = previous.iter().find(|p| {
                p.resource.kind == target.resource.kind
                    && p.resource.name == target.resource.name
                    && p.labels == target.labels
            });
            if let Some(earlier) = earlier {
                target.resource.last_transition_time = earlier.resource.last_transition_time;
            }
            target
        })
        .collect()
}

fn split_hosts(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

/// Ref names a status knows about: recorded refs plus refs only seen in conditions
///
/// A ref whose first pass failed validation leaves conditions but no
/// recorded entry; it still has to be cleaned up.
pub fn known_refs(status: &SessionStatus) -> Vec<String> {
    let mut names: Vec<String> = status.refs.iter().map(|r| r.name.clone()).collect();
    let mut seen: BTreeSet<KindName> = names.iter().map(|n| KindName::parse(n)).collect();
    for condition in &status.conditions {
        if let Some(ref_name) = &condition.source.ref_ {
            if seen.insert(KindName::parse(ref_name)) {
                names.push(ref_name.clone());
            }
        }
    }
    names
}

/// Position of the recorded ref with the same kind and name
pub fn recorded_index(status: &SessionStatus, kind_name: &KindName) -> Option<usize> {
    status
        .refs
        .iter()
        .position(|r| KindName::parse(&r.name) == *kind_name)
}

/// Replace or append the recorded entry of a ref
pub fn record_ref(status: &mut SessionStatus, kind_name: &KindName, entry: RefStatus) {
    match recorded_index(status, kind_name) {
        Some(index) => status.refs[index] = entry,
        None => status.refs.push(entry),
    }
}

/// Recompute the `_refNames`, `_strategies` and `_hosts` summaries
pub fn summarize(status: &mut SessionStatus) {
    status.ref_names = status.refs.iter().map(|r| r.name.clone()).collect();

    let mut strategies = Vec::new();
    for r in &status.refs {
        if !strategies.contains(&r.strategy) {
            strategies.push(r.strategy.clone());
        }
    }
    status.strategies = strategies;

    let mut hosts = Vec::new();
    for resource in status.refs.iter().flat_map(|r| &r.resources) {
        if let Some(value) = resource.prop.get(PROP_HOSTS) {
            for host in split_hosts(value) {
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
        }
    }
    status.hosts = hosts;
}

/// Failed when any condition failed
pub fn session_state(conditions: &[Condition]) -> SessionState {
    if conditions.iter().any(Condition::is_failed) {
        SessionState::Failed
    } else {
        SessionState::Success
    }
}
