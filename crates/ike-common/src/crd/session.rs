//! Session CRD - a developer's routing of live traffic to personal clones
//!
//! The spec lists the workloads (refs) to clone and the route that selects
//! the traffic. The status records every object the session touched so the
//! controller can undo exactly that when a ref or the session goes away.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Spec for a Session
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "maistra.io",
    version = "v1alpha1",
    kind = "Session",
    plural = "sessions",
    shortname = "sess",
    namespaced,
    status = "SessionStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Refs","type":"string","jsonPath":".status._refNames"}"#,
    printcolumn = r#"{"name":"Hosts","type":"string","jsonPath":".status._hosts"}"#,
    printcolumn = r#"{"name":"Route","type":"string","jsonPath":".status._routeExp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpec {
    /// How traffic is selected for the session's clones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,

    /// Workloads to clone or reuse
    #[serde(rename = "ref", default)]
    pub refs: Vec<RefSpec>,
}

/// Traffic selector for a session
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Route {
    /// Kind of match, currently only `header`
    #[serde(rename = "type")]
    pub type_: String,
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
}

/// One workload the session works on
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct RefSpec {
    /// `kind/name` or bare name of the workload
    pub name: String,
    /// Clone strategy (a patch template name, or `existing`)
    #[serde(default)]
    pub strategy: String,
    /// Strategy arguments
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

/// Overall outcome of the last reconcile
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// A reconcile is in flight
    Processing,
    /// Every condition is true
    Success,
    /// At least one condition is false
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Status for a Session
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Outcome of the last reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SessionState>,

    /// Route in effect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,

    /// What each applied ref did
    #[serde(default)]
    pub refs: Vec<RefStatus>,

    /// Per-object outcomes
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Route as `type:name=value`
    #[serde(rename = "_routeExp", default, skip_serializing_if = "Option::is_none")]
    pub route_expression: Option<String>,

    /// Names of the applied refs
    #[serde(rename = "_refNames", default)]
    pub ref_names: Vec<String>,

    /// Strategies of the applied refs
    #[serde(rename = "_strategies", default)]
    pub strategies: Vec<String>,

    /// Hosts exposed through gateways for this session
    #[serde(rename = "_hosts", default)]
    pub hosts: Vec<String>,
}

impl SessionStatus {
    /// Find the recorded status of a ref by name
    pub fn find_ref(&self, name: &str) -> Option<&RefStatus> {
        self.refs.iter().find(|r| r.name == name)
    }
}

/// Applied state of one ref
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefStatus {
    /// Ref name as given in the spec
    pub name: String,
    /// Strategy used
    #[serde(default)]
    pub strategy: String,
    /// Strategy arguments used
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
    /// Hash of the ref when it was applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Workloads the ref was found to target
    #[serde(default)]
    pub targets: Vec<LabeledRefResource>,
    /// Objects the ref acted on
    #[serde(default)]
    pub resources: Vec<RefResource>,
}

/// An object a ref acted on
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefResource {
    /// Object kind
    pub kind: String,
    /// Object name
    pub name: String,
    /// Action taken (create, delete, modify, revert, located)
    pub action: String,
    /// Extra facts about the action, e.g. `hosts` exposed on a gateway
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prop: BTreeMap<String, String>,
    /// When the action was recorded
    #[serde(
        rename = "lastTransitionTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// A located workload together with its labels
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct LabeledRefResource {
    /// The located object
    #[serde(flatten)]
    pub resource: RefResource,
    /// Labels of the object at the time it was located
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}
