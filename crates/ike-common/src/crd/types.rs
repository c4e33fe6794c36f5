//! Shared status types for ike CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status, serialized the way the Session API has always stored it
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    #[serde(rename = "true")]
    True,
    /// Condition is false
    #[serde(rename = "false")]
    False,
    /// Condition status is unknown
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl ConditionStatus {
    /// Map a success flag to a status
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::True
        } else {
            Self::False
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// What produced a condition: the session itself or one of its refs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ConditionSource {
    /// Kind of the object the condition is about (e.g. Deployment, Session)
    pub kind: String,
    /// Name of that object
    pub name: String,
    /// The ref (`kind/name`) whose pass produced the condition
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_: Option<String>,
}

/// An object created on behalf of a condition's source
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ConditionTarget {
    /// Kind of the created object
    pub kind: String,
    /// Name of the created object
    pub name: String,
}

/// Kubernetes-style condition for Session status reporting
///
/// Conditions are keyed by `(source, type)`: a later condition with the
/// same key replaces the earlier one.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Object and ref the condition is about
    pub source: ConditionSource,

    /// Object created on behalf of the source, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ConditionTarget>,

    /// Type of condition (e.g. CreateDeployment, TargetFound)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        source: ConditionSource,
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target: None,
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Attach the object created on behalf of the source
    pub fn with_target(mut self, target: ConditionTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// True when this condition occupies the same slot as `other`
    pub fn same_key(&self, other: &Condition) -> bool {
        self.source == other.source && self.type_ == other.type_
    }

    /// True when the condition reports a failure
    pub fn is_failed(&self) -> bool {
        self.status == ConditionStatus::False
    }
}
