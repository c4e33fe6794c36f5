//! What locators found and what modificators did with it

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// What should happen, or happened, to a located object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusAction {
    /// Create a new object (e.g. a workload clone)
    Create,
    /// Delete an object created earlier
    Delete,
    /// Edit a shared object in place
    Modify,
    /// Undo an earlier in-place edit
    Revert,
    /// Found; nothing to do
    Located,
}

impl StatusAction {
    /// Every action in declaration order
    pub const ALL: [StatusAction; 5] = [
        Self::Create,
        Self::Delete,
        Self::Modify,
        Self::Revert,
        Self::Located,
    ];

    /// Lowercase name as stored in markers and status
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Modify => "modify",
            Self::Revert => "revert",
            Self::Located => "located",
        }
    }

    /// The action that undoes this one
    pub fn flip(self) -> Self {
        match self {
            Self::Create => Self::Delete,
            Self::Delete => Self::Create,
            Self::Modify => Self::Revert,
            Self::Revert => Self::Modify,
            Self::Located => Self::Located,
        }
    }

    /// Undo of an action recorded as text; unknown text reverts
    pub fn undo_of(recorded: &str) -> Self {
        recorded
            .parse::<Self>()
            .map(Self::flip)
            .unwrap_or(Self::Revert)
    }

    /// True for actions that take something away
    pub fn is_undo(self) -> bool {
        matches!(self, Self::Delete | Self::Revert)
    }

    /// Title-cased name, used in condition types
    pub fn title(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Delete => "Delete",
            Self::Modify => "Modify",
            Self::Revert => "Revert",
            Self::Located => "Located",
        }
    }
}

impl fmt::Display for StatusAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown action {s}"))
    }
}

/// An object a locator found, with the action it calls for
#[derive(Clone, Debug, PartialEq)]
pub struct LocatorStatus {
    /// Object kind
    pub kind: String,
    /// Object namespace
    pub namespace: String,
    /// Object name
    pub name: String,
    /// Labels relevant to the modificator (workload template labels, target host, ...)
    pub labels: BTreeMap<String, String>,
    /// What the modificator should do
    pub action: StatusAction,
    /// When the entry was reported
    pub timestamp: Option<DateTime<Utc>>,
}

impl LocatorStatus {
    /// Entry without labels
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        action: StatusAction,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            labels: BTreeMap::new(),
            action,
            timestamp: None,
        }
    }

    /// Attach labels
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Attach a single label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// `namespace/name`
    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Label value, empty when absent
    pub fn label(&self, key: &str) -> &str {
        self.labels.get(key).map(String::as_str).unwrap_or_default()
    }
}

/// Everything located during one pass of one ref
///
/// Entries are unique by (name, kind, action); a later report replaces the
/// earlier one.
#[derive(Clone, Debug, Default)]
pub struct LocatorStatusStore {
    entries: Vec<LocatorStatus>,
}

impl LocatorStatusStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry, stamping it if the locator did not
    pub fn report(&mut self, mut status: LocatorStatus) {
        if status.timestamp.is_none() {
            status.timestamp = Some(Utc::now());
        }
        let existing = self.entries.iter_mut().find(|e| {
            e.name == status.name && e.kind == status.kind && e.action == status.action
        });
        match existing {
            Some(entry) => *entry = status,
            None => self.entries.push(status),
        }
    }

    /// Entries of the given kinds (all entries when `kinds` is empty)
    ///
    /// Undo actions come first so deletes and reverts run before creates;
    /// the order within each group is the report order.
    pub fn query(&self, kinds: &[&str]) -> Vec<&LocatorStatus> {
        let matching = self
            .entries
            .iter()
            .filter(|e| kinds.is_empty() || kinds.iter().any(|k| k.eq_ignore_ascii_case(&e.kind)));
        let (mut undo, rest): (Vec<_>, Vec<_>) = matching.partition(|e| e.action.is_undo());
        undo.extend(rest);
        undo
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was located
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Kind and name of an object created on behalf of a located entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    /// Object kind
    pub kind: String,
    /// Object namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

/// Outcome of a modificator acting on one located entry
#[derive(Clone, Debug, PartialEq)]
pub struct ModificatorStatus {
    /// The entry acted on
    pub located: LocatorStatus,
    /// Whether the action succeeded
    pub success: bool,
    /// Failure description
    pub error: Option<String>,
    /// Facts about the action, e.g. `hosts` added to a gateway
    pub prop: BTreeMap<String, String>,
    /// Object created on behalf of the entry
    pub target: Option<ResourceRef>,
}

impl ModificatorStatus {
    /// Successful outcome
    pub fn ok(located: &LocatorStatus) -> Self {
        Self {
            located: located.clone(),
            success: true,
            error: None,
            prop: BTreeMap::new(),
            target: None,
        }
    }

    /// Failed outcome
    pub fn failed(located: &LocatorStatus, error: impl fmt::Display) -> Self {
        Self {
            located: located.clone(),
            success: false,
            error: Some(error.to_string()),
            prop: BTreeMap::new(),
            target: None,
        }
    }

    /// Failure for an action the modificator does not handle
    pub fn unsupported(located: &LocatorStatus) -> Self {
        Self::failed(
            located,
            format!("unknown action type for modificator: {}", located.action),
        )
    }

    /// Attach a prop
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.prop.insert(key.into(), value.into());
        self
    }

    /// Attach the created object
    pub fn with_target(
        mut self,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.target = Some(ResourceRef {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        });
        self
    }
}
