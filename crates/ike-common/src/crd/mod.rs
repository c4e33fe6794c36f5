//! Custom Resource Definitions for ike
//!
//! This module contains the CRD definitions used by the ike operator.

mod session;
mod types;

pub use session::{
    LabeledRefResource, RefResource, RefSpec, RefStatus, Route, Session, SessionSpec,
    SessionState, SessionStatus,
};
pub use types::{Condition, ConditionSource, ConditionStatus, ConditionTarget};
