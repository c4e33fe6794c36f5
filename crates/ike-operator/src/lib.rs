//! ike operator: wires the Session controller to a live cluster

#![deny(missing_docs)]

/// Controller construction and dependent-kind watches
pub mod controller_runner;
