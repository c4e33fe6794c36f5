//! Session reconciliation for ike
//!
//! A Session names workloads (refs) a developer wants to work on. For every
//! ref the [`engine::Engine`] runs a pass:
//!
//! - **Locators** discover the objects involved (workloads, services, routing
//!   rules, destination rules, gateways) and classify each with an action
//! - a **validator** decides whether the pass may mutate anything
//! - **Modificators** create, modify, revert or delete those objects
//!
//! Every object a session touches is stamped with a reference marker so the
//! pass can be undone exactly, even after a controller restart. The
//! [`controller`] drives passes from Session changes and persists outcomes
//! as conditions.

pub mod controller;
pub mod engine;
pub mod istio;
pub mod k8s;
pub mod marker;
pub mod model;
pub mod validation;

#[cfg(test)]
mod fixtures;

pub use engine::{Engine, SessionContext};
pub use model::{LocatorStatus, LocatorStatusStore, ModificatorStatus, Ref, StatusAction};
