//! Common types for ike: the Session CRD, errors, cluster access, patch
//! templates and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod metrics;
pub mod telemetry;
pub mod template;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Finalizer placed on every active Session
pub const SESSION_FINALIZER: &str = "finalizers.istio.workspace.session";

/// Field manager used for writes made by the controller
pub const FIELD_MANAGER: &str = "ike-controller";
