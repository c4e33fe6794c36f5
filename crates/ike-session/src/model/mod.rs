//! Data model shared by locators, modificators and the controller

mod host;
mod refs;
mod route;
mod status;
mod version;

pub use host::{target_host_names, HostName};
pub use refs::{KindName, Ref, STRATEGY_EXISTING};
pub use route::{effective_route, route_expression, DEFAULT_ROUTE_HEADER, ROUTE_TYPE_HEADER};
pub use status::{LocatorStatus, LocatorStatusStore, ModificatorStatus, ResourceRef, StatusAction};
pub use version::{created_version, deleted_version, version, version_sha, UNKNOWN_VERSION};

/// Kind of a Deployment entry in the store
pub const DEPLOYMENT_KIND: &str = "Deployment";
/// Kind of an OpenShift DeploymentConfig entry in the store
pub const DEPLOYMENT_CONFIG_KIND: &str = "DeploymentConfig";
/// Kind of a Service entry in the store
pub const SERVICE_KIND: &str = "Service";
/// Kind of an istio Gateway entry in the store
pub const GATEWAY_KIND: &str = "Gateway";
/// Kind of an istio VirtualService entry in the store
pub const VIRTUAL_SERVICE_KIND: &str = "VirtualService";
/// Kind of an istio DestinationRule entry in the store
pub const DESTINATION_RULE_KIND: &str = "DestinationRule";

/// Kinds that count as a session's workload
pub const WORKLOAD_KINDS: [&str; 2] = [DEPLOYMENT_KIND, DEPLOYMENT_CONFIG_KIND];
