//! The per-ref pass: locate, validate, modify
//!
//! Locators and modificators are registered by name so failures can be
//! attributed in logs and the registries can be listed. A pass runs every
//! locator into one [`LocatorStatusStore`], asks the [`SyncHandler`] whether
//! to go on, then runs every modificator against the store. Each outcome is
//! counted on the [`MetricsRecorder`] and handed to the handler.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, warn};

use ike_common::crd::Route;
use ike_common::kube_utils::{ResourceClient, ResourceKind};
use ike_common::metrics::MetricsRecorder;
use ike_common::template::PatchEngine;
use ike_common::Error;
use kube::api::ObjectMeta;

use crate::istio::{
    DestinationRuleLocator, DestinationRuleModificator, GatewayModificator,
    VirtualServiceGatewayLocator, VirtualServiceLocator, VirtualServiceModificator,
};
use crate::k8s::{ServiceLocator, WorkloadLocator, WorkloadModificator};
use crate::marker;
use crate::model::{LocatorStatusStore, ModificatorStatus, Ref, StatusAction};

/// What a pass knows about the Session it works for
pub struct SessionContext {
    /// Session name
    pub name: String,
    /// Session namespace; every object the pass touches lives here
    pub namespace: String,
    /// Route selecting the session's traffic
    pub route: Route,
    /// Cluster access
    pub client: Arc<dyn ResourceClient>,
}

impl SessionContext {
    /// Marker label key for `reference` in this session
    pub fn marker_key(&self, reference: &Ref) -> String {
        marker::marker_key(&self.name, &reference.kind_name.to_string())
    }

    /// Record that `reference` applied `action` to an object
    pub fn stamp(&self, meta: &mut ObjectMeta, reference: &Ref, action: StatusAction) {
        marker::add_back_reference(meta, &self.namespace, &self.name);
        marker::add_marker(meta, &self.marker_key(reference), action, &reference.hash());
    }

    /// Remove what [`stamp`](Self::stamp) recorded
    pub fn unstamp(&self, meta: &mut ObjectMeta, reference: &Ref) {
        marker::remove_back_reference(meta, &self.namespace, &self.name);
        marker::remove_marker(meta, &self.marker_key(reference));
    }
}

/// Read-only discovery for one kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Locator: Send + Sync {
    /// Report the objects `reference` involves into `store`
    async fn locate(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &mut LocatorStatusStore,
    ) -> Result<(), Error>;
}

/// Mutation and revert for one kind
///
/// Must be safe to run any number of times with the same store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Modificator: Send + Sync {
    /// Act on the store entries of this modificator's kind
    async fn modify(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &LocatorStatusStore,
    ) -> Vec<ModificatorStatus>;
}

/// Receives the stages of a pass
pub trait SyncHandler: Send {
    /// Decide whether modificators may run
    fn validate(&mut self, store: &LocatorStatusStore) -> bool;

    /// Everything located, once validation passed
    fn located(&mut self, store: &LocatorStatusStore);

    /// One modificator outcome
    fn modified(&mut self, status: ModificatorStatus);
}

/// A registered locator
pub struct NamedLocator {
    /// Name used in logs
    pub name: &'static str,
    /// The locator
    pub locator: Box<dyn Locator>,
}

/// A registered modificator
pub struct NamedModificator {
    /// Name used in logs
    pub name: &'static str,
    /// The modificator
    pub modificator: Box<dyn Modificator>,
}

/// Registries of locators and modificators plus the outcome recorder
pub struct Engine {
    locators: Vec<NamedLocator>,
    modificators: Vec<NamedModificator>,
    recorder: Arc<dyn MetricsRecorder>,
}

impl Engine {
    /// Engine over explicit registries
    pub fn new(
        locators: Vec<NamedLocator>,
        modificators: Vec<NamedModificator>,
        recorder: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            locators,
            modificators,
            recorder,
        }
    }

    /// Engine handling workloads, services and the istio routing kinds
    ///
    /// Locators run in dependency order: workloads first, then the Services
    /// selecting them, then the routing objects for those Services.
    pub fn standard(patches: Arc<PatchEngine>, recorder: Arc<dyn MetricsRecorder>) -> Self {
        let locators = vec![
            NamedLocator {
                name: "deployment",
                locator: Box::new(WorkloadLocator::new(ResourceKind::Deployment)),
            },
            NamedLocator {
                name: "deployment-config",
                locator: Box::new(WorkloadLocator::new(ResourceKind::DeploymentConfig)),
            },
            NamedLocator {
                name: "service",
                locator: Box::new(ServiceLocator),
            },
            NamedLocator {
                name: "virtual-service",
                locator: Box::new(VirtualServiceLocator),
            },
            NamedLocator {
                name: "destination-rule",
                locator: Box::new(DestinationRuleLocator),
            },
            NamedLocator {
                name: "virtual-service-gateway",
                locator: Box::new(VirtualServiceGatewayLocator),
            },
        ];
        let modificators = vec![
            NamedModificator {
                name: "deployment",
                modificator: Box::new(WorkloadModificator::new(
                    ResourceKind::Deployment,
                    patches.clone(),
                )),
            },
            NamedModificator {
                name: "deployment-config",
                modificator: Box::new(WorkloadModificator::new(
                    ResourceKind::DeploymentConfig,
                    patches,
                )),
            },
            NamedModificator {
                name: "destination-rule",
                modificator: Box::new(DestinationRuleModificator),
            },
            NamedModificator {
                name: "gateway",
                modificator: Box::new(GatewayModificator),
            },
            NamedModificator {
                name: "virtual-service",
                modificator: Box::new(VirtualServiceModificator),
            },
        ];
        Self::new(locators, modificators, recorder)
    }

    /// Registered locator names in run order
    pub fn locator_names(&self) -> Vec<&'static str> {
        self.locators.iter().map(|l| l.name).collect()
    }

    /// Registered modificator names in run order
    pub fn modificator_names(&self) -> Vec<&'static str> {
        self.modificators.iter().map(|m| m.name).collect()
    }

    /// Run one pass for `reference`
    ///
    /// Returns false when the handler rejected the located state and nothing
    /// was modified.
    pub async fn sync<H: SyncHandler>(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        handler: &mut H,
    ) -> bool {
        let mut store = LocatorStatusStore::new();
        for named in &self.locators {
            if let Err(error) = named.locator.locate(ctx, reference, &mut store).await {
                warn!(
                    locator = named.name,
                    reference = %reference.kind_name,
                    error = %error,
                    "locating failed"
                );
            }
        }
        debug!(reference = %reference.kind_name, located = store.len(), "located");

        if !handler.validate(&store) {
            debug!(reference = %reference.kind_name, "validation rejected pass");
            return false;
        }
        handler.located(&store);

        for named in &self.modificators {
            for status in named.modificator.modify(ctx, reference, &store).await {
                let (kind, action) = (&status.located.kind, status.located.action.as_str());
                if status.success {
                    self.recorder.processed(&ctx.namespace, kind, action);
                } else {
                    warn!(
                        modificator = named.name,
                        kind = %kind,
                        name = %status.located.name,
                        action,
                        error = status.error.as_deref().unwrap_or_default(),
                        "modification failed"
                    );
                    self.recorder.failed(&ctx.namespace, kind, action);
                }
                handler.modified(status);
            }
        }
        true
    }
}
