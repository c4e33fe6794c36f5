//! Controller runner - builds the Session controller future
//!
//! Sessions are the primary resource. Every kind a session modifies is
//! watched too: objects carry a back-reference annotation naming the
//! sessions that touched them, so an external edit to a clone or a routing
//! rule requeues exactly those sessions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::discovery::Discovery;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use ike_common::crd::Session;
use ike_common::kube_utils::{parse_api_version, ResourceKind};
use ike_session::controller::{error_policy, reconcile, Context};
use ike_session::marker::back_references;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Where the controller looks for Sessions and their dependents
#[derive(Clone, Debug, Default)]
pub struct WatchScope {
    /// Single namespace to watch; all namespaces when None
    pub namespace: Option<String>,
}

impl WatchScope {
    fn api<K>(&self, client: &Client) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        }
    }

    fn dynamic_api(&self, client: &Client, kind: ResourceKind) -> Api<DynamicObject> {
        let resource = kind.api_resource();
        match &self.namespace {
            Some(ns) => Api::namespaced_with(client.clone(), ns, &resource),
            None => Api::all_with(client.clone(), &resource),
        }
    }
}

/// Sessions to requeue when a dependent object changes
pub fn sessions_for(obj: &DynamicObject) -> Vec<ObjectRef<Session>> {
    back_references(&obj.metadata)
        .into_iter()
        .map(|(namespace, name)| ObjectRef::new(&name).within(&namespace))
        .collect()
}

/// Dependent kinds whose API group the cluster serves
///
/// DeploymentConfig only exists on OpenShift and the istio kinds only once
/// istio is installed; watching a missing kind would fail forever.
pub async fn served_kinds(client: &Client) -> Vec<ResourceKind> {
    let discovery = match Discovery::new(client.clone()).run().await {
        Ok(discovery) => discovery,
        Err(e) => {
            tracing::warn!(error = %e, "API discovery failed, watching core kinds only");
            return vec![ResourceKind::Deployment, ResourceKind::Service];
        }
    };
    ResourceKind::ALL
        .into_iter()
        .filter(|kind| {
            let (group, _) = parse_api_version(kind.api_version());
            let served = group.is_empty() || discovery.has_group(&group);
            if !served {
                tracing::info!(kind = kind.kind(), "API group not served, not watching");
            }
            served
        })
        .collect()
}

/// Build the Session controller future
pub fn build_session_controller(
    client: Client,
    ctx: Arc<Context>,
    scope: WatchScope,
    dependents: Vec<ResourceKind>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let sessions: Api<Session> = scope.api(&client);
    let mut controller = Controller::new(
        sessions,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    );

    for kind in dependents {
        tracing::info!(kind = kind.kind(), "- watching dependents");
        controller = controller.watches_with(
            scope.dynamic_api(&client, kind),
            kind.api_resource(),
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            |obj| sessions_for(&obj),
        );
    }

    tracing::info!("- Session controller");
    Box::pin(
        controller
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("Session")),
    )
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
