//! Services selecting a located workload

use std::collections::BTreeMap;

use async_trait::async_trait;

use ike_common::kube_utils::ResourceKind;
use ike_common::Error;

use super::string_map;
use crate::engine::{Locator, SessionContext};
use crate::model::{LocatorStatus, LocatorStatusStore, Ref, StatusAction, WORKLOAD_KINDS};

/// Reports every Service whose selector picks the located workload's pods
///
/// A Service with an empty selector selects nothing managed here and is
/// skipped.
pub struct ServiceLocator;

fn selects(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    !selector.is_empty() && selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[async_trait]
impl Locator for ServiceLocator {
    async fn locate(
        &self,
        ctx: &SessionContext,
        _reference: &Ref,
        store: &mut LocatorStatusStore,
    ) -> Result<(), Error> {
        let workloads: Vec<_> = store
            .query(&WORKLOAD_KINDS)
            .into_iter()
            .filter(|e| !e.action.is_undo())
            .map(|e| e.labels.clone())
            .collect();
        if workloads.is_empty() {
            return Ok(());
        }

        let services = ctx
            .client
            .list(ResourceKind::Service, &ctx.namespace, "")
            .await?;
        for service in &services {
            let selector = string_map(service.data.pointer("/spec/selector"));
            if workloads.iter().any(|labels| selects(&selector, labels)) {
                store.report(
                    LocatorStatus::new(
                        ResourceKind::Service.kind(),
                        &ctx.namespace,
                        service.metadata.name.clone().unwrap_or_default(),
                        StatusAction::Located,
                    )
                    .with_labels(service.metadata.labels.clone().unwrap_or_default()),
                );
            }
        }
        Ok(())
    }
}
