//! Istio routing kinds: VirtualService, DestinationRule and Gateway
//!
//! Shared objects here are edited in place rather than cloned, so every
//! modificator writes only when its edit changes the object. A no-op write
//! would bump `resourceVersion` and requeue the Session through its own
//! watch.

mod destination_rule;
mod gateway;
mod types;
mod virtual_service;

pub use destination_rule::{DestinationRuleLocator, DestinationRuleModificator};
pub use gateway::{GatewayModificator, VirtualServiceGatewayLocator};
pub use types::*;
pub use virtual_service::{VirtualServiceLocator, VirtualServiceModificator};

use kube::api::DynamicObject;

use ike_common::kube_utils::ResourceKind;
use ike_common::Error;

use crate::engine::SessionContext;
use crate::marker::{get_marker, marker_selector};
use crate::model::{LocatorStatus, LocatorStatusStore, Ref, StatusAction};

/// Label on session-owned routing rule clones
pub const LABEL_IKE_MUTATED: &str = "ike.mutated";
/// Value of [`LABEL_IKE_MUTATED`]
pub const LABEL_IKE_MUTATED_VALUE: &str = "true";
/// Gateway annotation and located-entry label listing exposed hosts
pub const LABEL_IKE_HOSTS: &str = "ike.hosts";
/// Located-entry label naming the target host
pub const LABEL_HOST: &str = "host";

pub(crate) fn status_of(kind: ResourceKind, obj: &DynamicObject, action: StatusAction) -> LocatorStatus {
    LocatorStatus::new(
        kind.kind(),
        obj.metadata.namespace.clone().unwrap_or_default(),
        obj.metadata.name.clone().unwrap_or_default(),
        action,
    )
}

/// Report the undo of what this ref did earlier to objects of `kind`
///
/// Forward passes only undo objects stamped under a different ref hash;
/// reverse passes undo everything stamped.
pub(crate) async fn report_marked(
    ctx: &SessionContext,
    reference: &Ref,
    kind: ResourceKind,
    store: &mut LocatorStatusStore,
) -> Result<(), Error> {
    let key = ctx.marker_key(reference);
    let marked = ctx
        .client
        .list(kind, &ctx.namespace, &marker_selector(&key))
        .await?;
    let hash = reference.hash();
    for obj in &marked {
        let (action, recorded) = get_marker(&obj.metadata, &key);
        if reference.deleted || recorded != hash {
            store.report(status_of(kind, obj, StatusAction::undo_of(&action)));
        }
    }
    Ok(())
}

/// Write `obj` back when it differs from `before`
pub(crate) async fn update_if_changed(
    ctx: &SessionContext,
    kind: ResourceKind,
    before: &DynamicObject,
    obj: &DynamicObject,
) -> Result<bool, Error> {
    if before.metadata == obj.metadata && before.data == obj.data {
        return Ok(false);
    }
    let namespace = obj.metadata.namespace.clone().unwrap_or_default();
    ctx.client.update(kind, &namespace, obj).await?;
    Ok(true)
}
