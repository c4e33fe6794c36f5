//! Deployments and DeploymentConfigs: the workloads a session clones
//!
//! Both kinds share the pod template layout, so one locator and one
//! modificator parameterized by [`ResourceKind`] serve both.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use tracing::{debug, info};

use ike_common::kube_utils::{ResourceClient, ResourceKind};
use ike_common::template::PatchEngine;
use ike_common::Error;

use super::string_map;
use crate::engine::{Locator, Modificator, SessionContext};
use crate::marker::{get_marker, marker_selector};
use crate::model::{
    created_version, LocatorStatus, LocatorStatusStore, ModificatorStatus, Ref, StatusAction,
};

fn template_labels(obj: &DynamicObject) -> BTreeMap<String, String> {
    string_map(obj.data.pointer("/spec/template/metadata/labels"))
}

fn located(kind: ResourceKind, obj: &DynamicObject, action: StatusAction) -> LocatorStatus {
    LocatorStatus::new(
        kind.kind(),
        obj.metadata.namespace.clone().unwrap_or_default(),
        obj.metadata.name.clone().unwrap_or_default(),
        action,
    )
    .with_labels(template_labels(obj))
}

/// Finds the workload a ref names and the clones it made earlier
pub struct WorkloadLocator {
    kind: ResourceKind,
}

impl WorkloadLocator {
    /// Locator for `kind` (Deployment or DeploymentConfig)
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Locator for WorkloadLocator {
    async fn locate(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &mut LocatorStatusStore,
    ) -> Result<(), Error> {
        if !reference.kind_name.supports_kind(self.kind.kind()) {
            return Ok(());
        }

        let key = ctx.marker_key(reference);
        let marked = ctx
            .client
            .list(self.kind, &ctx.namespace, &marker_selector(&key))
            .await?;

        if reference.deleted {
            for obj in &marked {
                let (action, _) = get_marker(&obj.metadata, &key);
                store.report(located(self.kind, obj, StatusAction::undo_of(&action)));
            }
            // the clone may already be gone when an earlier revert stopped
            // halfway; the original still names the session's version
            if let Some(original) = self.original(ctx.client.as_ref(), reference).await? {
                store.report(located(self.kind, &original, StatusAction::Located));
            }
            return Ok(());
        }

        let hash = reference.hash();
        for obj in &marked {
            let (action, recorded) = get_marker(&obj.metadata, &key);
            if recorded != hash {
                store.report(located(self.kind, obj, StatusAction::undo_of(&action)));
            }
        }

        let Some(original) = self.original(ctx.client.as_ref(), reference).await? else {
            return Ok(());
        };
        store.report(located(self.kind, &original, StatusAction::Located));
        if !reference.is_existing() {
            store.report(located(self.kind, &original, StatusAction::Create));
        }
        Ok(())
    }
}

impl WorkloadLocator {
    async fn original(
        &self,
        client: &dyn ResourceClient,
        reference: &Ref,
    ) -> Result<Option<DynamicObject>, Error> {
        client
            .get(self.kind, &reference.namespace, &reference.kind_name.name)
            .await
    }
}

/// Clones a located workload through the ref's patch strategy
pub struct WorkloadModificator {
    kind: ResourceKind,
    patches: Arc<PatchEngine>,
}

impl WorkloadModificator {
    /// Modificator for `kind` rendering clones with `patches`
    pub fn new(kind: ResourceKind, patches: Arc<PatchEngine>) -> Self {
        Self { kind, patches }
    }

    async fn create(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &LocatorStatusStore,
        entry: &LocatorStatus,
    ) -> ModificatorStatus {
        let source = match ctx.client.get(self.kind, &entry.namespace, &entry.name).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                return ModificatorStatus::failed(
                    entry,
                    format!("failed to load target {} {}: not found", entry.kind, entry.name),
                )
            }
            Err(e) => {
                return ModificatorStatus::failed(
                    entry,
                    format!("failed to load target {} {}: {e}", entry.kind, entry.name),
                )
            }
        };

        let mut clone = match self.render_clone(&source, reference, store, &ctx.name) {
            Ok(clone) => clone,
            Err(e) => {
                return ModificatorStatus::failed(
                    entry,
                    format!("failed to clone {} {}: {e}", entry.kind, entry.name),
                )
            }
        };
        ctx.stamp(&mut clone.metadata, reference, StatusAction::Create);
        let name = clone.metadata.name.clone().unwrap_or_default();

        match ctx.client.create(self.kind, &ctx.namespace, &clone).await {
            Ok(_) => info!(kind = %self.kind, name = %name, "created clone"),
            Err(e) if e.is_already_exists() => debug!(kind = %self.kind, name = %name, "clone exists"),
            Err(e) => {
                return ModificatorStatus::failed(
                    entry,
                    format!("failed to create {} {name}: {e}", entry.kind),
                )
            }
        }
        ModificatorStatus::ok(entry).with_target(self.kind.kind(), &ctx.namespace, name)
    }

    fn render_clone(
        &self,
        source: &DynamicObject,
        reference: &Ref,
        store: &LocatorStatusStore,
        session: &str,
    ) -> Result<DynamicObject, Error> {
        let bytes = serde_json::to_vec(source)?;
        let version = created_version(store, session);
        let patched = self
            .patches
            .run(&reference.strategy, &bytes, &version, &reference.args)?;
        let mut clone: DynamicObject = serde_json::from_slice(&patched)?;
        clone.metadata.resource_version = None;
        clone.metadata.uid = None;
        clone.metadata.managed_fields = None;
        Ok(clone)
    }

    async fn delete(&self, ctx: &SessionContext, entry: &LocatorStatus) -> ModificatorStatus {
        match ctx.client.delete(self.kind, &entry.namespace, &entry.name).await {
            Ok(()) => {
                info!(kind = %self.kind, name = %entry.name, "deleted clone");
                ModificatorStatus::ok(entry)
            }
            Err(e) if e.is_not_found() => ModificatorStatus::ok(entry),
            Err(e) => ModificatorStatus::failed(
                entry,
                format!("failed to delete {} {}: {e}", entry.kind, entry.name),
            ),
        }
    }
}

#[async_trait]
impl Modificator for WorkloadModificator {
    async fn modify(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &LocatorStatusStore,
    ) -> Vec<ModificatorStatus> {
        let mut results = Vec::new();
        for entry in store.query(&[self.kind.kind()]) {
            match entry.action {
                // the original, reused as is
                StatusAction::Located => {}
                StatusAction::Create if reference.is_existing() => {}
                StatusAction::Create => results.push(self.create(ctx, reference, store, entry).await),
                StatusAction::Delete => results.push(self.delete(ctx, entry).await),
                StatusAction::Modify | StatusAction::Revert => {
                    results.push(ModificatorStatus::unsupported(entry))
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{context, deployment, with_marker};
    use crate::model::{deleted_version, version_sha, STRATEGY_EXISTING};
    use ike_common::testing::MemoryClient;

    fn prepared_image() -> Ref {
        Ref::new(
            "ratings-v1",
            "bookinfo",
            "prepared-image",
            BTreeMap::from([("image".to_string(), "x:x:x".to_string())]),
        )
    }

    async fn locate(client: &MemoryClient, reference: &Ref) -> LocatorStatusStore {
        let ctx = context(client, "s");
        let mut store = LocatorStatusStore::new();
        WorkloadLocator::new(ResourceKind::Deployment)
            .locate(&ctx, reference, &mut store)
            .await
            .unwrap();
        store
    }

    mod locating {
        use super::*;

        #[tokio::test]
        async fn reports_original_and_clone_directive() {
            let client = MemoryClient::new();
            client.apply(deployment("ratings-v1", "v1")).unwrap();

            let store = locate(&client, &prepared_image()).await;
            let actions: Vec<_> = store.query(&["Deployment"]).iter().map(|e| e.action).collect();
            assert_eq!(actions, vec![StatusAction::Located, StatusAction::Create]);
            assert_eq!(store.query(&[])[0].label("version"), "v1");
        }

        #[tokio::test]
        async fn existing_strategy_only_locates() {
            let client = MemoryClient::new();
            client.apply(deployment("ratings-v1", "v1")).unwrap();
            let reference = Ref::new("ratings-v1", "bookinfo", STRATEGY_EXISTING, BTreeMap::new());

            let store = locate(&client, &reference).await;
            assert_eq!(store.len(), 1);
            assert_eq!(store.query(&[])[0].action, StatusAction::Located);
        }

        #[tokio::test]
        async fn absent_workload_is_not_an_error() {
            let client = MemoryClient::new();
            let store = locate(&client, &prepared_image()).await;
            assert!(store.is_empty());
        }

        #[tokio::test]
        async fn other_kinds_are_skipped() {
            let client = MemoryClient::new();
            client.apply(deployment("ratings-v1", "v1")).unwrap();
            let reference = Ref::new("dc/ratings-v1", "bookinfo", "prepared-image", BTreeMap::new());

            let store = locate(&client, &reference).await;
            assert!(store.is_empty());
        }

        #[tokio::test]
        async fn clones_from_an_older_shape_are_deleted() {
            let client = MemoryClient::new();
            client.apply(deployment("ratings-v1", "v1")).unwrap();
            let reference = prepared_image();
            let ctx = context(&client, "s");
            client
                .apply(with_marker(
                    deployment("ratings-v1-old", "old"),
                    &ctx.marker_key(&reference),
                    "create-00000000",
                ))
                .unwrap();

            let store = locate(&client, &reference).await;
            let first = store.query(&[])[0];
            assert_eq!(first.name, "ratings-v1-old");
            assert_eq!(first.action, StatusAction::Delete);
        }

        #[tokio::test]
        async fn reverse_reports_marked_clones_only() {
            let client = MemoryClient::new();
            client.apply(deployment("ratings-v1", "v1")).unwrap();
            let reference = prepared_image();
            let ctx = context(&client, "s");
            client
                .apply(with_marker(
                    deployment("ratings-v1-clone", "abc-s"),
                    &ctx.marker_key(&reference),
                    &format!("create-{}", reference.hash()),
                ))
                .unwrap();

            let store = locate(&client, &reference.into_deleted()).await;
            let entries = store.query(&[]);
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[0].name, "ratings-v1-clone");
            assert_eq!(entries[0].action, StatusAction::Delete);
            assert_eq!(entries[1].name, "ratings-v1");
            assert_eq!(entries[1].action, StatusAction::Located);
            assert_eq!(deleted_version(&store, "s"), "abc-s");
        }

        #[tokio::test]
        async fn reverse_after_the_clone_is_gone_still_names_its_version() {
            let client = MemoryClient::new();
            client.apply(deployment("ratings-v1", "v1")).unwrap();

            let store = locate(&client, &prepared_image().into_deleted()).await;
            let entries = store.query(&[]);
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].action, StatusAction::Located);
            assert_eq!(
                deleted_version(&store, "s"),
                format!("{}-s", version_sha("v1"))
            );
        }
    }

    mod cloning {
        use super::*;

        fn modificator() -> WorkloadModificator {
            WorkloadModificator::new(ResourceKind::Deployment, Arc::new(PatchEngine::new()))
        }

        #[tokio::test]
        async fn create_renders_and_stamps_the_clone() {
            let client = MemoryClient::new();
            client.apply(deployment("ratings-v1", "v1")).unwrap();
            let reference = prepared_image();
            let store = locate(&client, &reference).await;
            let ctx = context(&client, "s");

            let results = modificator().modify(&ctx, &reference, &store).await;
            assert_eq!(results.len(), 1);
            assert!(results[0].success, "{:?}", results[0].error);

            let clone_name = format!("ratings-v1-{}-s", version_sha("v1"));
            let target = results[0].target.clone().unwrap();
            assert_eq!(target.name, clone_name);

            let clone = client
                .object(ResourceKind::Deployment, "bookinfo", &clone_name)
                .unwrap();
            assert_eq!(
                get_marker(&clone.metadata, &ctx.marker_key(&reference)),
                ("create".to_string(), reference.hash())
            );
            assert_eq!(clone.data["spec"]["replicas"], 1);
            assert_eq!(
                clone.data["spec"]["template"]["spec"]["containers"][0]["image"],
                "x:x:x"
            );
        }

        #[tokio::test]
        async fn create_twice_is_success() {
            let client = MemoryClient::new();
            client.apply(deployment("ratings-v1", "v1")).unwrap();
            let reference = prepared_image();
            let store = locate(&client, &reference).await;
            let ctx = context(&client, "s");

            modificator().modify(&ctx, &reference, &store).await;
            let again = modificator().modify(&ctx, &reference, &store).await;
            assert!(again[0].success);
            assert_eq!(client.names(ResourceKind::Deployment, "bookinfo").len(), 2);
        }

        #[tokio::test]
        async fn unknown_strategy_fails_the_entry() {
            let client = MemoryClient::new();
            client.apply(deployment("ratings-v1", "v1")).unwrap();
            let reference = Ref::new("ratings-v1", "bookinfo", "no-such-strategy", BTreeMap::new());
            let store = locate(&client, &reference).await;
            let ctx = context(&client, "s");

            let results = modificator().modify(&ctx, &reference, &store).await;
            assert!(!results[0].success);
            let error = results[0].error.clone().unwrap_or_default();
            assert!(error.contains("unable to find patch no-such-strategy"), "{error}");
        }

        #[tokio::test]
        async fn delete_of_missing_clone_is_success() {
            let client = MemoryClient::new();
            let ctx = context(&client, "s");
            let mut store = LocatorStatusStore::new();
            store.report(LocatorStatus::new("Deployment", "bookinfo", "gone", StatusAction::Delete));

            let results = modificator().modify(&ctx, &prepared_image(), &store).await;
            assert!(results[0].success);
        }

        #[tokio::test]
        async fn in_place_actions_are_rejected() {
            let client = MemoryClient::new();
            let ctx = context(&client, "s");
            let mut store = LocatorStatusStore::new();
            store.report(LocatorStatus::new("Deployment", "bookinfo", "x", StatusAction::Modify));

            let results = modificator().modify(&ctx, &prepared_image(), &store).await;
            assert_eq!(
                results[0].error.as_deref(),
                Some("unknown action type for modificator: modify")
            );
        }
    }
}
