//! Destination subsets for session versions
//!
//! Routes spliced into VirtualServices point at a subset named after the
//! session version. The rule already carrying the workload's base subset
//! gets one more subset selecting the clone's pods.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::DynamicObject;
use tracing::info;

use ike_common::kube_utils::ResourceKind;
use ike_common::Error;

use super::{
    read_spec, report_marked, status_of, update_if_changed, write_spec, DestinationRuleSpec,
    Subset, LABEL_HOST,
};
use crate::engine::{Locator, Modificator, SessionContext};
use crate::model::{
    created_version, deleted_version, target_host_names, version, HostName, LocatorStatus,
    LocatorStatusStore, ModificatorStatus, Ref, StatusAction,
};

const KIND: ResourceKind = ResourceKind::DestinationRule;
const VERSION_LABEL: &str = "version";

fn subset_for_version<'a>(spec: &'a DestinationRuleSpec, version: &str) -> Option<&'a Subset> {
    spec.subsets
        .iter()
        .find(|s| s.labels.get(VERSION_LABEL).is_some_and(|v| v == version))
}

fn rule_with_subset<'a>(
    rules: &'a [DynamicObject],
    host: &HostName,
    version: &str,
) -> Result<Option<&'a DynamicObject>, Error> {
    for rule in rules {
        let spec: DestinationRuleSpec = read_spec(rule)?;
        if host.matches(&spec.host) && subset_for_version(&spec, version).is_some() {
            return Ok(Some(rule));
        }
    }
    Ok(None)
}

/// Add a subset named `created` modelled on the `version` subset
///
/// Returns false when the subset was already there.
pub(crate) fn add_session_subset(spec: &mut DestinationRuleSpec, version: &str, created: &str) -> bool {
    if spec.subsets.iter().any(|s| s.name == created) {
        return false;
    }
    let traffic_policy = subset_for_version(spec, version).and_then(|s| s.traffic_policy.clone());
    spec.subsets.push(Subset {
        name: created.to_string(),
        labels: BTreeMap::from([(VERSION_LABEL.to_string(), created.to_string())]),
        traffic_policy,
        ..Default::default()
    });
    true
}

/// Finds the destination rule holding the workload's subset for each target host
pub struct DestinationRuleLocator;

#[async_trait]
impl Locator for DestinationRuleLocator {
    async fn locate(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &mut LocatorStatusStore,
    ) -> Result<(), Error> {
        report_marked(ctx, reference, KIND, store).await?;
        if reference.deleted {
            return Ok(());
        }

        let hosts = target_host_names(store);
        if hosts.is_empty() {
            return Ok(());
        }
        let rules = ctx.client.list(KIND, &ctx.namespace, "").await?;
        let target_version = version(store);
        let mut missing = Vec::new();
        for host in &hosts {
            match rule_with_subset(&rules, host, &target_version)? {
                Some(rule) => store.report(
                    status_of(KIND, rule, StatusAction::Modify).with_label(LABEL_HOST, host.to_string()),
                ),
                None => missing.push(host.to_string()),
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::not_found(
                KIND.kind(),
                format!(
                    "subset with version {target_version} for host {} in namespace {}",
                    missing.join(", "),
                    ctx.namespace
                ),
            ))
        }
    }
}

/// Adds and removes session subsets
pub struct DestinationRuleModificator;

impl DestinationRuleModificator {
    async fn add(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &LocatorStatusStore,
        entry: &LocatorStatus,
    ) -> Result<(), Error> {
        let Some(rule) = ctx.client.get(KIND, &entry.namespace, &entry.name).await? else {
            return Err(Error::not_found(KIND.kind(), &entry.name));
        };
        let mut spec: DestinationRuleSpec = read_spec(&rule)?;
        let created = created_version(store, &ctx.name);
        if add_session_subset(&mut spec, &version(store), &created) {
            info!(rule = %entry.name, subset = %created, "added session subset");
        }

        let mut mutated = rule.clone();
        ctx.stamp(&mut mutated.metadata, reference, StatusAction::Modify);
        write_spec(&mut mutated, &spec)?;
        update_if_changed(ctx, KIND, &rule, &mutated).await?;
        Ok(())
    }

    async fn remove(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &LocatorStatusStore,
        entry: &LocatorStatus,
    ) -> Result<(), Error> {
        let Some(rule) = ctx.client.get(KIND, &entry.namespace, &entry.name).await? else {
            return Ok(());
        };
        let mut spec: DestinationRuleSpec = read_spec(&rule)?;
        let deleted = deleted_version(store, &ctx.name);
        spec.subsets.retain(|s| s.name != deleted);

        let mut reverted = rule.clone();
        ctx.unstamp(&mut reverted.metadata, reference);
        write_spec(&mut reverted, &spec)?;
        update_if_changed(ctx, KIND, &rule, &reverted).await?;
        Ok(())
    }
}

#[async_trait]
impl Modificator for DestinationRuleModificator {
    async fn modify(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &LocatorStatusStore,
    ) -> Vec<ModificatorStatus> {
        let mut results = Vec::new();
        for entry in store.query(&[KIND.kind()]) {
            let status = match entry.action {
                StatusAction::Modify => match self.add(ctx, reference, store, entry).await {
                    Ok(()) => ModificatorStatus::ok(entry),
                    Err(e) => ModificatorStatus::failed(
                        entry,
                        format!("failed adding session subset to destination rule {}: {e}", entry.name),
                    ),
                },
                StatusAction::Revert => match self.remove(ctx, reference, store, entry).await {
                    Ok(()) => ModificatorStatus::ok(entry),
                    Err(e) if e.is_not_found() => ModificatorStatus::ok(entry),
                    Err(e) => ModificatorStatus::failed(
                        entry,
                        format!("failed removing session subset from destination rule {}: {e}", entry.name),
                    ),
                },
                _ => ModificatorStatus::unsupported(entry),
            };
            results.push(status);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{context, destination_rule, NAMESPACE};
    use crate::model::version_sha;
    use ike_common::testing::MemoryClient;

    const SESSION: &str = "s";

    fn reference() -> Ref {
        Ref::new("ratings-v1", NAMESPACE, "prepared-image", BTreeMap::new())
    }

    fn created() -> String {
        format!("{}-{SESSION}", version_sha("v1"))
    }

    fn forward_store() -> LocatorStatusStore {
        let mut store = LocatorStatusStore::new();
        store.report(
            LocatorStatus::new("Deployment", NAMESPACE, "ratings-v1", StatusAction::Create)
                .with_label("version", "v1"),
        );
        store.report(LocatorStatus::new("Service", NAMESPACE, "ratings", StatusAction::Located));
        store
    }

    fn reverse_store() -> LocatorStatusStore {
        let mut store = LocatorStatusStore::new();
        store.report(
            LocatorStatus::new("Deployment", NAMESPACE, "ratings-v1-clone", StatusAction::Delete)
                .with_label("version", created()),
        );
        store
    }

    async fn locate(client: &MemoryClient, reference: &Ref, store: &mut LocatorStatusStore) -> Result<(), Error> {
        DestinationRuleLocator
            .locate(&context(client, SESSION), reference, store)
            .await
    }

    fn subsets(client: &MemoryClient) -> Vec<String> {
        let rule = client.object(KIND, NAMESPACE, "ratings").unwrap();
        let spec: DestinationRuleSpec = read_spec(&rule).unwrap();
        spec.subsets.into_iter().map(|s| s.name).collect()
    }

    #[test]
    fn session_subset_copies_the_base_traffic_policy() {
        let mut spec = DestinationRuleSpec {
            host: "ratings".to_string(),
            subsets: vec![Subset {
                name: "v1".to_string(),
                labels: BTreeMap::from([("version".to_string(), "v1".to_string())]),
                traffic_policy: Some(serde_json::json!({"tls": {"mode": "ISTIO_MUTUAL"}})),
                ..Default::default()
            }],
            ..Default::default()
        };

        assert!(add_session_subset(&mut spec, "v1", "abc-s"));
        assert!(!add_session_subset(&mut spec, "v1", "abc-s"));
        assert_eq!(spec.subsets.len(), 2);
        assert_eq!(spec.subsets[1].labels.get("version").map(String::as_str), Some("abc-s"));
        assert_eq!(spec.subsets[1].traffic_policy, spec.subsets[0].traffic_policy);
    }

    #[tokio::test]
    async fn locates_the_rule_with_the_base_subset() {
        let client = MemoryClient::new();
        client.apply(destination_rule("ratings", "ratings", &["v1", "v2"])).unwrap();
        client.apply(destination_rule("reviews", "reviews", &["v1"])).unwrap();
        let mut store = forward_store();

        locate(&client, &reference(), &mut store).await.unwrap();
        let found = store.query(&["DestinationRule"]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "ratings");
        assert_eq!(found[0].action, StatusAction::Modify);
    }

    #[tokio::test]
    async fn host_without_base_subset_is_a_locator_error() {
        let client = MemoryClient::new();
        client.apply(destination_rule("ratings", "ratings", &["v2"])).unwrap();
        let mut store = forward_store();

        let err = locate(&client, &reference(), &mut store).await.unwrap_err();
        assert!(err.to_string().contains("version v1"), "{err}");
    }

    #[tokio::test]
    async fn add_then_remove_leaves_the_rule_as_it_was() {
        let client = MemoryClient::new();
        let original = client
            .apply(destination_rule("ratings", "ratings", &["v1", "v2"]))
            .unwrap();
        let ctx = context(&client, SESSION);

        let mut store = forward_store();
        locate(&client, &reference(), &mut store).await.unwrap();
        let results = DestinationRuleModificator.modify(&ctx, &reference(), &store).await;
        assert!(results[0].success, "{:?}", results[0].error);
        assert_eq!(subsets(&client), vec!["v1".to_string(), "v2".to_string(), created()]);

        let undo = reference().into_deleted();
        let mut store = reverse_store();
        locate(&client, &undo, &mut store).await.unwrap();
        assert_eq!(store.query(&["DestinationRule"])[0].action, StatusAction::Revert);
        let results = DestinationRuleModificator.modify(&ctx, &undo, &store).await;
        assert!(results[0].success);

        let restored = client.object(KIND, NAMESPACE, "ratings").unwrap();
        assert_eq!(restored.data, original.data);
        assert_eq!(restored.metadata.labels, original.metadata.labels);
        assert_eq!(restored.metadata.annotations, original.metadata.annotations);
    }

    #[tokio::test]
    async fn revert_of_a_missing_rule_is_success() {
        let client = MemoryClient::new();
        let mut store = reverse_store();
        store.report(LocatorStatus::new(KIND.kind(), NAMESPACE, "gone", StatusAction::Revert));

        let results = DestinationRuleModificator
            .modify(&context(&client, SESSION), &reference().into_deleted(), &store)
            .await;
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn create_is_not_supported() {
        let client = MemoryClient::new();
        let mut store = LocatorStatusStore::new();
        store.report(LocatorStatus::new(KIND.kind(), NAMESPACE, "ratings", StatusAction::Create));

        let results = DestinationRuleModificator
            .modify(&context(&client, SESSION), &reference(), &store)
            .await;
        assert_eq!(
            results[0].error.as_deref(),
            Some("unknown action type for modificator: create")
        );
    }
}
