//! Gateway host exposure
//!
//! A session reachable through an ingress gateway gets its own host per
//! gateway server host: `session.<host>`. The gateway's `ike.hosts`
//! annotation records every session host added so far, so several sessions
//! can share one gateway and each revert removes only its own hosts.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::info;

use ike_common::kube_utils::ResourceKind;
use ike_common::Error;

use super::{
    read_spec, report_marked, update_if_changed, write_spec, GatewaySpec, VirtualServiceSpec,
    LABEL_IKE_HOSTS,
};
use crate::engine::{Locator, Modificator, SessionContext};
use crate::model::{LocatorStatus, LocatorStatusStore, ModificatorStatus, Ref, StatusAction};

const KIND: ResourceKind = ResourceKind::Gateway;

fn split_hosts(value: Option<&String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn write_hosts(annotations: &mut BTreeMap<String, String>, hosts: &[String]) {
    if hosts.is_empty() {
        annotations.remove(LABEL_IKE_HOSTS);
    } else {
        annotations.insert(LABEL_IKE_HOSTS.to_string(), hosts.join(","));
    }
}

/// Expose `session.<host>` for every server host; returns the hosts added
pub(crate) fn expose_session_hosts(
    session: &str,
    spec: &mut GatewaySpec,
    annotations: &mut BTreeMap<String, String>,
) -> Vec<String> {
    let mut existing = split_hosts(annotations.get(LABEL_IKE_HOSTS));
    let mut added = Vec::new();
    for server in &mut spec.servers {
        let hosts = server.hosts.clone();
        for host in hosts {
            let session_host = format!("{session}.{host}");
            if existing.contains(&host) || existing.contains(&session_host) {
                continue;
            }
            server.hosts.push(session_host.clone());
            existing.push(session_host.clone());
            added.push(session_host);
        }
    }
    write_hosts(annotations, &existing);
    added
}

/// Remove the hosts [`expose_session_hosts`] added for `session`
pub(crate) fn withdraw_session_hosts(
    session: &str,
    spec: &mut GatewaySpec,
    annotations: &mut BTreeMap<String, String>,
) {
    let prefix = format!("{session}.");
    let mut existing = split_hosts(annotations.get(LABEL_IKE_HOSTS));
    let owned: Vec<String> = existing
        .iter()
        .filter(|h| h.starts_with(&prefix))
        .filter(|h| spec.servers.iter().any(|s| s.hosts.contains(h)))
        .cloned()
        .collect();
    for server in &mut spec.servers {
        server.hosts.retain(|h| !owned.contains(h));
    }
    existing.retain(|h| !owned.contains(h));
    write_hosts(annotations, &existing);
}

/// Finds the gateways routing rules are bound to
pub struct VirtualServiceGatewayLocator;

#[async_trait]
impl Locator for VirtualServiceGatewayLocator {
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

        let mut errors = Vec::new();
        let routing_rules = ctx
            .client
            .list(ResourceKind::VirtualService, &ctx.namespace, "")
            .await?;
        for rule in &routing_rules {
            let spec: VirtualServiceSpec = read_spec(rule)?;
            let rule_namespace = rule.metadata.namespace.clone().unwrap_or_default();
            for gateway in &spec.gateways {
                let (namespace, name) = gateway
                    .split_once('/')
                    .unwrap_or((rule_namespace.as_str(), gateway.as_str()));
                let found = match ctx.client.get(KIND, namespace, name).await {
                    Ok(Some(found)) => found,
                    Ok(None) => {
                        errors.push(format!("gateway {namespace}/{name} not found"));
                        continue;
                    }
                    Err(e) => {
                        errors.push(e.to_string());
                        continue;
                    }
                };
                let existing = split_hosts(
                    found
                        .metadata
                        .annotations
                        .as_ref()
                        .and_then(|a| a.get(LABEL_IKE_HOSTS)),
                );
                let gateway_spec: GatewaySpec = read_spec(&found)?;
                let new_hosts: Vec<String> = gateway_spec
                    .servers
                    .iter()
                    .flat_map(|s| s.hosts.iter())
                    .filter(|h| !existing.contains(h))
                    .cloned()
                    .collect();
                store.report(
                    LocatorStatus::new(KIND.kind(), namespace, name, StatusAction::Modify)
                        .with_label(LABEL_IKE_HOSTS, new_hosts.join(",")),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::internal_with_context(
                "gateway",
                format!(
                    "failed locating gateways bound to virtual services for {}: {}",
                    reference.kind_name,
                    errors.join("; ")
                ),
            ))
        }
    }
}

/// Adds and removes session hosts on gateways
pub struct GatewayModificator;

impl GatewayModificator {
    async fn expose(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        entry: &LocatorStatus,
    ) -> Result<Vec<String>, Error> {
        let Some(gateway) = ctx.client.get(KIND, &entry.namespace, &entry.name).await? else {
            return Err(Error::not_found(KIND.kind(), &entry.name));
        };
        let mut spec: GatewaySpec = read_spec(&gateway)?;
        let mut mutated = gateway.clone();
        let annotations = mutated.metadata.annotations.get_or_insert_with(BTreeMap::new);
        let added = expose_session_hosts(&ctx.name, &mut spec, annotations);
        if annotations.is_empty() {
            mutated.metadata.annotations = None;
        }
        ctx.stamp(&mut mutated.metadata, reference, StatusAction::Modify);
        write_spec(&mut mutated, &spec)?;
        update_if_changed(ctx, KIND, &gateway, &mutated).await?;
        Ok(added)
    }

    async fn withdraw(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        entry: &LocatorStatus,
    ) -> Result<(), Error> {
        let Some(gateway) = ctx.client.get(KIND, &entry.namespace, &entry.name).await? else {
            return Ok(());
        };
        let mut spec: GatewaySpec = read_spec(&gateway)?;
        let mut reverted = gateway.clone();
        let annotations = reverted.metadata.annotations.get_or_insert_with(BTreeMap::new);
        withdraw_session_hosts(&ctx.name, &mut spec, annotations);
        if annotations.is_empty() {
            reverted.metadata.annotations = None;
        }
        ctx.unstamp(&mut reverted.metadata, reference);
        write_spec(&mut reverted, &spec)?;
        update_if_changed(ctx, KIND, &gateway, &reverted).await?;
        Ok(())
    }
}

#[async_trait]
impl Modificator for GatewayModificator {
    async fn modify(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &LocatorStatusStore,
    ) -> Vec<ModificatorStatus> {
        let mut results = Vec::new();
        for entry in store.query(&[KIND.kind()]) {
            let status = match entry.action {
                StatusAction::Modify => match self.expose(ctx, reference, entry).await {
                    Ok(added) if added.is_empty() => ModificatorStatus::ok(entry),
                    Ok(added) => {
                        info!(gateway = %entry.name, hosts = %added.join(","), "exposed session hosts");
                        ModificatorStatus::ok(entry).with_prop("hosts", added.join(","))
                    }
                    Err(e) => ModificatorStatus::failed(
                        entry,
                        format!("failed exposing session hosts on gateway {}: {e}", entry.name),
                    ),
                },
                StatusAction::Revert => match self.withdraw(ctx, reference, entry).await {
                    Ok(()) => ModificatorStatus::ok(entry),
                    Err(e) if e.is_not_found() => ModificatorStatus::ok(entry),
                    Err(e) => ModificatorStatus::failed(
                        entry,
                        format!("failed removing session hosts from gateway {}: {e}", entry.name),
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
    use crate::fixtures::{context, gateway, gateway_virtual_service, NAMESPACE};
    use crate::istio::Server;
    use ike_common::testing::MemoryClient;

    fn spec(hosts: &[&str]) -> GatewaySpec {
        GatewaySpec {
            servers: vec![Server {
                hosts: hosts.iter().map(|h| h.to_string()).collect(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    mod host_exposure {
        use super::*;

        #[test]
        fn single_session_adds_its_host() {
            let mut gw = spec(&["domain.com"]);
            let mut annotations = BTreeMap::new();

            let added = expose_session_hosts("gw-test", &mut gw, &mut annotations);
            assert_eq!(added, vec!["gw-test.domain.com"]);
            assert_eq!(gw.servers[0].hosts, vec!["domain.com", "gw-test.domain.com"]);
            assert_eq!(annotations.get(LABEL_IKE_HOSTS).map(String::as_str), Some("gw-test.domain.com"));
        }

        #[test]
        fn sessions_share_a_gateway() {
            let mut gw = spec(&["domain.com"]);
            let mut annotations = BTreeMap::new();

            expose_session_hosts("gw-test", &mut gw, &mut annotations);
            let added = expose_session_hosts("gw-test2", &mut gw, &mut annotations);

            assert_eq!(added, vec!["gw-test2.domain.com"]);
            assert_eq!(
                gw.servers[0].hosts,
                vec!["domain.com", "gw-test.domain.com", "gw-test2.domain.com"]
            );
        }

        #[test]
        fn repeated_exposure_is_idempotent() {
            let mut gw = spec(&["domain.com"]);
            let mut annotations = BTreeMap::new();

            expose_session_hosts("gw-test", &mut gw, &mut annotations);
            let added = expose_session_hosts("gw-test", &mut gw, &mut annotations);

            assert!(added.is_empty());
            assert_eq!(gw.servers[0].hosts.len(), 2);
        }

        #[test]
        fn withdrawal_only_touches_the_session() {
            let mut gw = spec(&["domain.com", "gw-test.domain.com", "gw-test2.domain.com"]);
            let mut annotations = BTreeMap::from([(
                LABEL_IKE_HOSTS.to_string(),
                "gw-test.domain.com,gw-test2.domain.com".to_string(),
            )]);

            withdraw_session_hosts("gw-test", &mut gw, &mut annotations);
            assert_eq!(gw.servers[0].hosts, vec!["domain.com", "gw-test2.domain.com"]);

            withdraw_session_hosts("gw-test2", &mut gw, &mut annotations);
            assert_eq!(gw.servers[0].hosts, vec!["domain.com"]);
            assert!(!annotations.contains_key(LABEL_IKE_HOSTS));

            withdraw_session_hosts("gw-test2", &mut gw, &mut annotations);
            assert_eq!(gw.servers[0].hosts, vec!["domain.com"]);
        }
    }

    mod against_cluster {
        use super::*;

        fn reference() -> Ref {
            Ref::new("ratings-v1", NAMESPACE, "prepared-image", BTreeMap::new())
        }

        async fn locate(client: &MemoryClient, session: &str, reference: &Ref) -> LocatorStatusStore {
            let mut store = LocatorStatusStore::new();
            VirtualServiceGatewayLocator
                .locate(&context(client, session), reference, &mut store)
                .await
                .unwrap();
            store
        }

        fn seeded() -> MemoryClient {
            let client = MemoryClient::new();
            client.apply(gateway("bookinfo-gateway", &["domain.com"])).unwrap();
            client
                .apply(gateway_virtual_service("bookinfo", "bookinfo-gateway", "productpage", "v1"))
                .unwrap();
            client
        }

        #[tokio::test]
        async fn bound_gateway_is_reported_with_new_hosts() {
            let client = seeded();
            let store = locate(&client, "s", &reference()).await;

            let found = store.query(&["Gateway"]);
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].name, "bookinfo-gateway");
            assert_eq!(found[0].action, StatusAction::Modify);
            assert_eq!(found[0].label(LABEL_IKE_HOSTS), "domain.com");
        }

        #[tokio::test]
        async fn missing_gateway_is_a_locator_error() {
            let client = MemoryClient::new();
            client
                .apply(gateway_virtual_service("bookinfo", "other/missing", "productpage", "v1"))
                .unwrap();
            let mut store = LocatorStatusStore::new();

            let err = VirtualServiceGatewayLocator
                .locate(&context(&client, "s"), &reference(), &mut store)
                .await
                .unwrap_err();
            assert!(err.to_string().contains("other/missing"), "{err}");
        }

        #[tokio::test]
        async fn expose_then_withdraw_restores_the_gateway() {
            let client = seeded();
            let original = client
                .object(KIND, NAMESPACE, "bookinfo-gateway")
                .unwrap();
            let ctx = context(&client, "s");

            let store = locate(&client, "s", &reference()).await;
            let results = GatewayModificator.modify(&ctx, &reference(), &store).await;
            assert_eq!(results[0].prop.get("hosts").map(String::as_str), Some("s.domain.com"));

            let exposed = client.object(KIND, NAMESPACE, "bookinfo-gateway").unwrap();
            let spec: GatewaySpec = read_spec(&exposed).unwrap();
            assert_eq!(spec.servers[0].hosts, vec!["domain.com", "s.domain.com"]);

            let undo = reference().into_deleted();
            let store = locate(&client, "s", &undo).await;
            assert_eq!(store.query(&["Gateway"])[0].action, StatusAction::Revert);
            let results = GatewayModificator.modify(&ctx, &undo, &store).await;
            assert!(results[0].success);

            let restored = client.object(KIND, NAMESPACE, "bookinfo-gateway").unwrap();
            assert_eq!(restored.data, original.data);
            assert_eq!(restored.metadata.annotations, original.metadata.annotations);
            assert_eq!(restored.metadata.labels, original.metadata.labels);
        }

        #[tokio::test]
        async fn second_pass_leaves_the_gateway_untouched() {
            let client = seeded();
            let ctx = context(&client, "s");

            let store = locate(&client, "s", &reference()).await;
            GatewayModificator.modify(&ctx, &reference(), &store).await;
            let once = client.object(KIND, NAMESPACE, "bookinfo-gateway").unwrap();

            let store = locate(&client, "s", &reference()).await;
            let results = GatewayModificator.modify(&ctx, &reference(), &store).await;
            let twice = client.object(KIND, NAMESPACE, "bookinfo-gateway").unwrap();

            assert!(results[0].success);
            assert!(results[0].prop.is_empty());
            assert_eq!(once.metadata.resource_version, twice.metadata.resource_version);
        }
    }
}
