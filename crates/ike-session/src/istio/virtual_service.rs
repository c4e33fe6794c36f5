//! Routing rules: splice session routes into VirtualServices
//!
//! A VirtualService routing to a target host gets a copy of each matching
//! route prepended, pointing at the session's subset and guarded by the
//! session's route header. Gateway-bound VirtualServices are cloned instead
//! so the session gets its own `session.<host>` entry point.

use async_trait::async_trait;
use kube::api::DynamicObject;
use tracing::{debug, info};

use ike_common::crd::Route;
use ike_common::kube_utils::ResourceKind;
use ike_common::Error;

use super::{
    read_spec, report_marked, status_of, update_if_changed, write_spec, HeaderOperations, Headers,
    HttpMatchRequest, HttpRoute, StringMatch, VirtualServiceSpec, LABEL_HOST, LABEL_IKE_HOSTS,
    LABEL_IKE_MUTATED, LABEL_IKE_MUTATED_VALUE,
};
use crate::engine::{Locator, Modificator, SessionContext};
use crate::model::{
    created_version, deleted_version, target_host_names, version, HostName, LocatorStatus,
    LocatorStatusStore, ModificatorStatus, Ref, StatusAction, GATEWAY_KIND, ROUTE_TYPE_HEADER,
};

const KIND: ResourceKind = ResourceKind::VirtualService;

fn is_mutated(obj: &DynamicObject) -> bool {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_IKE_MUTATED))
        .is_some_and(|v| v == LABEL_IKE_MUTATED_VALUE)
}

fn routes_to(route: &HttpRoute, host: &HostName, subset: impl Fn(&str) -> bool) -> bool {
    route.route.iter().any(|r| {
        r.destination
            .as_ref()
            .is_some_and(|d| host.matches(&d.host) && subset(&d.subset))
    })
}

/// A destination for `host` with no subset or the workload's version
fn mutation_required(spec: &VirtualServiceSpec, host: &HostName, version: &str) -> bool {
    spec.http
        .iter()
        .any(|h| routes_to(h, host, |s| s.is_empty() || s == version))
}

fn already_mutated(spec: &VirtualServiceSpec, host: &HostName, created: &str) -> bool {
    spec.http.iter().any(|h| routes_to(h, host, |s| s == created))
}

fn find_routes(spec: &VirtualServiceSpec, host: &HostName, version: &str) -> Vec<HttpRoute> {
    spec.http
        .iter()
        .filter(|h| routes_to(h, host, |s| s.is_empty() || s == version))
        .cloned()
        .collect()
}

/// Copy of `route` sending only the target's traffic to the session subset
fn session_route(mut route: HttpRoute, host: &HostName, version: &str, created: &str) -> HttpRoute {
    route.route.retain(|r| {
        r.destination
            .as_ref()
            .is_some_and(|d| host.matches(&d.host) && (d.subset.is_empty() || d.subset == version))
    });
    for destination in &mut route.route {
        if let Some(d) = destination.destination.as_mut() {
            d.subset = created.to_string();
        }
        destination.weight = None;
    }
    route.mirror = None;
    route.redirect = None;
    route
}

fn add_header_match(route: &mut HttpRoute, session_route: &Route) {
    if session_route.type_ != ROUTE_TYPE_HEADER {
        return;
    }
    if route.match_.is_empty() {
        route.match_.push(HttpMatchRequest::default());
    }
    for clause in &mut route.match_ {
        clause
            .headers
            .insert(session_route.name.clone(), StringMatch::exact(&session_route.value));
    }
}

fn add_header_request(route: &mut HttpRoute, session_route: &Route) {
    route
        .headers
        .get_or_insert_with(Headers::default)
        .request
        .get_or_insert_with(HeaderOperations::default)
        .add
        .insert(session_route.name.clone(), session_route.value.clone());
}

/// `session.<host>` for every host the bound gateways expose to the session
fn gateway_hosts(session: &str, store: &LocatorStatusStore, gateways: &[String]) -> Vec<String> {
    let located = store.query(&[GATEWAY_KIND]);
    gateways
        .iter()
        .flat_map(|gateway| {
            located
                .iter()
                .filter(move |g| g.namespaced_name() == *gateway || g.name == *gateway)
        })
        .flat_map(|g| g.label(LABEL_IKE_HOSTS).split(','))
        .filter(|h| !h.is_empty())
        .map(|h| format!("{session}.{h}"))
        .collect()
}

/// Finds routing rules for the target hosts
pub struct VirtualServiceLocator;

#[async_trait]
impl Locator for VirtualServiceLocator {
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

        let all = ctx.client.list(KIND, &ctx.namespace, "").await?;
        let target_version = version(store);
        let hosts = target_host_names(store);
        let mut found = Vec::new();
        for host in &hosts {
            for obj in &all {
                // session clones already carry their session's routes
                if is_mutated(obj) {
                    continue;
                }
                let spec: VirtualServiceSpec = read_spec(obj)?;
                if !spec.gateways.is_empty() {
                    found.push(
                        status_of(KIND, obj, StatusAction::Create).with_label(LABEL_HOST, host.to_string()),
                    );
                }
                if mutation_required(&spec, host, &target_version) {
                    found.push(
                        status_of(KIND, obj, StatusAction::Modify).with_label(LABEL_HOST, host.to_string()),
                    );
                }
            }
        }
        for status in found {
            store.report(status);
        }
        Ok(())
    }
}

/// Splices, clones and reverts routing rules
pub struct VirtualServiceModificator;

impl VirtualServiceModificator {
    async fn load(
        &self,
        ctx: &SessionContext,
        entry: &LocatorStatus,
    ) -> Result<Option<DynamicObject>, String> {
        ctx.client
            .get(KIND, &entry.namespace, &entry.name)
            .await
            .map_err(|e| format!("failed finding virtual service {}: {e}", entry.namespaced_name()))
    }

    async fn create(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &LocatorStatusStore,
        entry: &LocatorStatus,
    ) -> ModificatorStatus {
        let source = match self.load(ctx, entry).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                return ModificatorStatus::failed(
                    entry,
                    format!("failed finding virtual service {}: not found", entry.namespaced_name()),
                )
            }
            Err(e) => return ModificatorStatus::failed(entry, e),
        };
        let clone = match self.session_clone(ctx, reference, store, entry, source) {
            Ok(clone) => clone,
            Err(e) => return ModificatorStatus::failed(entry, e),
        };
        let name = clone.metadata.name.clone().unwrap_or_default();

        match ctx.client.create(KIND, &ctx.namespace, &clone).await {
            Ok(_) => info!(name = %name, "created session virtual service"),
            Err(e) if e.is_already_exists() => debug!(name = %name, "session virtual service exists"),
            Err(e) => {
                return ModificatorStatus::failed(
                    entry,
                    format!("failed creating virtual service {name}: {e}"),
                )
            }
        }
        ModificatorStatus::ok(entry).with_target(KIND.kind(), &ctx.namespace, name)
    }

    fn session_clone(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &LocatorStatusStore,
        entry: &LocatorStatus,
        source: DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let host = HostName::parse(entry.label(LABEL_HOST));
        let target_version = version(store);
        let created = created_version(store, &ctx.name);

        let mut spec: VirtualServiceSpec = read_spec(&source)?;
        let routes = find_routes(&spec, &host, &target_version);
        spec.hosts = gateway_hosts(&ctx.name, store, &spec.gateways);
        for route in routes {
            spec.http
                .insert(0, session_route(route, &host, &target_version, &created));
        }
        for route in &mut spec.http {
            add_header_request(route, &ctx.route);
        }

        let mut clone = source;
        let name = format!("{}-{}", clone.metadata.name.clone().unwrap_or_default(), ctx.name);
        clone.metadata.name = Some(name);
        clone.metadata.resource_version = None;
        clone.metadata.uid = None;
        clone.metadata.creation_timestamp = None;
        clone.metadata.managed_fields = None;
        clone
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(LABEL_IKE_MUTATED.to_string(), LABEL_IKE_MUTATED_VALUE.to_string());
        ctx.stamp(&mut clone.metadata, reference, StatusAction::Create);
        write_spec(&mut clone, &spec)?;
        Ok(clone)
    }

    async fn delete(&self, ctx: &SessionContext, entry: &LocatorStatus) -> ModificatorStatus {
        match ctx.client.delete(KIND, &entry.namespace, &entry.name).await {
            Ok(()) => ModificatorStatus::ok(entry),
            Err(e) if e.is_not_found() => ModificatorStatus::ok(entry),
            Err(e) => ModificatorStatus::failed(
                entry,
                format!("failed deleting virtual service {}: {e}", entry.name),
            ),
        }
    }

    async fn splice(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &LocatorStatusStore,
        entry: &LocatorStatus,
    ) -> ModificatorStatus {
        let obj = match self.load(ctx, entry).await {
            Ok(Some(obj)) => obj,
            Ok(None) => {
                return ModificatorStatus::failed(
                    entry,
                    format!("failed finding virtual service {}: not found", entry.namespaced_name()),
                )
            }
            Err(e) => return ModificatorStatus::failed(entry, e),
        };
        let host = HostName::parse(entry.label(LABEL_HOST));
        let created = created_version(store, &ctx.name);

        let result = async {
            let mut spec: VirtualServiceSpec = read_spec(&obj)?;
            if already_mutated(&spec, &host, &created) {
                return Ok(());
            }
            let target_version = version(store);
            let routes = find_routes(&spec, &host, &target_version);
            if routes.is_empty() {
                return Err(Error::validation_for(&ctx.name, "route not found"));
            }
            for route in routes {
                let mut route = session_route(route, &host, &target_version, &created);
                add_header_match(&mut route, &ctx.route);
                spec.http.insert(0, route);
            }

            let mut mutated = obj.clone();
            ctx.stamp(&mut mutated.metadata, reference, StatusAction::Modify);
            write_spec(&mut mutated, &spec)?;
            update_if_changed(ctx, KIND, &obj, &mutated).await?;
            info!(name = %entry.name, host = %host, "spliced session route");
            Ok::<_, Error>(())
        }
        .await;

        match result {
            Ok(()) => ModificatorStatus::ok(entry),
            Err(e) => ModificatorStatus::failed(
                entry,
                format!("failed mutating virtual service {} for host {host}: {e}", entry.name),
            ),
        }
    }

    async fn revert(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &LocatorStatusStore,
        entry: &LocatorStatus,
    ) -> ModificatorStatus {
        let obj = match self.load(ctx, entry).await {
            Ok(Some(obj)) => obj,
            Ok(None) => return ModificatorStatus::ok(entry),
            Err(e) => return ModificatorStatus::failed(entry, e),
        };
        let deleted = deleted_version(store, &ctx.name);

        let result = async {
            let mut spec: VirtualServiceSpec = read_spec(&obj)?;
            if !deleted.is_empty() {
                spec.http.retain(|h| {
                    !h.route.iter().any(|r| {
                        r.destination
                            .as_ref()
                            .is_some_and(|d| d.subset.contains(deleted.as_str()))
                    })
                });
            }
            let mut reverted = obj.clone();
            ctx.unstamp(&mut reverted.metadata, reference);
            write_spec(&mut reverted, &spec)?;
            update_if_changed(ctx, KIND, &obj, &reverted).await
        }
        .await;

        match result {
            Ok(_) => ModificatorStatus::ok(entry),
            Err(e) if e.is_not_found() => ModificatorStatus::ok(entry),
            Err(e) => ModificatorStatus::failed(
                entry,
                format!("failed reverting virtual service {}: {e}", entry.name),
            ),
        }
    }
}

#[async_trait]
impl Modificator for VirtualServiceModificator {
    async fn modify(
        &self,
        ctx: &SessionContext,
        reference: &Ref,
        store: &LocatorStatusStore,
    ) -> Vec<ModificatorStatus> {
        let mut results = Vec::new();
        for entry in store.query(&[KIND.kind()]) {
            let status = match entry.action {
                StatusAction::Create => self.create(ctx, reference, store, entry).await,
                StatusAction::Delete => self.delete(ctx, entry).await,
                StatusAction::Modify => self.splice(ctx, reference, store, entry).await,
                StatusAction::Revert => self.revert(ctx, reference, store, entry).await,
                StatusAction::Located => ModificatorStatus::unsupported(entry),
            };
            results.push(status);
        }
        results
    }
}
