//! Session controller
//!
//! Drives one engine pass per ref and records the outcome in the Session's
//! status. A Session carries a finalizer for as long as anything it did may
//! still be in the cluster; deleting it reverts every known ref first.
//!
//! Status is only written when it changed, and the `processing` state is
//! only published when there is work to do. Every status write is itself a
//! watch event, so a steady Session must reach a fixed point.

mod conditions;

pub use conditions::{REASON_CONFIGURED, REASON_HANDLED};

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use ike_common::crd::{
    Condition, LabeledRefResource, RefResource, RefStatus, Session, SessionState, SessionStatus,
};
use ike_common::kube_utils::ResourceClient;
use ike_common::metrics::ReconcileTimer;
use ike_common::{Error, SESSION_FINALIZER};

use crate::engine::{Engine, SessionContext, SyncHandler};
use crate::model::{
    effective_route, route_expression, KindName, LocatorStatusStore, ModificatorStatus, Ref,
    StatusAction, WORKLOAD_KINDS,
};
use crate::validation;
use conditions::{
    known_refs, merge_resources, merge_targets, modification_condition, purge_ref, record_ref,
    recorded_index, resource_of, session_state, summarize, target_of, upsert,
};

/// Pause between reverting a changed ref and applying it again
pub const DEFAULT_REVERT_PAUSE: Duration = Duration::from_secs(2);
/// Requeue interval while some condition is failing
pub const REQUEUE_FAILED: Duration = Duration::from_secs(30);
/// Periodic resync of a healthy Session
pub const REQUEUE_RESYNC: Duration = Duration::from_secs(300);
/// Retry interval while a terminating Session cannot be fully reverted
pub const REQUEUE_TERMINATING: Duration = Duration::from_secs(1);

/// Controller context shared by every reconcile
pub struct Context {
    /// Cluster access
    pub client: Arc<dyn ResourceClient>,
    /// Locator and modificator registries
    pub engine: Engine,
    /// Wait after reverting a changed ref, letting proxies drop old routes
    pub revert_pause: Duration,
}

impl Context {
    /// Context with the default revert pause
    pub fn new(client: Arc<dyn ResourceClient>, engine: Engine) -> Self {
        Self {
            client,
            engine,
            revert_pause: DEFAULT_REVERT_PAUSE,
        }
    }

    /// Override the revert pause
    pub fn with_revert_pause(mut self, pause: Duration) -> Self {
        self.revert_pause = pause;
        self
    }
}

/// Reconcile a Session
#[instrument(skip(session, ctx), fields(session = %session.name_any()))]
pub async fn reconcile(session: Arc<Session>, ctx: Arc<Context>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start();
    let result = reconcile_session(&session, &ctx).await;
    if result.is_ok() {
        timer.success();
    } else {
        timer.error();
    }
    result
}

/// Requeue policy for failed reconciles
pub fn error_policy(session: Arc<Session>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        session = %session.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(REQUEUE_FAILED)
    } else {
        // only a spec change can fix it
        Action::await_change()
    }
}

async fn reconcile_session(session: &Session, ctx: &Context) -> Result<Action, Error> {
    let name = session.name_any();
    let namespace = session
        .namespace()
        .ok_or_else(|| Error::validation_for(&name, "session is not namespaced"))?;
    info!("reconciling session");

    // the cached copy may be stale; passes must see the latest status
    let Some(current) = ctx.client.get_session(&namespace, &name).await? else {
        debug!("session is gone");
        return Ok(Action::await_change());
    };

    let route = effective_route(&current);
    let mut status = current.status.clone().unwrap_or_default();
    status.route = Some(route.clone());
    status.route_expression = Some(route_expression(&route));
    if has_pending_work(&current) {
        status.state = Some(SessionState::Processing);
    }
    let current = write_status(ctx, current, status).await?;

    let session_ctx = SessionContext {
        name,
        namespace,
        route,
        client: ctx.client.clone(),
    };
    if current.metadata.deletion_timestamp.is_some() {
        return finalize(ctx, &session_ctx, current).await;
    }
    apply(ctx, &session_ctx, current).await
}

/// True when the last recorded status does not cover the current spec
fn has_pending_work(session: &Session) -> bool {
    let Some(status) = &session.status else {
        return true;
    };
    if session.metadata.deletion_timestamp.is_some() {
        return true;
    }
    let namespace = session.namespace().unwrap_or_default();
    let desired: Vec<Ref> = session
        .spec
        .refs
        .iter()
        .map(|r| Ref::from_spec(r, &namespace))
        .collect();

    let known = known_refs(status);
    let removed = known
        .iter()
        .any(|n| desired.iter().all(|r| r.kind_name != KindName::parse(n)));
    let changed_or_new = desired.iter().any(|r| {
        recorded_index(status, &r.kind_name).map_or(true, |i| ref_changed(&status.refs[i], r))
    });
    removed || changed_or_new
}

fn ref_changed(previous: &RefStatus, reference: &Ref) -> bool {
    match &previous.hash {
        Some(hash) => *hash != reference.hash(),
        None => previous.strategy != reference.strategy || previous.args != reference.args,
    }
}

fn has_finalizer(session: &Session) -> bool {
    session.finalizers().iter().any(|f| f == SESSION_FINALIZER)
}

/// Write `status` unless the Session already carries it
async fn write_status(ctx: &Context, mut session: Session, status: SessionStatus) -> Result<Session, Error> {
    if session.status.as_ref() == Some(&status) {
        return Ok(session);
    }
    session.status = Some(status);
    ctx.client.update_session_status(&session).await
}

/// The ref as last applied, or a bare ref when only conditions remember it
fn recorded_ref(status: &SessionStatus, name: &str, namespace: &str) -> Ref {
    match recorded_index(status, &KindName::parse(name)) {
        Some(index) => Ref::from_status(&status.refs[index], namespace),
        None => Ref::new(name, namespace, "", Default::default()),
    }
}

async fn finalize(ctx: &Context, session_ctx: &SessionContext, session: Session) -> Result<Action, Error> {
    if !has_finalizer(&session) {
        return Ok(Action::await_change());
    }
    info!("session is terminating, reverting refs");

    let mut status = session.status.clone().unwrap_or_default();
    for name in known_refs(&status) {
        let reference = recorded_ref(&status, &name, &session_ctx.namespace).into_deleted();
        run_pass(ctx, session_ctx, &mut status, reference).await;
    }
    summarize(&mut status);
    let state = session_state(&status.conditions);
    status.state = Some(state);
    let mut session = write_status(ctx, session, status).await?;

    if state == SessionState::Failed {
        warn!("session could not be fully reverted, retrying");
        return Ok(Action::requeue(REQUEUE_TERMINATING));
    }

    if let Some(finalizers) = session.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != SESSION_FINALIZER);
    }
    ctx.client.update_session(&session).await?;
    info!("session released");
    Ok(Action::await_change())
}

async fn apply(ctx: &Context, session_ctx: &SessionContext, mut session: Session) -> Result<Action, Error> {
    if !has_finalizer(&session) {
        session
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(SESSION_FINALIZER.to_string());
        session = ctx.client.update_session(&session).await?;
        debug!("added finalizer");
    }

    let mut status = session.status.clone().unwrap_or_default();
    let desired: Vec<Ref> = session
        .spec
        .refs
        .iter()
        .map(|r| Ref::from_spec(r, &session_ctx.namespace))
        .collect();

    for name in known_refs(&status) {
        let kind_name = KindName::parse(&name);
        if desired.iter().all(|r| r.kind_name != kind_name) {
            info!(reference = %kind_name, "ref removed from session");
            let reference = recorded_ref(&status, &name, &session_ctx.namespace).into_deleted();
            run_pass(ctx, session_ctx, &mut status, reference).await;
        }
    }

    for reference in desired {
        let previous = recorded_index(&status, &reference.kind_name).map(|i| status.refs[i].clone());
        if let Some(previous) = previous.filter(|p| ref_changed(p, &reference)) {
            info!(reference = %reference.kind_name, "ref changed, reverting previous application");
            let undo = Ref::from_status(&previous, &session_ctx.namespace).into_deleted();
            run_pass(ctx, session_ctx, &mut status, undo).await;
            tokio::time::sleep(ctx.revert_pause).await;
        }
        run_pass(ctx, session_ctx, &mut status, reference).await;
    }

    summarize(&mut status);
    let state = session_state(&status.conditions);
    status.state = Some(state);
    write_status(ctx, session, status).await?;

    match state {
        SessionState::Failed => Ok(Action::requeue(REQUEUE_FAILED)),
        _ => Ok(Action::requeue(REQUEUE_RESYNC)),
    }
}

/// Collects what one pass did into the Session status
struct PassRecorder<'a> {
    session: &'a str,
    reference: &'a Ref,
    ref_key: String,
    conditions: &'a mut Vec<Condition>,
    targets: Vec<LabeledRefResource>,
    resources: Vec<RefResource>,
    failures: usize,
}

impl SyncHandler for PassRecorder<'_> {
    fn validate(&mut self, store: &LocatorStatusStore) -> bool {
        if self.reference.deleted {
            return true;
        }
        let (passed, conditions) = validation::validate(self.session, self.reference, store);
        for condition in conditions {
            upsert(self.conditions, condition);
        }
        passed
    }

    fn located(&mut self, store: &LocatorStatusStore) {
        self.targets = store
            .query(&WORKLOAD_KINDS)
            .into_iter()
            .filter(|e| e.action == StatusAction::Located)
            .map(|e| target_of(&e.kind, &e.name, &e.labels))
            .collect();
    }

    fn modified(&mut self, status: ModificatorStatus) {
        upsert(self.conditions, modification_condition(&self.ref_key, &status));
        if status.success {
            self.resources.push(resource_of(&status));
        } else {
            self.failures += 1;
        }
    }
}

/// Run one pass and fold its outcome into `status`
///
/// A clean reverse pass forgets the ref entirely. A forward pass that got
/// past validation records what it did, keyed by the ref's kind and name.
async fn run_pass(ctx: &Context, session_ctx: &SessionContext, status: &mut SessionStatus, reference: Ref) {
    let ref_key = reference.kind_name.to_string();
    let previous = recorded_index(status, &reference.kind_name).map(|i| status.refs[i].clone());

    let mut recorder = PassRecorder {
        session: &session_ctx.name,
        reference: &reference,
        ref_key: ref_key.clone(),
        conditions: &mut status.conditions,
        targets: Vec::new(),
        resources: Vec::new(),
        failures: 0,
    };
    let applied = ctx.engine.sync(session_ctx, &reference, &mut recorder).await;
    let PassRecorder {
        targets,
        resources,
        failures,
        ..
    } = recorder;

    if reference.deleted {
        if failures == 0 {
            purge_ref(&mut status.conditions, &ref_key);
            if let Some(index) = recorded_index(status, &reference.kind_name) {
                status.refs.remove(index);
            }
            debug!(reference = %ref_key, "ref reverted");
        } else {
            warn!(reference = %ref_key, failures, "ref only partially reverted");
        }
        return;
    }
    if !applied {
        return;
    }

    let (previous_targets, previous_resources) = previous
        .map(|p| (p.targets, p.resources))
        .unwrap_or_default();
    let entry = RefStatus {
        name: reference.name.clone(),
        strategy: reference.strategy.clone(),
        args: reference.args.clone(),
        hash: Some(reference.hash()),
        targets: merge_targets(&previous_targets, targets),
        resources: merge_resources(&previous_resources, resources),
    };
    record_ref(status, &reference.kind_name, entry);
}
