//! In-memory [`ResourceClient`] for tests
//!
//! Behaves like the API server where the engine depends on it:
//! `resourceVersion` is bumped on every write and checked on update, names
//! collide on create, label selectors filter lists, and Session status is a
//! separate subresource. A Session marked for deletion disappears once its
//! last finalizer is removed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::core::{Expression, Selector, SelectorExt, TypeMeta};
use serde_json::Value;

use crate::crd::Session;
use crate::kube_utils::{ResourceClient, ResourceKind};
use crate::Error;

type ObjectKey = (ResourceKind, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    sessions: BTreeMap<(String, String), Session>,
    revision: u64,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

/// Shared in-memory cluster
#[derive(Clone, Default)]
pub struct MemoryClient {
    state: Arc<Mutex<State>>,
}

fn parse_selector(selector: &str) -> Selector {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                Expression::NotEqual(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                Expression::Equal(k.trim().to_string(), v.trim().to_string())
            } else if let Some(k) = term.strip_prefix('!') {
                Expression::DoesNotExist(k.trim().to_string())
            } else {
                Expression::Exists(term.to_string())
            }
        })
        .collect()
}

fn name_of(obj: &DynamicObject) -> Result<String, Error> {
    obj.metadata
        .name
        .clone()
        .ok_or_else(|| Error::validation("object has no metadata.name"))
}

impl MemoryClient {
    /// Empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::internal_with_context("memory-client", "state lock poisoned"))
    }

    /// Seed an object from its JSON form; kind and namespace come from the object
    pub fn apply(&self, value: Value) -> Result<DynamicObject, Error> {
        let mut obj: DynamicObject = serde_json::from_value(value)?;
        let kind = obj
            .types
            .as_ref()
            .and_then(|t| ResourceKind::from_kind(&t.kind))
            .ok_or_else(|| Error::validation("seeded object has no supported kind"))?;
        let namespace = obj.metadata.namespace.clone().unwrap_or_default();
        let name = name_of(&obj)?;

        let mut state = self.lock()?;
        obj.metadata.resource_version = Some(state.next_revision());
        state
            .objects
            .insert((kind, namespace, name), obj.clone());
        Ok(obj)
    }

    /// Seed a Session
    pub fn apply_session(&self, mut session: Session) -> Result<Session, Error> {
        let namespace = session.metadata.namespace.clone().unwrap_or_default();
        let name = session.metadata.name.clone().unwrap_or_default();
        let mut state = self.lock()?;
        session.metadata.resource_version = Some(state.next_revision());
        state.sessions.insert((namespace, name), session.clone());
        Ok(session)
    }

    /// Current copy of an object
    pub fn object(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.lock().ok().and_then(|state| {
            state
                .objects
                .get(&(kind, namespace.to_string(), name.to_string()))
                .cloned()
        })
    }

    /// Current copy of an object as plain JSON
    pub fn object_json(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<Value> {
        self.object(kind, namespace, name)
            .and_then(|o| serde_json::to_value(o).ok())
    }

    /// Names of every object of `kind` in `namespace`
    pub fn names(&self, kind: ResourceKind, namespace: &str) -> Vec<String> {
        self.lock()
            .map(|state| {
                state
                    .objects
                    .keys()
                    .filter(|(k, ns, _)| *k == kind && ns == namespace)
                    .map(|(_, _, name)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current copy of a Session
    pub fn session(&self, namespace: &str, name: &str) -> Option<Session> {
        self.lock().ok().and_then(|state| {
            state
                .sessions
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        })
    }

    /// Mark a Session for deletion the way the API server does with finalizers
    pub fn delete_session(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut state = self.lock()?;
        let key = (namespace.to_string(), name.to_string());
        let session = state
            .sessions
            .get_mut(&key)
            .ok_or_else(|| Error::not_found("Session", name))?;
        if session.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty()) {
            session.metadata.deletion_timestamp = Some(
                k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
            );
        } else {
            state.sessions.remove(&key);
        }
        Ok(())
    }

    fn check_revision(current: Option<&String>, incoming: Option<&String>) -> bool {
        match incoming {
            Some(rv) if !rv.is_empty() => current == Some(rv),
            _ => true,
        }
    }
}

#[async_trait]
impl ResourceClient for MemoryClient {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.object(kind, namespace, name))
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        let selector = parse_selector(selector);
        let state = self.lock()?;
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, obj)| obj)
            .filter(|obj| {
                let labels = obj.metadata.labels.clone().unwrap_or_default();
                selector.matches(&labels)
            })
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = name_of(obj)?;
        let key = (kind, namespace.to_string(), name.clone());
        let mut state = self.lock()?;
        if state.objects.contains_key(&key) {
            return Err(Error::already_exists(kind.kind(), name));
        }

        let mut created = obj.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.resource_version = Some(state.next_revision());
        if created.types.is_none() {
            created.types = Some(TypeMeta {
                api_version: kind.api_version().to_string(),
                kind: kind.kind().to_string(),
            });
        }
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = name_of(obj)?;
        let key = (kind, namespace.to_string(), name.clone());
        let mut state = self.lock()?;
        let current = state
            .objects
            .get(&key)
            .ok_or_else(|| Error::not_found(kind.kind(), &name))?;
        if !Self::check_revision(
            current.metadata.resource_version.as_ref(),
            obj.metadata.resource_version.as_ref(),
        ) {
            return Err(Error::conflict(kind.kind(), name));
        }

        let mut updated = obj.clone();
        updated.metadata.resource_version = Some(state.next_revision());
        state.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), Error> {
        let key = (kind, namespace.to_string(), name.to_string());
        let mut state = self.lock()?;
        state
            .objects
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(kind.kind(), name))
    }

    async fn get_session(&self, namespace: &str, name: &str) -> Result<Option<Session>, Error> {
        Ok(self.session(namespace, name))
    }

    async fn update_session(&self, session: &Session) -> Result<Session, Error> {
        let namespace = session.metadata.namespace.clone().unwrap_or_default();
        let name = session.metadata.name.clone().unwrap_or_default();
        let key = (namespace, name.clone());
        let mut state = self.lock()?;
        let current = state
            .sessions
            .get(&key)
            .ok_or_else(|| Error::not_found("Session", &name))?;
        if !Self::check_revision(
            current.metadata.resource_version.as_ref(),
            session.metadata.resource_version.as_ref(),
        ) {
            return Err(Error::conflict("Session", name));
        }

        let mut updated = session.clone();
        updated.status = current.status.clone();
        updated.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        updated.metadata.resource_version = Some(state.next_revision());

        let released = updated.metadata.deletion_timestamp.is_some()
            && updated
                .metadata
                .finalizers
                .as_ref()
                .map_or(true, |f| f.is_empty());
        if released {
            state.sessions.remove(&key);
        } else {
            state.sessions.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn update_session_status(&self, session: &Session) -> Result<Session, Error> {
        let namespace = session.metadata.namespace.clone().unwrap_or_default();
        let name = session.metadata.name.clone().unwrap_or_default();
        let key = (namespace, name.clone());
        let mut state = self.lock()?;
        let revision = state.next_revision();
        let current = state
            .sessions
            .get_mut(&key)
            .ok_or_else(|| Error::not_found("Session", &name))?;
        if !Self::check_revision(
            current.metadata.resource_version.as_ref(),
            session.metadata.resource_version.as_ref(),
        ) {
            return Err(Error::conflict("Session", name));
        }

        current.status = session.status.clone();
        current.metadata.resource_version = Some(revision);
        Ok(current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(name: &str, labels: Value) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": "test", "labels": labels},
            "spec": {}
        })
    }

    #[tokio::test]
    async fn create_collides_on_name() {
        let client = MemoryClient::new();
        let obj = client.apply(deployment("a", json!({}))).unwrap();

        let err = client
            .create(ResourceKind::Deployment, "test", &obj)
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let client = MemoryClient::new();
        let stale = client.apply(deployment("a", json!({}))).unwrap();
        client
            .update(ResourceKind::Deployment, "test", &stale)
            .await
            .unwrap();

        let err = client
            .update(ResourceKind::Deployment, "test", &stale)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let client = MemoryClient::new();
        let err = client
            .delete(ResourceKind::Service, "test", "missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_filters_by_selector() {
        let client = MemoryClient::new();
        client
            .apply(deployment("a", json!({"app": "ratings", "marker": "x"})))
            .unwrap();
        client.apply(deployment("b", json!({"app": "reviews"}))).unwrap();

        let all = client.list(ResourceKind::Deployment, "test", "").await.unwrap();
        assert_eq!(all.len(), 2);

        let marked = client
            .list(ResourceKind::Deployment, "test", "marker")
            .await
            .unwrap();
        assert_eq!(marked.len(), 1);

        let reviews = client
            .list(ResourceKind::Deployment, "test", "app=reviews")
            .await
            .unwrap();
        assert_eq!(reviews[0].metadata.name.as_deref(), Some("b"));

        let other_ns = client.list(ResourceKind::Deployment, "prod", "").await.unwrap();
        assert!(other_ns.is_empty());
    }

    #[tokio::test]
    async fn session_with_finalizer_is_released_when_finalizer_is_removed() {
        let client = MemoryClient::new();
        let mut session = Session::new("s1", Default::default());
        session.metadata.namespace = Some("test".to_string());
        session.metadata.finalizers = Some(vec!["f".to_string()]);
        client.apply_session(session).unwrap();

        client.delete_session("test", "s1").unwrap();
        let mut current = client.session("test", "s1").unwrap();
        assert!(current.metadata.deletion_timestamp.is_some());

        current.metadata.finalizers = Some(vec![]);
        client.update_session(&current).await.unwrap();
        assert!(client.session("test", "s1").is_none());
    }

    #[tokio::test]
    async fn status_update_keeps_spec() {
        let client = MemoryClient::new();
        let mut session = Session::new("s1", Default::default());
        session.metadata.namespace = Some("test".to_string());
        let mut stored = client.apply_session(session).unwrap();

        stored.spec.refs.push(crate::crd::RefSpec {
            name: "ignored".to_string(),
            ..Default::default()
        });
        stored.status = Some(Default::default());
        let updated = client.update_session_status(&stored).await.unwrap();

        assert!(updated.status.is_some());
        assert!(updated.spec.refs.is_empty());
    }
}
