//! Kubernetes access for the session engine
//!
//! Everything the engine touches goes through [`ResourceClient`]: namespaced
//! CRUD over the handful of kinds a session edits, plus Session reads and
//! writes. The kube-rs implementation maps API status codes onto the
//! structured [`Error`] variants so callers can treat not-found and
//! conflicts as outcomes rather than transport failures.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, trace};

use crate::crd::Session;
use crate::Error;

/// Default connect timeout for API server connections
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for API server requests
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Kinds
// =============================================================================

/// Object kinds a session reads or edits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// apps/v1 Deployment
    Deployment,
    /// OpenShift DeploymentConfig
    DeploymentConfig,
    /// core/v1 Service
    Service,
    /// Istio Gateway
    Gateway,
    /// Istio VirtualService
    VirtualService,
    /// Istio DestinationRule
    DestinationRule,
}

impl ResourceKind {
    /// Every kind, in a stable order
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Deployment,
        ResourceKind::DeploymentConfig,
        ResourceKind::Service,
        ResourceKind::Gateway,
        ResourceKind::VirtualService,
        ResourceKind::DestinationRule,
    ];

    /// Full API version of the kind
    pub fn api_version(self) -> &'static str {
        match self {
            Self::Deployment => "apps/v1",
            Self::DeploymentConfig => "apps.openshift.io/v1",
            Self::Service => "v1",
            Self::Gateway | Self::VirtualService | Self::DestinationRule => {
                "networking.istio.io/v1alpha3"
            }
        }
    }

    /// Kind name as it appears on objects
    pub fn kind(self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::DeploymentConfig => "DeploymentConfig",
            Self::Service => "Service",
            Self::Gateway => "Gateway",
            Self::VirtualService => "VirtualService",
            Self::DestinationRule => "DestinationRule",
        }
    }

    /// Parse a kind name case-insensitively
    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.kind().eq_ignore_ascii_case(kind))
    }

    /// Build the dynamic ApiResource for this kind
    pub fn api_resource(self) -> ApiResource {
        build_api_resource(self.api_version(), self.kind())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Build an ApiResource from an apiVersion string and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into group and version
///
/// ```
/// use ike_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Truncated SHA-256 of `input` as 8 hex chars
///
/// Uses SHA-256 rather than `DefaultHasher` because the value is persisted
/// in labels and status and must stay stable across toolchains.
pub fn short_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..4]
        .iter()
        .fold(String::with_capacity(8), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

fn map_api_error(err: kube::Error, kind: ResourceKind, name: &str) -> Error {
    match &err {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(kind.kind(), name),
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            Error::already_exists(kind.kind(), name)
        }
        kube::Error::Api(ae) if ae.code == 409 => Error::conflict(kind.kind(), name),
        _ => Error::from(err),
    }
}

// =============================================================================
// ResourceClient
// =============================================================================

/// Cluster access used by locators, modificators and the controller
///
/// Implementations must report a missing object on `delete` as
/// [`Error::NotFound`], a stale `resourceVersion` on `update` as
/// [`Error::Conflict`] and a name collision on `create` as
/// [`Error::AlreadyExists`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Get an object, `None` when it does not exist
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// List objects, filtered by a label selector (empty selects all)
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, Error>;

    /// Create an object in `namespace`
    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Replace an object, guarded by its `resourceVersion`
    async fn update(
        &self,
        kind: ResourceKind,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Delete an object
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str)
        -> Result<(), Error>;

    /// Get a Session, `None` when it does not exist
    async fn get_session(&self, namespace: &str, name: &str) -> Result<Option<Session>, Error>;

    /// Replace a Session (metadata and spec)
    async fn update_session(&self, session: &Session) -> Result<Session, Error>;

    /// Replace a Session's status subresource
    async fn update_session_status(&self, session: &Session) -> Result<Session, Error>;
}

/// [`ResourceClient`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }

    fn sessions(&self, namespace: &str) -> Api<Session> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn object_name(obj: &DynamicObject) -> Result<&str, Error> {
    obj.metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::validation("object has no metadata.name"))
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        trace!(%kind, namespace, name, "get");
        self.api(kind, namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_api_error(e, kind, name))
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        trace!(%kind, namespace, selector, "list");
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }
        let list = self.api(kind, namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = object_name(obj)?;
        debug!(%kind, namespace, name, "creating object");
        self.api(kind, namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_api_error(e, kind, name))
    }

    async fn update(
        &self,
        kind: ResourceKind,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = object_name(obj)?;
        debug!(%kind, namespace, name, "updating object");
        self.api(kind, namespace)
            .replace(name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_api_error(e, kind, name))
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        debug!(%kind, namespace, name, "deleting object");
        self.api(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_api_error(e, kind, name))
    }

    async fn get_session(&self, namespace: &str, name: &str) -> Result<Option<Session>, Error> {
        Ok(self.sessions(namespace).get_opt(name).await?)
    }

    async fn update_session(&self, session: &Session) -> Result<Session, Error> {
        let (namespace, name) = session_key(session)?;
        Ok(self
            .sessions(namespace)
            .replace(name, &PostParams::default(), session)
            .await?)
    }

    async fn update_session_status(&self, session: &Session) -> Result<Session, Error> {
        let (namespace, name) = session_key(session)?;
        let data = serde_json::to_vec(session)?;
        Ok(self
            .sessions(namespace)
            .replace_status(name, &PostParams::default(), data)
            .await?)
    }
}

fn session_key(session: &Session) -> Result<(&str, &str), Error> {
    let namespace = session
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| Error::validation("session has no namespace"))?;
    let name = session
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::validation("session has no name"))?;
    Ok((namespace, name))
}

// =============================================================================
// Client construction
// =============================================================================

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}
