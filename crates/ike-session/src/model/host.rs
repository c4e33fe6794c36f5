//! Service host names as they appear in mesh routing rules

use std::fmt;

use super::{LocatorStatusStore, SERVICE_KIND};

const CLUSTER_DOMAIN: &str = ".svc.cluster.local";

/// A Service addressed by short name or by its cluster-local DNS name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostName {
    /// Service name
    pub name: String,
    /// Service namespace, empty when only the short name is known
    pub namespace: String,
}

impl HostName {
    /// Host for a Service in a namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Parse either `name` or `name.namespace.svc.cluster.local`
    pub fn parse(host: &str) -> Self {
        if host.contains(CLUSTER_DOMAIN) {
            let mut parts = host.split('.');
            let name = parts.next().unwrap_or_default();
            let namespace = parts.next().unwrap_or_default();
            return Self::new(name, namespace);
        }
        Self::new(host, "")
    }

    /// True when `host` names this Service
    pub fn matches(&self, host: &str) -> bool {
        host == self.name || host == self.full_name()
    }

    fn full_name(&self) -> String {
        format!("{}.{}{}", self.name, self.namespace, CLUSTER_DOMAIN)
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            f.write_str(&self.full_name())
        }
    }
}

/// Hosts of the Services located for the ref
pub fn target_host_names(store: &LocatorStatusStore) -> Vec<HostName> {
    store
        .query(&[SERVICE_KIND])
        .into_iter()
        .map(|s| HostName::new(&s.name, &s.namespace))
        .collect()
}
