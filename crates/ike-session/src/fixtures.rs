//! Cluster objects shared by unit tests (bookinfo-style)

use std::sync::Arc;

use ike_common::crd::Route;
use ike_common::testing::MemoryClient;
use serde_json::{json, Value};

use crate::engine::SessionContext;
use crate::model::{DEFAULT_ROUTE_HEADER, ROUTE_TYPE_HEADER};

pub const NAMESPACE: &str = "bookinfo";

pub fn context(client: &MemoryClient, session: &str) -> SessionContext {
    SessionContext {
        name: session.to_string(),
        namespace: NAMESPACE.to_string(),
        route: Route {
            type_: ROUTE_TYPE_HEADER.to_string(),
            name: DEFAULT_ROUTE_HEADER.to_string(),
            value: session.to_string(),
        },
        client: Arc::new(client.clone()),
    }
}

fn app_of(name: &str) -> &str {
    name.split('-').next().unwrap_or(name)
}

pub fn deployment(name: &str, version: &str) -> Value {
    let app = app_of(name);
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": NAMESPACE, "labels": {"app": app}},
        "spec": {
            "replicas": 3,
            "selector": {"matchLabels": {"app": app, "version": version}},
            "template": {
                "metadata": {"labels": {"app": app, "version": version}},
                "spec": {"containers": [{"name": app, "image": format!("docker.io/{app}:{version}")}]}
            }
        }
    })
}

pub fn service(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": name, "namespace": NAMESPACE, "labels": {"app": name}},
        "spec": {"selector": {"app": name}, "ports": [{"port": 9080}]}
    })
}

pub fn virtual_service(name: &str, host: &str, subset: &str) -> Value {
    json!({
        "apiVersion": "networking.istio.io/v1alpha3",
        "kind": "VirtualService",
        "metadata": {"name": name, "namespace": NAMESPACE},
        "spec": {
            "hosts": [host],
            "http": [{
                "name": "primary",
                "route": [{"destination": {"host": host, "subset": subset}}]
            }]
        }
    })
}

pub fn gateway_virtual_service(name: &str, gateway: &str, host: &str, subset: &str) -> Value {
    json!({
        "apiVersion": "networking.istio.io/v1alpha3",
        "kind": "VirtualService",
        "metadata": {"name": name, "namespace": NAMESPACE},
        "spec": {
            "hosts": ["*"],
            "gateways": [gateway],
            "http": [{
                "match": [{"uri": {"exact": "/productpage"}}],
                "route": [{"destination": {"host": host, "subset": subset, "port": {"number": 9080}}}]
            }]
        }
    })
}

pub fn destination_rule(name: &str, host: &str, versions: &[&str]) -> Value {
    let subsets: Vec<Value> = versions
        .iter()
        .map(|v| {
            json!({
                "name": v,
                "labels": {"version": v},
                "trafficPolicy": {"tls": {"mode": "ISTIO_MUTUAL"}}
            })
        })
        .collect();
    json!({
        "apiVersion": "networking.istio.io/v1alpha3",
        "kind": "DestinationRule",
        "metadata": {"name": name, "namespace": NAMESPACE},
        "spec": {"host": host, "subsets": subsets}
    })
}

pub fn gateway(name: &str, hosts: &[&str]) -> Value {
    json!({
        "apiVersion": "networking.istio.io/v1alpha3",
        "kind": "Gateway",
        "metadata": {"name": name, "namespace": NAMESPACE},
        "spec": {
            "selector": {"istio": "ingressgateway"},
            "servers": [{"port": {"number": 80, "name": "http", "protocol": "HTTP"}, "hosts": hosts}]
        }
    })
}

/// Attach a marker label to a seeded object
pub fn with_marker(mut object: Value, key: &str, value: &str) -> Value {
    object["metadata"]["labels"][key] = Value::String(value.to_string());
    object
}
