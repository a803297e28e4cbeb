//! Engine scenarios
//!
//! - `convergence`: repeated passes, orphan pruning, config retention
//! - `immutable`: immutable-field changes become deletes, never updates
//! - `concurrency`: conflict retry and per-key single flight

mod concurrency;
mod convergence;
pub mod fake_cluster;
mod immutable;

use kube::api::{DynamicObject, ObjectMeta, TypeMeta};
use serde_json::{json, Value};

use otel_reconcile::{DesiredObject, OwnedKind, OwnerInfo};

pub const NAMESPACE: &str = "observability";

pub fn owner() -> OwnerInfo {
    OwnerInfo {
        api_version: "opentelemetry.io/v1beta1".into(),
        kind: "OpenTelemetryCollector".into(),
        namespace: NAMESPACE.into(),
        name: "otel".into(),
        uid: "collector-uid".into(),
        component: "opentelemetry-collector".into(),
    }
}

pub fn object(kind: OwnedKind, name: &str, data: Value) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: kind.api_version().into(),
            kind: kind.kind_str().into(),
        }),
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: kind.is_namespaced().then(|| NAMESPACE.to_string()),
            ..Default::default()
        },
        data,
    }
}

pub fn desired(kind: OwnedKind, name: &str, data: Value) -> DesiredObject {
    DesiredObject::new(kind, object(kind, name, data))
}

pub fn config_map(name: &str, value: &str) -> DesiredObject {
    desired(OwnedKind::ConfigMap, name, json!({ "data": { "collector.yaml": value } }))
}

pub fn service(name: &str, port: i32) -> DesiredObject {
    desired(
        OwnedKind::Service,
        name,
        json!({ "spec": { "selector": { "app": name }, "ports": [{ "name": "otlp", "port": port }] } }),
    )
}

pub fn deployment(name: &str, selector_app: &str, replicas: i32) -> DesiredObject {
    desired(
        OwnedKind::Deployment,
        name,
        json!({
            "spec": {
                "replicas": replicas,
                "selector": { "matchLabels": { "app": selector_app } },
                "template": {
                    "metadata": { "labels": { "app": selector_app } },
                    "spec": { "containers": [{ "name": "otc-container", "image": "otel/opentelemetry-collector:0.98.0" }] }
                }
            }
        }),
    )
}

pub fn cluster_role(name: &str) -> DesiredObject {
    desired(
        OwnedKind::ClusterRole,
        name,
        json!({ "rules": [{ "apiGroups": [""], "resources": ["pods"], "verbs": ["get", "list", "watch"] }] }),
    )
}
