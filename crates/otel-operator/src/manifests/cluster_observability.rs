//! ClusterObservability children
//!
//! The active instance runs one node-level agent collector that forwards
//! everything to the configured exporter endpoint.

use kube::ResourceExt;

use otel_common::crd::{
    ClusterObservability, CollectorMode, OpenTelemetryCollector, OpenTelemetryCollectorSpec,
};
use otel_common::Error;
use otel_reconcile::{DesiredObject, OwnedKind};

use super::labels::{self, CLUSTER_OBSERVABILITY_COMPONENT};
use super::metadata;

/// `<name>-agent`
pub fn agent_name(name: &str) -> String {
    format!("{name}-agent")
}

/// The agent collector for the active `instance`
pub fn build(instance: &ClusterObservability) -> Result<Vec<DesiredObject>, Error> {
    let name = instance.name_any();
    let namespace = instance.namespace().unwrap_or_default();
    let endpoint = instance.spec.exporter.endpoint.trim();

    if endpoint.is_empty() {
        return Err(Error::build(
            format!("{namespace}/{name}"),
            "exporter endpoint must not be empty",
        ));
    }

    let config = serde_yaml::to_string(&agent_config(endpoint))
        .map_err(|e| Error::build(format!("{namespace}/{name}"), e.to_string()))?;

    let object_name = agent_name(&name);
    let agent = OpenTelemetryCollector {
        metadata: metadata(
            &object_name,
            &namespace,
            &labels::common(&namespace, &name, &object_name, CLUSTER_OBSERVABILITY_COMPONENT),
        ),
        spec: OpenTelemetryCollectorSpec {
            mode: CollectorMode::DaemonSet,
            replicas: None,
            image: None,
            config,
            config_versions: otel_common::crd::DEFAULT_CONFIG_VERSIONS,
            management_state: Default::default(),
            target_allocator: Default::default(),
            observability: Default::default(),
            ingress: None,
            volume_claim_templates: Vec::new(),
        },
        status: None,
    };

    Ok(vec![DesiredObject::from_typed(OwnedKind::OpenTelemetryCollector, &agent)?])
}

fn agent_config(endpoint: &str) -> serde_json::Value {
    serde_json::json!({
        "receivers": {
            "otlp": {
                "protocols": {
                    "grpc": { "endpoint": "0.0.0.0:4317" },
                    "http": { "endpoint": "0.0.0.0:4318" },
                },
            },
        },
        "processors": {
            "k8sattributes": {},
            "batch": {},
        },
        "exporters": {
            "otlp": { "endpoint": endpoint },
        },
        "service": {
            "pipelines": {
                "traces": {
                    "receivers": ["otlp"],
                    "processors": ["k8sattributes", "batch"],
                    "exporters": ["otlp"],
                },
                "metrics": {
                    "receivers": ["otlp"],
                    "processors": ["k8sattributes", "batch"],
                    "exporters": ["otlp"],
                },
                "logs": {
                    "receivers": ["otlp"],
                    "processors": ["k8sattributes", "batch"],
                    "exporters": ["otlp"],
                },
            },
        },
    })
}
