//! TargetAllocator children

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort};
use kube::ResourceExt;
use serde_json::json;

use otel_common::crd::TargetAllocator;
use otel_common::Error;
use otel_reconcile::{DesiredObject, OwnedKind};

use super::labels::{self, TARGET_ALLOCATOR_COMPONENT};
use super::{config_path, label_selector, metadata, pod_template, port};

/// Image used when the allocator does not override it
pub const DEFAULT_TARGET_ALLOCATOR_IMAGE: &str =
    "ghcr.io/open-telemetry/opentelemetry-operator/target-allocator:0.115.0";

/// Strategy used when none is configured
pub const DEFAULT_ALLOCATION_STRATEGY: &str = "consistent-hashing";

const CONFIG_FILE: &str = "targetallocator.yaml";
const HTTP_PORT: i32 = 8080;

/// `<name>-targetallocator`
pub fn allocator_name(name: &str) -> String {
    format!("{name}-targetallocator")
}

/// Children of `allocator`, restricted to what `kinds` allows
pub fn build(allocator: &TargetAllocator, kinds: &[OwnedKind]) -> Result<Vec<DesiredObject>, Error> {
    let name = allocator.name_any();
    let namespace = allocator.namespace().unwrap_or_default();
    let spec = &allocator.spec;

    let object_name = allocator_name(&name);
    let labels = labels::common(&namespace, &name, &object_name, TARGET_ALLOCATOR_COMPONENT);
    let selector = labels::selector(&namespace, &name, TARGET_ALLOCATOR_COMPONENT);

    let config = serde_yaml::to_string(&json!({
        "allocation_strategy": spec
            .allocation_strategy
            .as_deref()
            .unwrap_or(DEFAULT_ALLOCATION_STRATEGY),
        "collector_selector": { "matchlabels": spec.collector_selector },
        "prometheus_cr": { "enabled": spec.prometheus_cr.enabled },
    }))
    .map_err(|e| Error::build(format!("{namespace}/{name}"), e.to_string()))?;

    let mut out = vec![
        super::config_map(&object_name, &namespace, &labels, CONFIG_FILE, &config)?,
        super::service_account(&object_name, &namespace, &labels)?,
        super::service(
            &object_name,
            &namespace,
            &labels,
            &selector,
            vec![port("targetallocation", 80, HTTP_PORT)],
        )?,
    ];

    let container = Container {
        name: "ta-container".to_string(),
        image: Some(
            spec.image
                .clone()
                .unwrap_or_else(|| DEFAULT_TARGET_ALLOCATOR_IMAGE.to_string()),
        ),
        args: Some(vec![format!("--config-file={}", config_path(CONFIG_FILE))]),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: HTTP_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };
    let deployment = Deployment {
        metadata: metadata(&object_name, &namespace, &labels),
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas.unwrap_or(1)),
            selector: label_selector(&selector),
            template: pod_template(&selector, &object_name, container, &object_name),
            ..Default::default()
        }),
        ..Default::default()
    };
    out.push(DesiredObject::from_typed(OwnedKind::Deployment, &deployment)?);
    out.push(super::pod_disruption_budget(&object_name, &namespace, &labels, &selector)?);

    if kinds.contains(&OwnedKind::ServiceMonitor) {
        out.push(super::service_monitor(
            &object_name,
            &namespace,
            &labels,
            &selector,
            "targetallocation",
        )?);
    }

    Ok(out)
}
