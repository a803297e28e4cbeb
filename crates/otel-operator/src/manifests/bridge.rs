//! OpAMPBridge children

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort};
use kube::ResourceExt;
use serde_json::json;

use otel_common::crd::OpAMPBridge;
use otel_common::Error;
use otel_reconcile::{DesiredObject, OwnedKind};

use super::labels::{self, BRIDGE_COMPONENT};
use super::{config_path, label_selector, metadata, pod_template, port};

/// Image used when the bridge does not override it
pub const DEFAULT_BRIDGE_IMAGE: &str =
    "ghcr.io/open-telemetry/opentelemetry-operator/operator-opamp-bridge:0.115.0";

const CONFIG_FILE: &str = "remoteconfiguration.yaml";
const HTTP_PORT: i32 = 8080;

/// `<name>-opamp-bridge`
pub fn bridge_name(name: &str) -> String {
    format!("{name}-opamp-bridge")
}

/// Children of `bridge`
pub fn build(bridge: &OpAMPBridge) -> Result<Vec<DesiredObject>, Error> {
    let name = bridge.name_any();
    let namespace = bridge.namespace().unwrap_or_default();
    let spec = &bridge.spec;

    if spec.endpoint.trim().is_empty() {
        return Err(Error::build(format!("{namespace}/{name}"), "endpoint must not be empty"));
    }

    let object_name = bridge_name(&name);
    let labels = labels::common(&namespace, &name, &object_name, BRIDGE_COMPONENT);
    let selector = labels::selector(&namespace, &name, BRIDGE_COMPONENT);

    let config = serde_yaml::to_string(&json!({
        "endpoint": spec.endpoint,
        "capabilities": spec.capabilities,
        "componentsAllowed": {},
    }))
    .map_err(|e| Error::build(format!("{namespace}/{name}"), e.to_string()))?;

    let container = Container {
        name: "opamp-bridge-container".to_string(),
        image: Some(spec.image.clone().unwrap_or_else(|| DEFAULT_BRIDGE_IMAGE.to_string())),
        args: Some(vec![format!("--config-file={}", config_path(CONFIG_FILE))]),
        ports: Some(vec![ContainerPort {
            name: Some("opamp-bridge".to_string()),
            container_port: HTTP_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };
    let deployment = Deployment {
        metadata: metadata(&object_name, &namespace, &labels),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: label_selector(&selector),
            template: pod_template(&selector, &object_name, container, &object_name),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(vec![
        super::config_map(&object_name, &namespace, &labels, CONFIG_FILE, &config)?,
        super::service_account(&object_name, &namespace, &labels)?,
        super::service(
            &object_name,
            &namespace,
            &labels,
            &selector,
            vec![port("opamp-bridge", HTTP_PORT, HTTP_PORT)],
        )?,
        DesiredObject::from_typed(OwnedKind::Deployment, &deployment)?,
    ])
}
