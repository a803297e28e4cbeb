//! Desired-state builders
//!
//! Each builder turns one parent custom resource into the list of children
//! the engine should converge to. Builders are pure: given the same parent
//! and owned-kind list they return the same objects. A build error fails the
//! reconcile before anything is written.

pub mod bridge;
pub mod cluster_observability;
pub mod collector;
pub mod labels;
pub mod target_allocator;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, PodSpec, PodTemplateSpec, Service, ServiceAccount,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use serde_json::{json, Value};

use otel_common::Error;
use otel_reconcile::{DesiredObject, OwnedKind};

const CONFIG_VOLUME: &str = "otel-config";
const CONFIG_MOUNT: &str = "/conf";

pub(crate) fn metadata(name: &str, namespace: &str, labels: &BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels.clone()),
        ..Default::default()
    }
}

pub(crate) fn dynamic(kind: OwnedKind, value: Value) -> Result<DesiredObject, Error> {
    let object: DynamicObject = serde_json::from_value(value)
        .map_err(|e| Error::serialization_for_kind(kind.kind_str(), e.to_string()))?;
    Ok(DesiredObject::new(kind, object))
}

pub(crate) fn port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

pub(crate) fn config_map(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    file: &str,
    content: &str,
) -> Result<DesiredObject, Error> {
    let cm = ConfigMap {
        metadata: metadata(name, namespace, labels),
        data: Some(BTreeMap::from([(file.to_string(), content.to_string())])),
        ..Default::default()
    };
    DesiredObject::from_typed(OwnedKind::ConfigMap, &cm)
}

pub(crate) fn service_account(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<DesiredObject, Error> {
    let sa = ServiceAccount {
        metadata: metadata(name, namespace, labels),
        ..Default::default()
    };
    DesiredObject::from_typed(OwnedKind::ServiceAccount, &sa)
}

pub(crate) fn service(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    selector: &BTreeMap<String, String>,
    ports: Vec<ServicePort>,
) -> Result<DesiredObject, Error> {
    let svc = Service {
        metadata: metadata(name, namespace, labels),
        spec: Some(ServiceSpec {
            selector: Some(selector.clone()),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    };
    DesiredObject::from_typed(OwnedKind::Service, &svc)
}

pub(crate) fn pod_disruption_budget(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    selector: &BTreeMap<String, String>,
) -> Result<DesiredObject, Error> {
    let pdb = PodDisruptionBudget {
        metadata: metadata(name, namespace, labels),
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(1)),
            selector: Some(label_selector(selector)),
            ..Default::default()
        }),
        ..Default::default()
    };
    DesiredObject::from_typed(OwnedKind::PodDisruptionBudget, &pdb)
}

pub(crate) fn service_monitor(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    selector: &BTreeMap<String, String>,
    port_name: &str,
) -> Result<DesiredObject, Error> {
    dynamic(
        OwnedKind::ServiceMonitor,
        json!({
            "apiVersion": OwnedKind::ServiceMonitor.api_version(),
            "kind": OwnedKind::ServiceMonitor.kind_str(),
            "metadata": metadata(name, namespace, labels),
            "spec": {
                "selector": { "matchLabels": selector },
                "namespaceSelector": { "matchNames": [namespace] },
                "endpoints": [{ "port": port_name }],
            },
        }),
    )
}

pub(crate) fn label_selector(labels: &BTreeMap<String, String>) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels.clone()),
        ..Default::default()
    }
}

/// Pod template mounting `config_map` at `/conf`
pub(crate) fn pod_template(
    labels: &BTreeMap<String, String>,
    service_account: &str,
    container: Container,
    config_map: &str,
) -> PodTemplateSpec {
    let container = Container {
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: CONFIG_MOUNT.to_string(),
            ..Default::default()
        }]),
        ..container
    };
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(service_account.to_string()),
            containers: vec![container],
            volumes: Some(vec![Volume {
                name: CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: config_map.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Path a file of the mounted config map appears at
pub(crate) fn config_path(file: &str) -> String {
    format!("{CONFIG_MOUNT}/{file}")
}
