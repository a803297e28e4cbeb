//! OpenTelemetryCollector children

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde_json::json;

use otel_common::crd::{
    CollectorMode, OpenTelemetryCollector, TargetAllocator, TargetAllocatorSpec, VolumeClaimTemplate,
};
use otel_common::kube_utils::deterministic_hash;
use otel_common::Error;
use otel_reconcile::{DesiredObject, OwnedKind};

use super::labels::{self, COLLECTOR_COMPONENT};
use super::{config_path, dynamic, label_selector, metadata, pod_template, port};

/// Image used when the collector does not override it
pub const DEFAULT_COLLECTOR_IMAGE: &str = "otel/opentelemetry-collector-contrib:0.115.1";

const CONFIG_FILE: &str = "collector.yaml";
const OTLP_GRPC_PORT: i32 = 4317;
const OTLP_HTTP_PORT: i32 = 4318;
const METRICS_PORT: i32 = 8888;
const METRICS_PORT_NAME: &str = "monitoring";

/// `<name>-collector`, shared by the ServiceAccount, Service and workload
pub fn collector_name(name: &str) -> String {
    format!("{name}-collector")
}

/// `<name>-collector-<hash8>`: a new ConfigMap for every distinct config
pub fn config_map_name(name: &str, config: &str) -> String {
    format!("{}-{}", collector_name(name), deterministic_hash(config, 8))
}

/// Cluster-scoped RBAC names carry the namespace to stay unique
pub fn cluster_role_name(namespace: &str, name: &str) -> String {
    format!("{name}-{namespace}-collector")
}

/// Children of `collector`, restricted to what `kinds` allows.
///
/// Fails with a build error if the config is not a YAML mapping.
pub fn build(collector: &OpenTelemetryCollector, kinds: &[OwnedKind]) -> Result<Vec<DesiredObject>, Error> {
    let name = collector.name_any();
    let namespace = collector.namespace().unwrap_or_default();
    let spec = &collector.spec;

    validate_config(&namespace, &name, &spec.config)?;

    let object_name = collector_name(&name);
    let labels = labels::common(&namespace, &name, &object_name, COLLECTOR_COMPONENT);
    let selector = labels::selector(&namespace, &name, COLLECTOR_COMPONENT);
    let cm_name = config_map_name(&name, &spec.config);
    let owns = |kind| kinds.contains(&kind);
    let metrics = spec.observability.metrics.enable_metrics;

    let mut out = vec![
        super::config_map(
            &cm_name,
            &namespace,
            &labels::common(&namespace, &name, &cm_name, COLLECTOR_COMPONENT),
            CONFIG_FILE,
            &spec.config,
        )?,
        super::service_account(&object_name, &namespace, &labels)?,
    ];

    let mut ports = vec![
        port("otlp-grpc", OTLP_GRPC_PORT, OTLP_GRPC_PORT),
        port("otlp-http", OTLP_HTTP_PORT, OTLP_HTTP_PORT),
    ];
    if metrics {
        ports.push(port(METRICS_PORT_NAME, METRICS_PORT, METRICS_PORT));
    }
    out.push(super::service(&object_name, &namespace, &labels, &selector, ports)?);

    let container = Container {
        name: "otc-container".to_string(),
        image: Some(spec.image.clone().unwrap_or_else(|| DEFAULT_COLLECTOR_IMAGE.to_string())),
        args: Some(vec![format!("--config={}", config_path(CONFIG_FILE))]),
        ports: Some(vec![
            container_port("otlp-grpc", OTLP_GRPC_PORT),
            container_port("otlp-http", OTLP_HTTP_PORT),
            container_port(METRICS_PORT_NAME, METRICS_PORT),
        ]),
        ..Default::default()
    };
    let template = pod_template(&selector, &object_name, container, &cm_name);
    let meta = metadata(&object_name, &namespace, &labels);

    match spec.mode {
        CollectorMode::Deployment => {
            let deployment = Deployment {
                metadata: meta,
                spec: Some(DeploymentSpec {
                    replicas: Some(spec.replicas.unwrap_or(1)),
                    selector: label_selector(&selector),
                    template,
                    ..Default::default()
                }),
                ..Default::default()
            };
            out.push(DesiredObject::from_typed(OwnedKind::Deployment, &deployment)?);
        }
        CollectorMode::DaemonSet => {
            let daemonset = DaemonSet {
                metadata: meta,
                spec: Some(DaemonSetSpec {
                    selector: label_selector(&selector),
                    template,
                    ..Default::default()
                }),
                ..Default::default()
            };
            out.push(DesiredObject::from_typed(OwnedKind::DaemonSet, &daemonset)?);
        }
        CollectorMode::StatefulSet => {
            let claims: Vec<PersistentVolumeClaim> = spec
                .volume_claim_templates
                .iter()
                .map(volume_claim)
                .collect();
            let statefulset = StatefulSet {
                metadata: meta,
                spec: Some(StatefulSetSpec {
                    replicas: Some(spec.replicas.unwrap_or(1)),
                    service_name: object_name.clone(),
                    pod_management_policy: Some("Parallel".to_string()),
                    selector: label_selector(&selector),
                    template,
                    volume_claim_templates: (!claims.is_empty()).then_some(claims),
                    ..Default::default()
                }),
                ..Default::default()
            };
            out.push(DesiredObject::from_typed(OwnedKind::StatefulSet, &statefulset)?);
        }
    }

    if spec.mode != CollectorMode::DaemonSet {
        out.push(super::pod_disruption_budget(&object_name, &namespace, &labels, &selector)?);
    }

    if owns(OwnedKind::ClusterRole) && owns(OwnedKind::ClusterRoleBinding) {
        out.extend(cluster_rbac(&namespace, &name, &object_name)?);
    }

    if metrics && owns(OwnedKind::ServiceMonitor) {
        let monitor_name = format!("{object_name}-monitoring");
        out.push(super::service_monitor(
            &monitor_name,
            &namespace,
            &labels::common(&namespace, &name, &monitor_name, COLLECTOR_COMPONENT),
            &selector,
            METRICS_PORT_NAME,
        )?);
    }

    if let Some(host) = spec.ingress.as_ref().and_then(|i| i.hostname.as_deref()) {
        if owns(OwnedKind::Route) {
            out.push(route(&namespace, &object_name, &labels, host)?);
        } else {
            out.push(ingress(&namespace, &object_name, &labels, host)?);
        }
    }

    if spec.target_allocator.enabled && owns(OwnedKind::TargetAllocator) {
        let embedded = &spec.target_allocator;
        let allocator = TargetAllocator {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                labels: Some(labels::common(&namespace, &name, &name, COLLECTOR_COMPONENT)),
                ..Default::default()
            },
            spec: TargetAllocatorSpec {
                image: embedded.image.clone(),
                replicas: embedded.replicas,
                allocation_strategy: embedded.allocation_strategy.clone(),
                collector_selector: selector.clone(),
                ..Default::default()
            },
            status: None,
        };
        out.push(DesiredObject::from_typed(OwnedKind::TargetAllocator, &allocator)?);
    }

    Ok(out)
}

fn validate_config(namespace: &str, name: &str, config: &str) -> Result<(), Error> {
    let resource = format!("{namespace}/{name}");
    let parsed: serde_yaml::Value =
        serde_yaml::from_str(config).map_err(|e| Error::build(&resource, format!("invalid config: {e}")))?;
    if !parsed.is_mapping() {
        return Err(Error::build(resource, "config must be a YAML mapping"));
    }
    Ok(())
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn volume_claim(template: &VolumeClaimTemplate) -> PersistentVolumeClaim {
    let access_modes = if template.access_modes.is_empty() {
        vec!["ReadWriteOnce".to_string()]
    } else {
        template.access_modes.clone()
    };
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(template.name.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(access_modes),
            storage_class_name: template.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(template.storage.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn cluster_rbac(namespace: &str, name: &str, service_account: &str) -> Result<Vec<DesiredObject>, Error> {
    let rbac_name = cluster_role_name(namespace, name);
    let labels = labels::common(namespace, name, &rbac_name, COLLECTOR_COMPONENT);
    let meta = ObjectMeta {
        name: Some(rbac_name.clone()),
        labels: Some(labels),
        ..Default::default()
    };

    // k8sattributes and resourcedetection processors
    let role = ClusterRole {
        metadata: meta.clone(),
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["pods".into(), "namespaces".into(), "nodes".into()]),
                verbs: vec!["get".into(), "list".into(), "watch".into()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["apps".into()]),
                resources: Some(vec!["replicasets".into()]),
                verbs: vec!["get".into(), "list".into(), "watch".into()],
                ..Default::default()
            },
        ]),
        ..Default::default()
    };
    let binding = ClusterRoleBinding {
        metadata: meta,
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".into(),
            kind: "ClusterRole".into(),
            name: rbac_name,
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".into(),
            name: service_account.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    };

    Ok(vec![
        DesiredObject::from_typed(OwnedKind::ClusterRole, &role)?,
        DesiredObject::from_typed(OwnedKind::ClusterRoleBinding, &binding)?,
    ])
}

fn route(
    namespace: &str,
    service: &str,
    labels: &BTreeMap<String, String>,
    host: &str,
) -> Result<DesiredObject, Error> {
    dynamic(
        OwnedKind::Route,
        json!({
            "apiVersion": OwnedKind::Route.api_version(),
            "kind": OwnedKind::Route.kind_str(),
            "metadata": metadata(service, namespace, labels),
            "spec": {
                "host": host,
                "to": { "kind": "Service", "name": service },
                "port": { "targetPort": "otlp-http" },
                "tls": { "termination": "edge" },
            },
        }),
    )
}

fn ingress(
    namespace: &str,
    service: &str,
    labels: &BTreeMap<String, String>,
    host: &str,
) -> Result<DesiredObject, Error> {
    let ingress = Ingress {
        metadata: metadata(service, namespace, labels),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service.to_string(),
                                port: Some(ServiceBackendPort {
                                    name: Some("otlp-http".to_string()),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    DesiredObject::from_typed(OwnedKind::Ingress, &ingress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifests::testing::{kinds, only};
    use otel_common::crd::{IngressSpec as CollectorIngress, OpenTelemetryCollectorSpec};
    use otel_common::labels as keys;
    use otel_reconcile::ControllerRole;

    const CONFIG: &str = "receivers:\n  otlp: {}\nexporters:\n  debug: {}\n";

    fn collector(mut spec: serde_json::Value) -> OpenTelemetryCollector {
        if spec.get("config").is_none() {
            spec["config"] = CONFIG.into();
        }
        let spec: OpenTelemetryCollectorSpec = serde_json::from_value(spec).unwrap();
        let mut c = OpenTelemetryCollector::new("otel", spec);
        c.metadata.namespace = Some("observability".into());
        c
    }

    fn base() -> Vec<OwnedKind> {
        ControllerRole::Collector.base_kinds().to_vec()
    }

    #[test]
    fn deployment_mode_produces_the_basic_set() {
        let objects = build(&collector(json!({})), &base()).unwrap();
        assert_eq!(
            kinds(&objects),
            vec![
                OwnedKind::ConfigMap,
                OwnedKind::ServiceAccount,
                OwnedKind::Service,
                OwnedKind::Deployment,
                OwnedKind::PodDisruptionBudget,
            ]
        );

        let cm = only(&objects, OwnedKind::ConfigMap);
        assert_eq!(cm.object.metadata.name.as_deref(), Some(config_map_name("otel", CONFIG).as_str()));
        assert_eq!(cm.object.data["data"][CONFIG_FILE], CONFIG);

        let deployment = only(&objects, OwnedKind::Deployment);
        assert_eq!(deployment.object.data["spec"]["replicas"], 1);
        assert_eq!(
            deployment.object.data["spec"]["selector"]["matchLabels"][keys::INSTANCE],
            "observability.otel"
        );
        assert_eq!(
            deployment.object.data["spec"]["template"]["spec"]["volumes"][0]["configMap"]["name"],
            config_map_name("otel", CONFIG)
        );
    }

    #[test]
    fn config_change_renames_the_config_map() {
        let a = config_map_name("otel", CONFIG);
        let b = config_map_name("otel", "receivers: {}\n");
        assert_ne!(a, b);
        assert!(a.starts_with("otel-collector-"));
        assert_eq!(a.len(), "otel-collector-".len() + 8);
    }

    #[test]
    fn daemonset_mode_has_no_pdb() {
        let objects = build(&collector(json!({ "mode": "daemonset" })), &base()).unwrap();
        assert!(kinds(&objects).contains(&OwnedKind::DaemonSet));
        assert!(!kinds(&objects).contains(&OwnedKind::PodDisruptionBudget));
        assert!(!kinds(&objects).contains(&OwnedKind::Deployment));
    }

    #[test]
    fn statefulset_carries_claim_templates() {
        let objects = build(
            &collector(json!({
                "mode": "statefulset",
                "replicas": 3,
                "volumeClaimTemplates": [{ "name": "queue", "storage": "1Gi" }]
            })),
            &base(),
        )
        .unwrap();
        let sts = only(&objects, OwnedKind::StatefulSet);
        assert_eq!(sts.object.data["spec"]["replicas"], 3);
        assert_eq!(sts.object.data["spec"]["serviceName"], "otel-collector");
        let claim = &sts.object.data["spec"]["volumeClaimTemplates"][0];
        assert_eq!(claim["metadata"]["name"], "queue");
        assert_eq!(claim["spec"]["accessModes"][0], "ReadWriteOnce");
        assert_eq!(claim["spec"]["resources"]["requests"]["storage"], "1Gi");
    }

    #[test]
    fn invalid_config_is_a_build_error() {
        let err = build(&collector(json!({ "config": "receivers: [unclosed" })), &base()).unwrap_err();
        assert!(matches!(err, Error::Build { .. }), "got {err:?}");

        let err = build(&collector(json!({ "config": "- a\n- b\n" })), &base()).unwrap_err();
        assert!(matches!(err, Error::Build { .. }), "got {err:?}");
    }

    #[test]
    fn cluster_rbac_only_when_owned() {
        let without = build(&collector(json!({})), &base()).unwrap();
        assert!(!kinds(&without).contains(&OwnedKind::ClusterRole));

        let mut owned = base();
        owned.extend([OwnedKind::ClusterRole, OwnedKind::ClusterRoleBinding]);
        let with = build(&collector(json!({})), &owned).unwrap();
        let role = only(&with, OwnedKind::ClusterRole);
        assert_eq!(role.object.metadata.name.as_deref(), Some("otel-observability-collector"));
        assert!(role.object.metadata.namespace.is_none());
        let binding = only(&with, OwnedKind::ClusterRoleBinding);
        assert_eq!(binding.object.data["subjects"][0]["name"], "otel-collector");
        assert_eq!(binding.object.data["subjects"][0]["namespace"], "observability");
    }

    #[test]
    fn service_monitor_needs_metrics_and_ownership() {
        let mut owned = base();
        owned.push(OwnedKind::ServiceMonitor);

        let off = build(&collector(json!({})), &owned).unwrap();
        assert!(!kinds(&off).contains(&OwnedKind::ServiceMonitor));

        let spec = json!({ "observability": { "metrics": { "enableMetrics": true } } });
        let not_owned = build(&collector(spec.clone()), &base()).unwrap();
        assert!(!kinds(&not_owned).contains(&OwnedKind::ServiceMonitor));

        let on = build(&collector(spec), &owned).unwrap();
        let monitor = only(&on, OwnedKind::ServiceMonitor);
        assert_eq!(monitor.object.data["spec"]["endpoints"][0]["port"], METRICS_PORT_NAME);
        let service = only(&on, OwnedKind::Service);
        assert_eq!(service.object.data["spec"]["ports"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn hostname_becomes_a_route_when_routes_are_owned() {
        let mut c = collector(json!({}));
        c.spec.ingress = Some(CollectorIngress {
            hostname: Some("otel.example.com".into()),
        });

        let plain = build(&c, &base()).unwrap();
        let ingress = only(&plain, OwnedKind::Ingress);
        assert_eq!(ingress.object.data["spec"]["rules"][0]["host"], "otel.example.com");

        let mut owned = base();
        owned.push(OwnedKind::Route);
        let routed = build(&c, &owned).unwrap();
        assert!(!kinds(&routed).contains(&OwnedKind::Ingress));
        assert_eq!(only(&routed, OwnedKind::Route).object.data["spec"]["host"], "otel.example.com");
    }

    #[test]
    fn target_allocator_cr_needs_flag_and_gate() {
        let spec = json!({ "targetAllocator": { "enabled": true, "allocationStrategy": "consistent-hashing" } });
        let ungated = build(&collector(spec.clone()), &base()).unwrap();
        assert!(!kinds(&ungated).contains(&OwnedKind::TargetAllocator));

        let mut owned = base();
        owned.push(OwnedKind::TargetAllocator);
        let gated = build(&collector(spec), &owned).unwrap();
        let ta = only(&gated, OwnedKind::TargetAllocator);
        assert_eq!(ta.object.metadata.name.as_deref(), Some("otel"));
        assert_eq!(ta.object.data["spec"]["allocationStrategy"], "consistent-hashing");
        assert_eq!(
            ta.object.data["spec"]["collectorSelector"][keys::COMPONENT],
            COLLECTOR_COMPONENT
        );
    }
}
