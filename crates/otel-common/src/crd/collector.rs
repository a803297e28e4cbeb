//! OpenTelemetryCollector custom resource

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Default number of collector config versions kept for rollback
pub const DEFAULT_CONFIG_VERSIONS: i32 = 3;

/// How the collector workload is deployed
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CollectorMode {
    /// A Deployment with `replicas` pods
    #[default]
    Deployment,
    /// One pod per node
    DaemonSet,
    /// A StatefulSet, optionally with persistent volumes
    StatefulSet,
}

impl std::fmt::Display for CollectorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deployment => write!(f, "deployment"),
            Self::DaemonSet => write!(f, "daemonset"),
            Self::StatefulSet => write!(f, "statefulset"),
        }
    }
}

/// Whether the operator manages the resource's children
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ManagementState {
    /// Children are reconciled
    #[default]
    Managed,
    /// The operator leaves the resource alone
    Unmanaged,
}

/// Target allocator settings embedded in the collector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetAllocatorEmbedded {
    /// Run a target allocator for this collector
    #[serde(default)]
    pub enabled: bool,

    /// Allocator image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Allocator replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Strategy used to spread targets over collectors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_strategy: Option<String>,
}

/// Self-observability settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilitySpec {
    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsConfigSpec,
}

/// Metrics settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfigSpec {
    /// Create ServiceMonitor/PodMonitor objects for the collector's own metrics
    #[serde(default)]
    pub enable_metrics: bool,
}

/// External access
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    /// Hostname to expose the collector's receivers on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Persistent volume claim template for statefulset mode
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimTemplate {
    /// Claim name, also the volume name mounted into the pod
    pub name: String,

    /// Requested storage, e.g. `1Gi`
    pub storage: String,

    /// Storage class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Access modes, defaults to ReadWriteOnce
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,
}

/// Specification for an OpenTelemetryCollector
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "opentelemetry.io",
    version = "v1beta1",
    kind = "OpenTelemetryCollector",
    plural = "opentelemetrycollectors",
    shortname = "otelcol",
    namespaced,
    status = "OpenTelemetryCollectorStatus",
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.mode"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpenTelemetryCollectorSpec {
    /// Deployment mode
    #[serde(default)]
    pub mode: CollectorMode,

    /// Replicas for deployment and statefulset modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Collector image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Collector configuration as YAML
    pub config: String,

    /// Number of previous config versions kept for rollback
    #[serde(default = "default_config_versions")]
    pub config_versions: i32,

    /// Whether the operator manages this collector
    #[serde(default)]
    pub management_state: ManagementState,

    /// Target allocator settings
    #[serde(default)]
    pub target_allocator: TargetAllocatorEmbedded,

    /// Self-observability settings
    #[serde(default)]
    pub observability: ObservabilitySpec,

    /// External access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressSpec>,

    /// Claim templates for statefulset mode
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_templates: Vec<VolumeClaimTemplate>,
}

fn default_config_versions() -> i32 {
    DEFAULT_CONFIG_VERSIONS
}

/// Status for an OpenTelemetryCollector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenTelemetryCollectorStatus {
    /// Conditions representing the collector state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
