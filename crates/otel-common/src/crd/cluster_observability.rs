//! ClusterObservability custom resource
//!
//! Logically one per cluster; when several exist the oldest is active and
//! the rest report `Conflicted`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Where collected telemetry is sent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExporterSpec {
    /// OTLP endpoint, e.g. `http://gateway.observability:4317`
    pub endpoint: String,
}

/// Specification for a ClusterObservability
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "opentelemetry.io",
    version = "v1alpha1",
    kind = "ClusterObservability",
    plural = "clusterobservabilities",
    namespaced,
    status = "ClusterObservabilityStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Active","type":"string","jsonPath":".status.activeInstance"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterObservabilitySpec {
    /// Export destination
    pub exporter: ExporterSpec,
}

/// Lifecycle phase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ClusterObservabilityPhase {
    /// Not reconciled yet
    #[default]
    Pending,
    /// Active and converged
    Ready,
    /// Another instance is active
    Conflicted,
}

impl std::fmt::Display for ClusterObservabilityPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Conflicted => write!(f, "Conflicted"),
        }
    }
}

/// Status for a ClusterObservability
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterObservabilityStatus {
    /// Current phase
    #[serde(default)]
    pub phase: ClusterObservabilityPhase,

    /// `namespace/name` of the instance currently in charge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_instance: Option<String>,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
