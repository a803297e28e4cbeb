//! Custom Resource Definitions served by the operator

mod bridge;
mod cluster_observability;
mod collector;
mod target_allocator;
mod types;

pub use bridge::{OpAMPBridge, OpAMPBridgeSpec, OpAMPBridgeStatus};
pub use cluster_observability::{
    ClusterObservability, ClusterObservabilityPhase, ClusterObservabilitySpec,
    ClusterObservabilityStatus, ExporterSpec,
};
pub use collector::{
    CollectorMode, IngressSpec, ManagementState, MetricsConfigSpec, ObservabilitySpec,
    OpenTelemetryCollector, OpenTelemetryCollectorSpec, OpenTelemetryCollectorStatus,
    TargetAllocatorEmbedded, VolumeClaimTemplate, DEFAULT_CONFIG_VERSIONS,
};
pub use target_allocator::{
    PrometheusCrSpec, TargetAllocator, TargetAllocatorSpec, TargetAllocatorStatus,
};
pub use types::{
    condition_reasons, condition_types, find_condition, remove_condition, set_condition,
    Condition, ConditionStatus,
};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// Every CRD the operator serves, for `--crd` output and installation
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        OpenTelemetryCollector::crd(),
        TargetAllocator::crd(),
        OpAMPBridge::crd(),
        ClusterObservability::crd(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_crds_are_in_the_operator_group() {
        let crds = all_crds();
        assert_eq!(crds.len(), 4);
        for crd in crds {
            assert_eq!(crd.spec.group, crate::API_GROUP);
            assert_eq!(crd.spec.scope, "Namespaced");
        }
    }

    #[test]
    fn condition_times_are_date_time_strings() {
        let crd = OpenTelemetryCollector::crd();
        let schema = serde_json::to_value(&crd.spec.versions[0].schema).unwrap();
        let condition = &schema["openAPIV3Schema"]["properties"]["status"]["properties"]["conditions"]["items"];
        let time = &condition["properties"]["lastTransitionTime"];
        assert_eq!(time["type"], "string");
        assert_eq!(time["format"], "date-time");
    }
}
