//! Child object kinds the engine knows how to manage

use kube::discovery::ApiResource;
use otel_common::kube_utils::build_api_resource;

/// Every kind of child object the operator creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnedKind {
    /// v1 ConfigMap
    ConfigMap,
    /// v1 Secret
    Secret,
    /// v1 ServiceAccount
    ServiceAccount,
    /// v1 Service
    Service,
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 DaemonSet
    DaemonSet,
    /// apps/v1 StatefulSet
    StatefulSet,
    /// networking.k8s.io/v1 Ingress
    Ingress,
    /// autoscaling/v2 HorizontalPodAutoscaler
    HorizontalPodAutoscaler,
    /// policy/v1 PodDisruptionBudget
    PodDisruptionBudget,
    /// networking.k8s.io/v1 NetworkPolicy
    NetworkPolicy,
    /// rbac.authorization.k8s.io/v1 Role
    Role,
    /// rbac.authorization.k8s.io/v1 RoleBinding
    RoleBinding,
    /// rbac.authorization.k8s.io/v1 ClusterRole
    ClusterRole,
    /// rbac.authorization.k8s.io/v1 ClusterRoleBinding
    ClusterRoleBinding,
    /// monitoring.coreos.com/v1 ServiceMonitor
    ServiceMonitor,
    /// monitoring.coreos.com/v1 PodMonitor
    PodMonitor,
    /// route.openshift.io/v1 Route
    Route,
    /// opentelemetry.io/v1beta1 OpenTelemetryCollector
    OpenTelemetryCollector,
    /// opentelemetry.io/v1alpha1 TargetAllocator
    TargetAllocator,
}

impl OwnedKind {
    /// Full `group/version`
    pub fn api_version(&self) -> &'static str {
        match self {
            Self::ConfigMap | Self::Secret | Self::ServiceAccount | Self::Service => "v1",
            Self::Deployment | Self::DaemonSet | Self::StatefulSet => "apps/v1",
            Self::Ingress | Self::NetworkPolicy => "networking.k8s.io/v1",
            Self::HorizontalPodAutoscaler => "autoscaling/v2",
            Self::PodDisruptionBudget => "policy/v1",
            Self::Role | Self::RoleBinding | Self::ClusterRole | Self::ClusterRoleBinding => {
                "rbac.authorization.k8s.io/v1"
            }
            Self::ServiceMonitor | Self::PodMonitor => "monitoring.coreos.com/v1",
            Self::Route => "route.openshift.io/v1",
            Self::OpenTelemetryCollector => "opentelemetry.io/v1beta1",
            Self::TargetAllocator => "opentelemetry.io/v1alpha1",
        }
    }

    /// Kubernetes Kind string
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::ServiceAccount => "ServiceAccount",
            Self::Service => "Service",
            Self::Deployment => "Deployment",
            Self::DaemonSet => "DaemonSet",
            Self::StatefulSet => "StatefulSet",
            Self::Ingress => "Ingress",
            Self::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            Self::PodDisruptionBudget => "PodDisruptionBudget",
            Self::NetworkPolicy => "NetworkPolicy",
            Self::Role => "Role",
            Self::RoleBinding => "RoleBinding",
            Self::ClusterRole => "ClusterRole",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::ServiceMonitor => "ServiceMonitor",
            Self::PodMonitor => "PodMonitor",
            Self::Route => "Route",
            Self::OpenTelemetryCollector => "OpenTelemetryCollector",
            Self::TargetAllocator => "TargetAllocator",
        }
    }

    /// ApiResource for dynamic API access
    pub fn api_resource(&self) -> ApiResource {
        build_api_resource(self.api_version(), self.kind_str())
    }

    /// Whether objects of this kind live in a namespace.
    ///
    /// Cluster-scoped children cannot carry an owner reference to a
    /// namespaced parent and are tracked by label selector instead.
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, Self::ClusterRole | Self::ClusterRoleBinding)
    }
}

impl std::fmt::Display for OwnedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind_str())
    }
}
