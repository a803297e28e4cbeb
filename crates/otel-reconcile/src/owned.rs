//! Owned-Kind Resolver
//!
//! [`owned_kinds`] is a pure function of the capability snapshot and the
//! feature gates. Callers recompute it on every use so a permission granted
//! after startup takes effect on the next reconcile.

use kube::api::DynamicObject;
use tracing::debug;

use otel_common::featuregate::FeatureGates;
use otel_common::Error;

use crate::apply::{OwnedObject, OwnedObjects, OwnerInfo};
use crate::capabilities::Capabilities;
use crate::client::ObjectClient;
use crate::index::OwnerIndex;
use crate::kind::OwnedKind;

/// The controller a kind list is resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerRole {
    /// OpenTelemetryCollector
    Collector,
    /// TargetAllocator
    TargetAllocator,
    /// OpAMPBridge
    OpAMPBridge,
    /// ClusterObservability
    ClusterObservability,
}

impl ControllerRole {
    /// Kinds the controller always owns
    pub fn base_kinds(self) -> &'static [OwnedKind] {
        use OwnedKind::*;
        match self {
            Self::Collector => &[
                ConfigMap,
                ServiceAccount,
                Service,
                Deployment,
                DaemonSet,
                StatefulSet,
                Ingress,
                HorizontalPodAutoscaler,
                PodDisruptionBudget,
            ],
            Self::TargetAllocator => &[
                ConfigMap,
                ServiceAccount,
                Service,
                Deployment,
                PodDisruptionBudget,
            ],
            Self::OpAMPBridge => &[ConfigMap, ServiceAccount, Service, Deployment],
            Self::ClusterObservability => &[OpenTelemetryCollector],
        }
    }
}

/// Kinds owned by `role` given the current capabilities and gates
pub fn owned_kinds(role: ControllerRole, caps: &Capabilities, gates: &FeatureGates) -> Vec<OwnedKind> {
    let mut kinds = role.base_kinds().to_vec();
    let monitors = gates.prometheus_monitors() && caps.prometheus_crds_present();

    match role {
        ControllerRole::Collector => {
            if caps.rbac_creatable() {
                kinds.extend([OwnedKind::ClusterRole, OwnedKind::ClusterRoleBinding]);
            }
            if monitors {
                kinds.extend([OwnedKind::ServiceMonitor, OwnedKind::PodMonitor]);
            }
            if caps.routes_present() {
                kinds.push(OwnedKind::Route);
            }
            if gates.target_allocator_cr() {
                kinds.push(OwnedKind::TargetAllocator);
            }
        }
        ControllerRole::TargetAllocator => {
            if monitors {
                kinds.push(OwnedKind::ServiceMonitor);
            }
        }
        ControllerRole::OpAMPBridge | ControllerRole::ClusterObservability => {}
    }
    kinds
}

/// Gather every child of `owner` among `kinds`, keyed by UID.
///
/// Namespaced kinds come from the owner-key index, or from a label-selector
/// list filtered by controller UID while the index is still syncing.
/// Cluster-scoped kinds always come from the label-selector list.
pub async fn collect_owned(
    client: &dyn ObjectClient,
    index: &OwnerIndex,
    owner: &OwnerInfo,
    kinds: &[OwnedKind],
) -> Result<OwnedObjects, Error> {
    let selector = owner.label_selector();
    let mut owned = OwnedObjects::new();

    for &kind in kinds {
        let objects: Vec<DynamicObject> = if kind.is_namespaced() {
            match index.lookup(kind, &owner.namespace, &owner.kind, &owner.name, &owner.uid) {
                Some(found) => found,
                None => {
                    debug!(kind = %kind, "Owner index not synced, listing");
                    client
                        .list(kind, Some(owner.namespace.clone()), &selector)
                        .await?
                        .into_iter()
                        .filter(|o| owner.is_controller_of(o))
                        .collect()
                }
            }
        } else {
            client.list(kind, None, &selector).await?
        };

        for obj in objects {
            if let Some(uid) = obj.metadata.uid.clone() {
                owned.insert(uid, OwnedObject::new(kind, obj));
            }
        }
    }
    Ok(owned)
}
