//! Kubernetes Event recording for the operator's controllers.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::warn;

/// Publishes Kubernetes Events against a resource.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`.
    ///
    /// `reason` is the machine-readable REASON column (e.g. "Conflicted"),
    /// `action` the ACTION column, `note` the free-form message.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production publisher wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `controller_name` becomes the reporting component of every Event.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops everything, for tests and dry runs.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// All children converged
    pub const RECONCILED: &str = "Reconciled";
    /// At least one child failed to apply or prune
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    /// An orphaned child was deleted
    pub const PRUNED: &str = "Pruned";
    /// A child was deleted and recreated because of an immutable field change
    pub const RECREATED: &str = "Recreated";
    /// Spec could not be turned into children
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// Another instance of a singleton kind is active
    pub const CONFLICTED: &str = "Conflicted";
    /// This instance of a singleton kind is active
    pub const ACTIVE: &str = "Active";
    /// A requested TargetAllocator cannot be managed in this cluster
    pub const TARGET_ALLOCATOR_UNAVAILABLE: &str = "TargetAllocatorUnavailable";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Deleting orphaned children
    pub const PRUNE: &str = "Prune";
    /// Singleton election
    pub const ELECT: &str = "Elect";
}
