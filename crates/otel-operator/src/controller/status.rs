//! Status conditions and events for parents
//!
//! A status is only written when something in it changed, so the watch
//! event caused by our own patch ends in a reconcile that writes nothing.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::Resource;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use otel_common::crd::{
    condition_reasons, condition_types, set_condition, ClusterObservabilityStatus, Condition,
    ConditionStatus, OpAMPBridgeStatus, OpenTelemetryCollectorStatus, TargetAllocatorStatus,
};
use otel_common::events::{actions, reasons};
use otel_common::Error;
use otel_reconcile::ApplySummary;

use super::{Context, ParentKind, ParentRef};

/// Fields every parent status carries
pub trait ParentStatus: Serialize + Default + Clone + PartialEq {
    /// Conditions list
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
    /// Human-readable message
    fn set_message(&mut self, message: Option<String>);
    /// Generation the status describes
    fn set_observed_generation(&mut self, generation: Option<i64>);
}

macro_rules! parent_status {
    ($($status:ty),*) => {$(
        impl ParentStatus for $status {
            fn conditions_mut(&mut self) -> &mut Vec<Condition> {
                &mut self.conditions
            }
            fn set_message(&mut self, message: Option<String>) {
                self.message = message;
            }
            fn set_observed_generation(&mut self, generation: Option<i64>) {
                self.observed_generation = generation;
            }
        }
    )*};
}

parent_status!(
    OpenTelemetryCollectorStatus,
    TargetAllocatorStatus,
    OpAMPBridgeStatus,
    ClusterObservabilityStatus
);

/// Apply `update` to a copy of `current`; `None` when nothing changed
pub fn updated<S: ParentStatus>(current: Option<&S>, update: impl FnOnce(&mut S)) -> Option<S> {
    let mut next = current.cloned().unwrap_or_default();
    update(&mut next);
    (current != Some(&next)).then_some(next)
}

/// The Ready condition for a reconcile outcome
pub fn ready_condition(outcome: &Result<ApplySummary, Error>, generation: Option<i64>) -> Condition {
    let condition = match outcome {
        Ok(_) => Condition::new(
            condition_types::READY,
            ConditionStatus::True,
            condition_reasons::RECONCILED,
            "All children converged",
        ),
        Err(e @ (Error::Build { .. } | Error::Validation { .. })) => Condition::new(
            condition_types::READY,
            ConditionStatus::False,
            condition_reasons::BUILD_FAILED,
            e.to_string(),
        ),
        Err(e) => Condition::new(
            condition_types::READY,
            ConditionStatus::False,
            condition_reasons::RECONCILE_FAILED,
            e.to_string(),
        ),
    };
    condition.with_generation(generation)
}

/// Record a reconcile outcome on `status`
pub fn record_outcome<S: ParentStatus>(
    status: &mut S,
    outcome: &Result<ApplySummary, Error>,
    generation: Option<i64>,
) {
    set_condition(status.conditions_mut(), ready_condition(outcome, generation));
    status.set_message(outcome.as_ref().err().map(ToString::to_string));
    status.set_observed_generation(generation);
}

/// Merge-patch the parent's status. A missing parent is not an error.
pub async fn write<S: ParentStatus>(ctx: &Context, parent: &ParentRef, status: &S) -> Result<(), Error> {
    let mut value = serde_json::to_value(status).map_err(|e| Error::serialization(e.to_string()))?;
    // absent keys are left alone by a merge patch
    if let Some(map) = value.as_object_mut() {
        map.entry("message").or_insert(Value::Null);
    }
    match ctx.parents.patch_status(parent, value).await {
        Err(e) if e.is_not_found() => {
            debug!(parent = %parent.key(), "Parent gone before status update");
            Ok(())
        }
        other => other,
    }
}

/// Events describing a reconcile outcome
pub async fn publish_outcome(
    ctx: &Context,
    object_ref: &ObjectReference,
    outcome: &Result<ApplySummary, Error>,
) {
    match outcome {
        Ok(summary) => {
            if !summary.pruned.is_empty() {
                ctx.events
                    .publish(
                        object_ref,
                        EventType::Normal,
                        reasons::PRUNED,
                        actions::PRUNE,
                        Some(format!("Deleted {}", join_keys(&summary.pruned))),
                    )
                    .await;
            }
            if !summary.recreated.is_empty() {
                ctx.events
                    .publish(
                        object_ref,
                        EventType::Normal,
                        reasons::RECREATED,
                        actions::RECONCILE,
                        Some(format!(
                            "Deleted for recreation after an immutable field change: {}",
                            join_keys(&summary.recreated)
                        )),
                    )
                    .await;
            }
            if summary.wrote_anything() {
                ctx.events
                    .publish(
                        object_ref,
                        EventType::Normal,
                        reasons::RECONCILED,
                        actions::RECONCILE,
                        Some(format!(
                            "{} created, {} updated, {} unchanged",
                            summary.created.len(),
                            summary.updated.len(),
                            summary.unchanged.len()
                        )),
                    )
                    .await;
            }
        }
        Err(e) => {
            let reason = match e {
                Error::Build { .. } | Error::Validation { .. } => reasons::VALIDATION_FAILED,
                _ => reasons::RECONCILE_FAILED,
            };
            ctx.events
                .publish(object_ref, EventType::Warning, reason, actions::RECONCILE, Some(e.to_string()))
                .await;
        }
    }
}

/// Write the outcome to the parent's status if it changed, then emit events
pub async fn report<K, S>(
    ctx: &Context,
    obj: &K,
    kind: ParentKind,
    current: Option<&S>,
    outcome: &Result<ApplySummary, Error>,
) -> Result<(), Error>
where
    K: Resource<DynamicType = ()>,
    S: ParentStatus,
{
    let generation = obj.meta().generation;
    if let Some(next) = updated(current, |s| record_outcome(s, outcome, generation)) {
        write(ctx, &ParentRef::of(kind, obj), &next).await?;
    }
    publish_outcome(ctx, &obj.object_ref(&()), outcome).await;
    Ok(())
}

fn join_keys(keys: &[otel_reconcile::ObjectKey]) -> String {
    keys.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::*;
    use crate::controller::MockParentClient;
    use otel_common::crd::{find_condition, OpenTelemetryCollector, OpenTelemetryCollectorSpec};
    use otel_reconcile::{ControllerRole, ObjectKey, OwnedKind};
    use std::sync::Arc;

    fn collector(status: Option<OpenTelemetryCollectorStatus>) -> OpenTelemetryCollector {
        let spec: OpenTelemetryCollectorSpec =
            serde_json::from_value(serde_json::json!({ "config": "receivers: {}" })).unwrap();
        let mut c = OpenTelemetryCollector::new("otel", spec);
        c.metadata.namespace = Some("observability".into());
        c.metadata.generation = Some(3);
        c.status = status;
        c
    }

    fn converged() -> ApplySummary {
        ApplySummary {
            unchanged: vec![ObjectKey::new(OwnedKind::ConfigMap, Some("observability"), "otel-collector")],
            ..Default::default()
        }
    }

    #[test]
    fn success_sets_ready_true_and_clears_message() {
        let mut status = OpenTelemetryCollectorStatus {
            message: Some("old failure".into()),
            ..Default::default()
        };
        record_outcome(&mut status, &Ok(converged()), Some(3));

        let ready = find_condition(&status.conditions, condition_types::READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.reason, condition_reasons::RECONCILED);
        assert_eq!(ready.observed_generation, Some(3));
        assert_eq!(status.message, None);
        assert_eq!(status.observed_generation, Some(3));
    }

    #[test]
    fn failures_carry_the_joined_error() {
        let err = Error::join(vec![
            Error::apply("Deployment", "observability/otel-collector", "denied"),
            Error::prune("Service", "observability/old", "timeout"),
        ])
        .unwrap();
        let ready = ready_condition(&Err(err), Some(1));
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, condition_reasons::RECONCILE_FAILED);
        assert!(ready.message.contains("denied"));
        assert!(ready.message.contains("timeout"));

        let build = ready_condition(&Err(Error::build("observability/otel", "bad yaml")), Some(1));
        assert_eq!(build.reason, condition_reasons::BUILD_FAILED);
    }

    #[test]
    fn unchanged_status_is_not_rewritten() {
        let mut first = OpenTelemetryCollectorStatus::default();
        record_outcome(&mut first, &Ok(converged()), Some(3));

        assert!(updated(Some(&first), |s| record_outcome(s, &Ok(converged()), Some(3))).is_none());
        assert!(updated(Some(&first), |s| record_outcome(s, &Ok(converged()), Some(4))).is_some());
    }

    #[tokio::test]
    async fn report_patches_status_and_emits_a_warning_on_failure() {
        let mut parents = MockParentClient::new();
        parents
            .expect_patch_status()
            .withf(|parent, status| {
                parent.key() == "observability/otel"
                    && status["conditions"][0]["status"] == "False"
                    && status["message"].as_str().is_some_and(|m| m.contains("denied"))
                    && status["observedGeneration"] == 3
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let mut events = MockEvents::new();
        events
            .expect_publish()
            .withf(|_, type_, reason, _, _| *type_ == EventType::Warning && reason == reasons::RECONCILE_FAILED)
            .times(1)
            .return_const(());

        let ctx = context_with(
            ControllerRole::Collector,
            MockObjects::new(),
            parents,
            Arc::new(events),
            FixedProbe::default(),
        )
        .await;
        let c = collector(None);
        let outcome = Err(Error::apply("Deployment", "observability/otel-collector", "denied"));
        report(&ctx, &c, ParentKind::Collector, c.status.as_ref(), &outcome)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn converged_parent_gets_no_patch_and_no_event() {
        let mut status = OpenTelemetryCollectorStatus::default();
        record_outcome(&mut status, &Ok(converged()), Some(3));

        let mut parents = MockParentClient::new();
        parents.expect_patch_status().never();
        let mut events = MockEvents::new();
        events.expect_publish().never();

        let ctx = context_with(
            ControllerRole::Collector,
            MockObjects::new(),
            parents,
            Arc::new(events),
            FixedProbe::default(),
        )
        .await;
        let c = collector(Some(status));
        report(&ctx, &c, ParentKind::Collector, c.status.as_ref(), &Ok(converged()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_parent_is_ignored() {
        let mut parents = MockParentClient::new();
        parents.expect_patch_status().returning(|_, _| {
            Err(api_error(404, "NotFound"))
        });
        let ctx = context(ControllerRole::Collector, MockObjects::new(), parents).await;
        let c = collector(None);
        let status = OpenTelemetryCollectorStatus::default();
        write(&ctx, &ParentRef::of(ParentKind::Collector, &c), &status)
            .await
            .unwrap();
    }
}
