//! OpenTelemetryCollector controller

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use otel_common::crd::{ManagementState, OpenTelemetryCollector};
use otel_common::events::{actions, reasons};
use otel_common::kube_utils::object_key;
use otel_common::Error;
use otel_reconcile::OwnedKind;

use super::{converge, finalize, has_finalizer, owner_info, status, Context, ParentKind, ParentRef, Retention};
use crate::manifests::{self, labels::COLLECTOR_COMPONENT};

/// Reconcile one collector
#[instrument(skip(collector, ctx), fields(namespace = %collector.namespace().unwrap_or_default(), name = %collector.name_any()))]
pub async fn reconcile(collector: Arc<OpenTelemetryCollector>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = object_key(collector.namespace().as_deref(), &collector.name_any());
    let _gate = ctx.gate.acquire(&key).await;
    let parent = ParentRef::of(ParentKind::Collector, collector.as_ref());
    let owner = owner_info(collector.as_ref(), COLLECTOR_COMPONENT)?;

    if collector.metadata.deletion_timestamp.is_some() {
        if has_finalizer(collector.as_ref()) {
            info!("Collector deleted, cleaning up cluster-scoped children");
            finalize(&ctx, &parent, &owner).await?;
        }
        ctx.forget(&key);
        return Ok(Action::await_change());
    }

    if collector.spec.management_state == ManagementState::Unmanaged {
        debug!("Collector is unmanaged, skipping");
        return Ok(Action::await_change());
    }

    if !has_finalizer(collector.as_ref()) {
        ctx.parents.add_finalizer(&parent).await?;
    }

    let kinds = ctx.owned_kinds();
    if collector.spec.target_allocator.enabled && !kinds.contains(&OwnedKind::TargetAllocator) {
        warn!("Target allocator requested but TargetAllocator objects are not managed here");
        ctx.events
            .publish(
                &collector.object_ref(&()),
                EventType::Warning,
                reasons::TARGET_ALLOCATOR_UNAVAILABLE,
                actions::RECONCILE,
                Some(
                    "targetAllocator.enabled is set but the TargetAllocator CRD is missing or its \
                     feature gate is off; no allocator is deployed"
                        .to_string(),
                ),
            )
            .await;
    }
    let outcome = match manifests::collector::build(&collector, &kinds) {
        Ok(desired) => {
            let retention = Retention {
                component: COLLECTOR_COMPONENT,
                versions: collector.spec.config_versions,
            };
            converge(&ctx, &owner, desired, &kinds, Some(retention)).await
        }
        Err(e) => Err(e),
    };

    let reported = status::report(
        &ctx,
        collector.as_ref(),
        ParentKind::Collector,
        collector.status.as_ref(),
        &outcome,
    )
    .await;
    let summary = outcome?;
    reported?;

    debug!(
        created = summary.created.len(),
        updated = summary.updated.len(),
        unchanged = summary.unchanged.len(),
        pruned = summary.pruned.len(),
        "Collector converged"
    );
    ctx.record_success(&key);
    Ok(Action::await_change())
}
