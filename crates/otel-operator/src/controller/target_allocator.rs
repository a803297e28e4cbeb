//! TargetAllocator controller
//!
//! Allocators have no cluster-scoped children, so deletion is left entirely
//! to owner-reference garbage collection and no finalizer is used.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, instrument};

use otel_common::crd::TargetAllocator;
use otel_common::kube_utils::object_key;
use otel_common::Error;

use super::{converge, owner_info, status, Context, ParentKind};
use crate::manifests::{self, labels::TARGET_ALLOCATOR_COMPONENT};

/// Reconcile one target allocator
#[instrument(skip(allocator, ctx), fields(namespace = %allocator.namespace().unwrap_or_default(), name = %allocator.name_any()))]
pub async fn reconcile(allocator: Arc<TargetAllocator>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = object_key(allocator.namespace().as_deref(), &allocator.name_any());
    let _gate = ctx.gate.acquire(&key).await;

    if allocator.metadata.deletion_timestamp.is_some() {
        ctx.forget(&key);
        return Ok(Action::await_change());
    }

    let owner = owner_info(allocator.as_ref(), TARGET_ALLOCATOR_COMPONENT)?;
    let kinds = ctx.owned_kinds();
    let outcome = match manifests::target_allocator::build(&allocator, &kinds) {
        Ok(desired) => converge(&ctx, &owner, desired, &kinds, None).await,
        Err(e) => Err(e),
    };

    let reported = status::report(
        &ctx,
        allocator.as_ref(),
        ParentKind::TargetAllocator,
        allocator.status.as_ref(),
        &outcome,
    )
    .await;
    let summary = outcome?;
    reported?;

    debug!(pruned = summary.pruned.len(), "Target allocator converged");
    ctx.record_success(&key);
    Ok(Action::await_change())
}
