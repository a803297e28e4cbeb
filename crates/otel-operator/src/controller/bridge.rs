//! OpAMPBridge controller

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{info, instrument};

use otel_common::crd::OpAMPBridge;
use otel_common::kube_utils::object_key;
use otel_common::Error;

use super::{converge, finalize, has_finalizer, owner_info, status, Context, ParentKind, ParentRef};
use crate::manifests::{self, labels::BRIDGE_COMPONENT};

/// Reconcile one bridge
#[instrument(skip(bridge, ctx), fields(namespace = %bridge.namespace().unwrap_or_default(), name = %bridge.name_any()))]
pub async fn reconcile(bridge: Arc<OpAMPBridge>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = object_key(bridge.namespace().as_deref(), &bridge.name_any());
    let _gate = ctx.gate.acquire(&key).await;
    let parent = ParentRef::of(ParentKind::OpAMPBridge, bridge.as_ref());
    let owner = owner_info(bridge.as_ref(), BRIDGE_COMPONENT)?;

    if bridge.metadata.deletion_timestamp.is_some() {
        if has_finalizer(bridge.as_ref()) {
            info!("Bridge deleted, releasing finalizer");
            finalize(&ctx, &parent, &owner).await?;
        }
        ctx.forget(&key);
        return Ok(Action::await_change());
    }

    if !has_finalizer(bridge.as_ref()) {
        ctx.parents.add_finalizer(&parent).await?;
    }

    let kinds = ctx.owned_kinds();
    let outcome = match manifests::bridge::build(&bridge) {
        Ok(desired) => converge(&ctx, &owner, desired, &kinds, None).await,
        Err(e) => Err(e),
    };

    let reported = status::report(
        &ctx,
        bridge.as_ref(),
        ParentKind::OpAMPBridge,
        bridge.status.as_ref(),
        &outcome,
    )
    .await;
    outcome?;
    reported?;

    ctx.record_success(&key);
    Ok(Action::await_change())
}
