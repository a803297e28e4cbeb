//! ClusterObservability controller
//!
//! Only one ClusterObservability may be active per cluster. Every reconcile
//! lists the live instances and re-runs the election, so deleting the active
//! instance promotes the next oldest one. Losers poll so they notice that.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{info, instrument, warn};

use otel_common::crd::{
    condition_reasons, condition_types, remove_condition, set_condition, ClusterObservability,
    ClusterObservabilityPhase, Condition, ConditionStatus,
};
use otel_common::events::{actions, reasons};
use otel_common::kube_utils::object_key;
use otel_common::Error;
use otel_reconcile::{elect, Election, SingletonCandidate};

use super::{converge, finalize, has_finalizer, owner_info, status, Context, ParentKind, ParentRef};
use crate::manifests::{self, labels::CLUSTER_OBSERVABILITY_COMPONENT};

/// How often a losing instance re-checks the election
pub const LOSER_REQUEUE: Duration = Duration::from_secs(30);

const KIND: &str = "ClusterObservability";

/// Election candidate for a live instance, `None` without uid or creation time
fn candidate(instance: &ClusterObservability) -> Option<SingletonCandidate> {
    Some(SingletonCandidate {
        namespace: instance.namespace()?,
        name: instance.name_any(),
        uid: instance.uid()?,
        creation_timestamp: instance.creation_timestamp()?.0,
    })
}

/// Run the election among the live instances, always counting `this`
pub fn run_election(this: &ClusterObservability, instances: &[ClusterObservability]) -> Option<Election> {
    let this_key = object_key(this.namespace().as_deref(), &this.name_any());
    let mut candidates: Vec<SingletonCandidate> = instances
        .iter()
        .filter(|i| i.metadata.deletion_timestamp.is_none())
        .filter_map(candidate)
        .collect();
    if !candidates.iter().any(|c| c.key() == this_key) {
        candidates.extend(candidate(this));
    }
    elect(&candidates, &this_key)
}

/// Reconcile one instance
#[instrument(skip(instance, ctx), fields(namespace = %instance.namespace().unwrap_or_default(), name = %instance.name_any()))]
pub async fn reconcile(instance: Arc<ClusterObservability>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = object_key(instance.namespace().as_deref(), &instance.name_any());
    let _gate = ctx.gate.acquire(&key).await;
    let parent = ParentRef::of(ParentKind::ClusterObservability, instance.as_ref());
    let owner = owner_info(instance.as_ref(), CLUSTER_OBSERVABILITY_COMPONENT)?;

    if instance.metadata.deletion_timestamp.is_some() {
        if has_finalizer(instance.as_ref()) {
            info!("ClusterObservability deleted, releasing finalizer");
            finalize(&ctx, &parent, &owner).await?;
        }
        ctx.forget(&key);
        return Ok(Action::await_change());
    }

    if !has_finalizer(instance.as_ref()) {
        ctx.parents.add_finalizer(&parent).await?;
    }

    let instances = ctx.parents.list_cluster_observabilities().await?;
    let Some(election) = run_election(&instance, &instances) else {
        warn!("Instance has no uid or creation time yet, retrying");
        return Ok(Action::requeue(LOSER_REQUEUE));
    };

    let kinds = ctx.owned_kinds();
    if !election.is_winner {
        // A demoted former winner still owns its agent; an empty desired set prunes it.
        let released = converge(&ctx, &owner, Vec::new(), &kinds, None).await;
        report_conflict(&ctx, &instance, &parent, &election).await?;
        let released = released?;
        if !released.pruned.is_empty() {
            info!(pruned = released.pruned.len(), "Released children of a demoted instance");
        }
        ctx.record_success(&key);
        return Ok(Action::requeue(LOSER_REQUEUE));
    }

    for loser in &election.losers {
        if let Some(other) = instances.iter().find(|i| i.uid().as_deref() == Some(loser.uid.as_str())) {
            ctx.events
                .publish(
                    &other.object_ref(&()),
                    EventType::Warning,
                    reasons::CONFLICTED,
                    actions::ELECT,
                    Some(format!("{key} is the active {KIND}; this instance is ignored")),
                )
                .await;
        }
    }

    let outcome = match manifests::cluster_observability::build(&instance) {
        Ok(desired) => converge(&ctx, &owner, desired, &kinds, None).await,
        Err(e) => Err(e),
    };

    let generation = instance.meta().generation;
    let next = status::updated(instance.status.as_ref(), |s| {
        status::record_outcome(s, &outcome, generation);
        remove_condition(&mut s.conditions, condition_types::CONFLICTED);
        s.phase = if outcome.is_ok() {
            ClusterObservabilityPhase::Ready
        } else {
            ClusterObservabilityPhase::Pending
        };
        s.active_instance = Some(key.clone());
    });
    let reported = match next {
        Some(next) => status::write(&ctx, &parent, &next).await,
        None => Ok(()),
    };
    status::publish_outcome(&ctx, &instance.object_ref(&()), &outcome).await;
    outcome?;
    reported?;

    ctx.record_success(&key);
    Ok(Action::await_change())
}

async fn report_conflict(
    ctx: &Context,
    instance: &ClusterObservability,
    parent: &ParentRef,
    election: &Election,
) -> Result<(), Error> {
    let winner = election.winner.key();
    let conflict = Error::Conflicted {
        kind: KIND.to_string(),
        winner: winner.clone(),
    };
    warn!(winner = %winner, "Another ClusterObservability is active");

    let generation = instance.meta().generation;
    let next = status::updated(instance.status.as_ref(), |s| {
        set_condition(
            &mut s.conditions,
            Condition::new(
                condition_types::CONFLICTED,
                ConditionStatus::True,
                condition_reasons::MULTIPLE_INSTANCES,
                conflict.to_string(),
            )
            .with_generation(generation),
        );
        set_condition(
            &mut s.conditions,
            Condition::new(
                condition_types::READY,
                ConditionStatus::False,
                condition_reasons::MULTIPLE_INSTANCES,
                format!("{winner} is the active instance"),
            )
            .with_generation(generation),
        );
        s.phase = ClusterObservabilityPhase::Conflicted;
        s.active_instance = Some(winner.clone());
        s.message = Some(conflict.to_string());
        s.observed_generation = generation;
    });

    if let Some(next) = next {
        status::write(ctx, parent, &next).await?;
        ctx.events
            .publish(
                &instance.object_ref(&()),
                EventType::Warning,
                reasons::CONFLICTED,
                actions::ELECT,
                Some(conflict.to_string()),
            )
            .await;
    }
    Ok(())
}
