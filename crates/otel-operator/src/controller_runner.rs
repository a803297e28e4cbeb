//! Controller runner - builds controller futures for each parent kind
//!
//! Each `build_*` function returns a Vec of boxed futures that the caller
//! drives. Every controller watches its parent kind, the namespaced child
//! kinds it owns (feeding its owner index from the same streams) and the
//! capability registry, which re-reconciles every parent on a change.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use otel_common::crd::{ClusterObservability, OpAMPBridge, OpenTelemetryCollector, TargetAllocator};
use otel_common::featuregate::FeatureGates;
use otel_common::{labels, OPERATOR_NAME};
use otel_reconcile::{CapabilityRegistry, ControllerRole};

use crate::controller::{self, error_policy, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A controller future ready to be driven
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Settings shared by every controller
#[derive(Clone)]
pub struct ControllerSettings {
    /// Capability snapshot and change notifications
    pub registry: Arc<CapabilityRegistry>,
    /// Startup feature gates
    pub gates: Arc<FeatureGates>,
    /// Maximum concurrent reconciles per controller
    pub concurrency: u16,
    /// Restrict watches to one namespace
    pub watch_namespace: Option<String>,
}

/// Build the OpenTelemetryCollector controller
pub fn build_collector_controllers(client: Client, settings: &ControllerSettings) -> Vec<ControllerFuture> {
    let ctx = context(ControllerRole::Collector, &client, settings);
    tracing::info!("- OpenTelemetryCollector controller");
    vec![Box::pin(
        controller_for::<OpenTelemetryCollector>(&client, settings, &ctx)
            .run(controller::collector::reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("OpenTelemetryCollector")),
    )]
}

/// Build the TargetAllocator controller
pub fn build_target_allocator_controllers(client: Client, settings: &ControllerSettings) -> Vec<ControllerFuture> {
    let ctx = context(ControllerRole::TargetAllocator, &client, settings);
    tracing::info!("- TargetAllocator controller");
    vec![Box::pin(
        controller_for::<TargetAllocator>(&client, settings, &ctx)
            .run(controller::target_allocator::reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("TargetAllocator")),
    )]
}

/// Build the OpAMPBridge controller
pub fn build_bridge_controllers(client: Client, settings: &ControllerSettings) -> Vec<ControllerFuture> {
    let ctx = context(ControllerRole::OpAMPBridge, &client, settings);
    tracing::info!("- OpAMPBridge controller");
    vec![Box::pin(
        controller_for::<OpAMPBridge>(&client, settings, &ctx)
            .run(controller::bridge::reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("OpAMPBridge")),
    )]
}

/// Build the ClusterObservability controller.
///
/// Instances are watched cluster-wide even with a watch namespace, since the
/// singleton election has to see every instance.
pub fn build_cluster_observability_controllers(
    client: Client,
    settings: &ControllerSettings,
) -> Vec<ControllerFuture> {
    let ctx = context(ControllerRole::ClusterObservability, &client, settings);
    let settings = ControllerSettings {
        watch_namespace: None,
        ..settings.clone()
    };
    tracing::info!("- ClusterObservability controller");
    vec![Box::pin(
        controller_for::<ClusterObservability>(&client, &settings, &ctx)
            .run(controller::cluster_observability::reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("ClusterObservability")),
    )]
}

/// Every controller the operator runs
pub fn build_all_controllers(client: Client, settings: &ControllerSettings) -> Vec<ControllerFuture> {
    let mut controllers = build_collector_controllers(client.clone(), settings);
    if settings.gates.target_allocator_cr() {
        controllers.extend(build_target_allocator_controllers(client.clone(), settings));
    }
    controllers.extend(build_bridge_controllers(client.clone(), settings));
    controllers.extend(build_cluster_observability_controllers(client, settings));
    controllers
}

fn context(role: ControllerRole, client: &Client, settings: &ControllerSettings) -> Arc<Context> {
    Arc::new(Context::new(
        role,
        client.clone(),
        settings.registry.clone(),
        settings.gates.clone(),
    ))
}

/// Parent watch plus one watch per namespaced child kind owned right now.
///
/// Kinds that only become available later are not watched; lookups for
/// them fall back to listing because their index never syncs.
fn controller_for<K>(client: &Client, settings: &ControllerSettings, ctx: &Arc<Context>) -> Controller<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    let parents: Api<K> = match &settings.watch_namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let mut controller = Controller::new(parents, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .with_config(ControllerConfig::default().concurrency(settings.concurrency));

    let managed = format!("{}={}", labels::MANAGED_BY, OPERATOR_NAME);
    for kind in ctx.owned_kinds().into_iter().filter(|k| k.is_namespaced()) {
        let ar = kind.api_resource();
        let children: Api<DynamicObject> = match &settings.watch_namespace {
            Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
            None => Api::all_with(client.clone(), &ar),
        };
        let events = watcher::watcher(
            children,
            WatcherConfig::default()
                .labels(&managed)
                .timeout(WATCH_TIMEOUT_SECS),
        )
        .default_backoff();
        let touched = ctx.index.clone().observe_stream(kind, events).touched_objects();
        tracing::debug!(kind = %kind, "Watching owned kind");
        controller = controller.owns_stream_with(touched, ar);
    }

    controller
        .reconcile_all_on(settings.registry.changes())
        .shutdown_on_signal()
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
