//! Optimistic-concurrency retry and per-key single flight

use std::sync::Arc;
use std::time::Duration;

use otel_common::Error;
use otel_reconcile::{collect_owned, KeyedGate, ObjectKey, OwnedKind, OwnedObjects, OwnerIndex, Reconciler};

use super::fake_cluster::FakeCluster;
use super::*;

#[tokio::test]
async fn conflicts_are_retried_locally() {
    let cluster = Arc::new(FakeCluster::new());
    let reconciler = Reconciler::new(cluster.clone());
    let key = ObjectKey::new(OwnedKind::ConfigMap, Some(NAMESPACE), "otel-collector");

    reconciler
        .reconcile(&owner(), vec![config_map("otel-collector", "a")], OwnedObjects::new())
        .await
        .unwrap();
    cluster.inject_conflicts(key.clone(), 2);
    cluster.reset_calls();

    let summary = reconciler
        .reconcile(&owner(), vec![config_map("otel-collector", "b")], OwnedObjects::new())
        .await
        .unwrap();

    assert_eq!(summary.updated, vec![key.clone()]);
    assert_eq!(cluster.calls().updates, vec![key.clone()]);
    assert_eq!(cluster.object(&key).unwrap().data["data"]["collector.yaml"], "b");
}

#[tokio::test]
async fn exhausted_conflicts_surface_and_never_prune_the_child() {
    let cluster = Arc::new(FakeCluster::new());
    let reconciler = Reconciler::new(cluster.clone());
    let key = ObjectKey::new(OwnedKind::ConfigMap, Some(NAMESPACE), "otel-collector");

    reconciler
        .reconcile(&owner(), vec![config_map("otel-collector", "a")], OwnedObjects::new())
        .await
        .unwrap();
    let owned = collect_owned(cluster.as_ref(), &OwnerIndex::new(), &owner(), &[OwnedKind::ConfigMap])
        .await
        .unwrap();
    cluster.inject_conflicts(key.clone(), 100);
    cluster.reset_calls();

    let err = reconciler
        .reconcile(&owner(), vec![config_map("otel-collector", "b")], owned)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Apply { .. }), "got {err:?}");
    assert!(cluster.calls().deletes.is_empty());
    assert!(cluster.object(&key).is_some());
}

#[tokio::test]
async fn same_parent_reconciles_never_overlap() {
    let cluster = Arc::new(FakeCluster::with_latency(Duration::from_millis(2)));
    let reconciler = Arc::new(Reconciler::new(cluster.clone()));
    let gate = Arc::new(KeyedGate::new());

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let reconciler = reconciler.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                let _guard = gate.acquire("observability/otel").await;
                reconciler
                    .reconcile(
                        &owner(),
                        vec![config_map("otel-collector", &i.to_string())],
                        OwnedObjects::new(),
                    )
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(cluster.max_in_flight(), 1);
    assert!(gate.is_empty());
}

#[tokio::test]
async fn different_parents_run_concurrently() {
    let cluster = Arc::new(FakeCluster::with_latency(Duration::from_millis(20)));
    let reconciler = Arc::new(Reconciler::new(cluster.clone()));
    let gate = Arc::new(KeyedGate::new());

    let tasks: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|name| {
            let reconciler = reconciler.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                let _guard = gate.acquire(&format!("observability/{name}")).await;
                reconciler
                    .reconcile(&owner(), vec![config_map(name, "x")], OwnedObjects::new())
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(cluster.max_in_flight() >= 2);
}
