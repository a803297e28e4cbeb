//! Immutable-field changes are deleted and recreated on the next pass

use std::sync::Arc;

use otel_reconcile::{ObjectKey, OwnedKind, OwnedObjects, Reconciler};

use super::fake_cluster::FakeCluster;
use super::*;

#[tokio::test]
async fn selector_change_deletes_then_next_pass_recreates() {
    let cluster = Arc::new(FakeCluster::new());
    let reconciler = Reconciler::new(cluster.clone());
    let key = ObjectKey::new(OwnedKind::Deployment, Some(NAMESPACE), "otel-collector");

    reconciler
        .reconcile(&owner(), vec![deployment("otel-collector", "old", 1)], OwnedObjects::new())
        .await
        .unwrap();
    cluster.reset_calls();

    let summary = reconciler
        .reconcile(&owner(), vec![deployment("otel-collector", "new", 1)], OwnedObjects::new())
        .await
        .unwrap();

    let calls = cluster.calls();
    assert_eq!(calls.deletes, vec![key.clone()]);
    assert!(calls.updates.is_empty());
    assert!(calls.creates.is_empty(), "recreation waits for the next pass");
    assert_eq!(summary.recreated, vec![key.clone()]);
    assert!(cluster.object(&key).is_none());

    cluster.reset_calls();
    reconciler
        .reconcile(&owner(), vec![deployment("otel-collector", "new", 1)], OwnedObjects::new())
        .await
        .unwrap();
    assert_eq!(cluster.calls().creates, vec![key.clone()]);
    assert_eq!(
        cluster.object(&key).unwrap().data["spec"]["selector"]["matchLabels"]["app"],
        "new"
    );
}

#[tokio::test]
async fn mutable_change_is_an_update() {
    let cluster = Arc::new(FakeCluster::new());
    let reconciler = Reconciler::new(cluster.clone());

    reconciler
        .reconcile(&owner(), vec![deployment("otel-collector", "app", 1)], OwnedObjects::new())
        .await
        .unwrap();
    cluster.reset_calls();

    reconciler
        .reconcile(&owner(), vec![deployment("otel-collector", "app", 3)], OwnedObjects::new())
        .await
        .unwrap();

    let calls = cluster.calls();
    assert_eq!(calls.updates.len(), 1);
    assert!(calls.deletes.is_empty());
}

#[tokio::test]
async fn server_side_immutable_rejection_deletes() {
    let cluster = Arc::new(FakeCluster::new());
    let reconciler = Reconciler::new(cluster.clone());
    let key = ObjectKey::new(OwnedKind::Service, Some(NAMESPACE), "otel-collector");

    reconciler
        .reconcile(&owner(), vec![service("otel-collector", 4317)], OwnedObjects::new())
        .await
        .unwrap();
    cluster.reject_updates_as_immutable(key.clone());
    cluster.reset_calls();

    let summary = reconciler
        .reconcile(&owner(), vec![service("otel-collector", 4318)], OwnedObjects::new())
        .await
        .unwrap();

    assert_eq!(cluster.calls().deletes, vec![key.clone()]);
    assert!(cluster.calls().updates.is_empty());
    assert_eq!(summary.recreated, vec![key]);
}
