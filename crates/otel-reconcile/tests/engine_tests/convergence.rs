//! Repeated passes converge and orphans are pruned exactly once

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use otel_reconcile::retention::withhold_config_versions;
use otel_reconcile::{
    collect_owned, DesiredObject, ObjectKey, OwnedKind, OwnedObject, OwnedObjects, OwnerIndex,
    Reconciler,
};

use super::fake_cluster::FakeCluster;
use super::*;

fn collector_children() -> Vec<DesiredObject> {
    vec![
        config_map("otel-collector-1a2b3c4d", "receivers: {otlp: {}}"),
        service("otel-collector", 4317),
        deployment("otel-collector", "otel-collector", 2),
        cluster_role("otel-collector"),
    ]
}

const KINDS: &[OwnedKind] = &[
    OwnedKind::ConfigMap,
    OwnedKind::Service,
    OwnedKind::Deployment,
    OwnedKind::ClusterRole,
];

#[tokio::test]
async fn second_pass_issues_no_writes() {
    let cluster = Arc::new(FakeCluster::new());
    let reconciler = Reconciler::new(cluster.clone());

    let first = reconciler
        .reconcile(&owner(), collector_children(), OwnedObjects::new())
        .await
        .unwrap();
    assert_eq!(first.created.len(), 4);
    assert_eq!(cluster.calls().creates.len(), 4);
    assert_eq!(cluster.len(), 4);

    cluster.reset_calls();
    let owned = collect_owned(cluster.as_ref(), &OwnerIndex::new(), &owner(), KINDS)
        .await
        .unwrap();
    assert_eq!(owned.len(), 4, "cluster-scoped role found by label selector");

    let second = reconciler
        .reconcile(&owner(), collector_children(), owned)
        .await
        .unwrap();

    assert!(!second.wrote_anything());
    assert_eq!(second.unchanged.len(), 4);
    assert_eq!(cluster.calls().writes(), 0);
}

#[tokio::test]
async fn server_defaults_survive_an_update() {
    let cluster = Arc::new(FakeCluster::new());
    let reconciler = Reconciler::new(cluster.clone());
    let key = ObjectKey::new(OwnedKind::Service, Some(NAMESPACE), "otel-collector");

    reconciler
        .reconcile(&owner(), vec![service("otel-collector", 4317)], OwnedObjects::new())
        .await
        .unwrap();
    reconciler
        .reconcile(&owner(), vec![service("otel-collector", 4318)], OwnedObjects::new())
        .await
        .unwrap();

    let svc = cluster.object(&key).unwrap();
    assert_eq!(svc.data["spec"]["clusterIP"], "10.96.0.10");
    assert_eq!(svc.data["spec"]["ports"][0]["port"], 4318);
    assert_eq!(cluster.calls().updates, vec![key]);
}

#[tokio::test]
async fn orphans_are_pruned_exactly_once() {
    let cluster = Arc::new(FakeCluster::new());
    let a_old = object(OwnedKind::ConfigMap, "a", json!({ "data": { "v": "1" } }));
    let c_orphan = object(OwnedKind::Service, "c", json!({ "spec": { "ports": [] } }));
    let uid_a = cluster.seed(OwnedKind::ConfigMap, a_old);
    let uid_c = cluster.seed(OwnedKind::Service, c_orphan);

    let a_key = ObjectKey::new(OwnedKind::ConfigMap, Some(NAMESPACE), "a");
    let b_key = ObjectKey::new(OwnedKind::ConfigMap, Some(NAMESPACE), "b");
    let c_key = ObjectKey::new(OwnedKind::Service, Some(NAMESPACE), "c");

    let owned: OwnedObjects = BTreeMap::from([
        (uid_a, OwnedObject::new(OwnedKind::ConfigMap, cluster.object(&a_key).unwrap())),
        (uid_c, OwnedObject::new(OwnedKind::Service, cluster.object(&c_key).unwrap())),
    ]);

    let summary = Reconciler::new(cluster.clone())
        .reconcile(&owner(), vec![config_map("a", "2"), config_map("b", "1")], owned)
        .await
        .unwrap();

    let calls = cluster.calls();
    assert_eq!(calls.deletes, vec![c_key.clone()]);
    assert_eq!(calls.updates, vec![a_key]);
    assert_eq!(calls.creates, vec![b_key]);
    assert_eq!(summary.pruned, vec![c_key]);
}

#[tokio::test]
async fn orphan_already_gone_is_not_an_error() {
    let cluster = Arc::new(FakeCluster::new());
    let ghost = object(OwnedKind::ConfigMap, "ghost", json!({}));
    let owned: OwnedObjects = BTreeMap::from([(
        "uid-ghost".to_string(),
        OwnedObject::new(OwnedKind::ConfigMap, ghost),
    )]);

    let summary = Reconciler::new(cluster.clone())
        .reconcile(&owner(), vec![], owned)
        .await
        .unwrap();
    assert_eq!(summary.pruned.len(), 1);
    assert_eq!(cluster.calls().writes(), 0);
}

#[tokio::test]
async fn retained_config_versions_survive_pruning() {
    let cluster = Arc::new(FakeCluster::new());
    let mut owned = OwnedObjects::new();
    for version in 1..=5 {
        let mut cm = object(
            OwnedKind::ConfigMap,
            &format!("otel-collector-v{version}"),
            json!({ "data": { "collector.yaml": version.to_string() } }),
        );
        cm.metadata.labels = Some(BTreeMap::from([(
            otel_common::labels::COMPONENT.to_string(),
            "opentelemetry-collector".to_string(),
        )]));
        let uid = cluster.seed(OwnedKind::ConfigMap, cm);
        let key = ObjectKey::new(OwnedKind::ConfigMap, Some(NAMESPACE), &format!("otel-collector-v{version}"));
        owned.insert(uid, OwnedObject::new(OwnedKind::ConfigMap, cluster.object(&key).unwrap()));
    }

    let withheld = withhold_config_versions(&mut owned, "opentelemetry-collector", 2);
    assert_eq!(withheld, 3);

    Reconciler::new(cluster.clone())
        .reconcile(&owner(), vec![config_map("otel-collector-v6", "6")], owned)
        .await
        .unwrap();

    let deleted: Vec<_> = cluster.calls().deletes.into_iter().map(|k| k.name).collect();
    assert_eq!(deleted, vec!["otel-collector-v1", "otel-collector-v2"]);
    assert_eq!(cluster.len(), 4);
}
