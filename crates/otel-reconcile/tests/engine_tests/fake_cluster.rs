//! In-memory cluster implementing `ObjectClient`

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use kube::error::ErrorResponse;
use kube::ResourceExt;
use serde_json::json;

use otel_common::Error;
use otel_reconcile::{ObjectClient, ObjectKey, OwnedKind};

/// Writes the cluster received, in order
#[derive(Debug, Default, Clone)]
pub struct Calls {
    pub creates: Vec<ObjectKey>,
    pub updates: Vec<ObjectKey>,
    pub deletes: Vec<ObjectKey>,
}

impl Calls {
    pub fn writes(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    next_version: u64,
    clock: i64,
    calls: Calls,
    conflicts: HashMap<ObjectKey, u32>,
    reject_immutable: HashSet<ObjectKey>,
}

/// Single-namespace-agnostic fake of the API server's object verbs
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn api_error(code: u16, reason: &str, message: &str) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: message.into(),
        reason: reason.into(),
        code,
    }))
}

fn label_selector_matches(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.labels();
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| pair.split_once('='))
        .all(|(k, v)| labels.get(k).is_some_and(|have| have == v))
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long, so overlapping reconciles would be visible
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Store an object as if someone created it earlier; returns its UID
    pub fn seed(&self, kind: OwnedKind, obj: DynamicObject) -> String {
        let mut state = self.state.lock().unwrap();
        let stored = Self::admit(&mut state, kind, obj);
        let uid = stored.uid().unwrap();
        state.objects.insert(ObjectKey::of(kind, &stored), stored);
        uid
    }

    /// The next `times` replaces of `key` fail with 409 as if another writer won
    pub fn inject_conflicts(&self, key: ObjectKey, times: u32) {
        self.state.lock().unwrap().conflicts.insert(key, times);
    }

    /// Replaces of `key` fail with 422 "field is immutable"
    pub fn reject_updates_as_immutable(&self, key: ObjectKey) {
        self.state.lock().unwrap().reject_immutable.insert(key);
    }

    pub fn object(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn reset_calls(&self) {
        self.state.lock().unwrap().calls = Calls::default();
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Assign identity, version, creation time and server defaults
    fn admit(state: &mut State, kind: OwnedKind, mut obj: DynamicObject) -> DynamicObject {
        state.next_version += 1;
        state.clock += 1;
        let name = obj.name_any();
        obj.metadata.uid = Some(format!("uid-{}-{}-{}", kind, name, state.next_version));
        obj.metadata.resource_version = Some(state.next_version.to_string());
        obj.metadata.creation_timestamp = Some(Time(
            chrono::DateTime::from_timestamp(1_700_000_000 + state.clock, 0).unwrap(),
        ));
        if kind == OwnedKind::Service {
            if let Some(spec) = obj.data.get_mut("spec").and_then(|s| s.as_object_mut()) {
                spec.entry("clusterIP").or_insert(json!("10.96.0.10"));
            }
        }
        obj
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        InFlight(&self.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectClient for FakeCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, Error> {
        let _call = self.enter().await;
        Ok(self.state.lock().unwrap().objects.get(key).cloned())
    }

    async fn list(
        &self,
        kind: OwnedKind,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        let _call = self.enter().await;
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .filter(|(k, _)| namespace.is_none() || k.namespace == namespace)
            .filter(|(_, o)| label_selector_matches(o, label_selector))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, kind: OwnedKind, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let _call = self.enter().await;
        let mut state = self.state.lock().unwrap();
        let key = ObjectKey::of(kind, obj);
        if state.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", "object already exists"));
        }
        let stored = Self::admit(&mut state, kind, obj.clone());
        state.objects.insert(key.clone(), stored.clone());
        state.calls.creates.push(key);
        Ok(stored)
    }

    async fn replace(&self, kind: OwnedKind, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let _call = self.enter().await;
        let mut state = self.state.lock().unwrap();
        let key = ObjectKey::of(kind, obj);

        let Some(current) = state.objects.get(&key).cloned() else {
            return Err(api_error(404, "NotFound", "not found"));
        };

        let conflict = match state.conflicts.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        if conflict {
            // someone else wrote in between
            state.next_version += 1;
            let version = state.next_version.to_string();
            if let Some(stored) = state.objects.get_mut(&key) {
                stored.metadata.resource_version = Some(version);
            }
            return Err(api_error(409, "Conflict", "the object has been modified"));
        }

        if obj.metadata.resource_version != current.metadata.resource_version {
            return Err(api_error(409, "Conflict", "the object has been modified"));
        }

        if state.reject_immutable.contains(&key) {
            return Err(api_error(422, "Invalid", "spec.selector: Invalid value: field is immutable"));
        }

        state.next_version += 1;
        let mut stored = obj.clone();
        stored.metadata.resource_version = Some(state.next_version.to_string());
        state.objects.insert(key.clone(), stored.clone());
        state.calls.updates.push(key);
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), Error> {
        let _call = self.enter().await;
        let mut state = self.state.lock().unwrap();
        if state.objects.remove(key).is_none() {
            return Err(api_error(404, "NotFound", "not found"));
        }
        state.calls.deletes.push(key.clone());
        Ok(())
    }
}
