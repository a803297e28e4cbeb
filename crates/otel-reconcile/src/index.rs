//! Owner-key index over watched children
//!
//! Fed from the same watch streams that trigger reconciles. For every
//! namespaced kind it keeps one bucket per `(namespace, owner kind, owner
//! name)` taken from the child's controller owner reference, so finding a
//! parent's children does not scan unrelated objects.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use futures::{Stream, TryStreamExt};
use kube::api::DynamicObject;
use kube::runtime::watcher;
use kube::ResourceExt;
use tracing::debug;

use crate::diff;
use crate::kind::OwnedKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OwnerKey {
    namespace: String,
    owner_kind: String,
    owner_name: String,
}

#[derive(Default)]
struct KindIndex {
    synced: bool,
    buckets: HashMap<OwnerKey, BTreeMap<String, DynamicObject>>,
    location: HashMap<String, OwnerKey>,
    relist: Option<Vec<DynamicObject>>,
}

impl KindIndex {
    fn insert(&mut self, obj: DynamicObject) {
        let Some(uid) = obj.uid() else { return };
        self.remove(&uid);

        let Some(owner) = obj.owner_references().iter().find(|r| r.controller == Some(true)) else {
            return;
        };
        let key = OwnerKey {
            namespace: obj.namespace().unwrap_or_default(),
            owner_kind: owner.kind.clone(),
            owner_name: owner.name.clone(),
        };
        self.location.insert(uid.clone(), key.clone());
        self.buckets.entry(key).or_default().insert(uid, obj);
    }

    fn remove(&mut self, uid: &str) {
        let Some(key) = self.location.remove(uid) else { return };
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.remove(uid);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }

    fn versions(&self) -> BTreeMap<String, String> {
        self.buckets
            .values()
            .flat_map(|b| b.iter())
            .map(|(uid, obj)| (uid.clone(), obj.resource_version().unwrap_or_default()))
            .collect()
    }
}

/// Per-kind owner-key index
#[derive(Default)]
pub struct OwnerIndex {
    kinds: DashMap<OwnedKind, KindIndex>,
}

impl OwnerIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one watch event for `kind`.
    ///
    /// A relist is staged and swapped in on `InitDone`, so lookups during a
    /// relist keep seeing the previous complete view.
    pub fn observe(&self, kind: OwnedKind, event: &watcher::Event<DynamicObject>) {
        let mut index = self.kinds.entry(kind).or_default();
        match event {
            watcher::Event::Apply(obj) => index.insert(obj.clone()),
            watcher::Event::Delete(obj) => {
                if let Some(uid) = obj.uid() {
                    index.remove(&uid);
                }
            }
            watcher::Event::Init => index.relist = Some(Vec::new()),
            watcher::Event::InitApply(obj) => index
                .relist
                .get_or_insert_with(Vec::new)
                .push(obj.clone()),
            watcher::Event::InitDone => {
                let mut fresh = KindIndex::default();
                for obj in index.relist.take().unwrap_or_default() {
                    fresh.insert(obj);
                }
                let changes = diff::maps(&index.versions(), &fresh.versions());
                if !changes.is_empty() {
                    debug!(
                        kind = %kind,
                        changed = changes.additions().len(),
                        gone = changes.removals().len(),
                        "Owner index relisted"
                    );
                }
                fresh.synced = true;
                *index = fresh;
            }
        }
    }

    /// Wrap a watcher stream so every event also updates the index
    pub fn observe_stream<S>(
        self: Arc<Self>,
        kind: OwnedKind,
        stream: S,
    ) -> impl Stream<Item = Result<watcher::Event<DynamicObject>, watcher::Error>>
    where
        S: Stream<Item = Result<watcher::Event<DynamicObject>, watcher::Error>>,
    {
        stream.inspect_ok(move |event| self.observe(kind, event))
    }

    /// Children of `kind` controlled by the given parent.
    ///
    /// `None` when the kind has not been synced yet and the caller must list
    /// from the API instead. Children left over from an earlier parent with
    /// the same name are excluded by `owner_uid`.
    pub fn lookup(
        &self,
        kind: OwnedKind,
        namespace: &str,
        owner_kind: &str,
        owner_name: &str,
        owner_uid: &str,
    ) -> Option<Vec<DynamicObject>> {
        let index = self.kinds.get(&kind)?;
        if !index.synced {
            return None;
        }
        let key = OwnerKey {
            namespace: namespace.to_string(),
            owner_kind: owner_kind.to_string(),
            owner_name: owner_name.to_string(),
        };
        let children = index
            .buckets
            .get(&key)
            .map(|bucket| {
                bucket
                    .values()
                    .filter(|obj| {
                        obj.owner_references()
                            .iter()
                            .any(|r| r.controller == Some(true) && r.uid == owner_uid)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Some(children)
    }
}
