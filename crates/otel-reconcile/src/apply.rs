//! Apply/GC engine
//!
//! [`Reconciler::reconcile`] drives the cluster from the currently owned
//! children to the desired ones:
//!
//! 1. Every desired object is stamped with the ownership labels and, when
//!    namespaced, a controller owner reference to the parent.
//! 2. It is created, or merged onto the live object and replaced. The
//!    fetch-merge-write cycle is retried on 409 conflicts only.
//! 3. A change to an immutable field deletes the live object instead; the
//!    next pass creates it from scratch.
//! 4. Whatever is left in the owned set afterwards is an orphan and is
//!    deleted.
//!
//! Failures on individual objects are collected and returned together once
//! every object has been handled.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::ResourceExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use otel_common::kube_utils::instance_label;
use otel_common::retry::{retry_with_backoff_if, RetryConfig};
use otel_common::{labels, Error, OPERATOR_NAME};

use crate::client::{ObjectClient, ObjectKey};
use crate::kind::OwnedKind;
use crate::mutate::{is_noop, merge_desired, ImmutableFieldChange};

/// The parent custom resource children are reconciled for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerInfo {
    /// Parent apiVersion
    pub api_version: String,
    /// Parent kind
    pub kind: String,
    /// Parent namespace
    pub namespace: String,
    /// Parent name
    pub name: String,
    /// Parent UID
    pub uid: String,
    /// Value for the component label when a child does not set one
    pub component: String,
}

impl OwnerInfo {
    /// `<namespace>.<name>`, the value of the instance label
    pub fn instance(&self) -> String {
        instance_label(&self.namespace, &self.name)
    }

    /// Labels identifying every child of this parent
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (labels::MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
            (labels::INSTANCE.to_string(), self.instance()),
            (labels::PART_OF.to_string(), labels::PART_OF_VALUE.to_string()),
        ])
    }

    /// [`Self::selector_labels`] as a list selector string
    pub fn label_selector(&self) -> String {
        self.selector_labels()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Controller owner reference pointing at the parent
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Whether `obj` names this parent as its controller
    pub fn is_controller_of(&self, obj: &DynamicObject) -> bool {
        obj.owner_references()
            .iter()
            .any(|r| r.controller == Some(true) && r.uid == self.uid)
    }
}

/// One child in its target state, as produced by a manifest builder
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredObject {
    /// Child kind
    pub kind: OwnedKind,
    /// Full object; `metadata.name` must be set
    pub object: DynamicObject,
}

impl DesiredObject {
    /// Wrap a dynamic object
    pub fn new(kind: OwnedKind, object: DynamicObject) -> Self {
        Self { kind, object }
    }

    /// Serialize a typed object into a desired object
    pub fn from_typed<T: serde::Serialize>(kind: OwnedKind, typed: &T) -> Result<Self, Error> {
        let mut value = serde_json::to_value(typed)
            .map_err(|e| Error::serialization_for_kind(kind.kind_str(), e.to_string()))?;
        if let Some(map) = value.as_object_mut() {
            map.insert("apiVersion".into(), kind.api_version().into());
            map.insert("kind".into(), kind.kind_str().into());
        }
        let object: DynamicObject = serde_json::from_value(value)
            .map_err(|e| Error::serialization_for_kind(kind.kind_str(), e.to_string()))?;
        Ok(Self { kind, object })
    }

    /// Identity of the child
    pub fn key(&self) -> ObjectKey {
        ObjectKey::of(self.kind, &self.object)
    }
}

/// A child currently present in the cluster and attributed to the parent
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedObject {
    /// Child kind
    pub kind: OwnedKind,
    /// Last observed state
    pub object: DynamicObject,
}

impl OwnedObject {
    /// Wrap a dynamic object
    pub fn new(kind: OwnedKind, object: DynamicObject) -> Self {
        Self { kind, object }
    }

    /// Identity of the child
    pub fn key(&self) -> ObjectKey {
        ObjectKey::of(self.kind, &self.object)
    }
}

/// Owned children keyed by UID
pub type OwnedObjects = BTreeMap<String, OwnedObject>;

/// What a reconcile pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Children that did not exist and were created
    pub created: Vec<ObjectKey>,
    /// Children that existed and were replaced
    pub updated: Vec<ObjectKey>,
    /// Children already in the desired state
    pub unchanged: Vec<ObjectKey>,
    /// Children deleted because an immutable field changed
    pub recreated: Vec<ObjectKey>,
    /// Orphans deleted
    pub pruned: Vec<ObjectKey>,
}

impl ApplySummary {
    /// Whether the pass issued any write
    pub fn wrote_anything(&self) -> bool {
        !(self.created.is_empty()
            && self.updated.is_empty()
            && self.recreated.is_empty()
            && self.pruned.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Error)]
enum ApplyError {
    #[error(transparent)]
    Immutable(#[from] ImmutableFieldChange),
    #[error(transparent)]
    Api(#[from] Error),
}

impl ApplyError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_conflict())
    }
}

/// Reconciles desired children against owned ones through an [`ObjectClient`]
pub struct Reconciler {
    client: Arc<dyn ObjectClient>,
    retry: RetryConfig,
}

impl Reconciler {
    /// Create a reconciler with the standard conflict retry
    pub fn new(client: Arc<dyn ObjectClient>) -> Self {
        Self {
            client,
            retry: RetryConfig::on_conflict(),
        }
    }

    /// Drive the cluster from `owned` to `desired` for `owner`.
    ///
    /// Children that failed to apply are kept out of the prune set, so a
    /// transient write failure never deletes a child that is still wanted.
    pub async fn reconcile(
        &self,
        owner: &OwnerInfo,
        desired: Vec<DesiredObject>,
        mut owned: OwnedObjects,
    ) -> Result<ApplySummary, Error> {
        let mut summary = ApplySummary::default();
        let mut errors = Vec::new();

        let uid_by_key: HashMap<ObjectKey, String> = owned
            .iter()
            .map(|(uid, o)| (o.key(), uid.clone()))
            .collect();

        for desired in desired {
            let kind = desired.kind;
            let object = self.prepare(owner, kind, desired.object);
            let key = ObjectKey::of(kind, &object);

            match self.apply_with_retry(&key, &object).await {
                Ok(Applied::Created) => summary.created.push(key.clone()),
                Ok(Applied::Updated) => summary.updated.push(key.clone()),
                Ok(Applied::Unchanged) => summary.unchanged.push(key.clone()),
                Err(ApplyError::Immutable(change)) => {
                    info!(object = %key, field = %change.field, "Immutable field changed, deleting for recreation");
                    match self.client.delete(&key).await {
                        Ok(()) => summary.recreated.push(key.clone()),
                        Err(e) if e.is_not_found() => summary.recreated.push(key.clone()),
                        Err(e) => errors.push(Error::apply(
                            kind.kind_str(),
                            key_name(&key),
                            format!("delete after immutable change of {}: {e}", change.field),
                        )),
                    }
                }
                Err(ApplyError::Api(e)) => {
                    warn!(object = %key, error = %e, "Failed to apply child");
                    errors.push(Error::apply(kind.kind_str(), key_name(&key), e.to_string()));
                }
            }

            if let Some(uid) = uid_by_key.get(&key) {
                owned.remove(uid);
            }
        }

        for (uid, orphan) in owned {
            let key = orphan.key();
            match self.client.delete(&key).await {
                Ok(()) => {
                    info!(object = %key, uid = %uid, "Pruned orphaned child");
                    summary.pruned.push(key);
                }
                Err(e) if e.is_not_found() => {
                    debug!(object = %key, "Orphan already gone");
                    summary.pruned.push(key);
                }
                Err(e) => {
                    warn!(object = %key, error = %e, "Failed to prune child");
                    errors.push(Error::prune(key.kind.kind_str(), key_name(&key), e.to_string()));
                }
            }
        }

        match Error::join(errors) {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Stamp ownership labels and, for namespaced kinds, the owner reference
    fn prepare(&self, owner: &OwnerInfo, kind: OwnedKind, mut object: DynamicObject) -> DynamicObject {
        let stamped = object.metadata.labels.get_or_insert_with(BTreeMap::new);
        stamped.extend(owner.selector_labels());
        stamped
            .entry(labels::COMPONENT.to_string())
            .or_insert_with(|| owner.component.clone());

        if kind.is_namespaced() {
            if object.metadata.namespace.is_none() {
                object.metadata.namespace = Some(owner.namespace.clone());
            }
            object.metadata.owner_references = Some(vec![owner.owner_reference()]);
        } else {
            object.metadata.namespace = None;
            object.metadata.owner_references = None;
        }
        object
    }

    async fn apply_with_retry(
        &self,
        key: &ObjectKey,
        desired: &DynamicObject,
    ) -> Result<Applied, ApplyError> {
        let name = format!("apply {key}");
        retry_with_backoff_if(&self.retry, &name, ApplyError::is_conflict, || {
            self.apply_once(key, desired)
        })
        .await
    }

    async fn apply_once(&self, key: &ObjectKey, desired: &DynamicObject) -> Result<Applied, ApplyError> {
        let Some(existing) = self.client.get(key).await? else {
            self.client.create(key.kind, desired).await?;
            debug!(object = %key, "Created child");
            return Ok(Applied::Created);
        };

        let merged = merge_desired(key.kind, &existing, desired)?;
        if is_noop(&existing, &merged) {
            return Ok(Applied::Unchanged);
        }

        match self.client.replace(key.kind, &merged).await {
            Ok(_) => {
                debug!(object = %key, "Updated child");
                Ok(Applied::Updated)
            }
            Err(e) if e.is_immutable_rejection() => Err(ApplyError::Immutable(ImmutableFieldChange {
                field: "rejected by API server".to_string(),
            })),
            Err(e) => Err(e.into()),
        }
    }
}

fn key_name(key: &ObjectKey) -> String {
    otel_common::kube_utils::object_key(key.namespace.as_deref(), &key.name)
}
