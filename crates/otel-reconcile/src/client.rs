//! Object access seam for the engine
//!
//! The engine talks to the cluster only through [`ObjectClient`], so it can
//! be driven against an in-memory cluster in tests.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;

use otel_common::{Error, OPERATOR_NAME};

use crate::kind::OwnedKind;

/// Identity of one child object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Object kind
    pub kind: OwnedKind,
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced or cluster-scoped object
    pub fn new(kind: OwnedKind, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind,
            namespace: if kind.is_namespaced() {
                namespace.map(str::to_string)
            } else {
                None
            },
            name: name.to_string(),
        }
    }

    /// Key for a dynamic object of the given kind
    pub fn of(kind: OwnedKind, obj: &DynamicObject) -> Self {
        Self::new(kind, obj.namespace().as_deref(), &obj.name_any())
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Verbs the engine needs against child objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Fetch an object, `None` if it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, Error>;

    /// List objects of `kind` matching `label_selector`, in one namespace or cluster-wide
    async fn list(
        &self,
        kind: OwnedKind,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error>;

    /// Create an object; 409 if it already exists
    async fn create(&self, kind: OwnedKind, obj: &DynamicObject) -> Result<DynamicObject, Error>;

    /// Replace an object; 409 if its resourceVersion is stale
    async fn replace(&self, kind: OwnedKind, obj: &DynamicObject) -> Result<DynamicObject, Error>;

    /// Delete an object with background propagation
    async fn delete(&self, key: &ObjectKey) -> Result<(), Error>;
}

/// [`ObjectClient`] backed by the Kubernetes API
pub struct KubeObjectClient {
    client: Client,
}

impl KubeObjectClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: OwnedKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) if kind.is_namespaced() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ObjectClient for KubeObjectClient {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, Error> {
        let api = self.api(key.kind, key.namespace.as_deref());
        Ok(api.get_opt(&key.name).await?)
    }

    async fn list(
        &self,
        kind: OwnedKind,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        let api = self.api(kind, namespace.as_deref());
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn create(&self, kind: OwnedKind, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let api = self.api(kind, obj.namespace().as_deref());
        Ok(api.create(&Self::post_params(), obj).await?)
    }

    async fn replace(&self, kind: OwnedKind, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let api = self.api(kind, obj.namespace().as_deref());
        Ok(api.replace(&obj.name_any(), &Self::post_params(), obj).await?)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), Error> {
        let api = self.api(key.kind, key.namespace.as_deref());
        api.delete(&key.name, &DeleteParams::background()).await?;
        Ok(())
    }
}
