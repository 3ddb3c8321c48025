//! The object store seam consumed by the upsert and admission engines.

use std::fmt::Debug;
use std::marker::PhantomData;

use kgate_core::ObjectKey;
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    core::{ClusterResourceScope, NamespaceResourceScope},
    Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as Json;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },

    #[error("conflict writing {kind} {key}: {message}")]
    Conflict { kind: String, key: ObjectKey, message: String },

    #[error("kubernetes api error: {0}")]
    Kube(#[source] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Definitive absence of the target; callers must not retry.
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound { .. } => true,
            StoreError::Kube(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }

    /// Optimistic-concurrency failure (stale resourceVersion).
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Conflict { .. } => true,
            StoreError::Kube(kube::Error::Api(e)) => e.code == 409,
            _ => false,
        }
    }

    fn from_kube(kind: &str, key: &ObjectKey, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(e) if e.code == 404 => StoreError::NotFound { kind: kind.to_string(), key: key.clone() },
            kube::Error::Api(e) if e.code == 409 => {
                StoreError::Conflict { kind: kind.to_string(), key: key.clone(), message: e.message.clone() }
            }
            _ => StoreError::Kube(err),
        }
    }
}

/// Generic get/create/update/patch by namespace+name.
///
/// Read-after-write consistency is not assumed and concurrent writers may
/// exist; callers detect no-ops and retry on their own.
#[async_trait::async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync,
{
    /// `Ok(None)` when the object does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;

    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Full-object replace; honours `metadata.resourceVersion` when set.
    async fn update(&self, obj: &K) -> Result<K, StoreError>;

    /// Apply an RFC 7386 JSON merge patch.
    async fn patch(&self, key: &ObjectKey, patch: &Json) -> Result<K, StoreError>;
}

#[async_trait::async_trait]
impl<K, S> ObjectStore<K> for std::sync::Arc<S>
where
    K: Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        (**self).get(key).await
    }
    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        (**self).create(obj).await
    }
    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        (**self).update(obj).await
    }
    async fn patch(&self, key: &ObjectKey, patch: &Json) -> Result<K, StoreError> {
        (**self).patch(key, patch).await
    }
}

/// Picks the `Api` flavour for a resource scope.
pub trait StoreScope {
    fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = Self>;
}

impl StoreScope for NamespaceResourceScope {
    fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = Self>,
    {
        match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }
}

impl StoreScope for ClusterResourceScope {
    fn api<K>(client: Client, _namespace: Option<&str>) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = Self>,
    {
        Api::all(client)
    }
}

/// `ObjectStore` backed by the Kubernetes API server.
pub struct KubeStore<K> {
    client: Client,
    field_manager: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self { client: self.client.clone(), field_manager: self.field_manager.clone(), _kind: PhantomData }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = ()>,
    K::Scope: StoreScope,
{
    pub fn new(client: Client) -> Self {
        Self { client, field_manager: "kgate".to_string(), _kind: PhantomData }
    }

    pub fn with_field_manager(mut self, manager: impl Into<String>) -> Self {
        self.field_manager = manager.into();
        self
    }

    fn api(&self, namespace: Option<&str>) -> Api<K> {
        <K::Scope as StoreScope>::api(self.client.clone(), namespace)
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }
}

fn key_of<K: Resource>(obj: &K) -> ObjectKey {
    ObjectKey::from_parts(obj.namespace().as_deref(), obj.meta().name.as_deref())
        .unwrap_or_else(|| ObjectKey { namespace: obj.namespace(), name: String::new() })
}

#[async_trait::async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
    K::Scope: StoreScope,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        let api = self.api(key.namespace.as_deref());
        api.get_opt(&key.name).await.map_err(|e| StoreError::from_kube(&Self::kind(), key, e))
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let key = key_of(obj);
        let api = self.api(key.namespace.as_deref());
        let pp = PostParams { field_manager: Some(self.field_manager.clone()), ..Default::default() };
        debug!(kind = %Self::kind(), key = %key, "create");
        api.create(&pp, obj).await.map_err(|e| StoreError::from_kube(&Self::kind(), &key, e))
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let key = key_of(obj);
        let api = self.api(key.namespace.as_deref());
        let pp = PostParams { field_manager: Some(self.field_manager.clone()), ..Default::default() };
        debug!(kind = %Self::kind(), key = %key, "replace");
        api.replace(&key.name, &pp, obj).await.map_err(|e| StoreError::from_kube(&Self::kind(), &key, e))
    }

    async fn patch(&self, key: &ObjectKey, patch: &Json) -> Result<K, StoreError> {
        let api = self.api(key.namespace.as_deref());
        let pp = PatchParams { field_manager: Some(self.field_manager.clone()), ..Default::default() };
        debug!(kind = %Self::kind(), key = %key, "merge patch");
        api.patch(&key.name, &pp, &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(&Self::kind(), key, e))
    }
}
