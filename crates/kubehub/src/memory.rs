//! In-memory `ObjectStore` with apiserver-like bookkeeping.
//!
//! Bumps `metadata.generation` on payload changes, stamps
//! `metadata.resourceVersion` on every write and rejects stale updates.
//! Counts calls per operation and supports one-shot fault injection, which
//! makes it the write-counting stub for engine tests and the offline backend
//! for `kgatectl admit`.

use std::collections::VecDeque;
use std::sync::Mutex;

use kgate_core::ObjectKey;
use kube::{Resource, ResourceExt};
use rustc_hash::FxHashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as Json;

use crate::store::{ObjectStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Update,
    Patch,
}

/// A failure injected into the next matching operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Transient failure (network, throttling).
    Unavailable(String),
    /// Stale resourceVersion.
    Conflict,
    /// The object is deleted concurrently right before the operation runs.
    Vanish,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub gets: u64,
    pub creates: u64,
    pub updates: u64,
    pub patches: u64,
}

impl MemoryStats {
    /// Calls that reached the write path (including failed ones).
    pub fn writes(&self) -> u64 {
        self.creates + self.updates + self.patches
    }
}

struct Inner<K> {
    objects: FxHashMap<ObjectKey, K>,
    last_rv: u64,
    faults: VecDeque<(Op, Fault)>,
    stats: MemoryStats,
}

pub struct MemoryStore<K> {
    inner: Mutex<Inner<K>>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: FxHashMap::default(),
                last_rv: 0,
                faults: VecDeque::new(),
                stats: MemoryStats::default(),
            }),
        }
    }
}

fn payload(v: &Json) -> Json {
    let mut out = v.clone();
    if let Some(obj) = out.as_object_mut() {
        obj.remove("metadata");
        obj.remove("status");
        obj.remove("apiVersion");
        obj.remove("kind");
    }
    out
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with objects, as if each had been created once.
    pub fn with_objects(objects: impl IntoIterator<Item = K>) -> Result<Self, StoreError> {
        let store = Self::new();
        {
            let mut inner = store.lock();
            for obj in objects {
                let key = Self::key_of(&obj)?;
                let stamped = Self::stamp_new(&mut inner, obj);
                inner.objects.insert(key, stamped);
            }
        }
        Ok(store)
    }

    /// Queue a fault for the next call of `op`.
    pub fn inject(&self, op: Op, fault: Fault) {
        self.lock().faults.push_back((op, fault));
    }

    pub fn stats(&self) -> MemoryStats {
        self.lock().stats
    }

    /// Direct read bypassing stats and faults.
    pub fn peek(&self, key: &ObjectKey) -> Option<K> {
        self.lock().objects.get(key).cloned()
    }

    /// Direct removal bypassing stats and faults.
    pub fn remove(&self, key: &ObjectKey) -> Option<K> {
        self.lock().objects.remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K>> {
        // A poisoned lock only means another test thread panicked mid-call.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }

    fn key_of(obj: &K) -> Result<ObjectKey, StoreError> {
        ObjectKey::from_parts(obj.namespace().as_deref(), obj.meta().name.as_deref())
            .ok_or_else(|| StoreError::Unavailable(format!("{} without metadata.name", Self::kind())))
    }

    fn not_found(key: &ObjectKey) -> StoreError {
        StoreError::NotFound { kind: Self::kind(), key: key.clone() }
    }

    fn stamp_new(inner: &mut Inner<K>, mut obj: K) -> K {
        inner.last_rv += 1;
        let meta = obj.meta_mut();
        meta.resource_version = Some(inner.last_rv.to_string());
        meta.generation = Some(1);
        obj
    }

    fn take_fault(inner: &mut Inner<K>, op: Op, key: &ObjectKey) -> Result<(), StoreError> {
        let pos = match inner.faults.iter().position(|(o, _)| *o == op) {
            Some(p) => p,
            None => return Ok(()),
        };
        let (_, fault) = match inner.faults.remove(pos) {
            Some(f) => f,
            None => return Ok(()),
        };
        match fault {
            Fault::Unavailable(msg) => Err(StoreError::Unavailable(msg)),
            Fault::Conflict => Err(StoreError::Conflict {
                kind: Self::kind(),
                key: key.clone(),
                message: "the object has been modified; please apply your changes to the latest version".into(),
            }),
            Fault::Vanish => {
                inner.objects.remove(key);
                Ok(())
            }
        }
    }

    /// Store `next` over `prev`, bumping generation when the payload changed.
    fn commit(inner: &mut Inner<K>, key: ObjectKey, prev: &K, mut next: K) -> Result<K, StoreError> {
        let prev_json = serde_json::to_value(prev)?;
        let next_json = serde_json::to_value(&next)?;
        let prev_gen = prev.meta().generation.unwrap_or(1);
        inner.last_rv += 1;
        let meta = next.meta_mut();
        meta.resource_version = Some(inner.last_rv.to_string());
        meta.generation = Some(if payload(&prev_json) != payload(&next_json) { prev_gen + 1 } else { prev_gen });
        inner.objects.insert(key, next.clone());
        Ok(next)
    }
}

#[async_trait::async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        let mut inner = self.lock();
        inner.stats.gets += 1;
        Self::take_fault(&mut inner, Op::Get, key)?;
        Ok(inner.objects.get(key).cloned())
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let key = Self::key_of(obj)?;
        let mut inner = self.lock();
        inner.stats.creates += 1;
        Self::take_fault(&mut inner, Op::Create, &key)?;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::Conflict { kind: Self::kind(), key, message: "already exists".into() });
        }
        let stamped = Self::stamp_new(&mut inner, obj.clone());
        inner.objects.insert(key, stamped.clone());
        Ok(stamped)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let key = Self::key_of(obj)?;
        let mut inner = self.lock();
        inner.stats.updates += 1;
        Self::take_fault(&mut inner, Op::Update, &key)?;
        let prev = inner.objects.get(&key).cloned().ok_or_else(|| Self::not_found(&key))?;
        if let Some(rv) = obj.meta().resource_version.as_deref() {
            if prev.meta().resource_version.as_deref() != Some(rv) {
                return Err(StoreError::Conflict {
                    kind: Self::kind(),
                    key,
                    message: format!("stale resourceVersion {}", rv),
                });
            }
        }
        Self::commit(&mut inner, key, &prev, obj.clone())
    }

    async fn patch(&self, key: &ObjectKey, patch: &Json) -> Result<K, StoreError> {
        let mut inner = self.lock();
        inner.stats.patches += 1;
        Self::take_fault(&mut inner, Op::Patch, key)?;
        let prev = inner.objects.get(key).cloned().ok_or_else(|| Self::not_found(key))?;
        let mut doc = serde_json::to_value(&prev)?;
        json_patch::merge(&mut doc, patch);
        let next: K = serde_json::from_value(doc)?;
        Self::commit(&mut inner, key.clone(), &prev, next)
    }
}
