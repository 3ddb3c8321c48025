//! Local cache that turns a watch stream into add/update/delete callbacks.

use futures::{Stream, StreamExt};
use kgate_core::ObjectKey;
use kube::runtime::watcher::{self, Event};
use kube::{Resource, ResourceExt};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::handler::EventHandler;

/// Remembers the last seen state of every object so updates carry the old
/// object alongside the new one.
pub struct Informer<K> {
    cache: FxHashMap<ObjectKey, K>,
}

impl<K> Default for Informer<K> {
    fn default() -> Self {
        Self { cache: FxHashMap::default() }
    }
}

impl<K> Informer<K>
where
    K: Resource + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&K> {
        self.cache.get(key)
    }

    fn key(obj: &K) -> Option<ObjectKey> {
        let key = ObjectKey::from_parts(obj.namespace().as_deref(), obj.meta().name.as_deref());
        if key.is_none() {
            warn!("ignoring watch event for object without a name");
        }
        key
    }

    /// Feed one watch event through the cache into `handler`.
    pub fn apply<H>(&mut self, event: Event<K>, handler: &H)
    where
        H: EventHandler<K> + ?Sized,
    {
        match event {
            Event::Applied(obj) => self.upsert(obj, handler),
            Event::Deleted(obj) => {
                if let Some(key) = Self::key(&obj) {
                    self.cache.remove(&key);
                }
                handler.on_delete(&obj);
            }
            Event::Restarted(list) => {
                debug!(count = list.len(), "watch restart");
                let mut stale = std::mem::take(&mut self.cache);
                for obj in list {
                    let Some(key) = Self::key(&obj) else { continue };
                    match stale.remove(&key) {
                        Some(old) => handler.on_update(&old, &obj),
                        None => handler.on_add(&obj),
                    }
                    self.cache.insert(key, obj);
                }
                for gone in stale.into_values() {
                    handler.on_delete(&gone);
                }
            }
        }
    }

    fn upsert<H>(&mut self, obj: K, handler: &H)
    where
        H: EventHandler<K> + ?Sized,
    {
        let Some(key) = Self::key(&obj) else { return };
        match self.cache.get(&key) {
            Some(old) => handler.on_update(old, &obj),
            None => handler.on_add(&obj),
        }
        self.cache.insert(key, obj);
    }

    /// Drive `stream` to completion. Watch errors are logged; the stream is
    /// expected to back off and resume on its own.
    pub async fn run<S, H>(mut self, stream: S, handler: &H)
    where
        S: Stream<Item = Result<Event<K>, watcher::Error>>,
        H: EventHandler<K> + ?Sized,
    {
        futures::pin_mut!(stream);
        info!("informer started");
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => self.apply(event, handler),
                Err(e) => warn!(error = %e, "watch error"),
            }
        }
        warn!(cached = self.cache.len(), "watch stream ended");
    }
}
