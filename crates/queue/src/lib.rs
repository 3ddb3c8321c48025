//! kgate queue: turns add/update/delete events into work-queue keys,
//! filtered by canned change-detection policies.

#![forbid(unsafe_code)]

use std::time::Duration;

use kgate_core::ObjectKey;
use serde_json::Value as Json;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

pub mod adapters;
pub mod handler;
pub mod informer;
pub mod policy;
pub mod selector;

pub use adapters::{FilteredHandler, VersionedHandler};
pub use handler::{EventHandler, QueueingEventHandler};
pub use informer::Informer;
pub use policy::{AddPredicate, DispatchPolicy, InvalidPolicy, UpdatePredicate};
pub use selector::{Requirement, Selector, SelectorError};

/// Destination for reconcile keys (`namespace/name`). Draining is the
/// consumer's business.
pub trait WorkQueue: Send + Sync {
    fn add(&self, key: String);
    fn add_after(&self, key: String, delay: Duration);
}

impl<Q: WorkQueue + ?Sized> WorkQueue for std::sync::Arc<Q> {
    fn add(&self, key: String) {
        (**self).add(key)
    }
    fn add_after(&self, key: String, delay: Duration) {
        (**self).add_after(key, delay)
    }
}

/// Work queue over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl WorkQueue for ChannelQueue {
    fn add(&self, key: String) {
        if self.tx.send(key).is_err() {
            debug!("work queue closed; dropping key");
        }
    }

    fn add_after(&self, key: String, delay: Duration) {
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let tx = self.tx.clone();
                rt.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(key);
                });
            }
            Err(_) => {
                warn!(key = %key, ?delay, "no runtime for delayed add; adding now");
                self.add(key);
            }
        }
    }
}

/// Queue key of an object document, if it has a name.
pub fn object_key(obj: &Json) -> Option<ObjectKey> {
    let meta = obj.get("metadata")?;
    ObjectKey::from_parts(
        meta.get("namespace").and_then(Json::as_str),
        meta.get("name").and_then(Json::as_str),
    )
}

pub fn enqueue<Q: WorkQueue + ?Sized>(queue: &Q, obj: &Json) {
    match object_key(obj) {
        Some(key) => queue.add(key.queue_key()),
        None => error!(object = %kgate_meta::describe(obj), "couldn't get key for object"),
    }
}

pub fn enqueue_after<Q: WorkQueue + ?Sized>(queue: &Q, obj: &Json, delay: Duration) {
    match object_key(obj) {
        Some(key) => queue.add_after(key.queue_key(), delay),
        None => error!(object = %kgate_meta::describe(obj), "couldn't get key for object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn channel_queue_delivers_plain_and_delayed_keys() {
        let (q, mut rx) = ChannelQueue::new();
        enqueue(&q, &json!({"metadata": {"name": "a", "namespace": "ns"}}));
        enqueue_after(&q, &json!({"metadata": {"name": "node-1"}}), Duration::from_millis(5));
        assert_eq!(rx.recv().await.as_deref(), Some("ns/a"));
        assert_eq!(rx.recv().await.as_deref(), Some("node-1"));
    }

    #[test]
    fn nameless_objects_have_no_key() {
        assert!(object_key(&json!({"metadata": {"namespace": "ns"}})).is_none());
        assert!(object_key(&json!({})).is_none());
    }
}
