//! Event callbacks and the work-queue dispatch filter.

use std::sync::Arc;

use kgate_core::config::{env_parse, env_string, ENV_DISPATCH_POLICY, ENV_WATCH_NAMESPACE};
use kgate_meta::{describe, ReconcileStrategy};
use metrics::counter;
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{debug, error, info};

use crate::policy::{AddPredicate, DispatchPolicy, UpdatePredicate};
use crate::{enqueue, object_key, WorkQueue};

/// Receives object lifecycle events, old and new state on update.
pub trait EventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, obj: &K);
}

impl<K, H: EventHandler<K> + ?Sized> EventHandler<K> for Arc<H> {
    fn on_add(&self, obj: &K) {
        (**self).on_add(obj)
    }
    fn on_update(&self, old: &K, new: &K) {
        (**self).on_update(old, new)
    }
    fn on_delete(&self, obj: &K) {
        (**self).on_delete(obj)
    }
}

/// Enqueues object keys when the configured predicates say so.
///
/// Predicate failures (e.g. an unreadable status) are logged and the event
/// is enqueued, so a reconciler gets to look at the object.
pub struct QueueingEventHandler<Q> {
    queue: Q,
    enqueue_add: Option<AddPredicate>,
    enqueue_update: Option<UpdatePredicate>,
    enqueue_delete: bool,
    namespace: Option<String>,
}

impl<Q: WorkQueue> QueueingEventHandler<Q> {
    pub fn new(queue: Q, policy: DispatchPolicy) -> Self {
        Self::with_strategy(queue, policy, ReconcileStrategy::default())
    }

    pub fn with_strategy(queue: Q, policy: DispatchPolicy, strategy: ReconcileStrategy) -> Self {
        Self {
            queue,
            enqueue_add: policy.add_predicate(strategy),
            enqueue_update: policy.update_predicate(strategy),
            enqueue_delete: policy.enqueue_delete(),
            namespace: None,
        }
    }

    /// Every add and delete; updates only when `predicate(old, new)` holds.
    pub fn with_update_predicate(
        queue: Q,
        predicate: impl Fn(&Json, &Json) -> Result<bool, kgate_meta::MetaError> + Send + Sync + 'static,
    ) -> Self {
        Self { queue, enqueue_add: None, enqueue_update: Some(Arc::new(predicate)), enqueue_delete: true, namespace: None }
    }

    /// Policy from `KGATE_DISPATCH_POLICY`, namespace scope from `KGATE_WATCH_NAMESPACE`.
    pub fn from_env(queue: Q) -> Self {
        let policy = env_parse(ENV_DISPATCH_POLICY, DispatchPolicy::Default);
        Self::new(queue, policy).in_namespace(env_string(ENV_WATCH_NAMESPACE))
    }

    /// Only dispatch objects in `namespace`; `None` watches everything.
    pub fn in_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    fn in_scope(&self, obj: &Json) -> bool {
        let Some(ns) = self.namespace.as_deref() else {
            return true;
        };
        let obj_ns = obj.pointer("/metadata/namespace").and_then(Json::as_str).unwrap_or_default();
        if obj_ns == ns {
            return true;
        }
        info!(object = %describe(obj), namespace = ns, "skipping object outside the watched namespace");
        false
    }

    fn dispatch(&self, event: &'static str, wanted: bool, obj: &Json) {
        let decision = if !wanted {
            "filtered"
        } else if !self.in_scope(obj) {
            "out_of_scope"
        } else {
            enqueue(&self.queue, obj);
            "enqueued"
        };
        debug!(event, decision, key = ?object_key(obj).map(|k| k.queue_key()), "dispatch");
        counter!("dispatch_events_total", 1u64, "event" => event, "decision" => decision);
    }
}

fn to_json<K: Serialize>(obj: &K) -> Option<Json> {
    match serde_json::to_value(obj) {
        Ok(v) => Some(v),
        Err(e) => {
            error!(error = %e, "failed to serialize event object");
            None
        }
    }
}

fn or_enqueue(event: &'static str, obj: &Json, res: Result<bool, kgate_meta::MetaError>) -> bool {
    res.unwrap_or_else(|e| {
        error!(event, object = %describe(obj), error = %e, "dispatch predicate failed; enqueueing");
        true
    })
}

impl<K, Q> EventHandler<K> for QueueingEventHandler<Q>
where
    K: Serialize,
    Q: WorkQueue,
{
    fn on_add(&self, obj: &K) {
        let Some(obj) = to_json(obj) else { return };
        let wanted = match &self.enqueue_add {
            None => true,
            Some(pred) => or_enqueue("add", &obj, pred(&obj)),
        };
        self.dispatch("add", wanted, &obj);
    }

    fn on_update(&self, old: &K, new: &K) {
        let (Some(old), Some(new)) = (to_json(old), to_json(new)) else { return };
        let wanted = match &self.enqueue_update {
            None => true,
            Some(pred) => or_enqueue("update", &new, pred(&old, &new)),
        };
        self.dispatch("update", wanted, &new);
    }

    fn on_delete(&self, obj: &K) {
        let Some(obj) = to_json(obj) else { return };
        self.dispatch("delete", self.enqueue_delete, &obj);
    }
}
