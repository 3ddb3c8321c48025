//! Optimistic fetch / compute / write loops.
//!
//! None of these hold a lock across the API call; concurrent writers are
//! tolerated by re-fetching, and no-ops are detected before writing.

use kgate_core::{config::RetryPolicy, ObjectKey, Verb};
use kgate_kubehub::{ObjectStore, StoreError};
use kube::ResourceExt;
use metrics::counter;
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::{create_merge_patch, is_empty_patch, DiffSummary, Object, Sleeper, UpsertError};

fn kind_of<K: Object>() -> String {
    K::kind(&()).to_string()
}

fn key_of<K: Object>(obj: &K) -> Result<ObjectKey, UpsertError> {
    ObjectKey::from_parts(obj.namespace().as_deref(), obj.meta().name.as_deref())
        .ok_or_else(|| UpsertError::InvalidObject { kind: kind_of::<K>(), reason: "metadata.name is empty".into() })
}

fn encode<K: Object>(obj: &K, key: &ObjectKey) -> Result<Json, UpsertError> {
    serde_json::to_value(obj).map_err(|source| UpsertError::Serialize { kind: kind_of::<K>(), key: key.clone(), source })
}

/// `upsert_total` verb label for a full-object replace.
pub const UPDATED: &str = "updated";

fn record<K: Object>(verb: &'static str) {
    counter!("upsert_total", 1u64, "kind" => kind_of::<K>(), "verb" => verb);
}

fn not_found<K: Object>(key: &ObjectKey) -> UpsertError {
    UpsertError::NotFound { kind: kind_of::<K>(), key: key.clone() }
}

/// Object with only identity set, handed to the transform on the create path.
fn blank<K: Object + Default>(key: &ObjectKey) -> K {
    let mut obj = K::default();
    let meta = obj.meta_mut();
    meta.name = Some(key.name.clone());
    meta.namespace = key.namespace.clone();
    obj
}

/// Create the object at `key` from `transform(blank)` if it is absent,
/// otherwise merge-patch it to `transform(current)`.
///
/// Single attempt: a racing creator surfaces as a conflict and a concurrent
/// delete between fetch and patch surfaces as not-found.
pub async fn create_or_patch<K, S, F>(store: &S, key: &ObjectKey, transform: F) -> Result<(K, Verb), UpsertError>
where
    K: Object + Default,
    S: ObjectStore<K> + ?Sized,
    F: FnOnce(K) -> K + Send,
{
    let kind = kind_of::<K>();
    let current = match store.get(key).await {
        Ok(found) => found,
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e.into()),
    };
    match current {
        None => {
            let desired = transform(blank::<K>(key));
            // Validate serializability before touching the store.
            encode(&desired, key)?;
            info!(kind = %kind, key = %key, "creating");
            let created = store.create(&desired).await?;
            record::<K>(Verb::Created.as_str());
            Ok((created, Verb::Created))
        }
        Some(cur) => {
            let desired = transform(cur.clone());
            patch_object(store, &cur, &desired).await
        }
    }
}

/// Merge-patch `current` to `desired`. An empty patch is a no-op and
/// returns `current` untouched.
pub async fn patch_object<K, S>(store: &S, current: &K, desired: &K) -> Result<(K, Verb), UpsertError>
where
    K: Object,
    S: ObjectStore<K> + ?Sized,
{
    let key = key_of(current)?;
    let cur_json = encode(current, &key)?;
    let des_json = encode(desired, &key)?;
    let patch = create_merge_patch(&cur_json, &des_json);
    if is_empty_patch(&patch) {
        debug!(kind = %kind_of::<K>(), key = %key, "unchanged");
        record::<K>(Verb::Unchanged.as_str());
        return Ok((current.clone(), Verb::Unchanged));
    }
    let summary = DiffSummary::of_patch(&cur_json, &patch);
    info!(
        kind = %kind_of::<K>(),
        key = %key,
        adds = summary.adds,
        updates = summary.updates,
        removes = summary.removes,
        "patching"
    );
    let patched = store.patch(&key, &patch).await.map_err(|e| match e {
        e if e.is_not_found() => not_found::<K>(&key),
        e => UpsertError::Store(e),
    })?;
    record::<K>(Verb::Patched.as_str());
    Ok((patched, Verb::Patched))
}

/// Fetch, transform and full-update with retries. Skips the write when the
/// transform leaves the serialized object byte-identical.
pub async fn try_update<K, S, F>(
    store: &S,
    key: &ObjectKey,
    mut transform: F,
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<K, UpsertError>
where
    K: Object,
    S: ObjectStore<K> + ?Sized,
    F: FnMut(K) -> K + Send,
{
    let kind = kind_of::<K>();
    let mut last: Option<StoreError> = None;
    let mut attempt = 0u32;
    while attempt < policy.max_attempts {
        if attempt > 0 {
            counter!("upsert_retries_total", 1u64, "kind" => kind.clone());
            sleeper.sleep(policy.interval).await;
        }
        attempt += 1;

        let cur = match store.get(key).await {
            Ok(Some(cur)) => cur,
            Ok(None) => return Err(not_found::<K>(key)),
            Err(e) if e.is_not_found() => return Err(not_found::<K>(key)),
            Err(e) => {
                warn!(kind = %kind, key = %key, attempt, error = %e, "fetch failed");
                last = Some(e);
                continue;
            }
        };
        let before = serde_json::to_vec(&cur)
            .map_err(|source| UpsertError::Serialize { kind: kind.clone(), key: key.clone(), source })?;
        let desired = transform(cur.clone());
        let after = serde_json::to_vec(&desired)
            .map_err(|source| UpsertError::Serialize { kind: kind.clone(), key: key.clone(), source })?;
        if before == after {
            debug!(kind = %kind, key = %key, "unchanged");
            record::<K>(Verb::Unchanged.as_str());
            return Ok(cur);
        }

        match store.update(&desired).await {
            Ok(updated) => {
                info!(kind = %kind, key = %key, attempt, "updated");
                record::<K>(UPDATED);
                return Ok(updated);
            }
            Err(e) if e.is_not_found() => return Err(not_found::<K>(key)),
            Err(e) => {
                warn!(kind = %kind, key = %key, attempt, error = %e, "update failed");
                last = Some(e);
            }
        }
    }
    Err(UpsertError::Exhausted {
        op: "update",
        kind,
        key: key.clone(),
        attempts: attempt,
        last: last.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".into()),
    })
}

/// Like [`try_update`] but writes a merge patch, so concurrent changes to
/// fields the transform does not touch are preserved.
pub async fn try_patch<K, S, F>(
    store: &S,
    key: &ObjectKey,
    mut transform: F,
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<(K, Verb), UpsertError>
where
    K: Object,
    S: ObjectStore<K> + ?Sized,
    F: FnMut(K) -> K + Send,
{
    let kind = kind_of::<K>();
    let mut last: Option<StoreError> = None;
    let mut attempt = 0u32;
    while attempt < policy.max_attempts {
        if attempt > 0 {
            counter!("upsert_retries_total", 1u64, "kind" => kind.clone());
            sleeper.sleep(policy.interval).await;
        }
        attempt += 1;

        let cur = match store.get(key).await {
            Ok(Some(cur)) => cur,
            Ok(None) => return Err(not_found::<K>(key)),
            Err(e) if e.is_not_found() => return Err(not_found::<K>(key)),
            Err(e) => {
                warn!(kind = %kind, key = %key, attempt, error = %e, "fetch failed");
                last = Some(e);
                continue;
            }
        };
        let desired = transform(cur.clone());
        match patch_object(store, &cur, &desired).await {
            Ok(done) => return Ok(done),
            Err(UpsertError::Store(e)) => {
                warn!(kind = %kind, key = %key, attempt, error = %e, "patch failed");
                last = Some(e);
            }
            Err(fatal) => return Err(fatal),
        }
    }
    Err(UpsertError::Exhausted {
        op: "patch",
        kind,
        key: key.clone(),
        attempts: attempt,
        last: last.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".into()),
    })
}
