//! kgate meta: fingerprints and "already reconciled" state.
//!
//! Everything here works on the serialized JSON form of an object, so it
//! applies equally to typed `k8s-openapi` resources, custom resources and
//! `DynamicObject`s.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use kgate_core::LAST_APPLIED_CONFIG_ANNOTATION;
use serde::Serialize;
use serde_json::Value as Json;

pub mod fingerprint;
pub mod inthash;
pub mod reconcile;

pub use fingerprint::{fingerprint, fingerprint_value, generation_fingerprint, generation_fingerprint_value, Fingerprint};
pub use inthash::IntHash;
pub use reconcile::{
    already_observed, already_observed_value, already_reconciled, already_reconciled_value, conditions,
    observed_generation, spec_changed, spec_changed_value, status_condition_aware_equal,
    status_condition_aware_equal_value, ConditionKey, ReconcileStrategy,
};

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("failed to serialize object: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("status of {object} cannot be introspected: {reason}")]
    StatusUnreadable { object: String, reason: String },

    #[error("invalid IntHash {0:?}")]
    InvalidIntHash(String),
}

/// Serialize any resource into the JSON form the functions below inspect.
pub fn to_json<K: Serialize>(obj: &K) -> Result<Json, MetaError> {
    Ok(serde_json::to_value(obj)?)
}

fn metadata(v: &Json) -> Option<&serde_json::Map<String, Json>> {
    v.get("metadata").and_then(|m| m.as_object())
}

/// `metadata.generation`, 0 when unset.
pub fn generation(v: &Json) -> i64 {
    metadata(v).and_then(|m| m.get("generation")).and_then(|g| g.as_i64()).unwrap_or(0)
}

fn string_map(v: Option<&Json>) -> BTreeMap<String, String> {
    v.and_then(|m| m.as_object())
        .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
        .unwrap_or_default()
}

/// `metadata.labels`; absent and empty are the same thing.
pub fn labels(v: &Json) -> BTreeMap<String, String> {
    string_map(metadata(v).and_then(|m| m.get("labels")))
}

/// `metadata.annotations`, raw.
pub fn annotations(v: &Json) -> BTreeMap<String, String> {
    string_map(metadata(v).and_then(|m| m.get("annotations")))
}

/// `metadata.annotations` without the last-applied-configuration key.
pub fn filtered_annotations(v: &Json) -> BTreeMap<String, String> {
    let mut a = annotations(v);
    a.remove(LAST_APPLIED_CONFIG_ANNOTATION);
    a
}

/// True while the object carries a deletion timestamp.
pub fn is_deleting(v: &Json) -> bool {
    metadata(v).and_then(|m| m.get("deletionTimestamp")).map(|t| !t.is_null()).unwrap_or(false)
}

/// Top-level fields other than type identity, metadata and status.
pub fn payload_fields(v: &Json) -> BTreeMap<&str, &Json> {
    v.as_object()
        .map(|o| {
            o.iter()
                .filter(|(k, _)| !matches!(k.as_str(), "apiVersion" | "kind" | "metadata" | "status"))
                .map(|(k, v)| (k.as_str(), v))
                .collect()
        })
        .unwrap_or_default()
}

/// `Kind namespace/name` for log lines and error messages.
pub fn describe(v: &Json) -> String {
    let kind = v.get("kind").and_then(|k| k.as_str()).unwrap_or("object");
    let name = metadata(v).and_then(|m| m.get("name")).and_then(|n| n.as_str()).unwrap_or("");
    match metadata(v).and_then(|m| m.get("namespace")).and_then(|n| n.as_str()) {
        Some(ns) if !ns.is_empty() => format!("{} {}/{}", kind, ns, name),
        _ => format!("{} {}", kind, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors_tolerate_missing_metadata() {
        let v = json!({"spec": {}});
        assert_eq!(generation(&v), 0);
        assert!(labels(&v).is_empty());
        assert!(!is_deleting(&v));
        assert_eq!(describe(&v), "object ");
    }

    #[test]
    fn filtered_annotations_drop_last_applied() {
        let v = json!({"metadata": {"annotations": {
            "a": "1",
            "kubectl.kubernetes.io/last-applied-configuration": "{}"
        }}});
        assert_eq!(annotations(&v).len(), 2);
        let f = filtered_annotations(&v);
        assert_eq!(f.len(), 1);
        assert_eq!(f.get("a").map(String::as_str), Some("1"));
    }

    #[test]
    fn payload_skips_identity_metadata_and_status() {
        let v = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}, "status": {}, "data": {"k": "v"}});
        let p = payload_fields(&v);
        assert_eq!(p.keys().copied().collect::<Vec<_>>(), vec!["data"]);
    }
}
