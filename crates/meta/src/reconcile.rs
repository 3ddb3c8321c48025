//! "Has this generation already been reconciled?" and change detection.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::fingerprint::{fingerprint_value, generation_fingerprint_value};
use crate::{describe, filtered_annotations, generation, labels, payload_fields, to_json, IntHash, MetaError};

fn status(v: &Json) -> Result<Option<&serde_json::Map<String, Json>>, MetaError> {
    match v.get("status") {
        None | Some(Json::Null) => Ok(None),
        Some(Json::Object(m)) => Ok(Some(m)),
        Some(other) => Err(MetaError::StatusUnreadable {
            object: describe(v),
            reason: format!("status is {}, expected an object", json_type(other)),
        }),
    }
}

fn json_type(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}

/// `status.observedGeneration`, `None` when status or the field is absent.
pub fn observed_generation(v: &Json) -> Result<Option<IntHash>, MetaError> {
    let st = match status(v)? {
        Some(st) => st,
        None => return Ok(None),
    };
    match st.get("observedGeneration") {
        None => Ok(None),
        Some(raw) => IntHash::from_json(raw).map_err(|e| MetaError::StatusUnreadable {
            object: describe(v),
            reason: format!("status.observedGeneration: {}", e),
        }),
    }
}

/// `status.observedGeneration >= metadata.generation`, with absent values as 0.
pub fn already_reconciled_value(v: &Json) -> Result<bool, MetaError> {
    let observed = observed_generation(v)?.map(|o| o.generation).unwrap_or(0);
    Ok(observed >= generation(v))
}

pub fn already_reconciled<K: Serialize>(obj: &K) -> Result<bool, MetaError> {
    already_reconciled_value(&to_json(obj)?)
}

/// Legacy check for stores without a status subresource: the stored pair
/// must equal `(generation, generation fingerprint)` exactly.
pub fn already_observed_value(v: &Json) -> Result<bool, MetaError> {
    let current = IntHash::new(generation(v), generation_fingerprint_value(v).to_string());
    Ok(observed_generation(v)? == Some(current))
}

pub fn already_observed<K: Serialize>(obj: &K) -> Result<bool, MetaError> {
    already_observed_value(&to_json(obj)?)
}

/// Which "already reconciled" test a deployment uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReconcileStrategy {
    /// Monotonic counter comparison. Tolerates reconcilers that only bump the counter.
    #[default]
    Generation,
    /// Exact `(generation, fingerprint)` match.
    ObservedHash,
}

impl ReconcileStrategy {
    pub fn is_reconciled(&self, v: &Json) -> Result<bool, MetaError> {
        match self {
            ReconcileStrategy::Generation => already_reconciled_value(v),
            ReconcileStrategy::ObservedHash => already_observed_value(v),
        }
    }

    /// The value a reconciler writes to `status.observedGeneration` once done.
    pub fn observed_stamp(&self, v: &Json) -> IntHash {
        match self {
            ReconcileStrategy::Generation => IntHash::from_generation(generation(v)),
            ReconcileStrategy::ObservedHash => {
                IntHash::new(generation(v), generation_fingerprint_value(v).to_string())
            }
        }
    }
}

impl fmt::Display for ReconcileStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReconcileStrategy::Generation => "generation",
            ReconcileStrategy::ObservedHash => "observed-hash",
        })
    }
}

impl FromStr for ReconcileStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generation" => Ok(ReconcileStrategy::Generation),
            "observed-hash" | "observedhash" | "hash" => Ok(ReconcileStrategy::ObservedHash),
            other => Err(format!("unknown reconcile strategy {:?} (expected generation|observed-hash)", other)),
        }
    }
}

/// Whether `new` differs meaningfully from `old`.
///
/// With `status_subresource` the stored `(generation, fingerprint)` pair of
/// `new` is compared against its current values; otherwise payload fields,
/// labels and filtered annotations of both objects are compared directly.
pub fn spec_changed_value(old: &Json, new: &Json, status_subresource: bool) -> Result<bool, MetaError> {
    let changed = if status_subresource {
        !already_observed_value(new)?
    } else if payload_fields(old) != payload_fields(new) {
        debug!(object = %describe(new), "payload changed");
        true
    } else if labels(old) != labels(new) {
        debug!(object = %describe(new), "labels changed");
        true
    } else if filtered_annotations(old) != filtered_annotations(new) {
        debug!(object = %describe(new), "annotations changed");
        true
    } else {
        false
    };
    Ok(changed)
}

pub fn spec_changed<K: Serialize>(old: &K, new: &K, status_subresource: bool) -> Result<bool, MetaError> {
    spec_changed_value(&to_json(old)?, &to_json(new)?, status_subresource)
}

/// Identity of a status condition for change detection; timestamps and
/// messages are deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConditionKey {
    pub type_: String,
    pub status: String,
    pub reason: String,
}

/// `status.conditions` reduced to a set of [`ConditionKey`]s.
pub fn conditions(v: &Json) -> Result<BTreeSet<ConditionKey>, MetaError> {
    let st = match status(v)? {
        Some(st) => st,
        None => return Ok(BTreeSet::new()),
    };
    let items = match st.get("conditions") {
        None | Some(Json::Null) => return Ok(BTreeSet::new()),
        Some(Json::Array(items)) => items,
        Some(other) => {
            return Err(MetaError::StatusUnreadable {
                object: describe(v),
                reason: format!("status.conditions is {}, expected an array", json_type(other)),
            })
        }
    };
    let field = |c: &Json, name: &str| c.get(name).and_then(|s| s.as_str()).unwrap_or_default().to_string();
    Ok(items
        .iter()
        .map(|c| ConditionKey { type_: field(c, "type"), status: field(c, "status"), reason: field(c, "reason") })
        .collect())
}

/// Equal fingerprints and equal condition sets.
pub fn status_condition_aware_equal_value(old: &Json, new: &Json) -> Result<bool, MetaError> {
    if fingerprint_value(old) != fingerprint_value(new) {
        return Ok(false);
    }
    Ok(conditions(old)? == conditions(new)?)
}

pub fn status_condition_aware_equal<K: Serialize>(old: &K, new: &K) -> Result<bool, MetaError> {
    status_condition_aware_equal_value(&to_json(old)?, &to_json(new)?)
}
