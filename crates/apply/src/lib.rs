//! kgate apply: optimistic create-or-patch / try-update helpers and merge-patch diffs.

#![forbid(unsafe_code)]

use kgate_core::ObjectKey;
use kgate_kubehub::StoreError;
use serde::{de::DeserializeOwned, Serialize};

pub mod manifest;
pub mod patch;
pub mod sleep;
pub mod upsert;

pub use manifest::{diff_summary, parse_document, strip_server_fields, DiffSummary};
pub use patch::{create_merge_patch, is_empty_patch};
pub use sleep::{Sleeper, TokioSleeper};
pub use upsert::{create_or_patch, patch_object, try_patch, try_update};

/// Bounds the upsert functions place on resource types.
pub trait Object:
    kube::Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> Object for K where
    K: kube::Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

#[derive(Debug, thiserror::Error)]
pub enum UpsertError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },

    /// The transform produced something that cannot be serialized. Never retried.
    #[error("failed to serialize {kind} {key}: {source}")]
    Serialize {
        kind: String,
        key: ObjectKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {kind}: {reason}")]
    InvalidObject { kind: String, reason: String },

    #[error("failed to {op} {kind} {key} after {attempts} attempts due to {last}")]
    Exhausted { op: &'static str, kind: String, key: ObjectKey, attempts: u32, last: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl UpsertError {
    pub fn is_not_found(&self) -> bool {
        match self {
            UpsertError::NotFound { .. } => true,
            UpsertError::Store(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Programmer errors: retrying cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UpsertError::Serialize { .. } | UpsertError::InvalidObject { .. })
    }
}
