//! kgate core types shared by the admission, upsert and dispatch crates.

#![forbid(unsafe_code)]

use std::fmt;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};

pub mod config;

pub use config::RetryPolicy;

/// Annotation written by `kubectl apply`; never part of a fingerprint or an
/// annotation comparison.
pub const LAST_APPLIED_CONFIG_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Identity of an object inside one resource kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: Some(namespace.into()), name: name.into() }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self { namespace: None, name: name.into() }
    }

    /// Build from optional namespace/name as found in object metadata.
    /// Returns `None` when the name is missing or empty.
    pub fn from_parts(namespace: Option<&str>, name: Option<&str>) -> Option<Self> {
        let name = name.filter(|n| !n.is_empty())?;
        let namespace = namespace.filter(|ns| !ns.is_empty()).map(|ns| ns.to_string());
        Some(Self { namespace, name: name.to_string() })
    }

    /// Work-queue key: `namespace/name`, or just `name` for cluster-scoped objects.
    pub fn queue_key(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    /// Inverse of [`ObjectKey::queue_key`].
    pub fn parse_queue_key(key: &str) -> Option<Self> {
        match key.split_once('/') {
            Some((ns, name)) => Self::from_parts(Some(ns), Some(name)),
            None => Self::from_parts(None, Some(key)),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}@{}", self.name, ns),
            None => f.write_str(&self.name),
        }
    }
}

/// What a create-or-patch call did to the live object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Verb {
    Unchanged,
    Created,
    Patched,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Unchanged => "unchanged",
            Verb::Created => "created",
            Verb::Patched => "patched",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// 64-bit FNV-1a. Used for fingerprints, so the output must never change
/// between releases.
#[derive(Debug, Clone, Copy)]
pub struct Fnv64a(u64);

impl Default for Fnv64a {
    fn default() -> Self {
        Self(FNV_OFFSET)
    }
}

impl Hasher for Fnv64a {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 ^= *b as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }
}

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut h = Fnv64a::default();
    h.write(bytes);
    h.finish()
}

pub mod prelude {
    pub use super::{ObjectKey, RetryPolicy, Verb, LAST_APPLIED_CONFIG_ANNOTATION};
}
