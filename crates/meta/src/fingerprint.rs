//! Deterministic object fingerprints.
//!
//! The hash input is an explicit canonical encoding rather than a dump of the
//! in-memory structure: a version tag, the generation, sorted labels, sorted
//! annotations minus last-applied, then every payload field depth-first with
//! object keys sorted. Each value is length- or tag-prefixed so adjacent
//! fields cannot collide by concatenation.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;

use kgate_core::Fnv64a;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{filtered_annotations, generation, labels, payload_fields, to_json, MetaError};

const ENCODING_TAG: &[u8] = b"kgate/fp/v1\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Canonical {
    h: Fnv64a,
}

impl Canonical {
    fn new() -> Self {
        let mut h = Fnv64a::default();
        h.write(ENCODING_TAG);
        Self { h }
    }

    fn len(&mut self, n: usize) {
        self.h.write(&(n as u64).to_le_bytes());
    }

    fn str(&mut self, s: &str) {
        self.len(s.len());
        self.h.write(s.as_bytes());
    }

    fn section(&mut self, name: &str) {
        self.h.write(b"#");
        self.str(name);
    }

    fn field(&mut self, name: &str) {
        self.h.write(b".");
        self.str(name);
    }

    fn string_map(&mut self, name: &str, m: &BTreeMap<String, String>) {
        if m.is_empty() {
            return;
        }
        self.section(name);
        self.len(m.len());
        for (k, v) in m {
            self.str(k);
            self.str(v);
        }
    }

    fn value(&mut self, v: &Json) {
        match v {
            Json::Null => self.h.write(b"n"),
            Json::Bool(true) => self.h.write(b"t"),
            Json::Bool(false) => self.h.write(b"f"),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    self.h.write(b"i");
                    self.h.write(&i.to_le_bytes());
                } else if let Some(u) = n.as_u64() {
                    self.h.write(b"u");
                    self.h.write(&u.to_le_bytes());
                } else {
                    self.h.write(b"d");
                    self.h.write(&n.as_f64().unwrap_or(f64::NAN).to_bits().to_le_bytes());
                }
            }
            Json::String(s) => {
                self.h.write(b"s");
                self.str(s);
            }
            Json::Array(items) => {
                self.h.write(b"a");
                self.len(items.len());
                for item in items {
                    self.value(item);
                }
            }
            Json::Object(map) => {
                self.h.write(b"o");
                self.len(map.len());
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for k in keys {
                    self.str(k);
                    self.value(&map[k]);
                }
            }
        }
    }

    fn header(&mut self, v: &Json) {
        self.section("generation");
        self.h.write(&generation(v).to_le_bytes());
        self.string_map("labels", &labels(v));
        self.string_map("annotations", &filtered_annotations(v));
    }

    fn finish(self) -> Fingerprint {
        Fingerprint(self.h.finish())
    }
}

/// Fingerprint over generation, labels, filtered annotations and all payload fields.
pub fn fingerprint_value(v: &Json) -> Fingerprint {
    let mut c = Canonical::new();
    c.header(v);
    for (name, field) in payload_fields(v) {
        c.field(name);
        c.value(field);
    }
    c.finish()
}

/// Fingerprint over generation, labels and filtered annotations only.
pub fn generation_fingerprint_value(v: &Json) -> Fingerprint {
    let mut c = Canonical::new();
    c.header(v);
    c.finish()
}

pub fn fingerprint<K: Serialize>(obj: &K) -> Result<Fingerprint, MetaError> {
    Ok(fingerprint_value(&to_json(obj)?))
}

pub fn generation_fingerprint<K: Serialize>(obj: &K) -> Result<Fingerprint, MetaError> {
    Ok(generation_fingerprint_value(&to_json(obj)?))
}
