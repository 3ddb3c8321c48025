//! `(generation, hash)` pairs stored in `status.observedGeneration`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;

use crate::MetaError;

/// A generation counter optionally paired with a fingerprint.
///
/// Encoded as a plain JSON integer when there is no hash, otherwise as the
/// string `"<generation>$<hash>"`, so reconcilers that only write the counter
/// stay wire compatible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntHash {
    pub generation: i64,
    pub hash: Option<String>,
}

impl IntHash {
    pub fn new(generation: i64, hash: impl Into<String>) -> Self {
        let hash = hash.into();
        Self { generation, hash: if hash.is_empty() { None } else { Some(hash) } }
    }

    pub fn from_generation(generation: i64) -> Self {
        Self { generation, hash: None }
    }

    /// Accepts integers and `"gen"` / `"gen$hash"` strings; `null` is `None`.
    pub fn from_json(v: &Json) -> Result<Option<Self>, MetaError> {
        match v {
            Json::Null => Ok(None),
            Json::Number(n) => n
                .as_i64()
                .map(|g| Some(Self::from_generation(g)))
                .ok_or_else(|| MetaError::InvalidIntHash(n.to_string())),
            Json::String(s) => s.parse().map(Some),
            other => Err(MetaError::InvalidIntHash(other.to_string())),
        }
    }

    pub fn to_json(&self) -> Json {
        match &self.hash {
            None => Json::from(self.generation),
            Some(_) => Json::String(self.to_string()),
        }
    }
}

impl fmt::Display for IntHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hash {
            Some(h) => write!(f, "{}${}", self.generation, h),
            None => write!(f, "{}", self.generation),
        }
    }
}

impl FromStr for IntHash {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (gen, hash) = match s.split_once('$') {
            Some((g, h)) => (g, h),
            None => (s, ""),
        };
        let generation = gen.trim().parse::<i64>().map_err(|_| MetaError::InvalidIntHash(s.to_string()))?;
        Ok(Self::new(generation, hash))
    }
}

impl Serialize for IntHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.hash {
            None => serializer.serialize_i64(self.generation),
            Some(_) => serializer.collect_str(self),
        }
    }
}

impl<'de> Deserialize<'de> for IntHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Json::deserialize(deserializer)?;
        IntHash::from_json(&v)
            .map_err(serde::de::Error::custom)?
            .ok_or_else(|| serde::de::Error::custom("IntHash must not be null"))
    }
}
