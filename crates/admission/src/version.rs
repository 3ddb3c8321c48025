//! Wire versions of a mediated kind and their conversion to the hub version.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as Json;

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// The (group, version) pair is not one this kind is served under.
    #[error("unknown version {group}/{version} for {kind}")]
    UnknownVersion { group: String, version: String, kind: String },

    #[error("failed to decode {api_version} {kind}: {source}")]
    Decode {
        api_version: String,
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {kind} as {api_version}: {source}")]
    Encode {
        api_version: String,
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {field} in {api_version} {kind}: {reason}")]
    InvalidField { api_version: String, kind: String, field: &'static str, reason: String },
}

impl ConversionError {
    pub fn is_unknown_version(&self) -> bool {
        matches!(self, ConversionError::UnknownVersion { .. })
    }
}

/// A closed set of served versions for one kind.
///
/// Conversions work on JSON documents: `to_hub` rewrites a document of this
/// version into the hub shape and `from_hub` does the reverse. Both must be
/// total for documents produced by the other.
pub trait WireVersion: Copy + std::fmt::Debug + Send + Sync + 'static {
    type Hub: kube::Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    const KIND: &'static str;
    /// API groups the kind is served under.
    const GROUPS: &'static [&'static str];

    fn resolve(group: &str, version: &str) -> Result<Self, ConversionError>;

    fn api_version(self) -> &'static str;

    fn to_hub(self, doc: Json) -> Result<Json, ConversionError>;

    fn from_hub(self, doc: Json) -> Result<Json, ConversionError>;

    /// Drop from `encoded` whatever `to_hub` defaulted into `wire`, so the
    /// patch base holds only what the payload actually carried.
    fn restore_defaults(self, _wire: &Json, _encoded: &mut Json) {}

    fn serves(group: &str, kind: &str) -> bool {
        kind == Self::KIND && Self::GROUPS.contains(&group)
    }
}

/// A request payload decoded into the hub type.
#[derive(Debug, Clone)]
pub struct Decoded<V: WireVersion> {
    pub version: V,
    pub hub: V::Hub,
    /// The payload as this version re-encodes it; patches are computed against it.
    pub original: Json,
}

pub fn decode<V: WireVersion>(version: V, raw: &[u8]) -> Result<Decoded<V>, ConversionError> {
    let decode_err = |source| ConversionError::Decode {
        api_version: version.api_version().to_string(),
        kind: V::KIND.to_string(),
        source,
    };
    let wire: Json = serde_json::from_slice(raw).map_err(decode_err)?;
    let hub_doc = version.to_hub(wire.clone())?;
    let hub: V::Hub = serde_json::from_value(hub_doc).map_err(decode_err)?;
    let mut original = encode(version, &hub)?;
    version.restore_defaults(&wire, &mut original);
    Ok(Decoded { version, hub, original })
}

pub fn encode<V: WireVersion>(version: V, hub: &V::Hub) -> Result<Json, ConversionError> {
    let doc = serde_json::to_value(hub).map_err(|source| ConversionError::Encode {
        api_version: version.api_version().to_string(),
        kind: V::KIND.to_string(),
        source,
    })?;
    version.from_hub(doc)
}

/// Set `apiVersion` on an object document.
pub(crate) fn set_api_version(doc: &mut Json, api_version: &str) {
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("apiVersion".into(), Json::String(api_version.into()));
    }
}
