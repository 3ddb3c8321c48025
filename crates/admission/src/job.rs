//! Job, served only as `batch/v1`.

use k8s_openapi::api::batch::v1::Job;
use serde_json::Value as Json;

use crate::version::{set_api_version, ConversionError, WireVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobVersion {
    BatchV1,
}

impl WireVersion for JobVersion {
    type Hub = Job;

    const KIND: &'static str = "Job";
    const GROUPS: &'static [&'static str] = &["batch"];

    fn resolve(group: &str, version: &str) -> Result<Self, ConversionError> {
        match (group, version) {
            ("batch", "v1") => Ok(Self::BatchV1),
            _ => Err(ConversionError::UnknownVersion {
                group: group.to_string(),
                version: version.to_string(),
                kind: Self::KIND.to_string(),
            }),
        }
    }

    fn api_version(self) -> &'static str {
        "batch/v1"
    }

    fn to_hub(self, mut doc: Json) -> Result<Json, ConversionError> {
        set_api_version(&mut doc, "batch/v1");
        Ok(doc)
    }

    fn from_hub(self, mut doc: Json) -> Result<Json, ConversionError> {
        set_api_version(&mut doc, self.api_version());
        Ok(doc)
    }
}
