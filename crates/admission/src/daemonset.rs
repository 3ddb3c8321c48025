//! DaemonSet served as `apps/v1` (hub), `apps/v1beta2` and `extensions/v1beta1`.

use k8s_openapi::api::apps::v1::DaemonSet;
use serde_json::{json, Map, Value as Json};

use crate::version::{set_api_version, ConversionError, WireVersion};

/// Where `extensions/v1beta1` `spec.templateGeneration` lives on the hub object.
pub const TEMPLATE_GENERATION_ANNOTATION: &str = "deprecated.daemonset.template.generation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSetVersion {
    AppsV1,
    AppsV1Beta2,
    ExtensionsV1Beta1,
}

impl WireVersion for DaemonSetVersion {
    type Hub = DaemonSet;

    const KIND: &'static str = "DaemonSet";
    const GROUPS: &'static [&'static str] = &["apps", "extensions"];

    fn resolve(group: &str, version: &str) -> Result<Self, ConversionError> {
        match (group, version) {
            ("apps", "v1") => Ok(Self::AppsV1),
            ("apps", "v1beta2") => Ok(Self::AppsV1Beta2),
            ("extensions", "v1beta1") => Ok(Self::ExtensionsV1Beta1),
            _ => Err(ConversionError::UnknownVersion {
                group: group.to_string(),
                version: version.to_string(),
                kind: Self::KIND.to_string(),
            }),
        }
    }

    fn api_version(self) -> &'static str {
        match self {
            Self::AppsV1 => "apps/v1",
            Self::AppsV1Beta2 => "apps/v1beta2",
            Self::ExtensionsV1Beta1 => "extensions/v1beta1",
        }
    }

    fn to_hub(self, mut doc: Json) -> Result<Json, ConversionError> {
        set_api_version(&mut doc, "apps/v1");
        if self == Self::ExtensionsV1Beta1 {
            self.lift_template_generation(&mut doc)?;
            default_selector(&mut doc);
        }
        Ok(doc)
    }

    fn from_hub(self, mut doc: Json) -> Result<Json, ConversionError> {
        set_api_version(&mut doc, self.api_version());
        if self == Self::ExtensionsV1Beta1 {
            self.lower_template_generation(&mut doc)?;
        }
        Ok(doc)
    }

    fn restore_defaults(self, wire: &Json, encoded: &mut Json) {
        if self != Self::ExtensionsV1Beta1 || !selector_missing(wire) {
            return;
        }
        if let Some(spec) = encoded.get_mut("spec").and_then(Json::as_object_mut) {
            spec.remove("selector");
        }
    }
}

impl DaemonSetVersion {
    fn invalid(self, reason: impl Into<String>) -> ConversionError {
        ConversionError::InvalidField {
            api_version: self.api_version().to_string(),
            kind: Self::KIND.to_string(),
            field: "spec.templateGeneration",
            reason: reason.into(),
        }
    }

    /// `spec.templateGeneration` -> annotation.
    fn lift_template_generation(self, doc: &mut Json) -> Result<(), ConversionError> {
        let generation = match doc.get_mut("spec").and_then(Json::as_object_mut) {
            Some(spec) => spec.remove("templateGeneration"),
            None => None,
        };
        let generation = match generation {
            None | Some(Json::Null) => return Ok(()),
            Some(Json::Number(n)) => n.as_i64().ok_or_else(|| self.invalid(format!("{} is not an integer", n)))?,
            Some(other) => return Err(self.invalid(format!("expected integer, got {}", other))),
        };
        let Some(obj) = doc.as_object_mut() else {
            return Ok(());
        };
        let meta = obj.entry("metadata").or_insert_with(|| json!({}));
        if let Some(meta) = meta.as_object_mut() {
            let annotations = meta.entry("annotations").or_insert_with(|| Json::Object(Map::new()));
            if let Some(annotations) = annotations.as_object_mut() {
                annotations.insert(TEMPLATE_GENERATION_ANNOTATION.into(), Json::String(generation.to_string()));
            }
        }
        Ok(())
    }

    /// Annotation -> `spec.templateGeneration`.
    fn lower_template_generation(self, doc: &mut Json) -> Result<(), ConversionError> {
        let raw = match doc.pointer_mut("/metadata/annotations").and_then(Json::as_object_mut) {
            Some(annotations) => {
                let raw = annotations.remove(TEMPLATE_GENERATION_ANNOTATION);
                let emptied = annotations.is_empty();
                if emptied {
                    if let Some(meta) = doc.get_mut("metadata").and_then(Json::as_object_mut) {
                        meta.remove("annotations");
                    }
                }
                raw
            }
            None => None,
        };
        let Some(raw) = raw else {
            return Ok(());
        };
        let generation: i64 = raw
            .as_str()
            .ok_or_else(|| self.invalid(format!("annotation is not a string: {}", raw)))?
            .parse()
            .map_err(|e| self.invalid(format!("annotation {}: {}", raw, e)))?;
        if let Some(spec) = doc.get_mut("spec").and_then(Json::as_object_mut) {
            spec.insert("templateGeneration".into(), Json::from(generation));
        }
        Ok(())
    }
}

/// `extensions/v1beta1` allowed omitting the selector; it defaulted to the template labels.
fn default_selector(doc: &mut Json) {
    let labels = match doc.pointer("/spec/template/metadata/labels") {
        Some(Json::Object(labels)) if !labels.is_empty() => labels.clone(),
        _ => return,
    };
    if !selector_missing(doc) {
        return;
    }
    if let Some(spec) = doc.get_mut("spec").and_then(Json::as_object_mut) {
        spec.insert("selector".into(), json!({ "matchLabels": labels }));
    }
}

fn selector_missing(doc: &Json) -> bool {
    matches!(doc.pointer("/spec/selector"), None | Some(Json::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{decode, encode};

    fn legacy() -> Json {
        json!({
            "apiVersion": "extensions/v1beta1",
            "kind": "DaemonSet",
            "metadata": {"name": "agent", "namespace": "kube-system"},
            "spec": {
                "templateGeneration": 3,
                "template": {
                    "metadata": {"labels": {"app": "agent"}},
                    "spec": {"containers": [{"name": "agent", "image": "agent:1"}]}
                }
            }
        })
    }

    #[test]
    fn resolves_served_versions_only() {
        assert_eq!(DaemonSetVersion::resolve("apps", "v1beta2").unwrap(), DaemonSetVersion::AppsV1Beta2);
        let err = DaemonSetVersion::resolve("apps", "v1beta1").unwrap_err();
        assert!(err.is_unknown_version());
        assert!(DaemonSetVersion::serves("extensions", "DaemonSet"));
        assert!(!DaemonSetVersion::serves("apps", "Deployment"));
    }

    #[test]
    fn legacy_template_generation_round_trips_through_the_hub() {
        let raw = serde_json::to_vec(&legacy()).unwrap();
        let decoded = decode(DaemonSetVersion::ExtensionsV1Beta1, &raw).unwrap();

        let hub_annotations = decoded.hub.metadata.annotations.clone().unwrap();
        assert_eq!(hub_annotations.get(TEMPLATE_GENERATION_ANNOTATION).map(String::as_str), Some("3"));
        let selector = decoded.hub.spec.as_ref().unwrap().selector.match_labels.clone().unwrap();
        assert_eq!(selector.get("app").map(String::as_str), Some("agent"));

        assert_eq!(decoded.original["apiVersion"], "extensions/v1beta1");
        assert_eq!(decoded.original["spec"]["templateGeneration"], 3);
        assert!(decoded.original["metadata"].get("annotations").is_none());
        assert!(decoded.original["spec"].get("selector").is_none());

        let mut again = encode(DaemonSetVersion::ExtensionsV1Beta1, &decoded.hub).unwrap();
        assert_eq!(again["spec"]["selector"]["matchLabels"]["app"], "agent");
        again["spec"].as_object_mut().unwrap().remove("selector");
        assert_eq!(again, decoded.original);
    }

    #[test]
    fn explicit_legacy_selectors_stay_in_the_patch_base() {
        let mut doc = legacy();
        doc["spec"]["selector"] = json!({"matchLabels": {"tier": "node"}});
        let raw = serde_json::to_vec(&doc).unwrap();
        let decoded = decode(DaemonSetVersion::ExtensionsV1Beta1, &raw).unwrap();
        assert_eq!(decoded.original["spec"]["selector"]["matchLabels"]["tier"], "node");
        let again = encode(DaemonSetVersion::ExtensionsV1Beta1, &decoded.hub).unwrap();
        assert_eq!(again, decoded.original);
    }

    #[test]
    fn beta2_only_swaps_the_api_version() {
        let mut doc = legacy();
        doc["apiVersion"] = json!("apps/v1beta2");
        doc["spec"].as_object_mut().unwrap().remove("templateGeneration");
        doc["spec"]["selector"] = json!({"matchLabels": {"app": "agent"}});
        let raw = serde_json::to_vec(&doc).unwrap();
        let decoded = decode(DaemonSetVersion::AppsV1Beta2, &raw).unwrap();
        assert_eq!(decoded.original["apiVersion"], "apps/v1beta2");
        assert!(decoded.hub.metadata.annotations.is_none());
    }

    #[test]
    fn malformed_template_generation_is_rejected() {
        let mut doc = legacy();
        doc["spec"]["templateGeneration"] = json!("three");
        let raw = serde_json::to_vec(&doc).unwrap();
        assert!(decode(DaemonSetVersion::ExtensionsV1Beta1, &raw).is_err());
    }
}
