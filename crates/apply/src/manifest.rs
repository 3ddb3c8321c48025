//! Manifest handling for the CLI and upsert logging: guarded parsing,
//! server-field stripping and merge-patch summaries.

use anyhow::{bail, Context, Result};
use kgate_core::{config::env_parse, LAST_APPLIED_CONFIG_ANNOTATION};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::create_merge_patch;

pub const ENV_MAX_DOC_BYTES: &str = "KGATE_MAX_DOC_BYTES";
pub const ENV_MAX_DOC_NODES: &str = "KGATE_MAX_DOC_NODES";

/// Metadata the API server writes; never part of a desired manifest.
const SERVER_METADATA: &[&str] =
    &["managedFields", "resourceVersion", "generation", "creationTimestamp", "uid", "selfLink"];

/// Number of JSON nodes in `v`, counting stops at `limit`.
fn node_count(v: &Json, limit: usize) -> usize {
    let mut seen = 0;
    let mut pending = vec![v];
    while let Some(node) = pending.pop() {
        seen += 1;
        if seen >= limit {
            break;
        }
        match node {
            Json::Object(map) => pending.extend(map.values()),
            Json::Array(items) => pending.extend(items),
            _ => {}
        }
    }
    seen
}

/// Parse a single YAML or JSON object document.
///
/// Documents over `KGATE_MAX_DOC_BYTES` bytes or `KGATE_MAX_DOC_NODES` nodes
/// are refused before anything else looks at them.
pub fn parse_document(text: &str) -> Result<Json> {
    let max_bytes = env_parse(ENV_MAX_DOC_BYTES, 1_000_000usize);
    if text.len() > max_bytes {
        bail!("document too large (>{} bytes)", max_bytes);
    }
    let yaml: serde_yaml::Value = serde_yaml::from_str(text).context("parsing YAML/JSON document")?;
    let doc = serde_json::to_value(yaml).context("converting document to JSON")?;
    let max_nodes = env_parse(ENV_MAX_DOC_NODES, 100_000usize);
    if node_count(&doc, max_nodes) >= max_nodes {
        bail!("document too complex (>{} nodes)", max_nodes);
    }
    if !doc.is_object() {
        bail!("document is not an object");
    }
    Ok(doc)
}

/// Drop server-owned metadata, `status` and the last-applied annotation so a
/// live object and a manifest can be compared.
pub fn strip_server_fields(mut v: Json) -> Json {
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) else {
        return v;
    };
    for field in SERVER_METADATA {
        meta.remove(*field);
    }
    let annotations_left = match meta.get_mut("annotations").and_then(Json::as_object_mut) {
        Some(annotations) => {
            annotations.remove(LAST_APPLIED_CONFIG_ANNOTATION);
            !annotations.is_empty()
        }
        None => true,
    };
    if !annotations_left {
        meta.remove("annotations");
    }
    v
}

/// Field counts of a merge patch: keys it introduces, replaces and nulls out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.adds == 0 && self.updates == 0 && self.removes == 0
    }

    /// Summarize what `patch` does when applied to `base`.
    pub fn of_patch(base: &Json, patch: &Json) -> Self {
        let mut summary = Self::default();
        summary.tally(Some(base), patch);
        summary
    }

    fn tally(&mut self, base: Option<&Json>, patch: &Json) {
        let Json::Object(fields) = patch else {
            self.updates += 1;
            return;
        };
        let base_fields = base.and_then(Json::as_object);
        for (key, change) in fields {
            let before = base_fields.and_then(|b| b.get(key));
            match (before, change) {
                (None, Json::Null) => {}
                (Some(_), Json::Null) => self.removes += 1,
                (Some(prev @ Json::Object(_)), Json::Object(_)) => self.tally(Some(prev), change),
                (None, _) => self.adds += 1,
                (Some(_), _) => self.updates += 1,
            }
        }
    }
}

/// Summary of the merge patch taking `base` to `target`.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    DiffSummary::of_patch(base, &create_merge_patch(base, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn live_objects_lose_server_fields_and_last_applied() {
        let live = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "x",
                "namespace": "ns",
                "managedFields": [{"manager": "kubectl"}],
                "resourceVersion": "123",
                "generation": 5,
                "creationTimestamp": "2020-01-01T00:00:00Z",
                "annotations": {"kubectl.kubernetes.io/last-applied-configuration": "{}"}
            },
            "status": {"obs": true},
            "data": {"k": "v"}
        });
        let stripped = strip_server_fields(live);
        assert_eq!(
            stripped,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "x", "namespace": "ns"},
                "data": {"k": "v"}
            })
        );

        let kept = strip_server_fields(json!({"metadata": {"annotations": {"team": "infra"}}}));
        assert_eq!(kept["metadata"]["annotations"]["team"], "infra");
    }

    #[test]
    fn summaries_follow_merge_patch_semantics() {
        let base = json!({
            "a": 1,
            "b": {"x": 1},
            "c": [1, 2, 3],
            "gone": "soon"
        });
        let target = json!({
            "a": 2,
            "b": {"x": 1, "y": 2},
            "c": [1, 9],
            "d": true
        });
        let s = diff_summary(&target, &base);
        // a and the whole c list are replaced; b.y and d are new; gone is nulled.
        assert_eq!(s, DiffSummary { adds: 2, updates: 2, removes: 1 });
        assert!(diff_summary(&base, &base).is_empty());
    }

    #[test]
    fn parse_document_accepts_yaml_and_json_objects_only() {
        let y = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: x\n";
        assert_eq!(parse_document(y).unwrap()["metadata"]["name"], "x");
        let j = r#"{"apiVersion":"v1","kind":"ConfigMap"}"#;
        assert_eq!(parse_document(j).unwrap()["kind"], "ConfigMap");
        let e = parse_document("- a\n- b\n").unwrap_err().to_string();
        assert!(e.contains("not an object"), "e={}", e);
    }

    #[test]
    fn node_counting_stops_at_the_limit() {
        let wide = Json::Array((0..50).map(Json::from).collect());
        assert_eq!(node_count(&wide, 10), 10);
        assert_eq!(node_count(&wide, 100), 51);
    }
}
