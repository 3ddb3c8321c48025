//! Two-way JSON merge patch (RFC 7386) synthesis.

use serde_json::{Map, Value as Json};

/// Merge patch taking `current` to `desired`.
///
/// Objects are diffed key by key; arrays and scalars are replaced wholesale;
/// keys missing from `desired` become `null`. Returns `{}` when nothing differs.
///
/// Arrays carry no merge keys here, so a change to one element resends the
/// whole list as `desired` holds it. Fields the server added to other elements
/// that `desired` does not carry are dropped; transforms that edit lists of
/// server-defaulted structs should start from the live object.
pub fn create_merge_patch(current: &Json, desired: &Json) -> Json {
    diff(current, desired).unwrap_or_else(|| Json::Object(Map::new()))
}

/// `true` for the `{}` patch.
pub fn is_empty_patch(patch: &Json) -> bool {
    patch.as_object().map_or(false, Map::is_empty)
}

fn diff(current: &Json, desired: &Json) -> Option<Json> {
    match (current, desired) {
        (Json::Object(cur), Json::Object(des)) => {
            let mut out = Map::new();
            for (k, dv) in des {
                match cur.get(k) {
                    // null on both sides (or null against absent) means absent.
                    None if dv.is_null() => {}
                    None => {
                        out.insert(k.clone(), dv.clone());
                    }
                    Some(cv) => {
                        if let Some(p) = diff(cv, dv) {
                            out.insert(k.clone(), p);
                        }
                    }
                }
            }
            for (k, cv) in cur {
                if !des.contains_key(k) && !cv.is_null() {
                    out.insert(k.clone(), Json::Null);
                }
            }
            if out.is_empty() {
                None
            } else {
                Some(Json::Object(out))
            }
        }
        // A nested object replacing a scalar must not carry nulls.
        (_, Json::Object(_)) if current != desired => Some(strip_nulls(desired.clone())),
        _ if current == desired => None,
        _ => Some(desired.clone()),
    }
}

fn strip_nulls(v: Json) -> Json {
    match v {
        Json::Object(map) => {
            Json::Object(map.into_iter().filter(|(_, v)| !v.is_null()).map(|(k, v)| (k, strip_nulls(v))).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_documents_yield_empty_patch() {
        let a = json!({"spec": {"replicas": 2, "ports": [80, 443]}});
        let p = create_merge_patch(&a, &a.clone());
        assert!(is_empty_patch(&p));
    }

    #[test]
    fn nested_changes_and_removals() {
        let cur = json!({
            "metadata": {"labels": {"a": "1", "b": "2"}},
            "spec": {"replicas": 2, "ports": [80, 443]}
        });
        let des = json!({
            "metadata": {"labels": {"a": "1", "c": "3"}},
            "spec": {"replicas": 2, "ports": [80]}
        });
        let p = create_merge_patch(&cur, &des);
        assert_eq!(
            p,
            json!({
                "metadata": {"labels": {"b": null, "c": "3"}},
                "spec": {"ports": [80]}
            })
        );
    }

    #[test]
    fn applying_patch_reproduces_desired() {
        let cur = json!({"a": {"b": 1, "c": [1, 2]}, "d": "x", "e": 5});
        let des = json!({"a": {"b": 2, "f": {"g": true}}, "d": {"nested": 1}});
        let p = create_merge_patch(&cur, &des);
        let mut doc = cur.clone();
        json_patch::merge(&mut doc, &p);
        assert_eq!(doc, des);
    }

    #[test]
    fn lists_are_resent_whole() {
        let live = json!({"ports": [{"port": 80, "protocol": "TCP"}, {"port": 443, "protocol": "TCP"}]});
        let desired = json!({"ports": [{"port": 80}, {"port": 8443}]});
        let p = create_merge_patch(&live, &desired);
        assert_eq!(p, json!({"ports": [{"port": 80}, {"port": 8443}]}));
        let mut doc = live.clone();
        json_patch::merge(&mut doc, &p);
        assert!(doc["ports"][0].get("protocol").is_none());
    }
}
