#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kgate_meta::{fingerprint, fingerprint_value, Fingerprint};
use serde_json::json;

fn cm(generation: i64, labels: &[(&str, &str)], annotations: &[(&str, &str)], data: &[(&str, &str)]) -> ConfigMap {
    let map = |pairs: &[(&str, &str)]| {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>()
    };
    ConfigMap {
        metadata: ObjectMeta {
            name: Some("settings".into()),
            namespace: Some("default".into()),
            generation: Some(generation),
            labels: Some(map(labels)),
            annotations: Some(map(annotations)),
            ..Default::default()
        },
        data: Some(map(data)),
        ..Default::default()
    }
}

#[test]
fn stable_across_reserialization() {
    let obj = cm(3, &[("app", "web"), ("tier", "fe")], &[("owner", "ops")], &[("a", "1"), ("b", "2")]);
    let fp = fingerprint(&obj).unwrap();

    let text = serde_json::to_string(&obj).unwrap();
    let reparsed: ConfigMap = serde_json::from_str(&text).unwrap();
    assert_eq!(fingerprint(&reparsed).unwrap(), fp);

    let as_value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(fingerprint_value(&as_value), fp);
}

#[test]
fn independent_of_key_order() {
    let a = json!({
        "metadata": {"generation": 1, "labels": {"x": "1", "y": "2"}},
        "spec": {"template": {"b": [1, 2, {"q": true, "p": null}], "a": "s"}}
    });
    let b = json!({
        "spec": {"template": {"a": "s", "b": [1, 2, {"p": null, "q": true}]}},
        "metadata": {"labels": {"y": "2", "x": "1"}, "generation": 1}
    });
    assert_eq!(fingerprint_value(&a), fingerprint_value(&b));
}

#[test]
fn identical_relevant_fields_give_identical_fingerprints() {
    let mut old = cm(4, &[("app", "web")], &[("owner", "ops")], &[("k", "v")]);
    let mut new = old.clone();
    // Noise that must not participate.
    old.metadata.resource_version = Some("10".into());
    new.metadata.resource_version = Some("11".into());
    new.metadata.uid = Some("0000-1111".into());
    new.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert("kubectl.kubernetes.io/last-applied-configuration".into(), "{\"huge\":true}".into());
    assert_eq!(fingerprint(&old).unwrap(), fingerprint(&new).unwrap());
}

#[test]
fn status_is_not_part_of_the_fingerprint() {
    let a = json!({"metadata": {"generation": 2}, "spec": {"r": 1}, "status": {"observedGeneration": 1}});
    let b = json!({"metadata": {"generation": 2}, "spec": {"r": 1}, "status": {"observedGeneration": 2}});
    assert_eq!(fingerprint_value(&a), fingerprint_value(&b));
}

#[test]
fn each_relevant_field_changes_the_fingerprint() {
    let base = cm(1, &[("app", "web")], &[("owner", "ops")], &[("k", "v")]);
    let fp = fingerprint(&base).unwrap();
    let variants: Vec<ConfigMap> = vec![
        cm(2, &[("app", "web")], &[("owner", "ops")], &[("k", "v")]),
        cm(1, &[("app", "api")], &[("owner", "ops")], &[("k", "v")]),
        cm(1, &[("app", "web")], &[("owner", "dev")], &[("k", "v")]),
        cm(1, &[("app", "web")], &[("owner", "ops")], &[("k", "w")]),
    ];
    for v in variants {
        assert_ne!(fingerprint(&v).unwrap(), fp, "variant {:?} collided", v.metadata);
    }
}

#[test]
fn fingerprint_is_a_plain_u64() {
    let fp: Fingerprint = fingerprint_value(&json!({}));
    let round: Fingerprint = serde_json::from_value(serde_json::to_value(fp).unwrap()).unwrap();
    assert_eq!(fp, round);
}
