#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kgate_apply::{create_or_patch, try_update, TokioSleeper};
use kgate_core::{config::RetryPolicy, ObjectKey};
use kgate_kubehub::MemoryStore;
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Recorder, SharedString, Unit};

/// Remembers the `verb` label of every `upsert_total` increment.
struct VerbCapture {
    verbs: Mutex<Vec<String>>,
}

impl Recorder for VerbCapture {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key) -> Counter {
        if key.name() == "upsert_total" {
            if let Some(verb) = key.labels().find(|l| l.key() == "verb") {
                self.verbs.lock().unwrap().push(verb.value().to_string());
            }
        }
        Counter::noop()
    }

    fn register_gauge(&self, _key: &Key) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _key: &Key) -> Histogram {
        Histogram::noop()
    }
}

static CAPTURE: VerbCapture = VerbCapture { verbs: Mutex::new(Vec::new()) };

fn with_data(mut c: ConfigMap, k: &str, v: &str) -> ConfigMap {
    c.data.get_or_insert_with(BTreeMap::new).insert(k.into(), v.into());
    c
}

#[tokio::test]
async fn full_updates_are_counted_apart_from_patches() {
    metrics::set_recorder(&CAPTURE).unwrap();
    let key = ObjectKey::namespaced("default", "app");
    let seed = ConfigMap {
        metadata: ObjectMeta { name: Some("app".into()), namespace: Some("default".into()), ..Default::default() },
        ..Default::default()
    };
    let store = MemoryStore::with_objects([seed]).unwrap();

    let policy = RetryPolicy::new(2, Duration::from_millis(1));
    try_update(&store, &key, |c| with_data(c, "k", "v"), policy, &TokioSleeper).await.unwrap();
    create_or_patch(&store, &key, |c| with_data(c, "k", "w")).await.unwrap();

    let verbs = CAPTURE.verbs.lock().unwrap().clone();
    assert_eq!(verbs, vec!["updated".to_string(), "patched".to_string()]);
}
