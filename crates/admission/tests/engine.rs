#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::batch::v1::Job;
use kgate_admission::{
    AdmissionEngine, AdmissionRequest, AdmissionResponse, DaemonSetVersion, HandlerFuncs, JobVersion, Operation,
    StatusReason,
};
use kgate_kubehub::{parse_gvk_key, Fault, MemoryStore, Op};
use serde_json::{json, Value as Json};

type DsEngine = AdmissionEngine<DaemonSetVersion, HandlerFuncs<DaemonSet>, MemoryStore<DaemonSet>>;

#[derive(Default)]
struct Calls {
    create: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
}

impl Calls {
    fn total(&self) -> usize {
        self.create.load(Ordering::SeqCst) + self.update.load(Ordering::SeqCst) + self.delete.load(Ordering::SeqCst)
    }
}

fn ds_doc(api_version: &str) -> Json {
    json!({
        "apiVersion": api_version,
        "kind": "DaemonSet",
        "metadata": {"name": "agent", "namespace": "kube-system"},
        "spec": {
            "selector": {"matchLabels": {"app": "agent"}},
            "template": {
                "metadata": {"labels": {"app": "agent"}},
                "spec": {"containers": [{"name": "agent", "image": "agent:1"}]}
            }
        }
    })
}

fn ds() -> DaemonSet {
    serde_json::from_value(ds_doc("apps/v1")).unwrap()
}

fn request(gvk: &str, op: Operation, object: Option<&Json>) -> AdmissionRequest {
    let mut req = AdmissionRequest::new(parse_gvk_key(gvk).unwrap(), op);
    req.uid = "uid-1".into();
    req.namespace = Some("kube-system".into());
    req.name = Some("agent".into());
    req.object = object.map(|o| serde_json::to_vec(o).unwrap());
    req
}

/// Labels every created or updated DaemonSet with `injected=yes`.
fn labelling_handler(calls: Arc<Calls>) -> HandlerFuncs<DaemonSet> {
    let on_create = calls.clone();
    let on_update = calls.clone();
    let on_delete = calls;
    HandlerFuncs::new()
        .with_create(move |mut ds: DaemonSet| {
            on_create.create.fetch_add(1, Ordering::SeqCst);
            ds.metadata.labels.get_or_insert_with(Default::default).insert("injected".into(), "yes".into());
            Ok(Some(ds))
        })
        .with_update(move |_old, _new| {
            on_update.update.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .with_delete(move |_ds| {
            on_delete.delete.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
}

async fn ready_engine(handler: HandlerFuncs<DaemonSet>, store: MemoryStore<DaemonSet>) -> DsEngine {
    let engine = DsEngine::new("daemonsets", "daemonset", handler);
    engine.initialize(store).await;
    engine
}

fn patch_type(resp: &AdmissionResponse) -> Json {
    serde_json::to_value(resp).unwrap()["patchType"].clone()
}

fn apply_patch(doc: &Json, patch: &[u8]) -> Json {
    let patch: json_patch::Patch = serde_json::from_slice(patch).unwrap();
    let mut out = doc.clone();
    json_patch::patch(&mut out, &patch.0).unwrap();
    out
}

#[tokio::test]
async fn unrelated_requests_are_allowed_without_touching_the_handler() {
    let calls = Arc::new(Calls::default());
    let engine = DsEngine::new("daemonsets", "daemonset", labelling_handler(calls.clone()));

    // Even before initialization.
    let deployment = json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "x"}});
    let resp = engine.admit(&request("apps/v1/Deployment", Operation::Create, Some(&deployment))).await;
    assert!(resp.allowed);
    assert!(resp.patch.is_none());
    assert_eq!(StatusReason::of(&resp), None);
    assert_eq!(resp.uid, "uid-1");

    engine.initialize(MemoryStore::new()).await;
    let mut status = request("apps/v1/DaemonSet", Operation::Update, Some(&ds_doc("apps/v1")));
    status.sub_resource = Some("status".into());
    assert!(engine.admit(&status).await.allowed);

    let connect = request("apps/v1/DaemonSet", Operation::Connect, None);
    assert!(engine.admit(&connect).await.allowed);

    assert_eq!(calls.total(), 0);
}

#[tokio::test]
async fn uninitialized_engine_answers_service_unavailable() {
    let calls = Arc::new(Calls::default());
    let engine = DsEngine::new("daemonsets", "daemonset", labelling_handler(calls.clone()));
    assert!(!engine.is_initialized().await);
    let resp = engine.admit(&request("apps/v1/DaemonSet", Operation::Create, Some(&ds_doc("apps/v1")))).await;
    assert!(!resp.allowed);
    assert_eq!(StatusReason::of(&resp), Some(StatusReason::ServiceUnavailable));
    assert_eq!(resp.result.code, 503);
    assert_eq!(resp.result.message, "not initialized");
    assert_eq!(calls.total(), 0);
}

#[tokio::test]
async fn create_mutation_yields_a_patch_reproducing_the_mutated_object() {
    let calls = Arc::new(Calls::default());
    let engine = ready_engine(labelling_handler(calls.clone()), MemoryStore::new()).await;
    let original = serde_json::to_value(ds()).unwrap();

    let resp = engine.admit(&request("apps/v1/DaemonSet", Operation::Create, Some(&original))).await;
    assert!(resp.allowed, "resp={:?}", resp);
    assert_eq!(patch_type(&resp), "JSONPatch");
    let patch = resp.patch.expect("patch");
    assert_ne!(patch, b"[]".to_vec());

    let mut expected = ds();
    expected.metadata.labels = Some([("injected".to_string(), "yes".to_string())].into_iter().collect());
    assert_eq!(apply_patch(&original, &patch), serde_json::to_value(&expected).unwrap());
    assert_eq!(calls.create.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn legacy_payloads_are_patched_in_their_own_version() {
    let calls = Arc::new(Calls::default());
    let engine = ready_engine(labelling_handler(calls), MemoryStore::new()).await;
    let mut legacy = ds_doc("extensions/v1beta1");
    legacy["spec"]["templateGeneration"] = json!(4);

    let resp = engine.admit(&request("extensions/v1beta1/DaemonSet", Operation::Create, Some(&legacy))).await;
    assert!(resp.allowed, "resp={:?}", resp);
    let patched = apply_patch(&legacy, &resp.patch.expect("patch"));
    assert_eq!(patched["apiVersion"], "extensions/v1beta1");
    assert_eq!(patched["spec"]["templateGeneration"], 4);
    assert_eq!(patched["metadata"]["labels"]["injected"], "yes");
    assert!(patched["metadata"].get("annotations").is_none());
}

#[tokio::test]
async fn legacy_payloads_without_a_selector_patch_to_the_mutated_object() {
    let calls = Arc::new(Calls::default());
    let engine = ready_engine(labelling_handler(calls), MemoryStore::new()).await;
    let mut legacy = ds_doc("extensions/v1beta1");
    legacy["spec"].as_object_mut().unwrap().remove("selector");

    let resp = engine.admit(&request("extensions/v1beta1/DaemonSet", Operation::Create, Some(&legacy))).await;
    assert!(resp.allowed, "resp={:?}", resp);
    let patched = apply_patch(&legacy, &resp.patch.expect("patch"));

    let mut expected = ds();
    expected.metadata.labels = Some([("injected".to_string(), "yes".to_string())].into_iter().collect());
    let expected = kgate_admission::encode(DaemonSetVersion::ExtensionsV1Beta1, &expected).unwrap();
    assert_eq!(patched, expected);
    assert_eq!(patched["spec"]["selector"]["matchLabels"]["app"], "agent");
}

#[tokio::test]
async fn update_without_mutation_has_no_patch() {
    let calls = Arc::new(Calls::default());
    let engine = ready_engine(labelling_handler(calls.clone()), MemoryStore::new()).await;
    let mut req = request("apps/v1beta2/DaemonSet", Operation::Update, Some(&ds_doc("apps/v1beta2")));
    req.old_object = Some(serde_json::to_vec(&ds_doc("apps/v1beta2")).unwrap());
    let resp = engine.admit(&req).await;
    assert!(resp.allowed);
    assert!(resp.patch.is_none());
    assert!(patch_type(&resp).is_null());
    assert_eq!(calls.update.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handler_rejection_on_create_is_forbidden() {
    let handler = HandlerFuncs::new().with_create(|_ds: DaemonSet| Err(anyhow!("privileged containers are not allowed")));
    let engine = ready_engine(handler, MemoryStore::new()).await;
    let resp = engine.admit(&request("apps/v1/DaemonSet", Operation::Create, Some(&ds_doc("apps/v1")))).await;
    assert!(!resp.allowed);
    let status = resp.result;
    assert_eq!(status.reason, "Forbidden");
    assert_eq!(status.code, 403);
    assert!(status.message.contains("privileged"), "message={}", status.message);
}

#[tokio::test]
async fn undecodable_or_unknown_versions_are_bad_requests() {
    let engine = ready_engine(HandlerFuncs::new(), MemoryStore::new()).await;

    let mut garbage = request("apps/v1/DaemonSet", Operation::Create, None);
    garbage.object = Some(b"{not json".to_vec());
    assert_eq!(StatusReason::of(&engine.admit(&garbage).await), Some(StatusReason::BadRequest));

    let missing = request("apps/v1/DaemonSet", Operation::Create, None);
    assert_eq!(StatusReason::of(&engine.admit(&missing).await), Some(StatusReason::BadRequest));

    let unknown = request("apps/v1beta1/DaemonSet", Operation::Create, Some(&ds_doc("apps/v1beta1")));
    assert_eq!(StatusReason::of(&engine.admit(&unknown).await), Some(StatusReason::BadRequest));
}

#[tokio::test]
async fn delete_of_an_absent_object_skips_the_handler() {
    let calls = Arc::new(Calls::default());
    let engine = ready_engine(labelling_handler(calls.clone()), MemoryStore::new()).await;
    let resp = engine.admit(&request("apps/v1/DaemonSet", Operation::Delete, None)).await;
    assert!(resp.allowed);
    assert!(resp.patch.is_none());
    assert_eq!(calls.delete.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn delete_runs_the_handler_against_the_live_object() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let handler = HandlerFuncs::new().with_delete(move |ds: DaemonSet| {
        counter.fetch_add(1, Ordering::SeqCst);
        if ds.metadata.name.as_deref() == Some("agent") {
            Err(anyhow!("agent is protected"))
        } else {
            Ok(())
        }
    });
    let store = MemoryStore::with_objects([ds()]).unwrap();
    let engine = ready_engine(handler, store).await;
    let resp = engine.admit(&request("apps/v1/DaemonSet", Operation::Delete, None)).await;
    assert!(!resp.allowed);
    assert_eq!(StatusReason::of(&resp), Some(StatusReason::BadRequest));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delete_under_an_unserved_version_still_reaches_the_handler() {
    let calls = Arc::new(Calls::default());
    let store = MemoryStore::with_objects([ds()]).unwrap();
    let engine = ready_engine(labelling_handler(calls.clone()), store).await;
    let resp = engine.admit(&request("apps/v1beta1/DaemonSet", Operation::Delete, None)).await;
    assert!(resp.allowed, "resp={:?}", resp);
    assert_eq!(calls.delete.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delete_fetch_failure_is_internal() {
    let calls = Arc::new(Calls::default());
    let store = MemoryStore::with_objects([ds()]).unwrap();
    store.inject(Op::Get, Fault::Unavailable("etcd timeout".into()));
    let engine = ready_engine(labelling_handler(calls.clone()), store).await;
    let resp = engine.admit(&request("apps/v1/DaemonSet", Operation::Delete, None)).await;
    assert!(!resp.allowed);
    assert_eq!(StatusReason::of(&resp), Some(StatusReason::InternalError));
    assert_eq!(calls.total(), 0);
}

#[tokio::test]
async fn job_engine_mediates_batch_v1() {
    let handler = HandlerFuncs::new().with_create(|mut job: Job| {
        job.metadata.annotations.get_or_insert_with(Default::default).insert("owner".into(), "ci".into());
        Ok(Some(job))
    });
    let engine: AdmissionEngine<JobVersion, _, MemoryStore<Job>> = AdmissionEngine::new("jobs", "job", handler);
    assert_eq!(engine.resource(), ("jobs", "job"));
    engine.initialize(MemoryStore::new()).await;

    let job = json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {"name": "migrate", "namespace": "default"},
        "spec": {"template": {"spec": {"containers": [{"name": "m", "image": "m:1"}], "restartPolicy": "Never"}}}
    });
    let resp = engine.admit(&request("batch/v1/Job", Operation::Create, Some(&job))).await;
    assert!(resp.allowed, "resp={:?}", resp);
    let patched = apply_patch(&job, &resp.patch.expect("patch"));
    assert_eq!(patched["metadata"]["annotations"]["owner"], "ci");

    let deployment = request("apps/v1/Deployment", Operation::Create, Some(&job));
    assert!(engine.admit(&deployment).await.allowed);
}
