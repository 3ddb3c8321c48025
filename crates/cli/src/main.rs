use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kgate_admission::{
    AdmissionEngine, AdmissionRequest, AdmissionResponse, DaemonSetVersion, HandlerFuncs, JobVersion, StatusReason,
    WireVersion,
};
use kgate_apply::{create_merge_patch, diff_summary, parse_document, strip_server_fields};
use kgate_core::config::{ENV_DISPATCH_POLICY, ENV_WATCH_NAMESPACE};
use kgate_kubehub::{gvk_key, parse_gvk_key, MemoryStore};
use kgate_meta::ReconcileStrategy;
use kgate_queue::{ChannelQueue, DispatchPolicy, FilteredHandler, Informer, QueueingEventHandler, Selector, VersionedHandler};
use kube::api::{Api, DynamicObject};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Resource;
use serde_json::{json, Value as Json};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kgatectl", version, about = "kgate CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace to restrict watching to
    #[arg(long = "ns", global = true, env = ENV_WATCH_NAMESPACE)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum AdmitKind {
    Daemonset,
    Job,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover served resources (incl. CRDs)
    Discover,
    /// Fingerprint a manifest and report its reconciliation state
    Fingerprint {
        /// YAML or JSON manifest
        file: PathBuf,
        /// generation | observed-hash
        #[arg(long = "strategy", default_value = "generation")]
        strategy: ReconcileStrategy,
    },
    /// Print the merge patch taking one manifest to another
    Diff { current: PathBuf, desired: PathBuf },
    /// Mediate an AdmissionReview offline against an in-memory store
    Admit {
        /// AdmissionReview JSON
        review: PathBuf,
        #[arg(long = "kind", value_enum)]
        kind: AdmitKind,
        /// Label injected into created/updated objects (repeatable)
        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,
        /// Manifest seeded into the store, seen as the live object on DELETE
        #[arg(long = "existing")]
        existing: Option<PathBuf>,
    },
    /// Watch a GVK and print the keys the dispatch filter would enqueue
    Watch {
        /// GVK key, e.g. "apps/v1/Deployment" or "example.dev/v1/Widget"
        gvk: String,
        #[arg(long = "policy", env = ENV_DISPATCH_POLICY, default_value = "default")]
        policy: DispatchPolicy,
        /// Label selector, e.g. "app=web,tier in (fe,be)"
        #[arg(long = "selector")]
        selector: Option<Selector>,
        /// generation | observed-hash
        #[arg(long = "strategy", default_value = "generation")]
        strategy: ReconcileStrategy,
    },
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected key=value, got {:?}", s)),
    }
}

fn init_tracing() {
    let env = std::env::var("KGATE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter =
        tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KGATE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KGATE_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_manifest(path: &Path) -> Result<Json> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_document(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_json(v: &Json) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Discover => {
            let client = kgate_kubehub::get_kube_client().await?;
            let resources = kgate_kubehub::discover(client).await?;
            match cli.output {
                Output::Human => {
                    for r in resources {
                        let scope = if r.namespaced { "namespaced" } else { "cluster" };
                        println!("{} • {} • {}", r.gvk_key(), r.plural, scope);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&resources)?),
            }
        }
        Commands::Fingerprint { file, strategy } => {
            let obj = read_manifest(&file)?;
            let reconciled = strategy.is_reconciled(&obj);
            let report = json!({
                "object": kgate_meta::describe(&obj),
                "fingerprint": kgate_meta::fingerprint_value(&obj).to_string(),
                "generationFingerprint": kgate_meta::generation_fingerprint_value(&obj).to_string(),
                "strategy": strategy.to_string(),
                "reconciled": reconciled.as_ref().ok(),
                "observedStamp": strategy.observed_stamp(&obj).to_json(),
            });
            if let Err(e) = &reconciled {
                warn!(error = %e, "status unreadable");
            }
            match cli.output {
                Output::Json => print_json(&report)?,
                Output::Human => {
                    println!("{}", report["object"].as_str().unwrap_or_default());
                    println!("  fingerprint             {}", report["fingerprint"].as_str().unwrap_or_default());
                    println!("  generation fingerprint  {}", report["generationFingerprint"].as_str().unwrap_or_default());
                    match &reconciled {
                        Ok(r) => println!("  reconciled ({})  {}", strategy, r),
                        Err(e) => println!("  reconciled ({})  unknown: {}", strategy, e),
                    }
                    println!("  observed stamp          {}", report["observedStamp"]);
                }
            }
        }
        Commands::Diff { current, desired } => {
            let cur = strip_server_fields(read_manifest(&current)?);
            let des = strip_server_fields(read_manifest(&desired)?);
            let patch = create_merge_patch(&cur, &des);
            let summary = diff_summary(&des, &cur);
            match cli.output {
                Output::Json => print_json(&json!({ "patch": patch, "summary": summary }))?,
                Output::Human => {
                    println!("+{} ~{} -{}", summary.adds, summary.updates, summary.removes);
                    print_json(&patch)?;
                }
            }
        }
        Commands::Admit { review, kind, labels, existing } => {
            let text = std::fs::read_to_string(&review).with_context(|| format!("reading {}", review.display()))?;
            let doc: Json = serde_json::from_str(&text).context("parsing AdmissionReview")?;
            let req = AdmissionRequest::from_review_json(doc)?;
            let existing = existing.as_deref().map(read_manifest).transpose()?;
            info!(uid = %req.uid, op = ?req.operation, kind = %gvk_key(&req.kind), "admitting");
            let resp = match kind {
                AdmitKind::Daemonset => admit_offline::<DaemonSetVersion>(&req, labels, existing).await?,
                AdmitKind::Job => admit_offline::<JobVersion>(&req, labels, existing).await?,
            };
            if let Some(reason) = StatusReason::of(&resp) {
                error!(code = resp.result.code, reason = %reason, message = %resp.result.message, "request denied");
            }
            print_json(&serde_json::to_value(resp.into_review())?)?;
        }
        Commands::Watch { gvk, policy, selector, strategy } => {
            watch(&gvk, cli.namespace, policy, selector.unwrap_or_default(), strategy).await?;
        }
    }
    Ok(())
}

/// Run one request through an engine whose handler injects `labels`.
async fn admit_offline<V: WireVersion>(
    req: &AdmissionRequest,
    labels: Vec<(String, String)>,
    existing: Option<Json>,
) -> Result<AdmissionResponse> {
    let on_update = labels.clone();
    let handler = HandlerFuncs::<V::Hub>::new()
        .with_create(move |obj| Ok(with_labels(obj, &labels)))
        .with_update(move |_old, new| Ok(with_labels(new, &on_update)));
    let store = match existing {
        Some(doc) => {
            let obj: V::Hub = serde_json::from_value(doc).context("decoding --existing object")?;
            MemoryStore::with_objects([obj])?
        }
        None => MemoryStore::new(),
    };
    let singular = V::KIND.to_ascii_lowercase();
    let engine: AdmissionEngine<V, _, MemoryStore<V::Hub>> =
        AdmissionEngine::new(format!("{}s", singular), singular, handler);
    engine.initialize(store).await;
    Ok(engine.admit(req).await)
}

fn with_labels<K: Resource>(mut obj: K, labels: &[(String, String)]) -> Option<K> {
    if labels.is_empty() {
        return None;
    }
    let map = obj.meta_mut().labels.get_or_insert_with(Default::default);
    for (k, v) in labels {
        map.insert(k.clone(), v.clone());
    }
    Some(obj)
}

async fn watch(
    key: &str,
    namespace: Option<String>,
    policy: DispatchPolicy,
    selector: Selector,
    strategy: ReconcileStrategy,
) -> Result<()> {
    let gvk = parse_gvk_key(key)?;
    let client = kgate_kubehub::get_kube_client().await?;
    let (ar, namespaced) = kgate_kubehub::find_api_resource(client.clone(), &gvk).await?;
    let api: Api<DynamicObject> = match (namespaced, namespace.as_deref()) {
        (true, Some(ns)) => Api::namespaced_with(client, ns, &ar),
        _ => Api::all_with(client, &ar),
    };

    let (queue, mut keys) = ChannelQueue::new();
    let dispatch = QueueingEventHandler::with_strategy(queue, policy, strategy).in_namespace(namespace.clone());
    let handler = FilteredHandler::new(VersionedHandler::new(dispatch, &gvk), selector.clone());
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    info!(gvk = %key, ns = ?namespace, policy = %policy, selector = %selector, "watch started");
    let informer = tokio::spawn(async move { Informer::<DynamicObject>::new().run(stream, &handler).await });

    loop {
        tokio::select! {
            key = keys.recv() => match key {
                Some(key) => println!("{}", key),
                None => break,
            },
            _ = signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }
    informer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_as_key_value() {
        assert_eq!(parse_label("team=infra").unwrap(), ("team".into(), "infra".into()));
        assert_eq!(parse_label("empty=").unwrap(), ("empty".into(), String::new()));
        assert!(parse_label("=x").is_err());
        assert!(parse_label("novalue").is_err());
    }

    #[test]
    fn cli_parses_watch_flags() {
        let cli = Cli::try_parse_from([
            "kgatectl",
            "watch",
            "apps/v1/Deployment",
            "--policy",
            "reconcilable",
            "--selector",
            "app=web",
        ])
        .unwrap();
        match cli.command {
            Commands::Watch { policy, selector, .. } => {
                assert_eq!(policy, DispatchPolicy::Reconcilable);
                assert_eq!(selector.unwrap().to_string(), "app=web");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn with_labels_is_a_noop_without_labels() {
        let cm = k8s_openapi::api::core::v1::ConfigMap::default();
        assert!(with_labels(cm.clone(), &[]).is_none());
        let labelled = with_labels(cm, &[("a".into(), "b".into())]).unwrap();
        assert_eq!(labelled.metadata.labels.unwrap().get("a").map(String::as_str), Some("b"));
    }
}
