//! Per-kind admission engine.

use std::marker::PhantomData;

use kgate_core::ObjectKey;
use kgate_kubehub::{client_from_config, KubeStore, ObjectStore, StoreScope};
use kube::core::admission::{AdmissionResponse, Operation};
use kube::Resource;
use metrics::counter;
use serde_json::Value as Json;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::handler::ResourceHandler;
use crate::review::{AdmissionRequest, StatusReason};
use crate::version::{decode, encode, WireVersion};

/// Outcome of a mediated request that was not plainly allowed.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("not initialized")]
    Uninitialized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Internal(String),
}

impl AdmissionError {
    pub fn reason(&self) -> StatusReason {
        match self {
            AdmissionError::Uninitialized => StatusReason::ServiceUnavailable,
            AdmissionError::BadRequest(_) => StatusReason::BadRequest,
            AdmissionError::Forbidden(_) => StatusReason::Forbidden,
            AdmissionError::Internal(_) => StatusReason::InternalError,
        }
    }
}

enum State<S> {
    Uninitialized,
    Initialized { store: S },
}

/// Mediates admission for one kind `V::KIND`.
///
/// Requests run under the read side of the state lock so they proceed in
/// parallel; `initialize` takes the write side.
pub struct AdmissionEngine<V, H, S> {
    resource: String,
    singular: String,
    handler: H,
    state: RwLock<State<S>>,
    _version: PhantomData<fn() -> V>,
}

impl<V, H, S> AdmissionEngine<V, H, S>
where
    V: WireVersion,
    H: ResourceHandler<V::Hub>,
    S: ObjectStore<V::Hub>,
{
    pub fn new(resource: impl Into<String>, singular: impl Into<String>, handler: H) -> Self {
        Self {
            resource: resource.into(),
            singular: singular.into(),
            handler,
            state: RwLock::new(State::Uninitialized),
            _version: PhantomData,
        }
    }

    /// Plural resource and singular name this engine was registered with.
    pub fn resource(&self) -> (&str, &str) {
        (&self.resource, &self.singular)
    }

    pub async fn initialize(&self, store: S) {
        let mut state = self.state.write().await;
        *state = State::Initialized { store };
        info!(kind = V::KIND, resource = %self.resource, "admission engine initialized");
    }

    pub async fn is_initialized(&self) -> bool {
        matches!(*self.state.read().await, State::Initialized { .. })
    }

    pub async fn admit(&self, req: &AdmissionRequest) -> AdmissionResponse {
        if !self.applies_to(req) {
            return req.allow();
        }
        let outcome = match self.mediate(req).await {
            Ok(None) => Ok(("allowed", req.allow())),
            Ok(Some(patch)) => req
                .allow()
                .with_patch(patch)
                .map(|resp| ("patched", resp))
                .map_err(|e| AdmissionError::Internal(e.to_string())),
            Err(e) => Err(e),
        };
        let (label, response) = outcome.unwrap_or_else(|e| {
            let reason = e.reason();
            match reason {
                StatusReason::InternalError => error!(kind = V::KIND, uid = %req.uid, error = %e, "admission failed"),
                _ => warn!(kind = V::KIND, uid = %req.uid, op = ?req.operation, error = %e, "admission rejected"),
            }
            (reason_label(reason), req.reject(reason, e.to_string()))
        });
        counter!("admission_requests_total", 1u64, "kind" => V::KIND, "outcome" => label);
        response
    }

    /// Cheap, side-effect free filter for requests this engine owns.
    fn applies_to(&self, req: &AdmissionRequest) -> bool {
        matches!(req.operation, Operation::Create | Operation::Update | Operation::Delete)
            && !req.has_sub_resource()
            && V::serves(&req.kind.group, &req.kind.kind)
    }

    async fn mediate(&self, req: &AdmissionRequest) -> Result<Option<json_patch::Patch>, AdmissionError> {
        let state = self.state.read().await;
        let store = match &*state {
            State::Uninitialized => return Err(AdmissionError::Uninitialized),
            State::Initialized { store } => store,
        };
        debug!(kind = V::KIND, gvk = ?req.kind, op = ?req.operation, uid = %req.uid, "mediating");

        match req.operation {
            Operation::Create => {
                let version = self.version(req)?;
                let obj = decode(version, payload(req.object.as_deref(), "object")?)
                    .map_err(|e| AdmissionError::BadRequest(e.to_string()))?;
                let mutated = self
                    .handler
                    .on_create(obj.hub.clone())
                    .await
                    .map_err(|e| AdmissionError::Forbidden(format!("{:#}", e)))?;
                mutated.map(|m| json_patch_for(version, &obj.original, &m)).transpose()
            }
            Operation::Update => {
                let version = self.version(req)?;
                let new = decode(version, payload(req.object.as_deref(), "object")?)
                    .map_err(|e| AdmissionError::BadRequest(e.to_string()))?;
                let old = decode(version, payload(req.old_object.as_deref(), "oldObject")?)
                    .map_err(|e| AdmissionError::BadRequest(e.to_string()))?;
                let mutated = self
                    .handler
                    .on_update(old.hub, new.hub.clone())
                    .await
                    .map_err(|e| AdmissionError::Forbidden(format!("{:#}", e)))?;
                mutated.map(|m| json_patch_for(version, &new.original, &m)).transpose()
            }
            Operation::Delete => {
                let key = ObjectKey::from_parts(req.namespace.as_deref(), req.name.as_deref())
                    .ok_or_else(|| AdmissionError::BadRequest(format!("{} delete without a name", V::KIND)))?;
                let live = match store.get(&key).await {
                    Ok(live) => live,
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(AdmissionError::Internal(e.to_string())),
                };
                let Some(live) = live else {
                    debug!(kind = V::KIND, key = %key, "already gone");
                    return Ok(None);
                };
                self.handler
                    .on_delete(live)
                    .await
                    .map_err(|e| AdmissionError::BadRequest(format!("{:#}", e)))?;
                Ok(None)
            }
            Operation::Connect => Ok(None),
        }
    }

    /// Delete carries no payload, so only Create and Update need a served version.
    fn version(&self, req: &AdmissionRequest) -> Result<V, AdmissionError> {
        V::resolve(&req.kind.group, &req.kind.version).map_err(|e| AdmissionError::BadRequest(e.to_string()))
    }
}

impl<V, H> AdmissionEngine<V, H, KubeStore<V::Hub>>
where
    V: WireVersion,
    H: ResourceHandler<V::Hub>,
    <V::Hub as Resource>::Scope: StoreScope,
{
    /// Connect to the API server described by `config` and start mediating.
    pub async fn initialize_from_config(&self, config: kube::Config) -> anyhow::Result<()> {
        let client = client_from_config(config)?;
        self.initialize(KubeStore::new(client)).await;
        Ok(())
    }
}

fn payload<'a>(raw: Option<&'a [u8]>, field: &str) -> Result<&'a [u8], AdmissionError> {
    raw.filter(|b| !b.is_empty())
        .ok_or_else(|| AdmissionError::BadRequest(format!("request has no {}", field)))
}

/// RFC 6902 patch taking `original` to `mutated` re-encoded in `version`.
fn json_patch_for<V: WireVersion>(version: V, original: &Json, mutated: &V::Hub) -> Result<json_patch::Patch, AdmissionError> {
    let target = encode(version, mutated).map_err(|e| AdmissionError::Internal(e.to_string()))?;
    Ok(json_patch::diff(original, &target))
}

fn reason_label(reason: StatusReason) -> &'static str {
    match reason {
        StatusReason::ServiceUnavailable => "uninitialized",
        StatusReason::BadRequest => "bad_request",
        StatusReason::Forbidden => "forbidden",
        StatusReason::InternalError => "internal",
    }
}
