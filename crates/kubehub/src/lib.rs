//! kgate kubehub: the object store seam plus discovery and client wiring.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Result};
use kube::{
    core::{ApiResource, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client, Config,
};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

pub mod memory;
pub mod store;

pub use memory::{Fault, MemoryStats, MemoryStore, Op};
pub use store::{KubeStore, ObjectStore, StoreError, StoreScope};

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Process-wide client inferred from kubeconfig or the in-cluster environment.
pub async fn get_kube_client() -> Result<Client> {
    let client = CLIENT
        .get_or_try_init(|| async { Client::try_default().await })
        .await?;
    Ok(client.clone())
}

/// Build a fresh client from explicit connection settings.
pub fn client_from_config(config: Config) -> Result<Client, kube::Error> {
    Client::try_from(config)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl DiscoveredResource {
    pub fn gvk_key(&self) -> String {
        gvk_key(&GroupVersionKind::gvk(&self.group, &self.version, &self.kind))
    }
}

/// Discover served resources (incl. CRDs) using kube Discovery.
pub async fn discover(client: Client) -> Result<Vec<DiscoveredResource>> {
    let discovery = Discovery::new(client).run().await?;
    let mut out = Vec::new();
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            out.push(DiscoveredResource {
                group: ar.group.clone(),
                version: ar.version.clone(),
                kind: ar.kind.clone(),
                plural: ar.plural.clone(),
                namespaced: matches!(caps.scope, Scope::Namespaced),
            });
        }
    }
    out.sort_by(|a, b| a.group.cmp(&b.group).then(a.version.cmp(&b.version)).then(a.kind.cmp(&b.kind)));
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
#[error("invalid gvk key: {0} (expect v1/Kind or group/v1/Kind)")]
pub struct InvalidGvkKey(pub String);

/// Parse the `group/version/Kind` (or `version/Kind` for the core group) key form.
pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind, InvalidGvkKey> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk("", version, kind)),
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => {
            Ok(GroupVersionKind::gvk(group, version, kind))
        }
        _ => Err(InvalidGvkKey(key.to_string())),
    }
}

/// Inverse of [`parse_gvk_key`].
pub fn gvk_key(gvk: &GroupVersionKind) -> String {
    format!("{}/{}", gvk.api_version(), gvk.kind)
}

/// Resolve a GVK to its `ApiResource` and scope.
pub async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                debug!(gvk = %gvk_key(gvk), plural = %ar.plural, namespaced, "resolved api resource");
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}", gvk_key(gvk)))
}
