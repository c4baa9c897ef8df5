//! Read path over the mirrored caches.
//!
//! Every result carries its provenance. Data comes from the cache when a store
//! exists for the requested namespace and kind, otherwise straight from the
//! remote API.

use crate::domain::{Deployment, Resource, ResourceKind};
use crate::error::Result;
use crate::events::convert_object;
use crate::k8s::cache::{CacheManager, SyncState};
use crate::k8s::remote::{RawObject, RemoteResourceClient};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Snapshot of the local cache
    Cache,
    /// Direct query; no store exists for the namespace and kind
    Api,
    /// Direct query after the store read failed, or missed before the
    /// store's initial listing completed
    ApiFallback,
}

impl Provenance {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Api => "api",
            Self::ApiFallback => "api-fallback",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub source: Provenance,
    /// False when served from a store whose initial listing has not completed
    pub synced: bool,
}

impl<T> Listing<T> {
    fn map<U>(self, f: impl FnMut(T) -> Option<U>) -> Listing<U> {
        Listing {
            items: self.items.into_iter().filter_map(f).collect(),
            source: self.source,
            synced: self.synced,
        }
    }
}

pub struct CacheReader {
    cache: Arc<CacheManager>,
    client: Arc<dyn RemoteResourceClient>,
}

fn in_namespace(obj: &RawObject, namespace: &str) -> bool {
    namespace.is_empty() || obj.namespace() == Some(namespace)
}

impl CacheReader {
    #[must_use]
    pub fn new(cache: Arc<CacheManager>, client: Arc<dyn RemoteResourceClient>) -> Self {
        Self { cache, client }
    }

    /// List `kind` in `namespace`; an empty namespace means all namespaces
    ///
    /// # Errors
    ///
    /// Returns an error only if the direct query is needed and fails
    pub async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Listing<Resource>> {
        let raw = self.list_raw(kind, namespace).await?;
        Ok(raw.map(|obj| Some(convert_object(&obj))))
    }

    /// # Errors
    ///
    /// Returns an error only if the direct query is needed and fails
    pub async fn list_deployments(&self, namespace: &str) -> Result<Listing<Deployment>> {
        let raw = self.list_raw(ResourceKind::Deployment, namespace).await?;
        Ok(raw.map(|obj| match obj.to_deployment() {
            Ok(deployment) => Some(deployment),
            Err(e) => {
                warn!(name = obj.name().unwrap_or_default(), "Skipping undecodable deployment: {e}");
                None
            }
        }))
    }

    /// Fetch one deployment, `None` when it does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the direct query is needed and fails
    pub async fn get_deployment(&self, name: &str, namespace: &str) -> Result<(Option<Deployment>, Provenance)> {
        let kind = ResourceKind::Deployment;
        let source = match self.cache.get_store(namespace, kind).await {
            Ok(store) => match store.get(namespace, name) {
                Ok(Some(entry)) => return Ok((Some(entry.object.to_deployment()?), Provenance::Cache)),
                Ok(None) => {
                    if self.is_synced(namespace, kind).await {
                        return Ok((None, Provenance::Cache));
                    }
                    debug!(namespace, name, "Cache miss before initial sync, querying API");
                    Provenance::ApiFallback
                }
                Err(e) => {
                    warn!(namespace, name, "Store read failed, querying API: {e}");
                    Provenance::ApiFallback
                }
            },
            Err(_) => Provenance::Api,
        };

        match self.client.get(kind, name, namespace).await {
            Ok(raw) => Ok((Some(raw.to_deployment()?), source)),
            Err(e) if e.is_not_found() => Ok((None, source)),
            Err(e) => Err(e),
        }
    }

    /// Assemble the deployment list response of the read contract
    ///
    /// # Errors
    ///
    /// Returns an error only if the direct query is needed and fails
    pub async fn deployment_response(&self, namespace: &str) -> Result<DeploymentListResponse> {
        let listing = self.list_deployments(namespace).await?;
        Ok(DeploymentListResponse::new(namespace, &listing))
    }

    async fn list_raw(&self, kind: ResourceKind, namespace: &str) -> Result<Listing<RawObject>> {
        let store = match self.cache.get_store(namespace, kind).await {
            Ok(store) => store,
            Err(e) => {
                debug!(namespace, %kind, "No cache store, querying API: {e}");
                return self.query(kind, namespace, Provenance::Api).await;
            }
        };

        match store.list() {
            Ok(entries) => {
                let synced = self.is_synced(namespace, kind).await;
                let items = entries
                    .iter()
                    .map(|entry| &entry.object)
                    .filter(|obj| in_namespace(obj, namespace))
                    .cloned()
                    .collect();
                Ok(Listing {
                    items,
                    source: Provenance::Cache,
                    synced,
                })
            }
            Err(e) => {
                warn!(namespace, %kind, "Store read failed, querying API: {e}");
                self.query(kind, namespace, Provenance::ApiFallback).await
            }
        }
    }

    async fn is_synced(&self, namespace: &str, kind: ResourceKind) -> bool {
        self.cache
            .region(namespace)
            .await
            .and_then(|region| region.kind_sync_state(kind))
            == Some(SyncState::Synced)
    }

    async fn query(&self, kind: ResourceKind, namespace: &str, source: Provenance) -> Result<Listing<RawObject>> {
        let items = self
            .client
            .list(kind, namespace)
            .await?
            .into_iter()
            .filter(|obj| in_namespace(obj, namespace))
            .collect();
        Ok(Listing {
            items,
            source,
            synced: true,
        })
    }
}

/// One row of the deployment read contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeploymentItem {
    pub name: String,
    pub namespace: String,
    pub ready_replicas: i32,
    pub updated_replicas: i32,
    pub available_replicas: i32,
    pub replicas: i32,
    pub labels: BTreeMap<String, String>,
    /// `YYYY-MM-DD HH:MM:SS`, empty when unknown
    pub creation_timestamp: String,
}

impl From<&Deployment> for DeploymentItem {
    fn from(dep: &Deployment) -> Self {
        Self {
            name: dep.name.clone(),
            namespace: dep.namespace.clone(),
            ready_replicas: dep.ready_replicas,
            updated_replicas: dep.updated_replicas,
            available_replicas: dep.available_replicas,
            replicas: dep.replicas,
            labels: dep.labels.clone(),
            creation_timestamp: dep.creation_timestamp_text(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentListResponse {
    pub status: String,
    pub namespace: String,
    pub items: Vec<DeploymentItem>,
    pub count: usize,
    pub source: Provenance,
    pub synced: bool,
}

impl DeploymentListResponse {
    #[must_use]
    pub fn new(namespace: &str, listing: &Listing<Deployment>) -> Self {
        let items: Vec<DeploymentItem> = listing.items.iter().map(DeploymentItem::from).collect();
        Self {
            status: "success".to_string(),
            namespace: namespace.to_string(),
            count: items.len(),
            items,
            source: listing.source,
            synced: listing.synced,
        }
    }
}
