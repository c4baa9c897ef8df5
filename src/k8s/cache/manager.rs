/**
 * Registry of per-namespace cache regions
 *
 * Owned by one controller and passed by reference. A region is created on the
 * first request for its namespace and lives until `shutdown`.
 */
use super::config::CacheConfig;
use super::errors::store_not_found_error;
use super::store::{Store, StoreWriter};
use super::subscription::{SubscriptionManager, Topic};
use super::sync::{SyncBarrier, SyncOutcome, SyncState};
use super::watch_manager::{KindWatch, WatchManager, WatchStats};
use crate::domain::{ResourceEvent, ResourceKind};
use crate::error::{Error, Result};
use crate::k8s::remote::RemoteResourceClient;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Namespace used when no namespace is requested
pub const DEFAULT_NAMESPACE: &str = "default";

/// The stores and readiness barriers of one namespace
#[derive(Debug)]
pub struct NamespaceCache {
    namespace: String,
    stores: BTreeMap<ResourceKind, Store>,
    barriers: BTreeMap<ResourceKind, SyncBarrier>,
}

impl NamespaceCache {
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn store(&self, kind: ResourceKind) -> Option<&Store> {
        self.stores.get(&kind)
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.stores.keys().copied().collect()
    }

    /// Synced when every kind is; Started when any kind missed its deadline
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        let states: Vec<SyncState> = self.barriers.values().map(SyncBarrier::state).collect();
        if states.iter().all(|s| *s == SyncState::Synced) {
            SyncState::Synced
        } else if states.contains(&SyncState::Started) {
            SyncState::Started
        } else {
            SyncState::Pending
        }
    }

    #[must_use]
    pub fn kind_sync_state(&self, kind: ResourceKind) -> Option<SyncState> {
        self.barriers.get(&kind).map(SyncBarrier::state)
    }

    async fn wait_until(&self, deadline: Instant) -> SyncOutcome {
        let outcomes = join_all(self.barriers.values().map(|b| b.wait_until(deadline))).await;
        if outcomes.contains(&SyncOutcome::TimedOut) {
            SyncOutcome::TimedOut
        } else {
            SyncOutcome::Synced
        }
    }

    fn entry_count(&self) -> usize {
        self.stores.values().filter_map(|s| s.len().ok()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub regions: usize,
    pub total_entries: usize,
    pub subscriptions: usize,
    pub watch: WatchStats,
}

pub struct CacheManager {
    config: CacheConfig,
    kinds: Vec<ResourceKind>,
    regions: RwLock<HashMap<String, Arc<NamespaceCache>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Arc<SubscriptionManager>,
    watcher: Arc<WatchManager>,
    shutdown: CancellationToken,
}

impl CacheManager {
    /// Create a registry watching `kinds` in every namespace it is asked for
    ///
    /// Deployments are always watched since they back the read path.
    /// `Unknown` is ignored.
    #[must_use]
    pub fn new(client: Arc<dyn RemoteResourceClient>, config: CacheConfig, kinds: &[ResourceKind]) -> Self {
        let mut kinds: Vec<ResourceKind> = kinds
            .iter()
            .copied()
            .filter(|k| *k != ResourceKind::Unknown)
            .chain(std::iter::once(ResourceKind::Deployment))
            .collect();
        kinds.sort();
        kinds.dedup();

        let shutdown = CancellationToken::new();
        let subscriptions = Arc::new(SubscriptionManager::new(config.event_channel_capacity));
        let watcher = Arc::new(WatchManager::new(
            client,
            config.clone(),
            Arc::clone(&subscriptions),
            shutdown.clone(),
        ));

        Self {
            config,
            kinds,
            regions: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            subscriptions,
            watcher,
            shutdown,
        }
    }

    #[must_use]
    pub fn kinds(&self) -> &[ResourceKind] {
        &self.kinds
    }

    /// Populate caches for `namespaces`, waiting at most the initial sync timeout
    ///
    /// A namespace that misses the deadline is logged and marked started; its
    /// loop keeps syncing in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager has been shut down
    pub async fn initialize_for_namespaces(&self, namespaces: &[String]) -> Result<()> {
        let mut requested: Vec<String> = namespaces.to_vec();
        if requested.is_empty() {
            requested.push(DEFAULT_NAMESPACE.to_string());
        }
        requested.sort();
        requested.dedup();

        let deadline = Instant::now() + self.config.initial_sync_timeout;
        let mut regions = Vec::with_capacity(requested.len());
        for namespace in &requested {
            regions.push(self.ensure_namespace(namespace).await?);
        }

        let outcomes = join_all(regions.iter().map(|region| region.wait_until(deadline))).await;
        for (region, outcome) in regions.iter().zip(outcomes) {
            match outcome {
                SyncOutcome::Synced => {
                    info!(namespace = %region.namespace, entries = region.entry_count(), "✅ Cache synced");
                }
                SyncOutcome::TimedOut => {
                    let timeout = Error::SyncTimeout {
                        namespace: region.namespace.clone(),
                    };
                    warn!(namespace = %region.namespace, "⏰ {timeout}, continuing sync in background");
                }
            }
        }

        Ok(())
    }

    /// Return the region for `namespace`, creating and starting it if needed
    ///
    /// # Errors
    ///
    /// Returns an error if the manager has been shut down
    pub async fn ensure_namespace(&self, namespace: &str) -> Result<Arc<NamespaceCache>> {
        if let Some(region) = self.regions.read().await.get(namespace) {
            return Ok(Arc::clone(region));
        }

        let mut regions = self.regions.write().await;
        if let Some(region) = regions.get(namespace) {
            return Ok(Arc::clone(region));
        }
        if self.shutdown.is_cancelled() {
            return Err(Error::Custom(format!(
                "cache manager is shut down, not starting namespace {namespace}"
            )));
        }

        let mut stores = BTreeMap::new();
        let mut barriers = BTreeMap::new();
        let mut watches = Vec::with_capacity(self.kinds.len());
        for kind in &self.kinds {
            let writer = StoreWriter::new(namespace, *kind);
            let barrier = SyncBarrier::new();
            stores.insert(*kind, writer.as_reader());
            barriers.insert(*kind, barrier.clone());
            watches.push(KindWatch { writer, barrier });
        }

        let region = Arc::new(NamespaceCache {
            namespace: namespace.to_string(),
            stores,
            barriers,
        });
        regions.insert(namespace.to_string(), Arc::clone(&region));
        drop(regions);

        let task = self.watcher.start(namespace.to_string(), watches);
        self.tasks.lock().await.push(task);

        Ok(region)
    }

    /// # Errors
    ///
    /// Returns `StoreNotFound` when no region or store exists for the pair
    pub async fn get_store(&self, namespace: &str, kind: ResourceKind) -> Result<Store> {
        self.regions
            .read()
            .await
            .get(namespace)
            .and_then(|region| region.store(kind).cloned())
            .ok_or_else(|| store_not_found_error(namespace, kind))
    }

    pub async fn region(&self, namespace: &str) -> Option<Arc<NamespaceCache>> {
        self.regions.read().await.get(namespace).cloned()
    }

    pub async fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.regions.read().await.keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    /// Receive converted events for one (namespace, kind), in source order
    pub async fn subscribe(&self, namespace: &str, kind: ResourceKind) -> (String, mpsc::Receiver<ResourceEvent>) {
        self.subscriptions.subscribe(Topic::new(namespace, kind)).await
    }

    pub async fn unsubscribe(&self, subscription_id: &str) {
        self.subscriptions.unsubscribe(subscription_id).await;
    }

    pub async fn sync_state(&self, namespace: &str) -> Option<SyncState> {
        self.region(namespace).await.map(|region| region.sync_state())
    }

    pub async fn is_synced(&self, namespace: &str) -> bool {
        self.sync_state(namespace).await == Some(SyncState::Synced)
    }

    pub async fn stats(&self) -> CacheStats {
        let regions = self.regions.read().await;
        CacheStats {
            regions: regions.len(),
            total_entries: regions.values().map(|r| r.entry_count()).sum(),
            subscriptions: self.subscriptions.active_subscriptions().await,
            watch: self.watcher.stats(),
        }
    }

    /// Stop every watch loop and wait for the tasks to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Watch task ended abnormally: {e}");
            }
        }
        info!("🛑 Cache manager shut down");
    }
}
