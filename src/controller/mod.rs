/**
 * Controller wiring
 *
 * Owns the remote client, the cache registry, event dispatch and the
 * reconcile runner for one process.
 */
pub mod handler;
pub mod reconciler;

use crate::config::ControllerConfig;
use crate::error::Result;
use crate::events::{EventDispatcher, ResourceEventHandler};
use crate::k8s::cache::CacheManager;
use crate::k8s::cache::manager::DEFAULT_NAMESPACE;
use crate::k8s::remote::RemoteResourceClient;
use crate::reader::CacheReader;
use handler::ResourceHandler;
use reconciler::{DeploymentProcessor, ReconcileHandle, ReconcileRunner, Reconciler};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use reconciler::{ReconcileOutcome, StatusReporter};

/// Interval of the periodic cache health log
pub const HEALTH_LOG_INTERVAL_SECONDS: u64 = 30;

pub struct Controller {
    config: ControllerConfig,
    client: Arc<dyn RemoteResourceClient>,
    cache: Arc<CacheManager>,
    processor: Arc<dyn DeploymentProcessor>,
    dispatcher: Option<EventDispatcher>,
    reconcile: Option<ReconcileHandle>,
    tasks: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Controller {
    #[must_use]
    pub fn new(
        config: ControllerConfig,
        client: Arc<dyn RemoteResourceClient>,
        processor: Arc<dyn DeploymentProcessor>,
    ) -> Self {
        let cache = Arc::new(CacheManager::new(
            Arc::clone(&client),
            config.cache.clone(),
            &config.kinds(),
        ));
        Self {
            config,
            client,
            cache,
            processor,
            dispatcher: None,
            reconcile: None,
            tasks: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn cache(&self) -> Arc<CacheManager> {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub fn reader(&self) -> CacheReader {
        CacheReader::new(Arc::clone(&self.cache), Arc::clone(&self.client))
    }

    #[must_use]
    pub const fn reconcile_handle(&self) -> Option<&ReconcileHandle> {
        self.reconcile.as_ref()
    }

    /// Connect, register dispatch, and populate the caches
    ///
    /// Returns once every namespace synced or the initial sync deadline passed.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot connect
    pub async fn start(&mut self) -> Result<()> {
        self.client.connect().await?;

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&self.client),
            Arc::clone(&self.processor),
            self.config.retry_delay,
        ));
        let (reconcile, runner) = ReconcileRunner::spawn(
            reconciler,
            self.config.cache.event_channel_capacity,
            self.shutdown.child_token(),
        );
        self.tasks.push(runner);

        let namespaces = self.namespaces();
        let handler: Arc<dyn ResourceEventHandler> = Arc::new(ResourceHandler::new(reconcile.clone()));
        let mut dispatcher = EventDispatcher::new(handler);
        dispatcher
            .register_all(&self.cache, &namespaces, self.cache.kinds())
            .await;
        self.dispatcher = Some(dispatcher);
        self.reconcile = Some(reconcile);

        self.cache.initialize_for_namespaces(&namespaces).await?;
        self.tasks.push(self.spawn_health_log());

        info!(
            namespaces = ?namespaces,
            kinds = ?self.cache.kinds(),
            "✅ Controller started"
        );
        Ok(())
    }

    fn namespaces(&self) -> Vec<String> {
        if self.config.namespaces.is_empty() {
            vec![DEFAULT_NAMESPACE.to_string()]
        } else {
            self.config.namespaces.clone()
        }
    }

    fn spawn_health_log(&self) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let shutdown = self.shutdown.child_token();
        let period = Duration::from_secs(HEALTH_LOG_INTERVAL_SECONDS);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        for namespace in cache.namespaces().await {
                            let state = cache.sync_state(&namespace).await;
                            info!(namespace = %namespace, state = ?state, "Cache health");
                        }
                        let stats = cache.stats().await;
                        info!(
                            regions = stats.regions,
                            entries = stats.total_entries,
                            watchers = stats.watch.active_watchers,
                            deltas = stats.watch.total_deltas,
                            restarts = stats.watch.total_restarts,
                            "Cache stats"
                        );
                    }
                }
            }
        })
    }

    /// Stop dispatch, reconciliation, and every watch loop
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown(&self.cache).await;
        }
        self.cache.shutdown().await;
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Controller task ended abnormally: {e}");
            }
        }
        self.reconcile = None;
        info!("🛑 Controller stopped");
    }
}
