/**
 * Watch + resync loops for one namespace cache region
 *
 * Each watched kind runs list -> replace -> subscribe, applying notifications
 * as they arrive and relisting every resync period. A failing loop restarts
 * with exponential backoff; one kind or namespace failing never stops another.
 */
use super::config::CacheConfig;
use super::store::{Delta, StoreWriter};
use super::subscription::{SubscriptionManager, Topic};
use super::sync::SyncBarrier;
use crate::error::{Error, Result};
use crate::k8s::remote::RemoteResourceClient;
use futures::StreamExt;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Writer and readiness barrier for one (namespace, kind) store
#[derive(Debug)]
pub struct KindWatch {
    pub writer: StoreWriter,
    pub barrier: SyncBarrier,
}

#[derive(Debug, Clone, Default)]
pub struct WatchStats {
    pub active_watchers: usize,
    pub total_deltas: u64,
    pub total_restarts: u64,
    pub connection_status: WatchConnectionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Reconnecting,
}

/// Runs the watch loops of every region owned by one cache manager
pub struct WatchManager {
    client: Arc<dyn RemoteResourceClient>,
    config: CacheConfig,
    subscriptions: Arc<SubscriptionManager>,
    stats: std::sync::RwLock<WatchStats>,
    shutdown: CancellationToken,
}

impl WatchManager {
    #[must_use]
    pub fn new(
        client: Arc<dyn RemoteResourceClient>,
        config: CacheConfig,
        subscriptions: Arc<SubscriptionManager>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            config,
            subscriptions,
            stats: std::sync::RwLock::new(WatchStats::default()),
            shutdown,
        }
    }

    /// Spawn the single task driving all kinds of `namespace`
    pub fn start(self: &Arc<Self>, namespace: String, watches: Vec<KindWatch>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            info!(namespace = %namespace, kinds = watches.len(), "🔍 Starting namespace watch loops");
            join_all(watches.iter().map(|watch| manager.run_kind(&namespace, watch))).await;
            info!(namespace = %namespace, "🔍 Namespace watch loops stopped");
        })
    }

    async fn run_kind(&self, namespace: &str, watch: &KindWatch) {
        let kind = watch.writer.kind();
        let max_restarts = self.config.max_watch_restarts;
        let mut backoff = self.config.initial_backoff;
        let mut restart_count = 0;

        self.update_stats(|stats| stats.active_watchers += 1);

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if restart_count >= max_restarts {
                error!(
                    namespace,
                    %kind,
                    "❌ Watcher exceeded maximum restart attempts ({}), stopping",
                    max_restarts
                );
                break;
            }

            match self.sync_and_watch(namespace, watch).await {
                Ok(()) => {
                    debug!(namespace, %kind, "Watch stream ended, resubscribing");
                    backoff = self.config.initial_backoff;
                    restart_count = 0;
                }
                Err(e) => {
                    restart_count += 1;
                    self.update_stats(|stats| {
                        stats.total_restarts += 1;
                        stats.connection_status = WatchConnectionStatus::Reconnecting;
                    });
                    error!(
                        namespace,
                        %kind,
                        "❌ Watcher failed (attempt {}/{}): {}, restarting in {:?}",
                        restart_count,
                        max_restarts,
                        e,
                        backoff
                    );
                    if self.pause(backoff).await {
                        break;
                    }
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
            }

            // Brief delay before restart
            if self.pause(self.config.restart_delay).await {
                break;
            }
        }

        self.update_stats(|stats| stats.active_watchers = stats.active_watchers.saturating_sub(1));
    }

    async fn sync_and_watch(&self, namespace: &str, watch: &KindWatch) -> Result<()> {
        let kind = watch.writer.kind();
        let topic = Topic::new(namespace, kind);

        self.relist(namespace, watch, &topic).await?;

        let mut stream = self.client.subscribe(kind, namespace).await?;
        self.update_stats(|stats| stats.connection_status = WatchConnectionStatus::Connected);

        let period = self.config.resync_period;
        let mut resync = interval_at(Instant::now() + period, period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return Ok(()),
                _ = resync.tick() => {
                    debug!(namespace, %kind, "🔄 Periodic resync");
                    self.relist(namespace, watch, &topic).await?;
                }
                next = stream.next() => match next {
                    Some(Ok(notification)) => {
                        if let Some(delta) = watch.writer.apply(notification)? {
                            self.publish(&topic, &[delta]).await;
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Ok(()),
                },
            }
        }
    }

    /// Full listing applied as a store replacement
    async fn relist(&self, namespace: &str, watch: &KindWatch, topic: &Topic) -> Result<()> {
        let kind = watch.writer.kind();
        let list_timeout = self.config.list_timeout;
        let objects = timeout(list_timeout, self.client.list(kind, namespace))
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "listing {kind} in {namespace} did not complete within {list_timeout:?}"
                ))
            })??;

        let count = objects.len();
        let deltas = watch.writer.replace(objects)?;
        if !watch.barrier.is_synced() {
            info!(namespace, %kind, count, "✅ Initial listing applied");
        }
        watch.barrier.mark_synced();
        self.publish(topic, &deltas).await;
        Ok(())
    }

    async fn publish(&self, topic: &Topic, deltas: &[Delta]) {
        if deltas.is_empty() {
            return;
        }
        self.subscriptions.notify(topic, deltas).await;
        let delivered = deltas.len() as u64;
        self.update_stats(|stats| stats.total_deltas += delivered);
    }

    /// Sleep for `delay`; true when shutdown was requested meanwhile
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.shutdown.cancelled() => true,
            () = sleep(delay) => false,
        }
    }

    fn update_stats(&self, update: impl FnOnce(&mut WatchStats)) {
        match self.stats.write() {
            Ok(mut stats) => update(&mut stats),
            Err(_) => warn!("Watch stats lock poisoned, skipping update"),
        }
    }

    #[must_use]
    pub fn stats(&self) -> WatchStats {
        self.stats.read().map_or_else(|_| WatchStats::default(), |stats| stats.clone())
    }
}
