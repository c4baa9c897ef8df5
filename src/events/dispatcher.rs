/**
 * Pull-based event dispatch
 *
 * One task per (namespace, kind) pulls converted events from the cache's
 * subscription queue and hands them to the registered handler in order.
 * Different pairs are dispatched concurrently.
 */
use crate::domain::{ResourceEvent, ResourceKind};
use crate::error::Result;
use crate::k8s::cache::CacheManager;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receiver of dispatched events
#[async_trait]
pub trait ResourceEventHandler: Send + Sync {
    /// A returned error is logged by the dispatcher; the loop continues
    async fn handle_event(&self, event: ResourceEvent) -> Result<()>;
}

pub struct EventDispatcher {
    handler: Arc<dyn ResourceEventHandler>,
    tasks: JoinSet<()>,
    subscription_ids: Vec<String>,
    shutdown: CancellationToken,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(handler: Arc<dyn ResourceEventHandler>) -> Self {
        Self {
            handler,
            tasks: JoinSet::new(),
            subscription_ids: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start dispatching events of one (namespace, kind)
    ///
    /// Register before the cache region starts to receive its initial events.
    pub async fn register(&mut self, cache: &CacheManager, namespace: &str, kind: ResourceKind) {
        let (id, mut rx) = cache.subscribe(namespace, kind).await;
        self.subscription_ids.push(id);

        let handler = Arc::clone(&self.handler);
        let shutdown = self.shutdown.clone();
        let namespace = namespace.to_string();
        self.tasks.spawn(async move {
            debug!(namespace = %namespace, %kind, "📡 Dispatcher started");
            loop {
                let event = tokio::select! {
                    () = shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let event_type = event.event_type;
                let name = event.resource.name.clone();
                if let Err(e) = handler.handle_event(event).await {
                    error!(namespace = %namespace, %kind, name = %name, event = %event_type, "Handler failed: {e}");
                }
            }
            debug!(namespace = %namespace, %kind, "📡 Dispatcher stopped");
        });
    }

    /// Register every supported kind in every namespace
    ///
    /// Kinds the cache does not watch are skipped with a warning.
    pub async fn register_all(&mut self, cache: &CacheManager, namespaces: &[String], kinds: &[ResourceKind]) {
        for namespace in namespaces {
            for kind in kinds {
                if !cache.kinds().contains(kind) {
                    warn!(namespace = %namespace, %kind, "Kind is not watched, skipping dispatch");
                    continue;
                }
                self.register(cache, namespace, *kind).await;
            }
        }
        info!(
            namespaces = namespaces.len(),
            dispatchers = self.tasks.len(),
            "📡 Event dispatch registered"
        );
    }

    #[must_use]
    pub fn active_dispatchers(&self) -> usize {
        self.tasks.len()
    }

    /// Stop all dispatch tasks and drop their subscriptions
    pub async fn shutdown(&mut self, cache: &CacheManager) {
        self.shutdown.cancel();
        for id in self.subscription_ids.drain(..) {
            cache.unsubscribe(&id).await;
        }
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!("Dispatch task ended abnormally: {e}");
            }
        }
    }
}
