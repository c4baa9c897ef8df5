/**
 * Per-object reconciliation
 *
 * `Reconciler::reconcile` runs one Fetching -> Processing attempt. The
 * `ReconcileRunner` task owns the retry timers: at most one reconciliation in
 * flight and at most one pending retry per object, all dropped on shutdown.
 */
use crate::domain::{Deployment, ObjectKey, ResourceKind};
use crate::error::{Error, Result};
use crate::k8s::remote::RemoteResourceClient;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::time::delay_queue::{self, DelayQueue};
use tracing::{debug, error, info, warn};

/// Fixed delay before a failed reconciliation is retried
pub const RETRY_DELAY_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Done,
    RequeueAfter(Duration),
}

/// The business step applied to an observed deployment
///
/// Must be idempotent: it may run repeatedly against the same state.
#[async_trait]
pub trait DeploymentProcessor: Send + Sync {
    async fn process(&self, deployment: &Deployment) -> Result<()>;
}

/// Logs the derived status of each reconciled deployment
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusReporter;

#[async_trait]
impl DeploymentProcessor for StatusReporter {
    async fn process(&self, deployment: &Deployment) -> Result<()> {
        let status = deployment.status();
        info!(
            namespace = %deployment.namespace,
            name = %deployment.name,
            replicas = deployment.replicas,
            ready = status.ready_replicas,
            available = status.available_replicas,
            unavailable = status.unavailable_replicas,
            phase = ?status.phase,
            "Deployment status"
        );
        Ok(())
    }
}

pub struct Reconciler {
    client: Arc<dyn RemoteResourceClient>,
    processor: Arc<dyn DeploymentProcessor>,
    retry_delay: Duration,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        client: Arc<dyn RemoteResourceClient>,
        processor: Arc<dyn DeploymentProcessor>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            processor,
            retry_delay,
        }
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Fetch `key` and apply the business step to it
    ///
    /// A missing object is `Done`. A failing business step is logged and
    /// requeued after the retry delay.
    ///
    /// # Errors
    ///
    /// Returns fetch errors other than not-found, and conversion failures
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        if key.kind != ResourceKind::Deployment {
            return Err(Error::UnsupportedKind(key.kind.to_string()));
        }

        let raw = match self.client.get(key.kind, &key.name, &key.namespace).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => {
                debug!(%key, "Object no longer exists, nothing to reconcile");
                return Ok(ReconcileOutcome::Done);
            }
            Err(e) => return Err(e),
        };

        let deployment = raw.to_deployment()?;
        match self.processor.process(&deployment).await {
            Ok(()) => {
                debug!(%key, "Reconciled");
                Ok(ReconcileOutcome::Done)
            }
            Err(e) => {
                error!(%key, "Reconcile failed, retrying in {:?}: {e}", self.retry_delay);
                Ok(ReconcileOutcome::RequeueAfter(self.retry_delay))
            }
        }
    }
}

/// Cloneable handle to a running `ReconcileRunner`
#[derive(Clone)]
pub struct ReconcileHandle {
    tx: mpsc::Sender<ObjectKey>,
    pending: Arc<Mutex<HashSet<ObjectKey>>>,
    shutdown: CancellationToken,
}

impl ReconcileHandle {
    /// Queue `key` for reconciliation; supersedes any pending retry of it
    ///
    /// # Errors
    ///
    /// Returns an error once the runner has stopped
    pub async fn enqueue(&self, key: ObjectKey) -> Result<()> {
        self.tx
            .send(key)
            .await
            .map_err(|e| Error::Reconcile(format!("reconcile queue closed, dropping {}", e.0)))
    }

    #[must_use]
    pub fn pending_retries(&self) -> usize {
        self.pending.lock().map_or(0, |pending| pending.len())
    }

    #[must_use]
    pub fn is_retry_pending(&self, key: &ObjectKey) -> bool {
        self.pending.lock().is_ok_and(|pending| pending.contains(key))
    }

    /// Stop the runner, dropping every scheduled retry
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

pub struct ReconcileRunner {
    reconciler: Arc<Reconciler>,
    rx: mpsc::Receiver<ObjectKey>,
    retries: DelayQueue<ObjectKey>,
    retry_keys: HashMap<ObjectKey, delay_queue::Key>,
    pending: Arc<Mutex<HashSet<ObjectKey>>>,
    tasks: JoinSet<(ObjectKey, Result<ReconcileOutcome>)>,
    in_flight: HashMap<task::Id, ObjectKey>,
    dirty: HashSet<ObjectKey>,
    shutdown: CancellationToken,
}

impl ReconcileRunner {
    /// Spawn the runner; it runs until `shutdown` is cancelled
    #[must_use]
    pub fn spawn(reconciler: Arc<Reconciler>, capacity: usize, shutdown: CancellationToken) -> (ReconcileHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let pending = Arc::new(Mutex::new(HashSet::new()));
        let handle = ReconcileHandle {
            tx,
            pending: Arc::clone(&pending),
            shutdown: shutdown.clone(),
        };
        let runner = Self {
            reconciler,
            rx,
            retries: DelayQueue::new(),
            retry_keys: HashMap::new(),
            pending,
            tasks: JoinSet::new(),
            in_flight: HashMap::new(),
            dirty: HashSet::new(),
            shutdown,
        };
        (handle, tokio::spawn(runner.run()))
    }

    async fn run(mut self) {
        info!("🔁 Reconcile runner started");
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                Some(key) = self.rx.recv() => self.schedule(key),
                Some(expired) = std::future::poll_fn(|cx| self.retries.poll_expired(cx)) => {
                    let key = expired.into_inner();
                    self.forget_retry(&key);
                    debug!(%key, "Retry timer fired");
                    self.start(key);
                }
                Some(joined) = self.tasks.join_next_with_id() => match joined {
                    Ok((id, (key, outcome))) => {
                        self.in_flight.remove(&id);
                        self.finish(key, outcome);
                    }
                    Err(e) => {
                        if let Some(key) = self.in_flight.remove(&e.id()) {
                            error!(%key, "Reconcile task failed: {e}");
                            self.dirty.remove(&key);
                        }
                    }
                },
            }
        }

        self.retries.clear();
        self.retry_keys.clear();
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        self.tasks.abort_all();
        info!("🔁 Reconcile runner stopped");
    }

    fn is_in_flight(&self, key: &ObjectKey) -> bool {
        self.in_flight.values().any(|k| k == key)
    }

    /// A fresh event: supersede any retry, coalesce with an in-flight run
    fn schedule(&mut self, key: ObjectKey) {
        if let Some(queue_key) = self.retry_keys.get(&key) {
            self.retries.remove(queue_key);
            self.forget_retry(&key);
        }
        if self.is_in_flight(&key) {
            self.dirty.insert(key);
            return;
        }
        self.start(key);
    }

    fn start(&mut self, key: ObjectKey) {
        let reconciler = Arc::clone(&self.reconciler);
        let task_key = key.clone();
        let abort = self.tasks.spawn(async move {
            let outcome = reconciler.reconcile(&task_key).await;
            (task_key, outcome)
        });
        self.in_flight.insert(abort.id(), key);
    }

    fn finish(&mut self, key: ObjectKey, outcome: Result<ReconcileOutcome>) {
        if self.dirty.remove(&key) {
            self.start(key);
            return;
        }
        match outcome {
            Ok(ReconcileOutcome::Done) => {}
            Ok(ReconcileOutcome::RequeueAfter(delay)) => self.schedule_retry(key, delay),
            Err(e) => {
                let delay = self.reconciler.retry_delay();
                warn!(%key, "Reconcile errored, retrying in {delay:?}: {e}");
                self.schedule_retry(key, delay);
            }
        }
    }

    fn schedule_retry(&mut self, key: ObjectKey, delay: Duration) {
        if let Some(queue_key) = self.retry_keys.get(&key) {
            self.retries.reset(queue_key, delay);
            return;
        }
        let queue_key = self.retries.insert(key.clone(), delay);
        self.retry_keys.insert(key.clone(), queue_key);
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(key);
        }
    }

    fn forget_retry(&mut self, key: &ObjectKey) {
        self.retry_keys.remove(key);
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(key);
        }
    }
}
