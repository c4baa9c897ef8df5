/**
 * Initial-population barrier for a cache store
 *
 * A store starts `Pending`, becomes `Synced` once its first full listing has
 * been applied, and is demoted to `Started` when a deadline passes first.
 * `Started` is not fatal: the watch loop keeps trying and may still reach `Synced`.
 */
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No listing applied yet, deadline not reached
    Pending,
    /// Deadline passed before the first listing was applied
    Started,
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct SyncBarrier {
    tx: Arc<watch::Sender<SyncState>>,
}

impl Default for SyncBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncBarrier {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncState::Pending);
        Self { tx: Arc::new(tx) }
    }

    pub fn mark_synced(&self) {
        self.tx.send_replace(SyncState::Synced);
    }

    /// Demote `Pending` to `Started`; a synced barrier stays synced
    pub fn mark_started(&self) {
        self.tx.send_if_modified(|state| {
            if *state == SyncState::Pending {
                *state = SyncState::Started;
                true
            } else {
                false
            }
        });
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.state() == SyncState::Synced
    }

    /// Wait until the barrier is synced or `deadline` passes
    ///
    /// A missed deadline marks the barrier `Started` and is reported as
    /// `SyncOutcome::TimedOut`, never as an error.
    pub async fn wait_until(&self, deadline: Instant) -> SyncOutcome {
        let mut rx = self.tx.subscribe();
        match timeout_at(deadline, rx.wait_for(|state| *state == SyncState::Synced)).await {
            Ok(Ok(_)) => SyncOutcome::Synced,
            // sender lives in self, so the channel cannot close while we wait
            Ok(Err(_)) | Err(_) => {
                self.mark_started();
                warn!("⏰ Initial sync deadline passed, serving partial cache");
                SyncOutcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_once_synced() {
        let barrier = SyncBarrier::new();
        let marker = barrier.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            marker.mark_synced();
        });

        let outcome = barrier.wait_until(Instant::now() + Duration::from_secs(5)).await;
        assert_eq!(outcome, SyncOutcome::Synced);
        assert!(barrier.is_synced());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_marks_started() {
        let barrier = SyncBarrier::new();
        let outcome = barrier.wait_until(Instant::now() + Duration::from_secs(5)).await;
        assert_eq!(outcome, SyncOutcome::TimedOut);
        assert_eq!(barrier.state(), SyncState::Started);

        // a late listing still completes the sync
        barrier.mark_synced();
        assert!(barrier.is_synced());
    }

    #[test]
    fn test_started_never_demotes_synced() {
        let barrier = SyncBarrier::new();
        barrier.mark_synced();
        barrier.mark_started();
        assert_eq!(barrier.state(), SyncState::Synced);
    }
}
