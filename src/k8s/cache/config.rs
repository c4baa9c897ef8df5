/**
 * Configuration constants for the namespace caches and their watch loops
 */
use std::time::Duration;

/// Maximum number of consecutive restart attempts for one watch loop
pub const MAX_WATCH_RESTARTS: u32 = 50;

/// Maximum backoff time in seconds between restart attempts
pub const MAX_BACKOFF_SECONDS: u64 = 60;

/// Initial backoff time in seconds
pub const INITIAL_BACKOFF_SECONDS: u64 = 1;

/// Watch stream timeout in seconds (294 vs 300 to allow 6 seconds for graceful shutdown)
pub const WATCH_TIMEOUT_SECONDS: u32 = 294;

/// Period of the forced full relist, independent of notification traffic
pub const RESYNC_PERIOD_SECONDS: u64 = 30;

/// Deadline for the initial population of all requested namespaces
pub const INITIAL_SYNC_TIMEOUT_SECONDS: u64 = 5;

/// Upper bound on a single list call before it is abandoned and retried
pub const LIST_TIMEOUT_SECONDS: u64 = 10;

/// Channel buffer size for dispatched resource events
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Brief delay between restart attempts in seconds
pub const RESTART_DELAY_SECONDS: u64 = 1;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub resync_period: Duration,
    pub initial_sync_timeout: Duration,
    pub list_timeout: Duration,
    pub max_watch_restarts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub restart_delay: Duration,
    pub event_channel_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(RESYNC_PERIOD_SECONDS),
            initial_sync_timeout: Duration::from_secs(INITIAL_SYNC_TIMEOUT_SECONDS),
            list_timeout: Duration::from_secs(LIST_TIMEOUT_SECONDS),
            max_watch_restarts: MAX_WATCH_RESTARTS,
            initial_backoff: Duration::from_secs(INITIAL_BACKOFF_SECONDS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECONDS),
            restart_delay: Duration::from_secs(RESTART_DELAY_SECONDS),
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(MAX_WATCH_RESTARTS > 0, "MAX_WATCH_RESTARTS must be greater than 0");
    assert!(MAX_BACKOFF_SECONDS >= INITIAL_BACKOFF_SECONDS, "MAX_BACKOFF_SECONDS must not be below INITIAL_BACKOFF_SECONDS");
    assert!(INITIAL_BACKOFF_SECONDS > 0, "INITIAL_BACKOFF_SECONDS must be greater than 0");
    assert!(WATCH_TIMEOUT_SECONDS > 0, "WATCH_TIMEOUT_SECONDS must be greater than 0");
    assert!(RESYNC_PERIOD_SECONDS > 0, "RESYNC_PERIOD_SECONDS must be greater than 0");
    assert!(INITIAL_SYNC_TIMEOUT_SECONDS > 0, "INITIAL_SYNC_TIMEOUT_SECONDS must be greater than 0");
    assert!(LIST_TIMEOUT_SECONDS > 0, "LIST_TIMEOUT_SECONDS must be greater than 0");
    assert!(EVENT_CHANNEL_CAPACITY > 0, "EVENT_CHANNEL_CAPACITY must be greater than 0");
    assert!(RESTART_DELAY_SECONDS > 0, "RESTART_DELAY_SECONDS must be greater than 0");
};
