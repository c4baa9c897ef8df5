pub mod config;
pub mod errors;
pub mod manager;
pub mod store;
pub mod subscription;
pub mod sync;
pub mod watch_manager;

pub use config::CacheConfig;
pub use manager::{CacheManager, CacheStats, NamespaceCache};
pub use store::{CacheEntry, Delta, Store, StoreWriter};
pub use subscription::{SubscriptionManager, Topic};
pub use sync::{SyncBarrier, SyncOutcome, SyncState};
pub use watch_manager::{WatchConnectionStatus, WatchStats};
