/**
 * Helper functions for creating common cache error types
 */
use crate::domain::ResourceKind;
use crate::error::Error;

/// Create a `StoreNotFound` error for a namespace/kind with no cache region
#[must_use]
pub fn store_not_found_error(namespace: &str, kind: ResourceKind) -> Error {
    Error::StoreNotFound {
        namespace: namespace.to_string(),
        kind,
    }
}

/// Create a `LockPoisoned` error for mutex/rwlock poisoning (indicates prior panic)
#[must_use]
pub fn lock_poisoned_error(message: &str) -> Error {
    Error::LockPoisoned(format!(
        "{message} - this indicates a prior panic, cache contents may be inconsistent"
    ))
}
