use super::errors::lock_poisoned_error;
use crate::domain::{EventType, ObjectKey, ResourceKind};
use crate::error::Result;
use crate::k8s::remote::{Notification, Payload, RawObject, Tombstone};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Immutable snapshot of one object. Replaced wholesale, never mutated.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: ObjectKey,
    pub object: RawObject,
    pub stored_at: Instant,
    /// Number of times this identity has been replaced
    pub version: u64,
}

impl CacheEntry {
    #[must_use]
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    #[must_use]
    pub fn resource_version(&self) -> Option<&str> {
        self.object.resource_version()
    }
}

/// One applied change, as emitted by the writer
#[derive(Debug, Clone)]
pub struct Delta {
    pub event_type: EventType,
    pub payload: Payload,
}

type Entries = Arc<RwLock<HashMap<ObjectKey, Arc<CacheEntry>>>>;

/// The single writable handle of a store
///
/// Exclusive: only the watch loop of its (namespace, kind) holds one.
#[derive(Debug)]
pub struct StoreWriter {
    namespace: String,
    kind: ResourceKind,
    entries: Entries,
}

/// A readable cache of one kind
///
/// Cloning produces a new reference to the same backing map.
#[derive(Debug, Clone)]
pub struct Store {
    namespace: String,
    kind: ResourceKind,
    entries: Entries,
}

impl StoreWriter {
    #[must_use]
    pub fn new(namespace: &str, kind: ResourceKind) -> Self {
        Self {
            namespace: namespace.to_string(),
            kind,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Return a read handle to the store
    #[must_use]
    pub fn as_reader(&self) -> Store {
        Store {
            namespace: self.namespace.clone(),
            kind: self.kind,
            entries: self.entries.clone(),
        }
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<ObjectKey, Arc<CacheEntry>>>> {
        self.entries
            .write()
            .map_err(|_| lock_poisoned_error("store write lock"))
    }

    fn key_for(&self, namespace: Option<&str>, name: &str) -> ObjectKey {
        let namespace = namespace.filter(|ns| !ns.is_empty()).unwrap_or(&self.namespace);
        ObjectKey::new(self.kind, namespace, name)
    }

    /// Apply a single notification
    ///
    /// Returns `None` when the notification repeats the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned
    pub fn apply(&self, notification: Notification) -> Result<Option<Delta>> {
        let mut entries = self.write()?;
        match notification {
            Notification::Added(obj) | Notification::Modified(obj) => {
                Ok(self.upsert(&mut entries, obj, false))
            }
            Notification::Deleted(payload) => Ok(self.remove(&mut entries, payload)),
        }
    }

    /// Replace the store contents with a full listing
    ///
    /// Every listed object is re-delivered; identities absent from the listing
    /// are removed and reported as tombstones of their last stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned
    pub fn replace(&self, objects: Vec<RawObject>) -> Result<Vec<Delta>> {
        let mut entries = self.write()?;
        let mut seen = HashSet::with_capacity(objects.len());
        let mut deltas = Vec::with_capacity(objects.len());

        for obj in objects {
            if let Some(name) = obj.name() {
                seen.insert(self.key_for(obj.namespace(), name));
            }
            if let Some(delta) = self.upsert(&mut entries, obj, true) {
                deltas.push(delta);
            }
        }

        let mut vanished: Vec<ObjectKey> =
            entries.keys().filter(|key| !seen.contains(*key)).cloned().collect();
        vanished.sort();
        for key in vanished {
            if let Some(entry) = entries.remove(&key) {
                debug!(%key, age = ?entry.age(), "Object missing from relist, emitting tombstone");
                deltas.push(Delta {
                    event_type: EventType::Deleted,
                    payload: Payload::Tombstone(Tombstone::new(
                        &key.namespace,
                        &key.name,
                        Some(entry.object.clone()),
                    )),
                });
            }
        }

        Ok(deltas)
    }

    fn upsert(
        &self,
        entries: &mut HashMap<ObjectKey, Arc<CacheEntry>>,
        obj: RawObject,
        force: bool,
    ) -> Option<Delta> {
        let Some(name) = obj.name() else {
            warn!(namespace = %self.namespace, kind = %self.kind, "Object without a name, delivering without caching");
            return Some(Delta {
                event_type: EventType::Created,
                payload: Payload::Value(obj),
            });
        };
        let key = self.key_for(obj.namespace(), name);

        let (event_type, version) = match entries.get(&key) {
            Some(previous) => {
                let unchanged = previous.resource_version().is_some()
                    && previous.resource_version() == obj.resource_version();
                if unchanged && !force {
                    return None;
                }
                (EventType::Updated, previous.version + 1)
            }
            None => (EventType::Created, 0),
        };

        entries.insert(
            key.clone(),
            Arc::new(CacheEntry {
                key,
                object: obj.clone(),
                stored_at: Instant::now(),
                version,
            }),
        );

        Some(Delta {
            event_type,
            payload: Payload::Value(obj),
        })
    }

    /// Remove the identity a deletion names
    ///
    /// A deletion for an identity that is no longer stored was already
    /// delivered (usually as a relist tombstone) and yields `None`.
    fn remove(&self, entries: &mut HashMap<ObjectKey, Arc<CacheEntry>>, payload: Payload) -> Option<Delta> {
        let namespace = match &payload {
            Payload::Value(obj) => obj.namespace(),
            Payload::Tombstone(t) => t
                .last_known
                .as_ref()
                .and_then(RawObject::namespace)
                .or_else(|| Some(t.split_key().0)),
        };
        let Some(key) = payload.name().map(|name| self.key_for(namespace, name)) else {
            warn!(namespace = %self.namespace, kind = %self.kind, "Deletion without identity, nothing to remove");
            return Some(Delta {
                event_type: EventType::Deleted,
                payload,
            });
        };

        let Some(removed) = entries.remove(&key) else {
            debug!(%key, "Deletion for an identity no longer cached, skipping");
            return None;
        };
        let payload = match payload {
            // complete a bare tombstone with what we last stored
            Payload::Tombstone(Tombstone {
                key: tombstone_key,
                last_known: None,
            }) => Payload::Tombstone(Tombstone {
                key: tombstone_key,
                last_known: Some(removed.object.clone()),
            }),
            other => other,
        };

        Some(Delta {
            event_type: EventType::Deleted,
            payload,
        })
    }
}

impl Store {
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<ObjectKey, Arc<CacheEntry>>>> {
        self.entries
            .read()
            .map_err(|_| lock_poisoned_error("store read lock"))
    }

    /// Retrieve the snapshot for `namespace/name`, if it is cached
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned
    pub fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<CacheEntry>>> {
        let key = ObjectKey::new(self.kind, namespace, name);
        Ok(self.read()?.get(&key).cloned())
    }

    /// All cached snapshots, ordered by identity
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned
    pub fn list(&self) -> Result<Vec<Arc<CacheEntry>>> {
        let mut items: Vec<Arc<CacheEntry>> = self.read()?.values().cloned().collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }

    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let entries = self.entries.clone();
        let _ = std::thread::spawn(move || {
            let _guard = entries.write();
            panic!("poisoning store for test");
        })
        .join();
    }
}
