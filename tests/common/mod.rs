//! In-memory remote API used by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::serde_json::{self, json};
use kubemirror::domain::{ObjectKey, Resource, ResourceKind};
use kubemirror::error::{Error, Result};
use kubemirror::k8s::remote::{Notification, NotificationStream, Payload, RawObject, RemoteResourceClient, Tombstone};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

type Watcher = (ResourceKind, String, mpsc::Sender<Result<Notification>>);

/// Cluster state kept in memory; every mutation is pushed to matching subscribers
#[derive(Default)]
pub struct MockClient {
    objects: Mutex<BTreeMap<ObjectKey, RawObject>>,
    watchers: Mutex<Vec<Watcher>>,
    failing_namespaces: Mutex<Vec<String>>,
    hanging_lists: AtomicUsize,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

pub fn deployment(name: &str, namespace: &str, replicas: i32, ready: i32, rv: &str) -> RawObject {
    RawObject::Deployment(
        serde_json::from_value::<Deployment>(json!({
            "metadata": {
                "name": name,
                "namespace": namespace,
                "resourceVersion": rv,
                "labels": {"app": name},
                "creationTimestamp": "2024-03-09T07:05:01Z"
            },
            "spec": {"replicas": replicas, "selector": {}, "template": {}},
            "status": {"readyReplicas": ready, "updatedReplicas": ready, "availableReplicas": ready}
        }))
        .unwrap(),
    )
}

fn key_of(obj: &RawObject) -> ObjectKey {
    ObjectKey::new(
        obj.type_kind(),
        obj.namespace().unwrap_or_default(),
        obj.name().unwrap_or_default(),
    )
}

impl MockClient {
    /// Store an object without notifying anyone
    pub fn seed(&self, obj: RawObject) {
        self.objects.lock().unwrap().insert(key_of(&obj), obj);
    }

    /// Remove an object without notifying anyone (a missed delete)
    pub fn forget(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<RawObject> {
        self.objects
            .lock()
            .unwrap()
            .remove(&ObjectKey::new(kind, namespace, name))
    }

    /// The next `count` list calls never complete
    pub fn hang_next_lists(&self, count: usize) {
        self.hanging_lists.store(count, Ordering::SeqCst);
    }

    /// Every list and subscribe against `namespace` fails
    pub fn fail_namespace(&self, namespace: &str) {
        self.failing_namespaces.lock().unwrap().push(namespace.to_string());
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn subscribers(&self) -> usize {
        self.watchers.lock().unwrap().iter().filter(|(_, _, tx)| !tx.is_closed()).count()
    }

    pub async fn create(&self, obj: RawObject) {
        self.seed(obj.clone());
        self.notify(obj.type_kind(), obj.namespace().unwrap_or_default().to_string(), Notification::Added(obj))
            .await;
    }

    pub async fn update(&self, obj: RawObject) {
        self.seed(obj.clone());
        self.notify(obj.type_kind(), obj.namespace().unwrap_or_default().to_string(), Notification::Modified(obj))
            .await;
    }

    pub async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) {
        if let Some(obj) = self.forget(kind, namespace, name) {
            self.notify(kind, namespace.to_string(), Notification::Deleted(Payload::Value(obj)))
                .await;
        }
    }

    /// Delete, delivering the last known object wrapped in a tombstone
    pub async fn delete_wrapped(&self, kind: ResourceKind, namespace: &str, name: &str) {
        let last_known = self.forget(kind, namespace, name);
        let tombstone = Tombstone::new(namespace, name, last_known);
        self.notify(kind, namespace.to_string(), Notification::Deleted(Payload::Tombstone(tombstone)))
            .await;
    }

    async fn notify(&self, kind: ResourceKind, namespace: String, notification: Notification) {
        let senders: Vec<mpsc::Sender<Result<Notification>>> = self
            .watchers
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, ns, _)| *k == kind && (ns.is_empty() || *ns == namespace))
            .map(|(_, _, tx)| tx.clone())
            .collect();
        for tx in senders {
            let _ = tx.send(Ok(notification.clone())).await;
        }
    }

    fn failing(&self, namespace: &str) -> bool {
        self.failing_namespaces.lock().unwrap().iter().any(|ns| ns == namespace)
    }
}

#[async_trait]
impl RemoteResourceClient for MockClient {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<RawObject>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing(namespace) {
            return Err(Error::Connection(format!("namespace {namespace} unreachable")));
        }
        let hang = self
            .hanging_lists
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hang {
            futures::future::pending::<()>().await;
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.kind == kind && (namespace.is_empty() || key.namespace == namespace))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn get(&self, kind: ResourceKind, name: &str, namespace: &str) -> Result<RawObject> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let key = ObjectKey::new(kind, namespace, name);
        self.objects
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(Error::NotFound(key))
    }

    async fn apply(&self, _resource: &Resource) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, kind: ResourceKind, namespace: &str) -> Result<NotificationStream> {
        if self.failing(namespace) {
            return Err(Error::Connection(format!("namespace {namespace} unreachable")));
        }
        let (tx, rx) = mpsc::channel(100);
        self.watchers.lock().unwrap().push((kind, namespace.to_string(), tx));
        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Poll `check` until it holds, giving background tasks time to run
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
