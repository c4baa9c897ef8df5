use super::store::Delta;
use crate::domain::{ResourceEvent, ResourceKind};
use crate::events::converter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Identifies the event stream of one store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub namespace: String,
    pub kind: ResourceKind,
}

impl Topic {
    #[must_use]
    pub fn new(namespace: &str, kind: ResourceKind) -> Self {
        Self {
            namespace: namespace.to_string(),
            kind,
        }
    }
}

pub struct Subscription {
    pub id: String,
    pub topic: Topic,
    pub sender: mpsc::Sender<ResourceEvent>,
}

impl Subscription {
    #[must_use]
    pub fn new(topic: Topic, capacity: usize) -> (Self, mpsc::Receiver<ResourceEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = Uuid::new_v4().to_string();

        (
            Self {
                id,
                topic,
                sender: tx,
            },
            rx,
        )
    }
}

/// Fan-out of converted cache deltas to per-(namespace, kind) subscribers
pub struct SubscriptionManager {
    subscriptions: Arc<RwLock<HashMap<Topic, Vec<Subscription>>>>,
    capacity: usize,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    #[allow(clippy::significant_drop_tightening)]
    pub async fn subscribe(&self, topic: Topic) -> (String, mpsc::Receiver<ResourceEvent>) {
        let (subscription, receiver) = Subscription::new(topic.clone(), self.capacity);
        let id = subscription.id.clone();

        let mut subs = self.subscriptions.write().await;
        subs.entry(topic).or_default().push(subscription);

        (id, receiver)
    }

    pub async fn unsubscribe(&self, subscription_id: &str) {
        let mut subs = self.subscriptions.write().await;

        for subscriptions in subs.values_mut() {
            subscriptions.retain(|s| s.id != subscription_id);
        }

        // Clean up empty entries
        subs.retain(|_, v| !v.is_empty());
    }

    /// Convert `deltas` once and deliver them, in order, to every subscriber of `topic`
    ///
    /// Sends wait for channel capacity so a slow subscriber applies
    /// backpressure instead of losing events. Closed receivers are pruned.
    pub async fn notify(&self, topic: &Topic, deltas: &[Delta]) {
        if deltas.is_empty() {
            return;
        }
        let events: Vec<ResourceEvent> = deltas
            .iter()
            .map(|delta| converter::to_event(delta, topic.kind, &topic.namespace))
            .collect();

        // senders are cloned out so a full channel never blocks other topics
        let targets: Vec<(String, mpsc::Sender<ResourceEvent>)> = {
            let subs = self.subscriptions.read().await;
            let Some(subscriptions) = subs.get(topic) else {
                return;
            };
            subscriptions
                .iter()
                .map(|s| (s.id.clone(), s.sender.clone()))
                .collect()
        };

        let mut closed = Vec::new();
        for (id, sender) in targets {
            for event in &events {
                if sender.send(event.clone()).await.is_err() {
                    closed.push(id);
                    break;
                }
            }
        }

        for id in closed {
            self.unsubscribe(&id).await;
        }
    }

    pub async fn active_subscriptions(&self) -> usize {
        let subs = self.subscriptions.read().await;
        subs.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use crate::k8s::remote::{Payload, Tombstone};
    use std::time::Duration;

    fn delete_delta(name: &str) -> Delta {
        Delta {
            event_type: EventType::Deleted,
            payload: Payload::Tombstone(Tombstone::new("default", name, None)),
        }
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe() {
        let manager = SubscriptionManager::new(10);

        let (id1, _rx1) = manager.subscribe(Topic::new("default", ResourceKind::Pod)).await;
        let (id2, _rx2) = manager.subscribe(Topic::new("default", ResourceKind::Deployment)).await;

        assert_eq!(manager.active_subscriptions().await, 2);

        manager.unsubscribe(&id1).await;
        assert_eq!(manager.active_subscriptions().await, 1);

        manager.unsubscribe(&id2).await;
        assert_eq!(manager.active_subscriptions().await, 0);
    }

    #[tokio::test]
    async fn test_notification_only_reaches_matching_topic() {
        let manager = SubscriptionManager::new(10);
        let topic = Topic::new("default", ResourceKind::Deployment);

        let (_id, mut rx) = manager.subscribe(topic.clone()).await;
        let (_other, mut other_rx) = manager.subscribe(Topic::new("other", ResourceKind::Deployment)).await;

        manager.notify(&topic, &[delete_delta("a"), delete_delta("b")]).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.resource.name, "a");
        assert_eq!(second.resource.name, "b");
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let manager = SubscriptionManager::new(10);
        let topic = Topic::new("default", ResourceKind::Pod);

        let (_id, rx) = manager.subscribe(topic.clone()).await;
        drop(rx);

        manager.notify(&topic, &[delete_delta("a")]).await;
        assert_eq!(manager.active_subscriptions().await, 0);
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_block_other_topics() {
        let manager = Arc::new(SubscriptionManager::new(1));
        let busy = Topic::new("default", ResourceKind::Deployment);
        let idle = Topic::new("other", ResourceKind::Deployment);

        let (_busy_id, _busy_rx) = manager.subscribe(busy.clone()).await;
        let (idle_id, mut idle_rx) = manager.subscribe(idle.clone()).await;
        let (extra_id, _extra_rx) = manager.subscribe(Topic::new("third", ResourceKind::Pod)).await;

        // the second delta waits for capacity that never frees up
        let stalled = {
            let manager = manager.clone();
            let busy = busy.clone();
            tokio::spawn(async move { manager.notify(&busy, &[delete_delta("a"), delete_delta("b")]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let unsubscribing = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.unsubscribe(&extra_id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), manager.notify(&idle, &[delete_delta("c")]))
            .await
            .expect("notify on an idle topic stalled");
        assert_eq!(idle_rx.recv().await.unwrap().resource.name, "c");

        tokio::time::timeout(Duration::from_secs(1), unsubscribing)
            .await
            .expect("unsubscribe stalled")
            .unwrap();
        assert!(!stalled.is_finished());
        stalled.abort();
        manager.unsubscribe(&idle_id).await;
    }
}
