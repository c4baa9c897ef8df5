mod common;

use common::{MockClient, deployment, eventually};
use kubemirror::domain::{EventType, ResourceEvent, ResourceKind};
use kubemirror::k8s::cache::{CacheConfig, CacheManager, SyncState};
use kubemirror::k8s::remote::RawObject;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

fn manager(mock: &Arc<MockClient>, config: CacheConfig) -> CacheManager {
    CacheManager::new(mock.clone(), config, &[ResourceKind::Deployment])
}

async fn next_event(rx: &mut mpsc::Receiver<ResourceEvent>) -> ResourceEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("subscription closed")
}

fn replicas(obj: &RawObject) -> i32 {
    obj.to_deployment().unwrap().replicas
}

#[tokio::test]
async fn test_sequential_notifications_last_write_wins() {
    let mock = Arc::new(MockClient::default());
    let cache = manager(&mock, CacheConfig::default());
    let (_id, mut rx) = cache.subscribe("default", ResourceKind::Deployment).await;

    cache.initialize_for_namespaces(&["default".to_string()]).await.unwrap();
    assert!(eventually(|| async { mock.subscribers() == 1 }).await);

    mock.create(deployment("web", "default", 1, 0, "1")).await;
    mock.update(deployment("web", "default", 2, 1, "2")).await;
    mock.update(deployment("web", "default", 3, 3, "3")).await;

    let events: Vec<EventType> = vec![
        next_event(&mut rx).await.event_type,
        next_event(&mut rx).await.event_type,
        next_event(&mut rx).await.event_type,
    ];
    assert_eq!(events, vec![EventType::Created, EventType::Updated, EventType::Updated]);

    let store = cache.get_store("default", ResourceKind::Deployment).await.unwrap();
    let entry = store.get("default", "web").unwrap().unwrap();
    assert_eq!(replicas(&entry.object), 3);

    mock.delete(ResourceKind::Deployment, "default", "web").await;
    let deleted = next_event(&mut rx).await;
    assert_eq!(deleted.event_type, EventType::Deleted);
    assert!(store.get("default", "web").unwrap().is_none());
    assert!(store.is_empty().unwrap());

    cache.shutdown().await;
}

#[tokio::test]
async fn test_wrapped_delete_yields_identity() {
    let mock = Arc::new(MockClient::default());
    mock.seed(deployment("web", "default", 2, 1, "1"));
    let cache = manager(&mock, CacheConfig::default());
    let (_id, mut rx) = cache.subscribe("default", ResourceKind::Deployment).await;

    cache.initialize_for_namespaces(&[]).await.unwrap();
    assert_eq!(next_event(&mut rx).await.event_type, EventType::Created);
    assert!(eventually(|| async { mock.subscribers() == 1 }).await);

    mock.delete_wrapped(ResourceKind::Deployment, "default", "web").await;
    let event = next_event(&mut rx).await;
    assert_eq!(event.event_type, EventType::Deleted);
    assert_eq!(event.resource.name, "web");
    assert_eq!(event.resource.namespace, "default");
    assert_eq!(event.resource.kind, ResourceKind::Deployment);
    assert_eq!(event.resource.labels.get("app").map(String::as_str), Some("web"));

    cache.shutdown().await;
}

#[tokio::test]
async fn test_resync_recovers_missed_delete() {
    let mock = Arc::new(MockClient::default());
    mock.seed(deployment("web", "default", 2, 1, "1"));
    mock.seed(deployment("api", "default", 1, 1, "4"));
    let config = CacheConfig {
        resync_period: Duration::from_millis(100),
        ..CacheConfig::default()
    };
    let cache = manager(&mock, config);
    let (_id, mut rx) = cache.subscribe("default", ResourceKind::Deployment).await;

    cache.initialize_for_namespaces(&["default".to_string()]).await.unwrap();
    next_event(&mut rx).await;
    next_event(&mut rx).await;

    mock.forget(ResourceKind::Deployment, "default", "web");

    // resync re-delivers "api" as an update and tombstones "web"
    let mut deleted = None;
    for _ in 0..10 {
        let event = next_event(&mut rx).await;
        if event.event_type == EventType::Deleted {
            deleted = Some(event);
            break;
        }
        assert_eq!(event.event_type, EventType::Updated);
    }
    let deleted = deleted.expect("no delete after resync");
    assert_eq!(deleted.resource.name, "web");
    assert_eq!(deleted.resource.data["spec"]["replicas"], 2);

    let store = cache.get_store("default", ResourceKind::Deployment).await.unwrap();
    assert_eq!(store.len().unwrap(), 1);

    // the watch's own late deletes for "web" must not deliver it again
    mock.seed(deployment("web", "default", 2, 1, "1"));
    mock.delete(ResourceKind::Deployment, "default", "web").await;
    mock.delete_wrapped(ResourceKind::Deployment, "default", "web").await;

    let deadline = Instant::now() + Duration::from_millis(400);
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        assert_ne!(event.event_type, EventType::Deleted, "duplicate delete for {}", event.resource.name);
    }

    cache.shutdown().await;
}

#[tokio::test]
async fn test_missing_store_is_not_found() {
    let mock = Arc::new(MockClient::default());
    let cache = manager(&mock, CacheConfig::default());
    cache.initialize_for_namespaces(&["default".to_string()]).await.unwrap();

    assert!(cache.get_store("other", ResourceKind::Deployment).await.is_err());
    assert!(cache.get_store("default", ResourceKind::Pod).await.is_err());
    assert_eq!(cache.namespaces().await, vec!["default"]);

    // a second initialization reuses the region
    cache.initialize_for_namespaces(&["default".to_string()]).await.unwrap();
    assert_eq!(cache.stats().await.regions, 1);

    cache.shutdown().await;
    assert!(cache.initialize_for_namespaces(&["late".to_string()]).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_sync_timeout_is_not_fatal() {
    let mock = Arc::new(MockClient::default());
    mock.seed(deployment("web", "default", 2, 1, "1"));
    mock.hang_next_lists(1);
    let cache = manager(&mock, CacheConfig::default());

    let started = Instant::now();
    cache.initialize_for_namespaces(&["default".to_string()]).await.unwrap();
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(5));
    assert!(waited < Duration::from_secs(6));
    assert_eq!(cache.sync_state("default").await, Some(SyncState::Started));

    // the hung listing is abandoned and retried in the background
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(cache.is_synced("default").await);
    let store = cache.get_store("default", ResourceKind::Deployment).await.unwrap();
    assert_eq!(store.len().unwrap(), 1);
    assert!(mock.list_calls() >= 2);

    cache.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_namespace_does_not_block_others() {
    let mock = Arc::new(MockClient::default());
    mock.seed(deployment("web", "default", 2, 1, "1"));
    mock.fail_namespace("broken");
    let cache = manager(&mock, CacheConfig::default());

    cache
        .initialize_for_namespaces(&["default".to_string(), "broken".to_string()])
        .await
        .unwrap();

    assert_eq!(cache.sync_state("default").await, Some(SyncState::Synced));
    assert_eq!(cache.sync_state("broken").await, Some(SyncState::Started));
    assert!(cache.stats().await.watch.total_restarts >= 1);

    cache.shutdown().await;
}
