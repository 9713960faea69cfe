// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Registry facade behavior over the in-memory backend: synchronous
//! first notification, empty markers, duplicate suppression, idempotent
//! register/unregister and failback replay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_common::Url;
use relay_registry::memory::{MemoryHub, MemoryRegistryFactory};
use relay_registry::{NotifyListener, Registry, RegistryFactory};

struct CollectingListener {
    deliveries: Mutex<Vec<Vec<String>>>,
}

impl CollectingListener {
    fn new() -> Arc<Self> {
        Arc::new(CollectingListener {
            deliveries: Mutex::new(Vec::new()),
        })
    }

    fn deliveries(&self) -> Vec<Vec<String>> {
        self.deliveries.lock().clone()
    }
}

#[async_trait]
impl NotifyListener for CollectingListener {
    async fn notify(&self, urls: Vec<Url>) {
        self.deliveries
            .lock()
            .push(urls.iter().map(|u| u.to_string()).collect());
    }
}

fn registry_for(host: &str) -> (Arc<dyn Registry>, Arc<MemoryHub>) {
    let url = Url::parse(&format!("memory://{host}:1234?retry.period=50")).unwrap();
    let registry = MemoryRegistryFactory.create(&url).unwrap();
    let hub = MemoryHub::get(&url);
    (registry, hub)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}

#[tokio::test]
async fn subscribe_notifies_once_synchronously_with_empty_marker() {
    let (registry, _hub) = registry_for("facade-empty");
    let listener = CollectingListener::new();
    let consumer = Url::parse("consumer://c/com.X").unwrap();

    registry
        .subscribe(&consumer, listener.clone())
        .await
        .unwrap();

    let deliveries = listener.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].len(), 1);
    assert!(deliveries[0][0].starts_with("empty://"));
    assert!(deliveries[0][0].contains("category=providers"));
}

#[tokio::test]
async fn changes_deliver_the_full_current_set() {
    let (registry, _hub) = registry_for("facade-full-set");
    let listener = CollectingListener::new();
    let consumer = Url::parse("consumer://c/com.X").unwrap();
    registry
        .subscribe(&consumer, listener.clone())
        .await
        .unwrap();

    let p1 = Url::parse("relay://h1:1/com.X").unwrap();
    let p2 = Url::parse("relay://h2:2/com.X").unwrap();
    registry.register(&p1).await.unwrap();
    settle().await;
    registry.register(&p2).await.unwrap();
    settle().await;

    let deliveries = listener.deliveries();
    // initial empty marker, then [p1], then [p1, p2]: always full sets
    assert_eq!(deliveries.len(), 3);
    assert_eq!(deliveries[1], vec![p1.to_string()]);
    assert_eq!(deliveries[2], vec![p1.to_string(), p2.to_string()]);
}

#[tokio::test]
async fn duplicate_registrations_and_notifications_are_suppressed() {
    let (registry, hub) = registry_for("facade-dedup");
    let listener = CollectingListener::new();
    let consumer = Url::parse("consumer://c/com.X").unwrap();
    registry
        .subscribe(&consumer, listener.clone())
        .await
        .unwrap();

    let provider = Url::parse("relay://h1:1/com.X").unwrap();
    registry.register(&provider).await.unwrap();
    settle().await;
    // same URL again: a no-op at the backend and no extra delivery
    registry.register(&provider).await.unwrap();
    settle().await;

    assert_eq!(hub.stats.registers.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(listener.deliveries().len(), 2);

    registry.unregister(&provider).await.unwrap();
    registry.unregister(&provider).await.unwrap();
    settle().await;
    assert_eq!(
        hub.stats.unregisters.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn unregistering_the_last_provider_delivers_an_empty_marker() {
    let (registry, _hub) = registry_for("facade-drain");
    let listener = CollectingListener::new();
    let consumer = Url::parse("consumer://c/com.X").unwrap();
    registry
        .subscribe(&consumer, listener.clone())
        .await
        .unwrap();

    let provider = Url::parse("relay://h1:1/com.X").unwrap();
    registry.register(&provider).await.unwrap();
    settle().await;
    registry.unregister(&provider).await.unwrap();
    settle().await;

    let deliveries = listener.deliveries();
    assert_eq!(deliveries.len(), 3);
    assert!(deliveries[2][0].starts_with("empty://"));
}

#[tokio::test]
async fn failed_operations_are_replayed_after_recovery() {
    let (registry, hub) = registry_for("facade-failback");
    let provider = Url::parse("relay://h1:1/com.X").unwrap();

    hub.set_faulted(true);
    // the call still succeeds; the operation is queued for retry
    registry.register(&provider).await.unwrap();
    assert_eq!(hub.stats.registers.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(!registry.is_available());

    hub.set_faulted(false);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hub.stats.registers.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(hub.registered_urls(), vec![provider]);
    assert!(registry.is_available());
}

#[tokio::test]
#[tracing_test::traced_test]
async fn failures_log_once_per_transition() {
    let (registry, hub) = registry_for("facade-log-once");

    hub.set_faulted(true);
    registry
        .register(&Url::parse("relay://h1:1/com.X").unwrap())
        .await
        .unwrap();
    registry
        .register(&Url::parse("relay://h2:2/com.X").unwrap())
        .await
        .unwrap();

    hub.set_faulted(false);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // one warning when the registry went down, not one per failed call
    logs_assert(|lines: &[&str]| {
        let failures = lines
            .iter()
            .filter(|l| l.contains("registry operation failed"))
            .count();
        match failures {
            1 => Ok(()),
            n => Err(format!("expected one failure transition, logged {n}")),
        }
    });
    assert!(logs_contain("registry recovered"));
}

#[tokio::test]
async fn failed_subscriptions_notify_once_replayed() {
    let (registry, hub) = registry_for("facade-failback-sub");
    let provider = Url::parse("relay://h1:1/com.X").unwrap();
    registry.register(&provider).await.unwrap();

    hub.set_faulted(true);
    let listener = CollectingListener::new();
    let consumer = Url::parse("consumer://c/com.X").unwrap();
    registry
        .subscribe(&consumer, listener.clone())
        .await
        .unwrap();
    assert!(listener.deliveries().is_empty());

    hub.set_faulted(false);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let deliveries = listener.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0], vec![provider.to_string()]);
}

#[tokio::test]
async fn unsubscribed_listeners_stop_receiving() {
    let (registry, _hub) = registry_for("facade-unsub");
    let listener = CollectingListener::new();
    let consumer = Url::parse("consumer://c/com.X").unwrap();
    registry
        .subscribe(&consumer, listener.clone())
        .await
        .unwrap();

    let as_listener: Arc<dyn NotifyListener> = listener.clone();
    registry.unsubscribe(&consumer, &as_listener).await.unwrap();

    registry
        .register(&Url::parse("relay://h1:1/com.X").unwrap())
        .await
        .unwrap();
    settle().await;
    assert_eq!(listener.deliveries().len(), 1);
}
