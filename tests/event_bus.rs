//! Event Bus Integration Tests
//!
//! Delivery, shutdown and cancellation semantics seen from independent tasks.

use std::time::Duration;

use abdtool::core::{EventBus, WaitError};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_no_history_for_late_subscribers() {
    let bus = EventBus::new();
    assert!(bus.publish("ready", Vec::new()));

    let subscription = bus.subscribe(["ready"], CancellationToken::new());
    let outcome = tokio::time::timeout(Duration::from_secs(60), subscription.wait()).await;

    assert!(outcome.is_err(), "a past publication must not release a new waiter");
    assert_eq!(bus.waiting(), 0, "timed out subscription is deregistered on drop");
}

#[tokio::test]
async fn test_first_payload_wins() {
    let bus = EventBus::new();
    let subscription = bus.subscribe(["a", "b"], CancellationToken::new());

    bus.publish("a", vec!["first".to_string()]);
    bus.publish("a", vec!["second".to_string()]);
    assert_eq!(bus.waiting(), 1);
    bus.publish("b", Vec::new());

    let events = subscription.wait().await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].name, "a");
    assert_eq!(events[0].payload, vec!["first".to_string()]);
    assert_eq!(events[1].name, "b");
}

#[tokio::test]
async fn test_shutdown_semantics() {
    let bus = EventBus::new();
    let pending = bus.subscribe(["never"], CancellationToken::new());

    assert!(bus.shutdown());
    assert!(!bus.shutdown(), "second shutdown is a no-op");

    assert_eq!(pending.wait().await.unwrap_err(), WaitError::Shutdown);
    assert!(!bus.publish("never", Vec::new()));

    let late = bus.subscribe(["x"], CancellationToken::new());
    assert_eq!(late.wait().await.unwrap_err(), WaitError::Shutdown);

    let empty = bus.subscribe(Vec::<String>::new(), CancellationToken::new());
    assert_eq!(empty.wait().await.unwrap_err(), WaitError::Shutdown);
}

#[tokio::test]
async fn test_cancellation_releases_only_that_waiter() {
    let bus = EventBus::new();
    let token = CancellationToken::new();
    let cancelled = bus.subscribe(["e"], token.clone());
    let other = bus.subscribe(["e"], CancellationToken::new());

    token.cancel();
    assert_eq!(cancelled.wait().await.unwrap_err(), WaitError::Cancelled);
    assert_eq!(bus.waiting(), 1);

    bus.publish("e", Vec::new());
    assert_eq!(other.wait().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishers_release_every_waiter() {
    let bus = EventBus::new();
    let names: Vec<String> = (0..16).map(|i| format!("event-{}", i)).collect();

    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let subscription = bus.subscribe(names.clone(), CancellationToken::new());
            tokio::spawn(subscription.wait())
        })
        .collect();

    let publishers: Vec<_> = names
        .iter()
        .cloned()
        .map(|name| {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish(name, Vec::new()) })
        })
        .collect();

    for publisher in publishers {
        assert!(publisher.await.unwrap());
    }
    for waiter in waiters {
        assert_eq!(waiter.await.unwrap().unwrap().len(), 16);
    }
    assert_eq!(bus.waiting(), 0);
}
