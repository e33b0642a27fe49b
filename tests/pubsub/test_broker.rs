//! Integration tests for `Broker`

use futures::StreamExt;
use kodegen_agent_core::pubsub::{BackpressureStrategy, Broker, EventType};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_fan_out_to_every_subscriber() {
    let broker: Broker<String> = Broker::new();
    let mut a = broker.subscribe();
    let mut b = broker.subscribe();

    broker.publish(EventType::Created, "one".to_string());
    broker.publish(EventType::Deleted, "two".to_string());

    for sub in [&mut a, &mut b] {
        let first = sub.recv().await.unwrap();
        assert_eq!(first.event_type, EventType::Created);
        assert_eq!(first.payload, "one");
        let second = sub.recv().await.unwrap();
        assert_eq!(second.event_type, EventType::Deleted);
        assert_eq!(second.payload, "two");
    }
}

#[tokio::test]
async fn test_late_subscriber_misses_earlier_events() {
    let broker: Broker<u32> = Broker::new();
    broker.publish(EventType::Created, 1);

    let mut sub = broker.subscribe();
    broker.publish(EventType::Created, 2);

    assert_eq!(sub.recv().await.unwrap().payload, 2);
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_full_subscriber_drops_events_without_blocking() {
    let broker: Broker<u32> = Broker::with_options(2, BackpressureStrategy::DropEvents);
    let mut slow = broker.subscribe();

    for i in 0..5 {
        broker.publish(EventType::Updated, i);
    }

    assert_eq!(broker.dropped_event_count(), 3);
    assert_eq!(broker.subscriber_count(), 1);
    assert_eq!(slow.try_recv().unwrap().payload, 0);
    assert_eq!(slow.try_recv().unwrap().payload, 1);
    assert!(slow.try_recv().is_none());

    broker.publish(EventType::Updated, 9);
    assert_eq!(slow.try_recv().unwrap().payload, 9);
}

#[tokio::test]
async fn test_slow_subscriber_removed() {
    let broker: Broker<u32> = Broker::with_options(1, BackpressureStrategy::RemoveSlowSubscribers);
    let mut slow = broker.subscribe();
    let mut fast = broker.subscribe();

    broker.publish(EventType::Updated, 1);
    assert_eq!(fast.recv().await.unwrap().payload, 1);
    broker.publish(EventType::Updated, 2);

    assert_eq!(broker.slow_subscribers_removed(), 1);
    assert_eq!(broker.subscriber_count(), 1);
    assert_eq!(fast.recv().await.unwrap().payload, 2);

    // The removed subscriber drains what it had, then ends
    assert_eq!(slow.recv().await.unwrap().payload, 1);
    assert!(slow.recv().await.is_none());
}

#[tokio::test]
async fn test_subscribe_until_cancel() {
    let broker: Broker<u32> = Broker::new();
    let cancel = CancellationToken::new();
    let mut sub = broker.subscribe_until(cancel.clone());
    assert_eq!(broker.subscriber_count(), 1);

    broker.publish(EventType::Created, 1);
    cancel.cancel();

    assert_eq!(sub.recv().await.unwrap().payload, 1);
    let end = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .unwrap();
    assert!(end.is_none());
    assert_eq!(broker.subscriber_count(), 0);
}

#[tokio::test]
async fn test_recv_until() {
    let broker: Broker<u32> = Broker::new();
    let mut sub = broker.subscribe();
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(sub.recv_until(&cancel).await.is_none());
    // Still subscribed
    broker.publish(EventType::Created, 5);
    assert_eq!(sub.recv().await.unwrap().payload, 5);
}

#[tokio::test]
async fn test_shutdown_closes_subscriptions() {
    let broker: Broker<u32> = Broker::new();
    let mut sub = broker.subscribe();

    broker.shutdown();
    broker.publish(EventType::Created, 1);

    assert!(sub.recv().await.is_none());
    assert_eq!(broker.subscriber_count(), 0);

    let mut late = broker.subscribe();
    assert!(late.recv().await.is_none());

    // Idempotent
    broker.shutdown();
}

#[tokio::test]
async fn test_unsubscribe() {
    let broker: Broker<u32> = Broker::new();
    let sub = broker.subscribe();
    let other = broker.clone();
    assert_eq!(other.subscriber_count(), 1);

    sub.unsubscribe();
    assert_eq!(other.subscriber_count(), 0);
    broker.publish(EventType::Created, 1);
    assert_eq!(broker.dropped_event_count(), 0);
}

#[tokio::test]
async fn test_into_stream() {
    let broker: Broker<u32> = Broker::new();
    let stream = broker.subscribe().into_stream();

    for i in 0..3 {
        broker.publish(EventType::Created, i);
    }
    broker.shutdown();

    let payloads: Vec<u32> = stream.map(|event| event.payload).collect().await;
    assert_eq!(payloads, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_concurrent_publishers() {
    let broker: Broker<usize> = Broker::with_options(1000, BackpressureStrategy::DropEvents);
    let mut sub = broker.subscribe();
    let broker = Arc::new(broker);

    let publishers: Vec<_> = (0..10)
        .map(|p| {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                for i in 0..50 {
                    broker.publish(EventType::Created, p * 100 + i);
                }
            })
        })
        .collect();
    for publisher in publishers {
        publisher.await.unwrap();
    }

    let mut received = 0;
    while sub.try_recv().is_some() {
        received += 1;
    }
    assert_eq!(received, 500);
    assert_eq!(broker.dropped_event_count(), 0);
}
