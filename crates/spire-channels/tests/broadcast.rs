//! Broadcaster behaviour: ordering, membership, backpressure and history.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use spire_channels::{
    Backend, BackendError, BackendResult, BackpressureError, BackpressurePolicy, Broadcaster,
    ChannelsConfig, ChannelsError, CloseReason, MemoryBackend, Message, SubscribeOptions,
};

fn payloads(messages: &[Message]) -> Vec<Bytes> {
    messages.iter().map(|m| m.payload().clone()).collect()
}

fn sequences(messages: &[Message]) -> Vec<u64> {
    messages.iter().map(Message::sequence).collect()
}

// ─── ordering ───

#[tokio::test]
async fn test_concurrent_publishes_arrive_in_sequence_without_gaps() {
    let broadcaster = Broadcaster::new(ChannelsConfig::default().with_queue_capacity(1000));
    let first = broadcaster.subscribe(["ticks"]).await.unwrap();
    let second = broadcaster.subscribe(["ticks"]).await.unwrap();

    let mut publishers = Vec::new();
    for worker in 0..4 {
        let broadcaster = broadcaster.clone();
        publishers.push(tokio::spawn(async move {
            for i in 0..25 {
                broadcaster
                    .publish("ticks", format!("{worker}-{i}"))
                    .await
                    .unwrap();
            }
        }));
    }
    for publisher in publishers {
        publisher.await.unwrap();
    }
    broadcaster.wait_published().await.unwrap();

    let expected: Vec<u64> = (1..=100).collect();
    let a = first.drain();
    let b = second.drain();
    assert_eq!(sequences(&a), expected);
    assert_eq!(sequences(&b), expected);
    assert_eq!(payloads(&a), payloads(&b));
}

#[tokio::test]
async fn test_iter_events_streams_until_closed() {
    let broadcaster = Broadcaster::new(ChannelsConfig::default());
    let subscriber = broadcaster.subscribe(["s"]).await.unwrap();
    for i in 0..3 {
        broadcaster.publish("s", format!("m{i}")).await.unwrap();
    }
    broadcaster.wait_published().await.unwrap();
    broadcaster.shutdown().await;

    let received: Vec<Message> = subscriber.iter_events().collect().await;
    assert_eq!(sequences(&received), vec![1, 2, 3]);
}

// ─── membership ───

#[tokio::test]
async fn test_partial_unsubscribe_keeps_earlier_messages() {
    let broadcaster = Broadcaster::new(ChannelsConfig::default());
    let subscriber = broadcaster.subscribe(["foo", "bar"]).await.unwrap();

    broadcaster.publish("foo", "hello").await.unwrap();
    broadcaster.wait_published().await.unwrap();
    broadcaster.unsubscribe(&subscriber, Some(&["foo"]));
    broadcaster.publish("foo", "world").await.unwrap();
    broadcaster.wait_published().await.unwrap();

    assert_eq!(payloads(&subscriber.drain()), vec![Bytes::from("hello")]);
    assert_eq!(subscriber.topics(), vec!["bar".to_string()]);
    assert!(!subscriber.is_closed());
}

#[tokio::test]
async fn test_publish_reaches_subscribers_present_at_call_time() {
    let broadcaster = Broadcaster::new(ChannelsConfig::default());
    let subscriber = broadcaster.subscribe(["foo", "bar"]).await.unwrap();

    broadcaster.publish("foo", "hello").await.unwrap();
    broadcaster.unsubscribe(&subscriber, Some(&["foo"]));
    broadcaster.publish("foo", "world").await.unwrap();
    broadcaster.wait_published().await.unwrap();

    assert_eq!(payloads(&subscriber.drain()), vec![Bytes::from("hello")]);
    assert_eq!(subscriber.topics(), vec!["bar".to_string()]);
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let broadcaster = Broadcaster::new(ChannelsConfig::default());
    let leaving = broadcaster.subscribe(["room"]).await.unwrap();
    let staying = broadcaster.subscribe(["room"]).await.unwrap();

    broadcaster.unsubscribe(&leaving, Some(&["never-subscribed"]));
    broadcaster.unsubscribe(&leaving, None);
    broadcaster.unsubscribe(&leaving, None);
    broadcaster.unsubscribe(&leaving, Some(&["room"]));
    assert_eq!(leaving.close_reason(), Some(CloseReason::Unsubscribed));

    broadcaster.publish("room", "still here").await.unwrap();
    broadcaster.wait_published().await.unwrap();
    assert_eq!(payloads(&staying.drain()), vec![Bytes::from("still here")]);
    assert!(leaving.drain().is_empty());
    assert_eq!(broadcaster.subscriber_count("room"), 1);
}

#[tokio::test]
async fn test_full_unsubscribe_discards_queue() {
    let broadcaster = Broadcaster::new(ChannelsConfig::default());
    let subscriber = broadcaster.subscribe(["a"]).await.unwrap();
    broadcaster.publish("a", "x").await.unwrap();
    broadcaster.wait_published().await.unwrap();
    assert_eq!(subscriber.len(), 1);

    broadcaster.unsubscribe(&subscriber, None);
    assert!(subscriber.is_empty());
    assert_eq!(subscriber.recv().await, None);
}

#[tokio::test]
async fn test_dropping_subscriber_releases_topics() {
    let broadcaster = Broadcaster::new(ChannelsConfig::default());
    let subscriber = broadcaster.subscribe(["x", "y"]).await.unwrap();
    assert_eq!(broadcaster.stats().subscribers, 1);
    assert_eq!(broadcaster.stats().topics, 2);

    drop(subscriber);
    let stats = broadcaster.stats();
    assert_eq!(stats.subscribers, 0);
    assert_eq!(stats.topics, 0);
}

// ─── backpressure ───

#[tokio::test]
async fn test_drop_oldest_keeps_most_recent() {
    let broadcaster = Broadcaster::new(ChannelsConfig::default());
    let subscriber = broadcaster
        .subscribe_with(
            ["feed"],
            SubscribeOptions::new()
                .with_capacity(4)
                .with_policy(BackpressurePolicy::DropOldest),
        )
        .await
        .unwrap();

    for i in 1..=10 {
        broadcaster.publish("feed", format!("m{i}")).await.unwrap();
    }
    broadcaster.wait_published().await.unwrap();

    let messages = subscriber.drain();
    assert_eq!(sequences(&messages), vec![7, 8, 9, 10]);
    assert_eq!(subscriber.dropped(), 6);
    assert!(!subscriber.is_closed());
    assert_eq!(broadcaster.stats().dropped, 6);
}

#[tokio::test]
async fn test_close_policy_disconnects_only_the_slow_subscriber() {
    let broadcaster = Broadcaster::new(ChannelsConfig::default());
    let slow = broadcaster
        .subscribe_with(
            ["feed"],
            SubscribeOptions::new()
                .with_capacity(2)
                .with_policy(BackpressurePolicy::Close),
        )
        .await
        .unwrap();
    let healthy = broadcaster.subscribe(["feed"]).await.unwrap();

    for i in 1..=3 {
        broadcaster.publish("feed", format!("m{i}")).await.unwrap();
    }
    broadcaster.wait_published().await.unwrap();

    assert!(slow.is_closed());
    assert_eq!(
        slow.close_reason(),
        Some(CloseReason::Backpressure(BackpressureError::Overflow {
            capacity: 2
        }))
    );
    assert_eq!(sequences(&slow.drain()), vec![1, 2]);
    assert!(slow.topics().is_empty());

    broadcaster.publish("feed", "m4").await.unwrap();
    broadcaster.wait_published().await.unwrap();
    assert!(slow.drain().is_empty());
    assert_eq!(slow.recv().await, None);

    assert_eq!(sequences(&healthy.drain()), vec![1, 2, 3, 4]);
    assert_eq!(broadcaster.stats().disconnected, 1);
}

#[tokio::test(start_paused = true)]
async fn test_block_policy_times_out_and_disconnects() {
    let config = ChannelsConfig::default()
        .with_policy(BackpressurePolicy::Block)
        .with_queue_capacity(1)
        .with_block_timeout(Duration::from_millis(50));
    let broadcaster = Broadcaster::new(config);
    let stuck = broadcaster.subscribe(["jobs"]).await.unwrap();

    broadcaster.publish("jobs", "1").await.unwrap();
    broadcaster.publish("jobs", "2").await.unwrap();
    broadcaster.wait_published().await.unwrap();

    assert_eq!(
        stuck.close_reason(),
        Some(CloseReason::Backpressure(BackpressureError::BlockTimeout {
            timeout_ms: 50
        }))
    );
    assert_eq!(sequences(&stuck.drain()), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_subscriber_does_not_delay_other_topics() {
    let broadcaster = Broadcaster::new(
        ChannelsConfig::default().with_block_timeout(Duration::from_millis(800)),
    );
    let stuck = broadcaster
        .subscribe_with(
            ["a"],
            SubscribeOptions::new()
                .with_capacity(1)
                .with_policy(BackpressurePolicy::Block),
        )
        .await
        .unwrap();
    let healthy = broadcaster.subscribe(["b"]).await.unwrap();

    broadcaster.publish("a", "1").await.unwrap();
    broadcaster.publish("a", "2").await.unwrap();
    broadcaster.publish("b", "x").await.unwrap();

    let started = tokio::time::Instant::now();
    let received = tokio::time::timeout(Duration::from_millis(100), healthy.recv())
        .await
        .expect("topic b waited behind the blocked subscriber");
    assert_eq!(received.map(|m| m.payload().clone()), Some(Bytes::from("x")));
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(!stuck.is_closed());

    broadcaster.wait_published().await.unwrap();
    assert_eq!(
        stuck.close_reason(),
        Some(CloseReason::Backpressure(BackpressureError::BlockTimeout {
            timeout_ms: 800
        }))
    );
    assert!(!healthy.is_closed());
}

#[tokio::test]
async fn test_block_policy_waits_for_a_draining_reader() {
    let config = ChannelsConfig::default()
        .with_policy(BackpressurePolicy::Block)
        .with_queue_capacity(1)
        .with_block_timeout(Duration::from_secs(5));
    let broadcaster = Broadcaster::new(config);
    let subscriber = broadcaster.subscribe(["jobs"]).await.unwrap();

    let reader = tokio::spawn(async move {
        let mut seen = Vec::new();
        while seen.len() < 5 {
            match subscriber.recv().await {
                Some(message) => seen.push(message.sequence()),
                None => break,
            }
        }
        seen
    });

    for i in 0..5 {
        broadcaster.publish("jobs", format!("{i}")).await.unwrap();
    }
    broadcaster.wait_published().await.unwrap();

    assert_eq!(reader.await.unwrap(), vec![1, 2, 3, 4, 5]);
    assert_eq!(broadcaster.stats().disconnected, 0);
}

// ─── history ───

#[tokio::test]
async fn test_replay_then_live() {
    let broadcaster = Broadcaster::new(ChannelsConfig::default().with_history(5));
    for i in 1..=7 {
        broadcaster.publish("chat", format!("m{i}")).await.unwrap();
    }
    broadcaster.wait_published().await.unwrap();

    let history = tokio_test::assert_ok!(broadcaster.history("chat", None).await);
    assert_eq!(sequences(&history), vec![3, 4, 5, 6, 7]);
    let since = broadcaster.history("chat", Some(5)).await.unwrap();
    assert_eq!(sequences(&since), vec![6, 7]);

    let late = broadcaster
        .subscribe_with(["chat"], SubscribeOptions::new().with_history(3))
        .await
        .unwrap();
    broadcaster.publish("chat", "m8").await.unwrap();
    broadcaster.wait_published().await.unwrap();

    assert_eq!(sequences(&late.drain()), vec![5, 6, 7, 8]);
}

#[tokio::test]
async fn test_sequence_continues_from_backend() {
    let backend = Arc::new(MemoryBackend::new(10));
    backend.append(&Message::new("t", "old", 41)).await.unwrap();

    let broadcaster =
        Broadcaster::with_backend(ChannelsConfig::default().with_history(10), backend);
    let subscriber = broadcaster.subscribe(["t"]).await.unwrap();
    broadcaster.publish("t", "new").await.unwrap();
    broadcaster.wait_published().await.unwrap();

    assert_eq!(sequences(&subscriber.drain()), vec![42]);
}

struct BrokenBackend;

#[async_trait]
impl Backend for BrokenBackend {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn append(&self, _message: &Message) -> BackendResult<()> {
        Err(BackendError::Connection("store offline".into()))
    }

    async fn history(&self, _topic: &str, _since: Option<u64>) -> BackendResult<Vec<Message>> {
        Err(BackendError::Connection("store offline".into()))
    }

    async fn evict_if_over_capacity(&self, _topic: &str) -> BackendResult<usize> {
        Ok(0)
    }

    async fn last_sequence(&self, _topic: &str) -> BackendResult<u64> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_backend_failure_does_not_block_live_delivery() {
    let broadcaster =
        Broadcaster::with_backend(ChannelsConfig::default().with_history(10), Arc::new(BrokenBackend));
    let subscriber = broadcaster.subscribe(["alerts"]).await.unwrap();

    assert!(broadcaster.publish("alerts", "fire").await.is_ok());
    broadcaster.wait_published().await.unwrap();

    assert_eq!(payloads(&subscriber.drain()), vec![Bytes::from("fire")]);
    assert_eq!(broadcaster.stats().backend_failures, 1);
    assert!(matches!(
        broadcaster.history("alerts", None).await,
        Err(ChannelsError::Backend(_))
    ));
}

// ─── shutdown ───

#[tokio::test]
async fn test_shutdown_closes_subscribers_and_rejects_publishes() {
    let broadcaster = Broadcaster::new(ChannelsConfig::default());
    let subscriber = broadcaster.subscribe(["a"]).await.unwrap();
    broadcaster.publish("a", "last").await.unwrap();

    broadcaster.shutdown().await;
    assert!(broadcaster.is_shut_down());
    assert_eq!(subscriber.close_reason(), Some(CloseReason::Shutdown));
    assert_eq!(payloads(&subscriber.drain()), vec![Bytes::from("last")]);
    assert_eq!(subscriber.recv().await, None);

    assert_eq!(broadcaster.publish("a", "late").await, Err(ChannelsError::Closed));
    tokio_test::assert_err!(broadcaster.subscribe(["a"]).await);
    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_dropping_last_handle_closes_subscribers() {
    let broadcaster = Broadcaster::new(ChannelsConfig::default());
    let subscriber = broadcaster.subscribe(["a"]).await.unwrap();
    broadcaster.publish("a", "before drop").await.unwrap();
    drop(broadcaster);

    let first = tokio::time::timeout(Duration::from_secs(1), subscriber.recv())
        .await
        .expect("queued message was not delivered");
    assert_eq!(first.map(|m| m.payload().clone()), Some(Bytes::from("before drop")));

    let end = tokio::time::timeout(Duration::from_secs(1), subscriber.recv())
        .await
        .expect("subscriber hung after the broadcaster was dropped");
    assert_eq!(end, None);
    assert_eq!(subscriber.close_reason(), Some(CloseReason::Shutdown));
}
