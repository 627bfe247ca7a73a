//! Redis integration tests.
//!
//! These tests require a running Redis instance.
//! Run with: `cargo test --test redis_integration -- --ignored`
//!
//! Set `REDIS_URL` environment variable to point to your Redis instance.
//! Default: <redis://localhost:6379>

use std::time::Duration;

use shelfmate_core::services::{EventPublisher, StreamEvent};
use shelfmate_db::repositories::ListKind;
use shelfmate_queue::RedisPubSub;

fn get_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Each test gets its own channel namespace.
fn prefix(test: &str) -> String {
    format!("shelfmate-test-{test}-{}", std::process::id())
}

/// Test that we can connect to Redis.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_connection() {
    let url = get_redis_url();
    let pubsub = RedisPubSub::new(&url, &prefix("connect")).await;
    assert!(pubsub.is_ok(), "Failed to connect to Redis: {:?}", pubsub.err());
}

/// Test pub/sub channel subscription.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_pubsub_subscribe_channels() {
    let url = get_redis_url();
    let pubsub = RedisPubSub::new(&url, &prefix("subscribe"))
        .await
        .expect("Failed to connect to Redis");

    let result = pubsub.start().await;
    assert!(result.is_ok(), "Failed to subscribe to channels: {:?}", result.err());

    pubsub.shutdown().await.expect("Failed to shutdown");
}

/// A partition change published by one instance reaches another.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_cross_instance_friendships_changed() {
    let url = get_redis_url();
    let prefix = prefix("cross");
    let pubsub1 = RedisPubSub::new(&url, &prefix)
        .await
        .expect("Failed to connect instance 1");
    let pubsub2 = RedisPubSub::new(&url, &prefix)
        .await
        .expect("Failed to connect instance 2");

    pubsub2.start().await.expect("Failed to start instance 2");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut rx2 = pubsub2.subscribe_local();

    pubsub1
        .publish_friendships_changed("alice", &[ListKind::Received, ListKind::Friends])
        .await
        .expect("Failed to publish from instance 1");

    let received = tokio::time::timeout(Duration::from_secs(2), rx2.recv())
        .await
        .expect("Timed out waiting for event")
        .expect("Channel closed");

    assert_eq!(
        received,
        StreamEvent::FriendshipsChanged {
            user_id: "alice".to_string(),
            kinds: vec![ListKind::Received, ListKind::Friends],
        }
    );

    pubsub1.shutdown().await.expect("Failed to shutdown instance 1");
    pubsub2.shutdown().await.expect("Failed to shutdown instance 2");
}

/// Test publishing a notification event.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_publish_notification() {
    let url = get_redis_url();
    let pubsub = RedisPubSub::new(&url, &prefix("notify"))
        .await
        .expect("Failed to connect to Redis");

    let result = pubsub
        .publish_notification("notif-123", "bob", "friendRequest", "alice")
        .await;

    assert!(result.is_ok(), "Failed to publish notification: {:?}", result.err());

    pubsub.shutdown().await.expect("Failed to shutdown");
}

/// Test local subscriber count.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_local_subscriber_count() {
    let url = get_redis_url();
    let pubsub = RedisPubSub::new(&url, &prefix("count"))
        .await
        .expect("Failed to connect to Redis");

    assert_eq!(pubsub.local_subscriber_count(), 0);

    let rx1 = pubsub.subscribe_local();
    let _rx2 = pubsub.subscribe_local();
    assert_eq!(pubsub.local_subscriber_count(), 2);

    drop(rx1);
    assert_eq!(pubsub.local_subscriber_count(), 1);

    pubsub.shutdown().await.expect("Failed to shutdown");
}
