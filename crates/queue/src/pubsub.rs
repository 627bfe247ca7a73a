//! Redis Pub/Sub for cross-instance event distribution.
//!
//! Trigger handlers may run on a different instance than the one holding a
//! user's real-time connection, so every [`StreamEvent`] goes through Redis
//! and each instance rebroadcasts what it receives to its local subscribers.

use std::sync::Arc;

use async_trait::async_trait;
use fred::clients::{Client, SubscriberClient};
use fred::error::{Error as RedisError, ErrorKind as RedisErrorKind};
use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use fred::types::config::Config as RedisConfig;
use shelfmate_common::{AppError, AppResult};
use shelfmate_core::services::{EventPublisher, StreamEvent};
use shelfmate_db::repositories::ListKind;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Pub/Sub channel names, relative to the configured prefix.
pub mod channels {
    /// Relationship partition changes.
    pub const FRIENDSHIPS: &str = "friendships";
    /// Notification events.
    pub const NOTIFICATIONS: &str = "notifications";
}

/// Channel an event is published on.
#[must_use]
pub const fn channel_for(event: &StreamEvent) -> &'static str {
    match event {
        StreamEvent::FriendshipsChanged { .. } => channels::FRIENDSHIPS,
        StreamEvent::Notification { .. } => channels::NOTIFICATIONS,
    }
}

/// Redis Pub/Sub manager for event distribution.
#[derive(Clone)]
pub struct RedisPubSub {
    publisher: Client,
    subscriber: SubscriberClient,
    prefix: String,
    /// Local broadcast channel for events received from Redis.
    local_tx: broadcast::Sender<StreamEvent>,
}

impl RedisPubSub {
    /// Create a new Redis Pub/Sub manager.
    ///
    /// `prefix` namespaces the channels so several deployments can share one
    /// Redis.
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self, RedisError> {
        let config = RedisConfig::from_url(redis_url)?;

        let publisher = Client::new(config.clone(), None, None, None);
        publisher.init().await?;

        let subscriber = SubscriberClient::new(config, None, None, None);
        subscriber.init().await?;

        let (local_tx, _) = broadcast::channel(1000);

        info!("Redis Pub/Sub initialized");

        Ok(Self {
            publisher,
            subscriber,
            prefix: prefix.to_string(),
            local_tx,
        })
    }

    fn channel(&self, name: &str) -> String {
        format!("{}:{name}", self.prefix)
    }

    /// Subscribe to the event channels and start the receive loop.
    pub async fn start(&self) -> Result<(), RedisError> {
        self.subscriber
            .subscribe(self.channel(channels::FRIENDSHIPS))
            .await?;
        self.subscriber
            .subscribe(self.channel(channels::NOTIFICATIONS))
            .await?;

        info!("Subscribed to Redis Pub/Sub channels");

        let local_tx = self.local_tx.clone();
        let mut message_stream = self.subscriber.message_rx();

        tokio::spawn(async move {
            while let Ok(message) = message_stream.recv().await {
                let Some(payload) = message.value.as_string() else {
                    continue;
                };
                match serde_json::from_str::<StreamEvent>(&payload) {
                    Ok(event) => {
                        debug!(?event, "Received Pub/Sub event");
                        // No receivers just means nobody is connected here.
                        let _ = local_tx.send(event);
                    }
                    Err(e) => {
                        warn!("Failed to parse Pub/Sub message: {}", e);
                    }
                }
            }
            info!("Pub/Sub message stream ended");
        });

        Ok(())
    }

    /// Publish an event on its channel.
    pub async fn publish(&self, event: &StreamEvent) -> Result<(), RedisError> {
        let payload = serde_json::to_string(event).map_err(|e| {
            RedisError::new(
                RedisErrorKind::InvalidArgument,
                format!("Serialization error: {e}"),
            )
        })?;
        let channel = self.channel(channel_for(event));
        let _: () = self.publisher.publish(channel.as_str(), payload).await?;
        debug!(channel = %channel, ?event, "Published Pub/Sub event");
        Ok(())
    }

    /// Get a receiver for local broadcast events.
    #[must_use]
    pub fn subscribe_local(&self) -> broadcast::Receiver<StreamEvent> {
        self.local_tx.subscribe()
    }

    /// Get the number of local subscribers.
    #[must_use]
    pub fn local_subscriber_count(&self) -> usize {
        self.local_tx.receiver_count()
    }

    /// Shutdown the Pub/Sub manager.
    pub async fn shutdown(&self) -> Result<(), RedisError> {
        self.subscriber.quit().await?;
        self.publisher.quit().await?;
        info!("Redis Pub/Sub shutdown");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RedisPubSub {
    async fn publish_friendships_changed(
        &self,
        user_id: &str,
        kinds: &[ListKind],
    ) -> AppResult<()> {
        let event = StreamEvent::FriendshipsChanged {
            user_id: user_id.to_string(),
            kinds: kinds.to_vec(),
        };
        self.publish(&event)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    }

    async fn publish_notification(
        &self,
        id: &str,
        user_id: &str,
        notification_type: &str,
        actor_id: &str,
    ) -> AppResult<()> {
        let event = StreamEvent::Notification {
            id: id.to_string(),
            user_id: user_id.to_string(),
            notification_type: notification_type.to_string(),
            actor_id: actor_id.to_string(),
        };
        self.publish(&event)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    }
}

/// Bridge between Redis Pub/Sub and the SSE broadcaster.
pub struct PubSubSseBridge {
    pubsub: Arc<RedisPubSub>,
}

impl PubSubSseBridge {
    /// Create a new bridge.
    #[must_use]
    pub const fn new(pubsub: Arc<RedisPubSub>) -> Self {
        Self { pubsub }
    }

    /// Start the bridge, forwarding every received event to `on_event`.
    pub fn start<F>(&self, on_event: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(StreamEvent) + Send + Sync + 'static,
    {
        forward(self.pubsub.subscribe_local(), on_event)
    }
}

fn forward<F>(
    mut rx: broadcast::Receiver<StreamEvent>,
    on_event: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(StreamEvent) + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => on_event(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Missed partition changes heal on the next one; clients refetch.
                    warn!("SSE bridge lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("SSE bridge channel closed");
                    break;
                }
            }
        }
    })
}
