//! Event publisher service.
//!
//! Provides an abstraction for publishing real-time events.
//! The actual implementation is provided by the queue crate (Redis Pub/Sub).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shelfmate_common::AppResult;
use shelfmate_db::repositories::ListKind;
use std::sync::Arc;

/// Event types for real-time updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamEvent {
    /// Relationship documents owned by `user_id` changed.
    #[serde(rename_all = "camelCase")]
    FriendshipsChanged {
        user_id: String,
        /// Partitions whose contents changed.
        kinds: Vec<ListKind>,
    },
    /// A new notification was created.
    #[serde(rename_all = "camelCase")]
    Notification {
        id: String,
        user_id: String,
        notification_type: String,
        actor_id: String,
    },
}

impl StreamEvent {
    /// The user this event is delivered to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            Self::FriendshipsChanged { user_id, .. } | Self::Notification { user_id, .. } => {
                user_id
            }
        }
    }
}

/// Trait for publishing real-time events.
///
/// This allows the core services to publish events
/// without directly depending on the queue/pubsub implementation.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a change to one or more of a user's relationship partitions.
    async fn publish_friendships_changed(&self, user_id: &str, kinds: &[ListKind])
    -> AppResult<()>;

    /// Publish a notification event.
    async fn publish_notification(
        &self,
        id: &str,
        user_id: &str,
        notification_type: &str,
        actor_id: &str,
    ) -> AppResult<()>;
}

/// A no-op implementation of `EventPublisher` for testing or when real-time events are disabled.
#[derive(Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish_friendships_changed(
        &self,
        _user_id: &str,
        _kinds: &[ListKind],
    ) -> AppResult<()> {
        Ok(())
    }

    async fn publish_notification(
        &self,
        _id: &str,
        _user_id: &str,
        _notification_type: &str,
        _actor_id: &str,
    ) -> AppResult<()> {
        Ok(())
    }
}

/// Wrapper for boxed `EventPublisher` trait object.
pub type EventPublisherService = Arc<dyn EventPublisher>;
