//! Server-Sent Events (SSE) for real-time updates.
//!
//! Each connected user gets full snapshots of their relationship partitions,
//! first on connect and again whenever a partition changes, plus notification
//! events as they are created.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use shelfmate_common::AppResult;
use shelfmate_core::{EventPublisher, FriendshipService, StreamEvent};
use shelfmate_db::{entities::friendship, repositories::ListKind};
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::warn;

use crate::{extractors::AuthUser, middleware::AppState};

/// SSE event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SseEvent {
    /// Connection established.
    Connected,
    /// Full contents of one relationship partition.
    #[serde(rename_all = "camelCase")]
    Partition {
        kind: ListKind,
        items: Vec<friendship::Model>,
    },
    /// New notification.
    #[serde(rename_all = "camelCase")]
    Notification {
        id: String,
        notification_type: String,
        actor_id: String,
    },
}

/// Per-user broadcast channels for stream events.
#[derive(Clone, Default)]
pub struct SseBroadcaster {
    user_channels: Arc<RwLock<HashMap<String, broadcast::Sender<StreamEvent>>>>,
}

impl SseBroadcaster {
    /// Create a new SSE broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a user-specific channel.
    pub async fn user_channel(&self, user_id: &str) -> broadcast::Sender<StreamEvent> {
        let mut channels = self.user_channels.write().await;

        if let Some(sender) = channels.get(user_id)
            && sender.receiver_count() > 0
        {
            return sender.clone();
        }

        let (sender, _) = broadcast::channel(100);
        channels.insert(user_id.to_string(), sender.clone());
        sender
    }

    /// Deliver an event to the connections of the user it addresses.
    pub async fn broadcast_to_user(&self, event: StreamEvent) {
        let channels = self.user_channels.read().await;
        if let Some(sender) = channels.get(event.user_id()) {
            let _ = sender.send(event);
        }
    }

    /// Clean up inactive user channels.
    pub async fn cleanup(&self) {
        let mut channels = self.user_channels.write().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    /// Number of users with a channel.
    pub async fn channel_count(&self) -> usize {
        self.user_channels.read().await.len()
    }
}

/// Single-instance delivery, used when no Redis is configured.
#[async_trait]
impl EventPublisher for SseBroadcaster {
    async fn publish_friendships_changed(
        &self,
        user_id: &str,
        kinds: &[ListKind],
    ) -> AppResult<()> {
        self.broadcast_to_user(StreamEvent::FriendshipsChanged {
            user_id: user_id.to_string(),
            kinds: kinds.to_vec(),
        })
        .await;
        Ok(())
    }

    async fn publish_notification(
        &self,
        id: &str,
        user_id: &str,
        notification_type: &str,
        actor_id: &str,
    ) -> AppResult<()> {
        self.broadcast_to_user(StreamEvent::Notification {
            id: id.to_string(),
            user_id: user_id.to_string(),
            notification_type: notification_type.to_string(),
            actor_id: actor_id.to_string(),
        })
        .await;
        Ok(())
    }
}

fn encode(event: &SseEvent) -> Result<Event, Infallible> {
    Ok(Event::default()
        .json_data(event)
        .unwrap_or_else(|_| Event::default().data("error")))
}

/// Snapshot events for the given partitions. A partition that fails to load is
/// skipped; the next change resends it.
async fn partition_events(
    service: &FriendshipService,
    owner_id: &str,
    kinds: &[ListKind],
) -> Vec<Result<Event, Infallible>> {
    let mut events = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        match service.partition_snapshot(owner_id, kind).await {
            Ok(items) => events.push(encode(&SseEvent::Partition { kind, items })),
            Err(e) => warn!(error = %e, owner_id, ?kind, "Failed to load partition snapshot"),
        }
    }
    events
}

/// User-specific SSE stream.
async fn user_stream(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before loading the initial snapshots so no change falls between.
    let sender = state.sse_broadcaster.user_channel(&user.id).await;
    let rx = sender.subscribe();

    let service = state.friendship_service.clone();
    let owner_id = user.id;

    let connected = stream::once(async { encode(&SseEvent::Connected) });

    let initial = {
        let service = service.clone();
        let owner_id = owner_id.clone();
        stream::once(async move { partition_events(&service, &owner_id, &ListKind::ALL).await })
            .flat_map(stream::iter)
    };

    let updates = BroadcastStream::new(rx)
        .then(move |result| {
            let service = service.clone();
            let owner_id = owner_id.clone();
            async move {
                match result {
                    Ok(StreamEvent::FriendshipsChanged { kinds, .. }) => {
                        partition_events(&service, &owner_id, &kinds).await
                    }
                    Ok(StreamEvent::Notification {
                        id,
                        notification_type,
                        actor_id,
                        ..
                    }) => vec![encode(&SseEvent::Notification {
                        id,
                        notification_type,
                        actor_id,
                    })],
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        warn!(owner_id = %owner_id, skipped = n, "SSE stream lagged, resending partitions");
                        partition_events(&service, &owner_id, &ListKind::ALL).await
                    }
                }
            }
        })
        .flat_map(stream::iter);

    Sse::new(connected.chain(initial).chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}

/// Create SSE router.
pub fn router() -> Router<AppState> {
    Router::new().route("/user", get(user_stream))
}
