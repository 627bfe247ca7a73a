//! Cross-tab broadcast.
//!
//! Clients of the same user in one process tell each other about completed
//! mutations so their caches refetch without waiting for their own push.
//! Delivery is best effort; the real-time stream remains the authority.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::model::PartitionKind;

/// A sibling completed a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabMessage {
    /// Client instance that sent the message.
    pub origin: u64,
    /// The user's lists that may have changed.
    pub kinds: Vec<PartitionKind>,
}

/// In-process hub with one channel per user.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<TabMessage>>>>,
}

impl BroadcastHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, user_id: &str) -> broadcast::Sender<TabMessage> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }

    /// Listen for messages addressed to `user_id`.
    #[must_use]
    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<TabMessage> {
        self.sender(user_id).subscribe()
    }

    /// Fire and forget. Having no listener is not an error.
    pub fn publish(&self, user_id: &str, message: TabMessage) {
        let _ = self.sender(user_id).send(message);
    }
}
