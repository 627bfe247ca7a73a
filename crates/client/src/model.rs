//! Wire types shared with the server.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Relationship status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipStatus {
    /// Request sent, not yet answered.
    Pending,
    /// Both users are friends.
    Accepted,
}

/// One user's document of a relationship, as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    /// Composite id, owner first.
    pub id: String,
    /// Owner of the document.
    pub user_id: String,
    /// The counterpart.
    pub friend_id: String,
    /// Current status.
    pub status: RelationshipStatus,
    /// Initiator of the request.
    pub requested_by: String,
    /// When the request was accepted.
    pub friendship_date: Option<DateTime<FixedOffset>>,
    /// Counterpart username.
    pub friend_username: String,
    /// Counterpart display name.
    pub friend_name: Option<String>,
    /// Counterpart avatar.
    pub friend_avatar_url: Option<String>,
    /// Counterpart bio.
    pub friend_bio: Option<String>,
    /// Friends the owner and the counterpart share, when known.
    pub mutual_friends_count: Option<i32>,
    /// Creation time.
    pub created_at: DateTime<FixedOffset>,
    /// Last update time.
    pub updated_at: Option<DateTime<FixedOffset>>,
}

impl Relationship {
    /// Whether the owner initiated the request.
    #[must_use]
    pub fn is_outgoing(&self) -> bool {
        self.requested_by == self.user_id
    }

    /// Name shown in lists: display name, falling back to the username.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.friend_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.friend_username)
    }
}

/// The three relationship lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PartitionKind {
    /// Accepted relationships.
    Friends,
    /// Requests received.
    Received,
    /// Requests sent.
    Sent,
}

impl PartitionKind {
    /// All kinds, in display order.
    pub const ALL: [Self; 3] = [Self::Friends, Self::Received, Self::Sent];

    /// Which list a document belongs to.
    #[must_use]
    pub fn of(doc: &Relationship) -> Self {
        match doc.status {
            RelationshipStatus::Accepted => Self::Friends,
            RelationshipStatus::Pending if doc.is_outgoing() => Self::Sent,
            RelationshipStatus::Pending => Self::Received,
        }
    }
}

/// Identifies one cached list: whose documents, and which partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    /// Owner of the documents in the list.
    pub owner: String,
    /// Partition.
    pub kind: PartitionKind,
}

impl PartitionKey {
    /// Create a key.
    #[must_use]
    pub fn new(owner: impl Into<String>, kind: PartitionKind) -> Self {
        Self {
            owner: owner.into(),
            kind,
        }
    }
}

/// Sort order applied to a cached list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Most recently created first.
    #[default]
    Newest,
    /// Oldest first.
    Oldest,
    /// Alphabetical by display name.
    Name,
}

/// Search and sort settings for one list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewOptions {
    /// Case-insensitive substring matched against username and display name.
    pub search: String,
    /// Sort order.
    pub sort: SortOrder,
}

impl ViewOptions {
    /// Filter and sort `items` without touching the network.
    #[must_use]
    pub fn apply(&self, items: &[Relationship]) -> Vec<Relationship> {
        let needle = self.search.trim().to_lowercase();
        let mut out: Vec<Relationship> = items
            .iter()
            .filter(|doc| {
                needle.is_empty()
                    || doc.friend_username.to_lowercase().contains(&needle)
                    || doc
                        .friend_name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();

        match self.sort {
            SortOrder::Newest => out.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortOrder::Oldest => out.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            SortOrder::Name => out.sort_by_cached_key(|doc| doc.display_name().to_lowercase()),
        }
        out
    }
}

/// One page of a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Cursor for the next page; absent on the last page.
    pub next_cursor: Option<String>,
}

/// Per-id failure of a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    /// Relationship id.
    pub id: String,
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
}

/// Result of a bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    /// Ids that were applied.
    pub succeeded: Vec<String>,
    /// Ids that failed, with the reason.
    pub failed: Vec<BulkFailure>,
}

/// Event received on the real-time stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PushEvent {
    /// Stream opened.
    Connected,
    /// Full snapshot of one of the viewer's lists.
    #[serde(rename_all = "camelCase")]
    Partition {
        /// Which list.
        kind: PartitionKind,
        /// Every document currently in it.
        items: Vec<Relationship>,
    },
    /// A notification was created for the viewer.
    #[serde(rename_all = "camelCase")]
    Notification {
        /// Notification id.
        id: String,
        /// `friendRequest` or `friendAccepted`.
        notification_type: String,
        /// The other user.
        actor_id: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    /// A document owned by `owner` about `friend`, created `minute` minutes
    /// after a fixed epoch.
    pub fn doc(owner: &str, friend: &str, kind: PartitionKind, minute: u32) -> Relationship {
        let created_at = chrono::Utc
            .with_ymd_and_hms(2024, 1, 1, 0, minute, 0)
            .unwrap()
            .fixed_offset();
        let (status, requested_by) = match kind {
            PartitionKind::Friends => (RelationshipStatus::Accepted, friend),
            PartitionKind::Received => (RelationshipStatus::Pending, friend),
            PartitionKind::Sent => (RelationshipStatus::Pending, owner),
        };
        Relationship {
            id: shelfmate_common::relationship_id(owner, friend),
            user_id: owner.to_string(),
            friend_id: friend.to_string(),
            status,
            requested_by: requested_by.to_string(),
            friendship_date: (status == RelationshipStatus::Accepted).then_some(created_at),
            friend_username: friend.to_string(),
            friend_name: None,
            friend_avatar_url: None,
            friend_bio: None,
            mutual_friends_count: None,
            created_at,
            updated_at: None,
        }
    }
}
