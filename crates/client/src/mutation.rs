//! User actions and their optimistic effect on cached lists.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use shelfmate_common::{parse_relationship_id, relationship_id};

use crate::model::{PartitionKind, Relationship, RelationshipStatus};

/// A change the viewer asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Send a request to a user.
    Send {
        /// The user receiving the request.
        target_id: String,
    },
    /// Accept received requests.
    Accept {
        /// Relationship ids.
        ids: Vec<String>,
    },
    /// Reject received requests.
    Reject {
        /// Relationship ids.
        ids: Vec<String>,
    },
    /// Withdraw sent requests.
    Cancel {
        /// Relationship ids.
        ids: Vec<String>,
    },
    /// End a friendship.
    Remove {
        /// Relationship id.
        id: String,
    },
    /// Block a user, dropping any relationship with them.
    Block {
        /// The user being blocked.
        user_id: String,
    },
}

impl Mutation {
    /// Partitions of the viewer this mutation changes.
    #[must_use]
    pub fn touched_kinds(&self) -> &'static [PartitionKind] {
        match self {
            Self::Send { .. } | Self::Cancel { .. } => &[PartitionKind::Sent],
            Self::Accept { .. } => &[PartitionKind::Received, PartitionKind::Friends],
            Self::Reject { .. } => &[PartitionKind::Received],
            Self::Remove { .. } => &[PartitionKind::Friends],
            Self::Block { .. } => &PartitionKind::ALL,
        }
    }

    /// Users on the other side of the affected relationships. Two mutations
    /// naming the same counterpart may not be in flight together.
    #[must_use]
    pub fn counterparts(&self, viewer: &str) -> Vec<String> {
        match self {
            Self::Send { target_id } => vec![target_id.clone()],
            Self::Block { user_id } => vec![user_id.clone()],
            Self::Remove { id } => vec![counterpart(viewer, id)],
            Self::Accept { ids } | Self::Reject { ids } | Self::Cancel { ids } => {
                ids.iter().map(|id| counterpart(viewer, id)).collect()
            }
        }
    }

    /// Change applied to cached `mutual_friends_count` values once the
    /// mutation succeeds.
    #[must_use]
    pub const fn mutual_delta(&self) -> Option<i32> {
        match self {
            Self::Accept { .. } => Some(1),
            Self::Remove { .. } => Some(-1),
            _ => None,
        }
    }

    /// Keep only the relationship ids the server confirmed.
    pub fn narrow(&mut self, confirmed: &[String]) {
        if let Self::Accept { ids } | Self::Reject { ids } | Self::Cancel { ids } = self {
            ids.retain(|id| confirmed.contains(id));
        }
    }

    /// Apply the expected outcome to the viewer's lists before the server
    /// answers. `lists` holds every touched partition.
    pub fn apply_optimistic(
        &self,
        viewer: &str,
        lists: &mut BTreeMap<PartitionKind, Vec<Relationship>>,
        now: DateTime<FixedOffset>,
    ) {
        match self {
            Self::Send { target_id } => {
                let sent = lists.entry(PartitionKind::Sent).or_default();
                if !sent.iter().any(|doc| doc.friend_id == *target_id) {
                    sent.insert(0, placeholder(viewer, target_id, now));
                }
            }
            Self::Accept { ids } => {
                let moved = take_matching(lists.entry(PartitionKind::Received).or_default(), ids);
                let friends = lists.entry(PartitionKind::Friends).or_default();
                for mut doc in moved.into_iter().rev() {
                    doc.status = RelationshipStatus::Accepted;
                    doc.friendship_date = Some(now);
                    doc.updated_at = Some(now);
                    friends.insert(0, doc);
                }
            }
            Self::Reject { ids } => {
                take_matching(lists.entry(PartitionKind::Received).or_default(), ids);
            }
            Self::Cancel { ids } => {
                take_matching(lists.entry(PartitionKind::Sent).or_default(), ids);
            }
            Self::Remove { id } => {
                take_matching(
                    lists.entry(PartitionKind::Friends).or_default(),
                    std::slice::from_ref(id),
                );
            }
            Self::Block { user_id } => {
                for items in lists.values_mut() {
                    items.retain(|doc| doc.friend_id != *user_id);
                }
            }
        }
    }
}

/// The half of a relationship id that is not the viewer. Ids that do not parse
/// are their own key.
fn counterpart(viewer: &str, id: &str) -> String {
    match parse_relationship_id(id) {
        Some((owner, other)) if owner == viewer => other.to_string(),
        Some((owner, _)) => owner.to_string(),
        None => id.to_string(),
    }
}

/// Remove and return documents named by `ids`. Either id of a pair matches.
fn take_matching(items: &mut Vec<Relationship>, ids: &[String]) -> Vec<Relationship> {
    let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(items).into_iter().partition(|doc| {
        ids.iter()
            .any(|id| *id == doc.id || *id == relationship_id(&doc.friend_id, &doc.user_id))
    });
    *items = kept;
    taken
}

/// Stand-in for a just-sent request until the next fetch returns the real one.
fn placeholder(viewer: &str, target_id: &str, now: DateTime<FixedOffset>) -> Relationship {
    Relationship {
        id: relationship_id(viewer, target_id),
        user_id: viewer.to_string(),
        friend_id: target_id.to_string(),
        status: RelationshipStatus::Pending,
        requested_by: viewer.to_string(),
        friendship_date: None,
        friend_username: target_id.to_string(),
        friend_name: None,
        friend_avatar_url: None,
        friend_bio: None,
        mutual_friends_count: None,
        created_at: now,
        updated_at: None,
    }
}
