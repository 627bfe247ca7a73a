//! Blocking cascade.
//!
//! When a block record is created, every relationship document between the
//! two parties is deleted in one batch, whatever its status or direction.
//! Counters are not touched here: each cascaded delete appends its own
//! ledger row, and the delete trigger corrects the owner's counter.

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use serde::Deserialize;
use shelfmate_common::AppResult;
use shelfmate_db::{
    CommitOutcome, WriteBatch,
    entities::{change_event, friendship},
    repositories::FriendshipRepository,
};

use crate::services::triggers::TriggerOutcome;

/// The fields of a block record the cascade needs.
///
/// Decoded leniently so a malformed record is logged instead of failing
/// delivery forever.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BlockParties {
    #[serde(default)]
    pub blocker_id: Option<String>,
    #[serde(default)]
    pub blocked_id: Option<String>,
}

impl BlockParties {
    /// Both parties, when present and non-empty.
    #[must_use]
    pub fn pair(&self) -> Option<(&str, &str)> {
        let blocker = self.blocker_id.as_deref().filter(|s| !s.is_empty())?;
        let blocked = self.blocked_id.as_deref().filter(|s| !s.is_empty())?;
        Some((blocker, blocked))
    }
}

/// Queue deletion of every document linking `blocker` and `blocked`.
///
/// Documents that do not link the two parties are ignored.
pub fn plan_block_cascade(
    batch: &mut WriteBatch,
    blocker: &str,
    blocked: &str,
    docs: Vec<friendship::Model>,
) -> usize {
    let mut queued = 0;
    for doc in docs {
        let links = (doc.user_id == blocker && doc.friend_id == blocked)
            || (doc.user_id == blocked && doc.friend_id == blocker);
        if links {
            batch.delete_friendship(doc);
            queued += 1;
        }
    }
    queued
}

/// Executes the blocking cascade.
#[derive(Clone)]
pub struct BlockCascadeService {
    db: Arc<DatabaseConnection>,
    friendship_repo: FriendshipRepository,
}

impl BlockCascadeService {
    /// Create a new cascade service.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>, friendship_repo: FriendshipRepository) -> Self {
        Self {
            db,
            friendship_repo,
        }
    }

    /// Run the cascade for a block-record creation ledger row.
    pub async fn handle(&self, event: &change_event::Model) -> AppResult<TriggerOutcome> {
        let parties: BlockParties = event
            .after
            .clone()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        let mut batch = WriteBatch::new();
        batch.claim_event(event.id.clone());

        let deleted = match parties.pair() {
            Some((blocker, blocked)) => {
                let docs = self.friendship_repo.find_between(blocker, blocked).await?;
                plan_block_cascade(&mut batch, blocker, blocked, docs)
            }
            None => {
                tracing::warn!(
                    event_id = %event.id,
                    document_id = %event.document_id,
                    "Block record without blocker or blocked; skipping cascade"
                );
                0
            }
        };

        match batch.commit(self.db.as_ref()).await? {
            CommitOutcome::AlreadyProcessed => Ok(TriggerOutcome::AlreadyProcessed),
            CommitOutcome::Applied(_) => {
                if deleted > 0 {
                    tracing::info!(
                        block_id = %event.document_id,
                        deleted,
                        "Removed relationship documents after block"
                    );
                }
                Ok(TriggerOutcome::Applied)
            }
        }
    }
}
