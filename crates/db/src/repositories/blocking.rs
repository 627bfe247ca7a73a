//! Blocking repository.
//!
//! Read side only. Block records are written through
//! [`WriteBatch`](crate::batch::WriteBatch) so every write lands in the
//! change ledger.

use std::sync::Arc;

use crate::entities::{Blocking, blocking};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use shelfmate_common::{AppError, AppResult, relationship_id};

/// Blocking repository for database operations.
#[derive(Clone)]
pub struct BlockingRepository {
    db: Arc<DatabaseConnection>,
}

impl BlockingRepository {
    /// Create a new blocking repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a block record by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<blocking::Model>> {
        Blocking::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the block record `blocker_id` holds against `blocked_id`.
    pub async fn find_by_pair(
        &self,
        blocker_id: &str,
        blocked_id: &str,
    ) -> AppResult<Option<blocking::Model>> {
        self.find_by_id(&relationship_id(blocker_id, blocked_id))
            .await
    }

    /// Check if a user is blocking another user.
    pub async fn is_blocking(&self, blocker_id: &str, blocked_id: &str) -> AppResult<bool> {
        Ok(self.find_by_pair(blocker_id, blocked_id).await?.is_some())
    }

    /// Check if either user is blocking the other.
    pub async fn is_blocked_between(&self, user_a: &str, user_b: &str) -> AppResult<bool> {
        let found = Blocking::find()
            .filter(
                Condition::any()
                    .add(blocking::Column::Id.eq(relationship_id(user_a, user_b)))
                    .add(blocking::Column::Id.eq(relationship_id(user_b, user_a))),
            )
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(found.is_some())
    }

    /// Get users that a user is blocking (paginated).
    pub async fn find_blocking(
        &self,
        user_id: &str,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Vec<blocking::Model>> {
        let mut query = Blocking::find()
            .filter(blocking::Column::BlockerId.eq(user_id))
            .order_by_desc(blocking::Column::CreatedAt)
            .order_by_desc(blocking::Column::Id);

        if let Some(id) = until_id {
            query = query.filter(blocking::Column::Id.lt(id));
        }

        query
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
