//! Change ledger repository.

use std::sync::Arc;

use crate::entities::{ChangeEvent, change_event};
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DeleteResult, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, sea_query::Expr,
};
use shelfmate_common::{AppError, AppResult};

/// Longest error text kept on a ledger row.
const MAX_ERROR_LEN: usize = 1024;

/// Change ledger repository for database operations.
#[derive(Clone)]
pub struct ChangeEventRepository {
    db: Arc<DatabaseConnection>,
}

impl ChangeEventRepository {
    /// Create a new change ledger repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a ledger row by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<change_event::Model>> {
        ChangeEvent::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Oldest unprocessed rows that still have delivery attempts left.
    pub async fn find_pending(
        &self,
        limit: u64,
        max_attempts: i32,
    ) -> AppResult<Vec<change_event::Model>> {
        ChangeEvent::find()
            .filter(change_event::Column::ProcessedAt.is_null())
            .filter(change_event::Column::Attempts.lt(max_attempts))
            .order_by_asc(change_event::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count unprocessed rows.
    pub async fn count_pending(&self) -> AppResult<u64> {
        ChangeEvent::find()
            .filter(change_event::Column::ProcessedAt.is_null())
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Record a failed delivery attempt.
    pub async fn record_failure(&self, id: &str, error: &str) -> AppResult<()> {
        let error: String = error.chars().take(MAX_ERROR_LEN).collect();

        ChangeEvent::update_many()
            .col_expr(
                change_event::Column::Attempts,
                Expr::col(change_event::Column::Attempts).add(1),
            )
            .col_expr(change_event::Column::LastError, Expr::value(error))
            .filter(change_event::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Mark a row processed without running any handler.
    ///
    /// Used for rows no handler is interested in.
    pub async fn mark_processed(&self, id: &str) -> AppResult<bool> {
        let now: DateTime<FixedOffset> = Utc::now().into();
        let result = ChangeEvent::update_many()
            .col_expr(change_event::Column::ProcessedAt, Expr::value(now))
            .filter(change_event::Column::Id.eq(id))
            .filter(change_event::Column::ProcessedAt.is_null())
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected > 0)
    }

    /// Delete processed rows older than `before`.
    pub async fn prune_processed(&self, before: DateTime<FixedOffset>) -> AppResult<u64> {
        let result: DeleteResult = ChangeEvent::delete_many()
            .filter(change_event::Column::ProcessedAt.is_not_null())
            .filter(change_event::Column::ProcessedAt.lt(before))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }
}
