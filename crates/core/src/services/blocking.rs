//! Blocking service.
//!
//! Writing a block record only queues the cascade; relationship documents
//! between the two users are removed by the trigger that observes it.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use shelfmate_common::{AppError, AppResult, relationship_id};
use shelfmate_db::{
    WriteBatch,
    entities::blocking,
    repositories::{BlockingRepository, UserRepository},
};

use crate::services::dispatcher::TriggerWaker;

/// Blocking service for business logic.
#[derive(Clone)]
pub struct BlockingService {
    db: Arc<DatabaseConnection>,
    blocking_repo: BlockingRepository,
    user_repo: UserRepository,
    max_page_size: u64,
    waker: Option<TriggerWaker>,
}

impl BlockingService {
    /// Create a new blocking service.
    #[must_use]
    pub const fn new(
        db: Arc<DatabaseConnection>,
        blocking_repo: BlockingRepository,
        user_repo: UserRepository,
        max_page_size: u64,
    ) -> Self {
        Self {
            db,
            blocking_repo,
            user_repo,
            max_page_size,
            waker: None,
        }
    }

    /// Set the waker signalled after every commit.
    pub fn set_trigger_waker(&mut self, waker: TriggerWaker) {
        self.waker = Some(waker);
    }

    /// Block a user.
    pub async fn block(&self, blocker_id: &str, blocked_id: &str) -> AppResult<blocking::Model> {
        if blocked_id.is_empty() {
            return Err(AppError::Validation("userId is required".to_string()));
        }
        if blocker_id == blocked_id {
            return Err(AppError::BadRequest("Cannot block yourself".to_string()));
        }

        self.user_repo.get_by_id(blocked_id).await?;

        if self.blocking_repo.is_blocking(blocker_id, blocked_id).await? {
            return Err(AppError::Conflict("Already blocking this user".to_string()));
        }

        let block = blocking::Model {
            id: relationship_id(blocker_id, blocked_id),
            blocker_id: blocker_id.to_string(),
            blocked_id: blocked_id.to_string(),
            created_at: Utc::now().into(),
        };

        let mut batch = WriteBatch::new();
        batch.put_blocking(block.clone());
        self.commit(batch).await?;

        tracing::debug!(blocker = %blocker_id, blocked = %blocked_id, "User blocked");
        Ok(block)
    }

    /// Unblock a user. Relationships removed by the block are not restored.
    pub async fn unblock(&self, blocker_id: &str, blocked_id: &str) -> AppResult<()> {
        let block = self
            .blocking_repo
            .find_by_pair(blocker_id, blocked_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Not blocking this user".to_string()))?;

        let mut batch = WriteBatch::new();
        batch.delete_blocking(block);
        self.commit(batch).await?;

        tracing::debug!(blocker = %blocker_id, blocked = %blocked_id, "User unblocked");
        Ok(())
    }

    /// Users the caller is blocking (paginated).
    pub async fn list(
        &self,
        blocker_id: &str,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Vec<blocking::Model>> {
        let limit = limit.clamp(1, self.max_page_size);
        self.blocking_repo
            .find_blocking(blocker_id, limit, until_id)
            .await
    }

    /// Whether either user blocks the other.
    pub async fn is_blocked_between(&self, user_a: &str, user_b: &str) -> AppResult<bool> {
        self.blocking_repo.is_blocked_between(user_a, user_b).await
    }

    async fn commit(&self, batch: WriteBatch) -> AppResult<()> {
        let _ = batch.commit(self.db.as_ref()).await?;
        if let Some(ref waker) = self.waker {
            waker.wake();
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use shelfmate_db::{entities::user, test_utils::user_fixture};

    fn service(db: MockDatabase) -> BlockingService {
        let db = Arc::new(db.into_connection());
        BlockingService::new(
            db.clone(),
            BlockingRepository::new(db.clone()),
            UserRepository::new(db),
            100,
        )
    }

    fn exec() -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }
    }

    #[tokio::test]
    async fn test_cannot_block_self() {
        let service = service(MockDatabase::new(DatabaseBackend::Postgres));
        let result = service.block("alice", "alice").await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_block_unknown_user() {
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<user::Model>::new()]),
        );
        let result = service.block("alice", "ghost").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_block_twice_is_conflict() {
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[user_fixture("bob", "bob")]])
                .append_query_results([[blocking::Model {
                    id: "alice_bob".to_string(),
                    blocker_id: "alice".to_string(),
                    blocked_id: "bob".to_string(),
                    created_at: Utc::now().into(),
                }]]),
        );
        let result = service.block("alice", "bob").await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_block_writes_ledgered_record_and_wakes() {
        let mut service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[user_fixture("bob", "bob")]])
                .append_query_results([Vec::<blocking::Model>::new()])
                .append_exec_results([exec(), exec()]),
        );
        let waker = TriggerWaker::new();
        service.set_trigger_waker(waker.clone());

        let block = service.block("alice", "bob").await.unwrap();
        assert_eq!(block.id, "alice_bob");

        // The permit stored by wake() resolves immediately.
        waker.notified().await;
    }

    #[tokio::test]
    async fn test_unblock_when_not_blocking() {
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<blocking::Model>::new()]),
        );
        let result = service.unblock("alice", "bob").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
