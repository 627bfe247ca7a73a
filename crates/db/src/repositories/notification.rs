//! Notification repository.
//!
//! Notifications are created only by trigger handlers through
//! [`WriteBatch`](crate::batch::WriteBatch); this repository reads and marks
//! them.

use std::sync::Arc;

use crate::entities::{Notification, notification};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, UpdateResult,
};
use shelfmate_common::{AppError, AppResult};

/// Notification repository for database operations.
#[derive(Clone)]
pub struct NotificationRepository {
    db: Arc<DatabaseConnection>,
}

impl NotificationRepository {
    /// Create a new notification repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a notification by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<notification::Model>> {
        Notification::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get notifications for a user (paginated, newest first).
    pub async fn find_by_user(
        &self,
        user_id: &str,
        limit: u64,
        until_id: Option<&str>,
        unread_only: bool,
    ) -> AppResult<Vec<notification::Model>> {
        let mut query = Notification::find()
            .filter(notification::Column::UserId.eq(user_id))
            .order_by_desc(notification::Column::Id);

        if let Some(id) = until_id {
            query = query.filter(notification::Column::Id.lt(id));
        }

        if unread_only {
            query = query.filter(notification::Column::IsRead.eq(false));
        }

        query
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Mark the given notifications of `user_id` as read.
    ///
    /// Ids that belong to another user are ignored.
    pub async fn mark_as_read(&self, user_id: &str, ids: &[String]) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result: UpdateResult = Notification::update_many()
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::Id.is_in(ids.to_vec()))
            .filter(notification::Column::IsRead.eq(false))
            .col_expr(notification::Column::IsRead, true.into())
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }

    /// Mark all notifications as read for a user.
    pub async fn mark_all_as_read(&self, user_id: &str) -> AppResult<u64> {
        let result: UpdateResult = Notification::update_many()
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::IsRead.eq(false))
            .col_expr(notification::Column::IsRead, true.into())
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }

    /// Count unread notifications for a user.
    pub async fn count_unread(&self, user_id: &str) -> AppResult<u64> {
        Notification::find()
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::IsRead.eq(false))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::notification::NotificationType;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_notification(id: &str, user_id: &str) -> notification::Model {
        notification::Model {
            id: id.to_string(),
            user_id: user_id.to_string(),
            notification_type: NotificationType::FriendRequest,
            actor_id: "actor".to_string(),
            actor_name: "Actor".to_string(),
            actor_avatar_url: None,
            friendship_id: format!("{user_id}_actor"),
            is_read: false,
            created_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_find_by_user() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[
                    create_test_notification("n2", "user1"),
                    create_test_notification("n1", "user1"),
                ]])
                .into_connection(),
        );

        let repo = NotificationRepository::new(db);
        let result = repo.find_by_user("user1", 10, None, false).await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, "n2");
    }

    #[tokio::test]
    async fn test_mark_as_read() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 2,
                }])
                .into_connection(),
        );

        let repo = NotificationRepository::new(db);
        let updated = repo
            .mark_as_read("user1", &["n1".to_string(), "n2".to_string()])
            .await
            .unwrap();

        assert_eq!(updated, 2);
    }

    #[tokio::test]
    async fn test_mark_as_read_empty_is_noop() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let repo = NotificationRepository::new(db);
        assert_eq!(repo.mark_as_read("user1", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_count_unread() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[maplit::btreemap! {
                    "num_items" => sea_orm::Value::BigInt(Some(3))
                }]])
                .into_connection(),
        );

        let repo = NotificationRepository::new(db);
        assert_eq!(repo.count_unread("user1").await.unwrap(), 3);
    }
}
