//! Notification service.
//!
//! Notifications are written by the friendship triggers; this service only
//! reads them and flips their read flag.

use shelfmate_common::{AppError, AppResult, config::FriendsConfig};
use shelfmate_db::{entities::notification, repositories::NotificationRepository};

/// Notification service for business logic.
#[derive(Clone)]
pub struct NotificationService {
    notification_repo: NotificationRepository,
    max_page_size: u64,
}

impl NotificationService {
    /// Create a new notification service.
    #[must_use]
    pub const fn new(notification_repo: NotificationRepository, config: &FriendsConfig) -> Self {
        Self {
            notification_repo,
            max_page_size: config.max_page_size,
        }
    }

    /// Get notifications for a user, newest first.
    pub async fn list(
        &self,
        user_id: &str,
        limit: u64,
        until_id: Option<&str>,
        unread_only: bool,
    ) -> AppResult<Vec<notification::Model>> {
        let limit = limit.clamp(1, self.max_page_size);
        self.notification_repo
            .find_by_user(user_id, limit, until_id, unread_only)
            .await
    }

    /// Mark the given notifications as read. Returns how many changed.
    pub async fn mark_read(&self, user_id: &str, ids: &[String]) -> AppResult<u64> {
        if ids.len() as u64 > self.max_page_size {
            return Err(AppError::Validation(format!(
                "At most {} ids per request",
                self.max_page_size
            )));
        }
        self.notification_repo.mark_as_read(user_id, ids).await
    }

    /// Mark every notification of a user as read.
    pub async fn mark_all_read(&self, user_id: &str) -> AppResult<u64> {
        self.notification_repo.mark_all_as_read(user_id).await
    }

    /// Count unread notifications.
    pub async fn count_unread(&self, user_id: &str) -> AppResult<u64> {
        self.notification_repo.count_unread(user_id).await
    }
}
