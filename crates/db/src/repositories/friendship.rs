//! Friendship repository.
//!
//! Status transitions are written through [`WriteBatch`](crate::batch::WriteBatch).
//! This repository covers reads and the two unledgered writes: refreshing the
//! denormalized profile snapshot and caching mutual-friend counts. Neither is
//! observed by a trigger.

use std::sync::Arc;

use crate::entities::{
    Blocking, Friendship, blocking,
    friendship::{self, FriendshipStatus},
    user,
};
use chrono::Utc;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, UpdateResult,
    sea_query::{Expr, Query},
};
use serde::{Deserialize, Serialize};
use shelfmate_common::{AppError, AppResult};

/// The three list partitions a user's relationship documents fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListKind {
    /// Accepted relationships.
    Friends,
    /// Pending requests someone else sent to the owner.
    Received,
    /// Pending requests the owner sent.
    Sent,
}

impl ListKind {
    /// All partitions, in display order.
    pub const ALL: [Self; 3] = [Self::Friends, Self::Received, Self::Sent];

    /// Which partition a document belongs to.
    #[must_use]
    pub fn of(doc: &friendship::Model) -> Self {
        match doc.status {
            FriendshipStatus::Accepted => Self::Friends,
            FriendshipStatus::Pending if doc.is_outgoing() => Self::Sent,
            FriendshipStatus::Pending => Self::Received,
        }
    }

    fn condition(self, owner_id: &str) -> Condition {
        let base = Condition::all().add(friendship::Column::UserId.eq(owner_id));
        match self {
            Self::Friends => base.add(friendship::Column::Status.eq(FriendshipStatus::Accepted)),
            Self::Received => base
                .add(friendship::Column::Status.eq(FriendshipStatus::Pending))
                .add(friendship::Column::RequestedBy.ne(owner_id)),
            Self::Sent => base
                .add(friendship::Column::Status.eq(FriendshipStatus::Pending))
                .add(friendship::Column::RequestedBy.eq(owner_id)),
        }
    }
}

/// Excludes counterparts that `owner_id` blocks or is blocked by.
fn not_blocked_with(owner_id: &str) -> Condition {
    Condition::all()
        .add(
            friendship::Column::FriendId.not_in_subquery(
                Query::select()
                    .column(blocking::Column::BlockedId)
                    .from(Blocking)
                    .and_where(blocking::Column::BlockerId.eq(owner_id))
                    .to_owned(),
            ),
        )
        .add(
            friendship::Column::FriendId.not_in_subquery(
                Query::select()
                    .column(blocking::Column::BlockerId)
                    .from(Blocking)
                    .and_where(blocking::Column::BlockedId.eq(owner_id))
                    .to_owned(),
            ),
        )
}

/// Friendship repository for database operations.
#[derive(Clone)]
pub struct FriendshipRepository {
    db: Arc<DatabaseConnection>,
}

impl FriendshipRepository {
    /// Create a new friendship repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a relationship document by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<friendship::Model>> {
        Friendship::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find every document linking two users, in either direction.
    pub async fn find_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> AppResult<Vec<friendship::Model>> {
        Friendship::find()
            .filter(
                Condition::any()
                    .add(
                        Condition::all()
                            .add(friendship::Column::UserId.eq(user_a))
                            .add(friendship::Column::FriendId.eq(user_b)),
                    )
                    .add(
                        Condition::all()
                            .add(friendship::Column::UserId.eq(user_b))
                            .add(friendship::Column::FriendId.eq(user_a)),
                    ),
            )
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// List one partition of `owner_id`'s documents, ordered by document key
    /// descending. Within one owner that is the counterpart's id, so `until_id`
    /// is the key of the last document on the previous page. Callers sort for
    /// display.
    ///
    /// Counterparts involved in a block with the owner are excluded.
    pub async fn find_by_kind(
        &self,
        owner_id: &str,
        kind: ListKind,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Vec<friendship::Model>> {
        let mut query = Friendship::find()
            .filter(kind.condition(owner_id))
            .filter(not_blocked_with(owner_id))
            .order_by_desc(friendship::Column::Id);

        if let Some(id) = until_id {
            query = query.filter(friendship::Column::Id.lt(id));
        }

        query
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count accepted friends two users have in common.
    pub async fn count_mutual(&self, user_a: &str, user_b: &str) -> AppResult<u64> {
        Friendship::find()
            .filter(friendship::Column::UserId.eq(user_a))
            .filter(friendship::Column::Status.eq(FriendshipStatus::Accepted))
            .filter(
                friendship::Column::FriendId.in_subquery(
                    Query::select()
                        .column(friendship::Column::FriendId)
                        .from(Friendship)
                        .and_where(friendship::Column::UserId.eq(user_b))
                        .and_where(friendship::Column::Status.eq(FriendshipStatus::Accepted))
                        .to_owned(),
                ),
            )
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Store a computed mutual-friend count on a document.
    pub async fn cache_mutual_friends_count(&self, id: &str, count: i32) -> AppResult<()> {
        Friendship::update_many()
            .col_expr(friendship::Column::MutualFriendsCount, Expr::value(count))
            .filter(friendship::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Rewrite the `friend_*` snapshot on every document whose counterpart is `user`.
    pub async fn refresh_friend_snapshot(&self, user: &user::Model) -> AppResult<u64> {
        let result: UpdateResult = Friendship::update_many()
            .col_expr(
                friendship::Column::FriendUsername,
                Expr::value(user.username.clone()),
            )
            .col_expr(friendship::Column::FriendName, Expr::value(user.name.clone()))
            .col_expr(
                friendship::Column::FriendAvatarUrl,
                Expr::value(user.avatar_url.clone()),
            )
            .col_expr(friendship::Column::FriendBio, Expr::value(user.bio.clone()))
            .col_expr(
                friendship::Column::UpdatedAt,
                Expr::value(chrono::DateTime::<chrono::FixedOffset>::from(Utc::now())),
            )
            .filter(friendship::Column::FriendId.eq(&user.id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }
}
