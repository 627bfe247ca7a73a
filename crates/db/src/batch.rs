//! Atomic write batches.
//!
//! Every write to a relationship or block document goes through a
//! [`WriteBatch`]. A batch commits in one transaction and appends one change
//! ledger row per touched document, so trigger handlers observe exactly the
//! writes that committed. Trigger handlers additionally claim the ledger row
//! that woke them inside the same transaction; a second delivery of that row
//! finds the marker set and commits nothing.

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, SqlErr, TransactionTrait, sea_query::Expr,
};
use shelfmate_common::{AppError, AppResult, IdGenerator};

use crate::entities::{
    Blocking, ChangeEvent, Friendship, Notification, User, blocking,
    change_event::{self, ChangeKind, Collection},
    friendship, notification, user,
};

/// Denormalized counters on the user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProfileCounter {
    /// Accepted friendships.
    Friends,
    /// Pending requests received.
    PendingRequests,
    /// Pending requests sent.
    SentRequests,
}

impl ProfileCounter {
    const fn column(self) -> user::Column {
        match self {
            Self::Friends => user::Column::FriendsCount,
            Self::PendingRequests => user::Column::PendingRequestsCount,
            Self::SentRequests => user::Column::SentRequestsCount,
        }
    }
}

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Create a relationship document. Fails if it already exists.
    PutFriendship(friendship::Model),
    /// Replace a relationship document, provided its stored status still
    /// equals `before.status`.
    #[allow(missing_docs)]
    UpdateFriendship {
        before: friendship::Model,
        after: friendship::Model,
    },
    /// Delete a relationship document, provided its stored status still
    /// equals the given document's status.
    DeleteFriendship(friendship::Model),
    /// Create a block record. Fails if it already exists.
    PutBlocking(blocking::Model),
    /// Delete a block record.
    DeleteBlocking(blocking::Model),
    /// Atomically add `delta` to a profile counter. Deltas commute, so trigger
    /// rows may be applied in any order.
    #[allow(missing_docs)]
    AdjustCounter {
        user_id: String,
        counter: ProfileCounter,
        delta: i32,
    },
    /// Insert a notification.
    Notify(notification::Model),
}

/// Result of committing a batch.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum CommitOutcome {
    /// The batch committed; these ledger rows were appended.
    Applied(Vec<change_event::Model>),
    /// The claimed ledger row was already processed; nothing was written.
    AlreadyProcessed,
}

/// An ordered set of writes committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    claim: Option<String>,
}

impl WriteBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued operations, in commit order.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Ledger row claimed by this batch, if any.
    #[must_use]
    pub fn claimed_event(&self) -> Option<&str> {
        self.claim.as_deref()
    }

    /// Whether the batch has neither writes nor a claim.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.claim.is_none()
    }

    /// Queue creation of a relationship document.
    pub fn put_friendship(&mut self, doc: friendship::Model) -> &mut Self {
        self.ops.push(BatchOp::PutFriendship(doc));
        self
    }

    /// Queue a status-checked replacement of a relationship document.
    pub fn update_friendship(
        &mut self,
        before: friendship::Model,
        after: friendship::Model,
    ) -> &mut Self {
        self.ops.push(BatchOp::UpdateFriendship { before, after });
        self
    }

    /// Queue a status-checked deletion of a relationship document.
    pub fn delete_friendship(&mut self, doc: friendship::Model) -> &mut Self {
        self.ops.push(BatchOp::DeleteFriendship(doc));
        self
    }

    /// Queue creation of a block record.
    pub fn put_blocking(&mut self, block: blocking::Model) -> &mut Self {
        self.ops.push(BatchOp::PutBlocking(block));
        self
    }

    /// Queue deletion of a block record.
    pub fn delete_blocking(&mut self, block: blocking::Model) -> &mut Self {
        self.ops.push(BatchOp::DeleteBlocking(block));
        self
    }

    /// Queue a counter adjustment. Zero deltas are dropped.
    pub fn adjust_counter(
        &mut self,
        user_id: impl Into<String>,
        counter: ProfileCounter,
        delta: i32,
    ) -> &mut Self {
        if delta != 0 {
            self.ops.push(BatchOp::AdjustCounter {
                user_id: user_id.into(),
                counter,
                delta,
            });
        }
        self
    }

    /// Queue a notification.
    pub fn notify(&mut self, notification: notification::Model) -> &mut Self {
        self.ops.push(BatchOp::Notify(notification));
        self
    }

    /// Claim the processed-event marker of a ledger row.
    pub fn claim_event(&mut self, event_id: impl Into<String>) -> &mut Self {
        self.claim = Some(event_id.into());
        self
    }

    /// Commit every queued write in one transaction.
    ///
    /// Returns `Conflict` when a document is already present, gone, or no
    /// longer in the expected status; the whole batch is rolled back.
    pub async fn commit(self, db: &DatabaseConnection) -> AppResult<CommitOutcome> {
        let id_gen = IdGenerator::new();
        let now: DateTime<FixedOffset> = Utc::now().into();

        let txn = db.begin().await.map_err(db_err)?;

        if let Some(event_id) = &self.claim {
            let claimed = ChangeEvent::update_many()
                .col_expr(change_event::Column::ProcessedAt, Expr::value(now))
                .filter(change_event::Column::Id.eq(event_id.as_str()))
                .filter(change_event::Column::ProcessedAt.is_null())
                .exec(&txn)
                .await
                .map_err(db_err)?;

            if claimed.rows_affected == 0 {
                txn.rollback().await.map_err(db_err)?;
                tracing::debug!(event_id = %event_id, "Change event already processed");
                return Ok(CommitOutcome::AlreadyProcessed);
            }
        }

        let mut events = Vec::new();
        for op in self.ops {
            if let Some(event) = apply_op(&txn, op, now).await? {
                let event = change_event::Model {
                    id: id_gen.generate(),
                    ..event
                };
                ChangeEvent::insert(event_active(&event))
                    .exec_without_returning(&txn)
                    .await
                    .map_err(db_err)?;
                events.push(event);
            }
        }

        txn.commit().await.map_err(db_err)?;

        Ok(CommitOutcome::Applied(events))
    }
}

/// Apply one write; returns the ledger row it produces (without an id).
async fn apply_op<C: ConnectionTrait>(
    conn: &C,
    op: BatchOp,
    now: DateTime<FixedOffset>,
) -> AppResult<Option<change_event::Model>> {
    match op {
        BatchOp::PutFriendship(doc) => {
            Friendship::insert(friendship_active(&doc, true))
                .exec_without_returning(conn)
                .await
                .map_err(|e| conflict_on_duplicate(e, &doc.id))?;
            Ok(Some(ledger_row(
                Collection::Friendship,
                &doc.id,
                ChangeKind::Created,
                None,
                Some(serde_json::to_value(&doc)?),
                now,
            )))
        }
        BatchOp::UpdateFriendship { before, after } => {
            let result = Friendship::update_many()
                .set(friendship_active(&after, false))
                .filter(friendship::Column::Id.eq(before.id.as_str()))
                .filter(friendship::Column::Status.eq(before.status))
                .exec(conn)
                .await
                .map_err(db_err)?;
            if result.rows_affected == 0 {
                return Err(stale(&before.id));
            }
            Ok(Some(ledger_row(
                Collection::Friendship,
                &after.id,
                ChangeKind::Updated,
                Some(serde_json::to_value(&before)?),
                Some(serde_json::to_value(&after)?),
                now,
            )))
        }
        BatchOp::DeleteFriendship(doc) => {
            let result = Friendship::delete_many()
                .filter(friendship::Column::Id.eq(doc.id.as_str()))
                .filter(friendship::Column::Status.eq(doc.status))
                .exec(conn)
                .await
                .map_err(db_err)?;
            if result.rows_affected == 0 {
                return Err(stale(&doc.id));
            }
            Ok(Some(ledger_row(
                Collection::Friendship,
                &doc.id,
                ChangeKind::Deleted,
                Some(serde_json::to_value(&doc)?),
                None,
                now,
            )))
        }
        BatchOp::PutBlocking(block) => {
            Blocking::insert(blocking::ActiveModel {
                id: Set(block.id.clone()),
                blocker_id: Set(block.blocker_id.clone()),
                blocked_id: Set(block.blocked_id.clone()),
                created_at: Set(block.created_at),
            })
            .exec_without_returning(conn)
            .await
            .map_err(|e| conflict_on_duplicate(e, &block.id))?;
            Ok(Some(ledger_row(
                Collection::Blocking,
                &block.id,
                ChangeKind::Created,
                None,
                Some(serde_json::to_value(&block)?),
                now,
            )))
        }
        BatchOp::DeleteBlocking(block) => {
            let result = Blocking::delete_many()
                .filter(blocking::Column::Id.eq(block.id.as_str()))
                .exec(conn)
                .await
                .map_err(db_err)?;
            if result.rows_affected == 0 {
                return Err(stale(&block.id));
            }
            Ok(Some(ledger_row(
                Collection::Blocking,
                &block.id,
                ChangeKind::Deleted,
                Some(serde_json::to_value(&block)?),
                None,
                now,
            )))
        }
        BatchOp::AdjustCounter {
            user_id,
            counter,
            delta,
        } => {
            User::update_many()
                .col_expr(counter.column(), Expr::col(counter.column()).add(delta))
                .filter(user::Column::Id.eq(user_id))
                .exec(conn)
                .await
                .map_err(db_err)?;
            Ok(None)
        }
        BatchOp::Notify(n) => {
            Notification::insert(notification::ActiveModel {
                id: Set(n.id),
                user_id: Set(n.user_id),
                notification_type: Set(n.notification_type),
                actor_id: Set(n.actor_id),
                actor_name: Set(n.actor_name),
                actor_avatar_url: Set(n.actor_avatar_url),
                friendship_id: Set(n.friendship_id),
                is_read: Set(n.is_read),
                created_at: Set(n.created_at),
            })
            .exec_without_returning(conn)
            .await
            .map_err(db_err)?;
            Ok(None)
        }
    }
}

fn friendship_active(doc: &friendship::Model, with_key: bool) -> friendship::ActiveModel {
    let mut active = friendship::ActiveModel {
        user_id: Set(doc.user_id.clone()),
        friend_id: Set(doc.friend_id.clone()),
        status: Set(doc.status),
        requested_by: Set(doc.requested_by.clone()),
        friendship_date: Set(doc.friendship_date),
        friend_username: Set(doc.friend_username.clone()),
        friend_name: Set(doc.friend_name.clone()),
        friend_avatar_url: Set(doc.friend_avatar_url.clone()),
        friend_bio: Set(doc.friend_bio.clone()),
        mutual_friends_count: Set(doc.mutual_friends_count),
        created_at: Set(doc.created_at),
        updated_at: Set(doc.updated_at),
        ..Default::default()
    };
    if with_key {
        active.id = Set(doc.id.clone());
    }
    active
}

fn ledger_row(
    collection: Collection,
    document_id: &str,
    kind: ChangeKind,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
    now: DateTime<FixedOffset>,
) -> change_event::Model {
    change_event::Model {
        id: String::new(),
        collection,
        document_id: document_id.to_string(),
        kind,
        before,
        after,
        attempts: 0,
        last_error: None,
        processed_at: None,
        created_at: now,
    }
}

fn event_active(event: &change_event::Model) -> change_event::ActiveModel {
    change_event::ActiveModel {
        id: Set(event.id.clone()),
        collection: Set(event.collection),
        document_id: Set(event.document_id.clone()),
        kind: Set(event.kind),
        before: Set(event.before.clone()),
        after: Set(event.after.clone()),
        attempts: Set(event.attempts),
        last_error: Set(None),
        processed_at: Set(None),
        created_at: Set(event.created_at),
    }
}

fn db_err(e: DbErr) -> AppError {
    AppError::Database(e.to_string())
}

fn conflict_on_duplicate(e: DbErr, id: &str) -> AppError {
    match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            AppError::Conflict(format!("Document {id} already exists"))
        }
        _ => db_err(e),
    }
}

fn stale(id: &str) -> AppError {
    AppError::Conflict(format!("Document {id} changed or no longer exists"))
}
