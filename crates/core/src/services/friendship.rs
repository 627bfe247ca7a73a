//! Friendship service.
//!
//! Client-facing mutations on relationship documents. Every mutation writes
//! both sibling documents in one [`WriteBatch`]; counters and notifications are
//! left to the triggers that observe the resulting ledger rows.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use shelfmate_common::{
    AppError, AppResult, config::FriendsConfig, parse_relationship_id, relationship_id,
};
use shelfmate_db::{
    WriteBatch,
    entities::{
        friendship::{self, FriendshipStatus},
        user,
    },
    repositories::{BlockingRepository, FriendshipRepository, ListKind, UserRepository},
};

use crate::services::dispatcher::TriggerWaker;

/// One page of a list plus the cursor for the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Pass as `untilId` to fetch the next page; absent on the last page.
    pub next_cursor: Option<String>,
}

/// Per-id failure of a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    pub id: String,
    pub code: String,
    pub message: String,
}

/// Result of a bulk operation. Each id succeeds or fails on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

/// The caller's document and its sibling.
#[derive(Debug, Clone)]
struct Pair {
    mine: friendship::Model,
    theirs: friendship::Model,
}

/// Build the two pending documents for a new request; the requester's first.
#[must_use]
pub fn plan_send(
    requester: &user::Model,
    target: &user::Model,
    now: DateTime<FixedOffset>,
) -> (friendship::Model, friendship::Model) {
    (
        snapshot_doc(&requester.id, target, &requester.id, now),
        snapshot_doc(&target.id, requester, &requester.id, now),
    )
}

/// Build the accepted images of both documents; `before` is kept for the
/// status check.
#[must_use]
pub fn plan_accept(
    mine: &friendship::Model,
    theirs: &friendship::Model,
    now: DateTime<FixedOffset>,
) -> [(friendship::Model, friendship::Model); 2] {
    let accept = |doc: &friendship::Model| friendship::Model {
        status: FriendshipStatus::Accepted,
        friendship_date: Some(now),
        updated_at: Some(now),
        ..doc.clone()
    };
    [
        (mine.clone(), accept(mine)),
        (theirs.clone(), accept(theirs)),
    ]
}

fn snapshot_doc(
    owner_id: &str,
    other: &user::Model,
    requested_by: &str,
    now: DateTime<FixedOffset>,
) -> friendship::Model {
    friendship::Model {
        id: relationship_id(owner_id, &other.id),
        user_id: owner_id.to_string(),
        friend_id: other.id.clone(),
        status: FriendshipStatus::Pending,
        requested_by: requested_by.to_string(),
        friendship_date: None,
        friend_username: other.username.clone(),
        friend_name: other.name.clone(),
        friend_avatar_url: other.avatar_url.clone(),
        friend_bio: other.bio.clone(),
        mutual_friends_count: None,
        created_at: now,
        updated_at: None,
    }
}

/// Friendship service for business logic.
#[derive(Clone)]
pub struct FriendshipService {
    db: Arc<DatabaseConnection>,
    friendship_repo: FriendshipRepository,
    user_repo: UserRepository,
    blocking_repo: BlockingRepository,
    config: FriendsConfig,
    waker: Option<TriggerWaker>,
}

impl FriendshipService {
    /// Create a new friendship service.
    #[must_use]
    pub fn new(
        db: Arc<DatabaseConnection>,
        friendship_repo: FriendshipRepository,
        user_repo: UserRepository,
        blocking_repo: BlockingRepository,
        config: FriendsConfig,
    ) -> Self {
        Self {
            db,
            friendship_repo,
            user_repo,
            blocking_repo,
            config,
            waker: None,
        }
    }

    /// Set the waker signalled after every commit.
    pub fn set_trigger_waker(&mut self, waker: TriggerWaker) {
        self.waker = Some(waker);
    }

    /// Send a friend request. Returns the caller's new document.
    pub async fn send_request(
        &self,
        caller: &user::Model,
        target_id: &str,
    ) -> AppResult<friendship::Model> {
        if target_id.is_empty() {
            return Err(AppError::Validation("targetId is required".to_string()));
        }
        if target_id == caller.id {
            return Err(AppError::BadRequest(
                "Cannot send a friend request to yourself".to_string(),
            ));
        }

        let target = self
            .user_repo
            .find_by_id(target_id)
            .await?
            .ok_or_else(AppError::not_permitted)?;
        if self
            .blocking_repo
            .is_blocked_between(&caller.id, target_id)
            .await?
        {
            return Err(AppError::not_permitted());
        }

        if !self
            .friendship_repo
            .find_between(&caller.id, target_id)
            .await?
            .is_empty()
        {
            return Err(AppError::Conflict("Relationship already exists".to_string()));
        }

        let (mine, theirs) = plan_send(caller, &target, Utc::now().into());
        let mut batch = WriteBatch::new();
        batch.put_friendship(mine.clone()).put_friendship(theirs);
        self.commit(batch).await?;

        tracing::debug!(requester = %caller.id, target = %target_id, "Friend request sent");
        Ok(mine)
    }

    /// Accept a request the caller received. Returns the caller's document.
    pub async fn accept_request(
        &self,
        caller_id: &str,
        id: &str,
    ) -> AppResult<friendship::Model> {
        let pair = self.load_pair(caller_id, id).await?;
        if pair.mine.status != FriendshipStatus::Pending {
            return Err(AppError::Conflict("Request is no longer pending".to_string()));
        }
        if pair.mine.is_outgoing() {
            return Err(AppError::not_permitted());
        }

        let [(mine_before, mine_after), (theirs_before, theirs_after)] =
            plan_accept(&pair.mine, &pair.theirs, Utc::now().into());
        let mut batch = WriteBatch::new();
        batch
            .update_friendship(mine_before, mine_after.clone())
            .update_friendship(theirs_before, theirs_after);
        self.commit(batch).await?;

        tracing::debug!(accepter = %caller_id, requester = %mine_after.friend_id, "Friend request accepted");
        Ok(mine_after)
    }

    /// Reject a request the caller received.
    pub async fn reject_request(&self, caller_id: &str, id: &str) -> AppResult<()> {
        let pair = self.load_pair(caller_id, id).await?;
        if pair.mine.status != FriendshipStatus::Pending {
            return Err(AppError::Conflict("Request is no longer pending".to_string()));
        }
        if pair.mine.is_outgoing() {
            return Err(AppError::not_permitted());
        }
        self.delete_pair(pair).await
    }

    /// Withdraw a request the caller sent.
    pub async fn cancel_sent_request(&self, caller_id: &str, id: &str) -> AppResult<()> {
        let pair = self.load_pair(caller_id, id).await?;
        if pair.mine.status != FriendshipStatus::Pending {
            return Err(AppError::Conflict("Request is no longer pending".to_string()));
        }
        if !pair.mine.is_outgoing() {
            return Err(AppError::not_permitted());
        }
        self.delete_pair(pair).await
    }

    /// End an accepted friendship.
    pub async fn remove_relationship(&self, caller_id: &str, id: &str) -> AppResult<()> {
        let pair = self.load_pair(caller_id, id).await?;
        if pair.mine.status != FriendshipStatus::Accepted {
            return Err(AppError::Conflict("Not friends".to_string()));
        }
        self.delete_pair(pair).await
    }

    /// Accept every listed request.
    pub async fn accept_all(&self, caller_id: &str, ids: &[String]) -> AppResult<BulkOutcome> {
        let ids = self.bulk_ids(ids)?;
        let mut outcome = BulkOutcome::default();
        for id in ids {
            let result = self.accept_request(caller_id, &id).await.map(|_| ());
            outcome.record(id, result);
        }
        Ok(outcome)
    }

    /// Reject every listed request.
    pub async fn reject_all(&self, caller_id: &str, ids: &[String]) -> AppResult<BulkOutcome> {
        let ids = self.bulk_ids(ids)?;
        let mut outcome = BulkOutcome::default();
        for id in ids {
            let result = self.reject_request(caller_id, &id).await;
            outcome.record(id, result);
        }
        Ok(outcome)
    }

    /// Cancel every listed sent request.
    pub async fn cancel_all_sent(
        &self,
        caller_id: &str,
        ids: &[String],
    ) -> AppResult<BulkOutcome> {
        let ids = self.bulk_ids(ids)?;
        let mut outcome = BulkOutcome::default();
        for id in ids {
            let result = self.cancel_sent_request(caller_id, &id).await;
            outcome.record(id, result);
        }
        Ok(outcome)
    }

    /// One page of the caller's partition.
    pub async fn list(
        &self,
        caller_id: &str,
        kind: ListKind,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Page<friendship::Model>> {
        let limit = self.clamp_limit(limit);
        let items = self
            .friendship_repo
            .find_by_kind(caller_id, kind, limit, until_id)
            .await?;
        Ok(page(items, limit))
    }

    /// One page of another user's friends.
    pub async fn list_friends_of(
        &self,
        caller_id: &str,
        user_id: &str,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Page<friendship::Model>> {
        if user_id != caller_id {
            if self.user_repo.find_by_id(user_id).await?.is_none()
                || self
                    .blocking_repo
                    .is_blocked_between(caller_id, user_id)
                    .await?
            {
                return Err(AppError::not_permitted());
            }
        }
        self.list(user_id, ListKind::Friends, limit, until_id).await
    }

    /// The head of a partition, as pushed to real-time subscribers.
    pub async fn partition_snapshot(
        &self,
        owner_id: &str,
        kind: ListKind,
    ) -> AppResult<Vec<friendship::Model>> {
        self.friendship_repo
            .find_by_kind(owner_id, kind, self.config.snapshot_size, None)
            .await
    }

    /// Number of friends the caller and `other_id` share, computed now.
    ///
    /// The result is also stored on the caller's document, if any.
    pub async fn mutual_friends_count(&self, caller_id: &str, other_id: &str) -> AppResult<u64> {
        if other_id.is_empty() {
            return Err(AppError::Validation("userId is required".to_string()));
        }
        if self
            .blocking_repo
            .is_blocked_between(caller_id, other_id)
            .await?
        {
            return Err(AppError::not_permitted());
        }

        let count = self.friendship_repo.count_mutual(caller_id, other_id).await?;
        let cached = i32::try_from(count).unwrap_or(i32::MAX);
        if let Err(e) = self
            .friendship_repo
            .cache_mutual_friends_count(&relationship_id(caller_id, other_id), cached)
            .await
        {
            tracing::warn!(error = %e, "Failed to cache mutual friends count");
        }
        Ok(count)
    }

    async fn load_pair(&self, caller_id: &str, id: &str) -> AppResult<Pair> {
        if id.is_empty() {
            return Err(AppError::Validation("relationshipId is required".to_string()));
        }
        let (a, b) = parse_relationship_id(id)
            .ok_or_else(|| AppError::Validation("Malformed relationship id".to_string()))?;
        let other_id = if a == caller_id {
            b
        } else if b == caller_id {
            a
        } else {
            return Err(AppError::not_permitted());
        };

        if self
            .blocking_repo
            .is_blocked_between(caller_id, other_id)
            .await?
        {
            return Err(AppError::not_permitted());
        }

        let mine = self
            .friendship_repo
            .find_by_id(&relationship_id(caller_id, other_id))
            .await?;
        let theirs = self
            .friendship_repo
            .find_by_id(&relationship_id(other_id, caller_id))
            .await?;

        match (mine, theirs) {
            (Some(mine), Some(theirs)) => Ok(Pair { mine, theirs }),
            _ => Err(AppError::Conflict(
                "Relationship no longer exists".to_string(),
            )),
        }
    }

    async fn delete_pair(&self, pair: Pair) -> AppResult<()> {
        let mut batch = WriteBatch::new();
        batch
            .delete_friendship(pair.mine)
            .delete_friendship(pair.theirs);
        self.commit(batch).await
    }

    async fn commit(&self, batch: WriteBatch) -> AppResult<()> {
        // Client batches never claim a ledger row, so the outcome is always Applied.
        let _ = batch.commit(self.db.as_ref()).await?;
        if let Some(ref waker) = self.waker {
            waker.wake();
        }
        Ok(())
    }

    fn bulk_ids(&self, ids: &[String]) -> AppResult<Vec<String>> {
        if ids.is_empty() {
            return Err(AppError::Validation("ids must not be empty".to_string()));
        }
        if ids.len() as u64 > self.config.max_page_size {
            return Err(AppError::Validation(format!(
                "At most {} ids per request",
                self.config.max_page_size
            )));
        }
        let mut seen = HashSet::new();
        Ok(ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect())
    }

    fn clamp_limit(&self, limit: u64) -> u64 {
        limit.clamp(1, self.config.max_page_size)
    }
}

impl BulkOutcome {
    fn record(&mut self, id: String, result: AppResult<()>) {
        match result {
            Ok(()) => self.succeeded.push(id),
            Err(e) => self.failed.push(BulkFailure {
                id,
                code: e.error_code().to_string(),
                message: e.to_string(),
            }),
        }
    }
}

fn page(items: Vec<friendship::Model>, limit: u64) -> Page<friendship::Model> {
    let next_cursor = if items.len() as u64 >= limit {
        items.last().map(|doc| doc.id.clone())
    } else {
        None
    };
    Page { items, next_cursor }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use shelfmate_common::NOT_PERMITTED;
    use shelfmate_db::entities::blocking;

    fn user(id: &str) -> user::Model {
        shelfmate_db::test_utils::user_fixture(id, id)
    }

    fn pending(owner: &str, other: &str, requested_by: &str) -> friendship::Model {
        snapshot_doc(owner, &user(other), requested_by, Utc::now().into())
    }

    fn exec(rows: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: rows,
        }
    }

    fn service(db: MockDatabase) -> FriendshipService {
        let db = Arc::new(db.into_connection());
        FriendshipService::new(
            db.clone(),
            FriendshipRepository::new(db.clone()),
            UserRepository::new(db.clone()),
            BlockingRepository::new(db),
            FriendsConfig::default(),
        )
    }

    #[test]
    fn test_plan_send_is_symmetric() {
        let alice = user("alice");
        let bob = user("bob");
        let (mine, theirs) = plan_send(&alice, &bob, Utc::now().into());

        assert_eq!(mine.id, "alice_bob");
        assert_eq!(theirs.id, "bob_alice");
        assert_eq!(mine.requested_by, "alice");
        assert_eq!(theirs.requested_by, "alice");
        assert_eq!(mine.status, theirs.status);
        assert_eq!(mine.friend_username, "bob");
        assert_eq!(theirs.friend_username, "alice");
        assert_eq!(ListKind::of(&mine), ListKind::Sent);
        assert_eq!(ListKind::of(&theirs), ListKind::Received);
    }

    #[test]
    fn test_plan_accept_shares_friendship_date() {
        let [(_, mine), (_, theirs)] = plan_accept(
            &pending("bob", "alice", "alice"),
            &pending("alice", "bob", "alice"),
            Utc::now().into(),
        );

        assert_eq!(mine.status, FriendshipStatus::Accepted);
        assert_eq!(theirs.status, FriendshipStatus::Accepted);
        assert!(mine.friendship_date.is_some());
        assert_eq!(mine.friendship_date, theirs.friendship_date);
        assert_eq!(mine.requested_by, theirs.requested_by);
    }

    #[tokio::test]
    async fn test_send_to_self_is_rejected() {
        let service = service(MockDatabase::new(DatabaseBackend::Postgres));
        let result = service.send_request(&user("alice"), "alice").await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_send_requires_target() {
        let service = service(MockDatabase::new(DatabaseBackend::Postgres));
        let result = service.send_request(&user("alice"), "").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_send_to_blocked_user_is_not_permitted() {
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[user("bob")]])
                .append_query_results([[blocking::Model {
                    id: "bob_alice".to_string(),
                    blocker_id: "bob".to_string(),
                    blocked_id: "alice".to_string(),
                    created_at: Utc::now().into(),
                }]]),
        );

        let err = service
            .send_request(&user("alice"), "bob")
            .await
            .unwrap_err();
        assert!(err.to_string().contains(NOT_PERMITTED));
    }

    #[tokio::test]
    async fn test_send_to_unknown_user_looks_like_block() {
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<user::Model>::new()]),
        );

        let err = service
            .send_request(&user("alice"), "ghost")
            .await
            .unwrap_err();
        assert!(err.to_string().contains(NOT_PERMITTED));
    }

    #[tokio::test]
    async fn test_send_writes_both_documents() {
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[user("bob")]])
                .append_query_results([Vec::<blocking::Model>::new()])
                .append_query_results([Vec::<friendship::Model>::new()])
                .append_exec_results([exec(1), exec(1), exec(1), exec(1)]),
        );

        let doc = service.send_request(&user("alice"), "bob").await.unwrap();
        assert_eq!(doc.id, "alice_bob");
        assert_eq!(doc.status, FriendshipStatus::Pending);
    }

    #[tokio::test]
    async fn test_accept_by_stranger_is_not_permitted() {
        let service = service(MockDatabase::new(DatabaseBackend::Postgres));
        let err = service
            .accept_request("mallory", "bob_alice")
            .await
            .unwrap_err();
        assert!(err.to_string().contains(NOT_PERMITTED));
    }

    #[tokio::test]
    async fn test_accept_own_request_is_not_permitted() {
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<blocking::Model>::new()])
                .append_query_results([[pending("alice", "bob", "alice")]])
                .append_query_results([[pending("bob", "alice", "alice")]]),
        );

        let err = service
            .accept_request("alice", "alice_bob")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_accept_cancelled_request_is_conflict() {
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<blocking::Model>::new()])
                .append_query_results([Vec::<friendship::Model>::new()])
                .append_query_results([Vec::<friendship::Model>::new()]),
        );

        let err = service.accept_request("bob", "bob_alice").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_accept_accepts_sibling_id_too() {
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<blocking::Model>::new()])
                .append_query_results([[pending("bob", "alice", "alice")]])
                .append_query_results([[pending("alice", "bob", "alice")]])
                .append_exec_results([exec(1), exec(1), exec(1), exec(1)]),
        );

        let doc = service.accept_request("bob", "alice_bob").await.unwrap();
        assert_eq!(doc.id, "bob_alice");
        assert_eq!(doc.status, FriendshipStatus::Accepted);
    }

    #[tokio::test]
    async fn test_cancel_received_request_is_not_permitted() {
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<blocking::Model>::new()])
                .append_query_results([[pending("bob", "alice", "alice")]])
                .append_query_results([[pending("alice", "bob", "alice")]]),
        );

        let err = service
            .cancel_sent_request("bob", "bob_alice")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_bulk_reports_each_id() {
        let service = service(MockDatabase::new(DatabaseBackend::Postgres));
        let outcome = service
            .reject_all(
                "bob",
                &["carol_dave".to_string(), "carol_dave".to_string()],
            )
            .await
            .unwrap();

        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].code, "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_bulk_requires_ids() {
        let service = service(MockDatabase::new(DatabaseBackend::Postgres));
        let result = service.accept_all("bob", &[]).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_page_cursor() {
        let docs = vec![
            pending("alice", "carol", "alice"),
            pending("alice", "bob", "alice"),
        ];
        assert_eq!(page(docs.clone(), 2).next_cursor.as_deref(), Some("alice_bob"));
        assert_eq!(page(docs, 10).next_cursor, None);
    }
}
