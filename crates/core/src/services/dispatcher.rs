//! Trigger dispatcher.
//!
//! Drains the change ledger and hands each row to the handler interested in
//! it. Delivery is at least once: a row stays unprocessed until its handler's
//! batch claims it, and failures are recorded on the row and retried on a
//! later drain until `max_attempts` is reached.

use std::sync::Arc;

use chrono::{Duration, Utc};
use shelfmate_common::{AppResult, config::TriggerConfig};
use shelfmate_db::{
    entities::{
        change_event::{self, ChangeKind, Collection},
        friendship,
    },
    repositories::{ChangeEventRepository, ListKind},
};
use tokio::sync::Notify;

use crate::services::{
    block_cascade::BlockCascadeService,
    event_publisher::EventPublisherService,
    triggers::{FriendshipChange, TriggerOutcome, TriggerService},
};

/// Wakes the dispatcher after a local write so it does not wait for the next poll.
#[derive(Clone, Default)]
pub struct TriggerWaker(Arc<Notify>);

impl TriggerWaker {
    /// Create a new waker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that new ledger rows are available.
    pub fn wake(&self) {
        self.0.notify_one();
    }

    /// Wait for the next wake-up.
    pub async fn notified(&self) {
        self.0.notified().await;
    }
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Rows whose handler committed.
    pub processed: usize,
    /// Rows an earlier delivery had already claimed.
    pub duplicates: usize,
    /// Rows whose handler failed.
    pub failed: usize,
}

impl DrainReport {
    /// Number of rows looked at.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.processed + self.duplicates + self.failed
    }
}

/// Routes ledger rows to trigger handlers.
#[derive(Clone)]
pub struct TriggerDispatcher {
    change_event_repo: ChangeEventRepository,
    triggers: TriggerService,
    cascade: BlockCascadeService,
    event_publisher: Option<EventPublisherService>,
    config: TriggerConfig,
    waker: TriggerWaker,
}

impl TriggerDispatcher {
    /// Create a new dispatcher.
    #[must_use]
    pub fn new(
        change_event_repo: ChangeEventRepository,
        triggers: TriggerService,
        cascade: BlockCascadeService,
        config: TriggerConfig,
    ) -> Self {
        Self {
            change_event_repo,
            triggers,
            cascade,
            event_publisher: None,
            config,
            waker: TriggerWaker::new(),
        }
    }

    /// Set the event publisher.
    pub fn set_event_publisher(&mut self, event_publisher: EventPublisherService) {
        self.triggers.set_event_publisher(event_publisher.clone());
        self.event_publisher = Some(event_publisher);
    }

    /// Waker shared with the services that append ledger rows.
    #[must_use]
    pub fn waker(&self) -> TriggerWaker {
        self.waker.clone()
    }

    /// Dispatcher configuration.
    #[must_use]
    pub const fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Handle every pending row, oldest first, until the ledger is drained or
    /// a pass makes no progress.
    pub async fn drain(&self) -> AppResult<DrainReport> {
        let mut report = DrainReport::default();

        loop {
            let events = self
                .change_event_repo
                .find_pending(self.config.batch_size, self.config.max_attempts)
                .await?;
            if events.is_empty() {
                break;
            }

            let mut progressed = false;
            for event in &events {
                match self.dispatch(event).await {
                    Ok(TriggerOutcome::Applied) => {
                        report.processed += 1;
                        progressed = true;
                    }
                    Ok(TriggerOutcome::AlreadyProcessed) => {
                        report.duplicates += 1;
                        progressed = true;
                    }
                    Err(e) => {
                        report.failed += 1;
                        self.record_failure(event, &e.to_string()).await;
                    }
                }
            }

            if !progressed || (events.len() as u64) < self.config.batch_size {
                break;
            }
        }

        if report.total() > 0 {
            tracing::debug!(
                processed = report.processed,
                duplicates = report.duplicates,
                failed = report.failed,
                "Drained change ledger"
            );
        }

        Ok(report)
    }

    /// Delete processed rows older than the configured retention.
    pub async fn prune(&self) -> AppResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.config.processed_retention_days));
        let pruned = self.change_event_repo.prune_processed(cutoff.into()).await?;
        if pruned > 0 {
            tracing::info!(pruned, "Pruned processed change events");
        }
        Ok(pruned)
    }

    async fn dispatch(&self, event: &change_event::Model) -> AppResult<TriggerOutcome> {
        match (event.collection, event.kind) {
            (Collection::Friendship, _) => {
                let outcome = self.triggers.handle(event).await?;
                if outcome == TriggerOutcome::Applied {
                    self.publish_friendship_change(event).await;
                }
                Ok(outcome)
            }
            (Collection::Blocking, ChangeKind::Created) => self.cascade.handle(event).await,
            // Unblocking restores nothing; the cascade already removed the documents.
            (Collection::Blocking, _) => {
                if self.change_event_repo.mark_processed(&event.id).await? {
                    Ok(TriggerOutcome::Applied)
                } else {
                    Ok(TriggerOutcome::AlreadyProcessed)
                }
            }
        }
    }

    async fn publish_friendship_change(&self, event: &change_event::Model) {
        let Some(ref publisher) = self.event_publisher else {
            return;
        };
        let change = match FriendshipChange::from_event(event) {
            Ok(change) => change,
            Err(_) => return,
        };
        let Some(owner_id) = change.owner_id() else {
            return;
        };

        let kinds = changed_kinds(change.before.as_ref(), change.after.as_ref());
        if let Err(e) = publisher.publish_friendships_changed(owner_id, &kinds).await {
            tracing::warn!(error = %e, user_id = %owner_id, "Failed to publish friendship change");
        }
    }

    async fn record_failure(&self, event: &change_event::Model, error: &str) {
        let attempts = event.attempts + 1;
        if attempts >= self.config.max_attempts {
            tracing::error!(
                event_id = %event.id,
                document_id = %event.document_id,
                attempts,
                error = %error,
                "Trigger failed; giving up on change event"
            );
        } else {
            tracing::warn!(
                event_id = %event.id,
                document_id = %event.document_id,
                attempts,
                error = %error,
                "Trigger failed; change event will be redelivered"
            );
        }

        if let Err(e) = self.change_event_repo.record_failure(&event.id, error).await {
            tracing::error!(error = %e, event_id = %event.id, "Failed to record trigger failure");
        }
    }
}

/// Partitions affected by a document moving from `before` to `after`.
#[must_use]
pub fn changed_kinds(
    before: Option<&friendship::Model>,
    after: Option<&friendship::Model>,
) -> Vec<ListKind> {
    let mut kinds = Vec::with_capacity(2);
    for doc in [before, after].into_iter().flatten() {
        let kind = ListKind::of(doc);
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    kinds
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use shelfmate_db::{
        entities::friendship::FriendshipStatus,
        repositories::{FriendshipRepository, UserRepository},
    };

    fn doc(status: FriendshipStatus) -> friendship::Model {
        friendship::Model {
            id: "bob_alice".to_string(),
            user_id: "bob".to_string(),
            friend_id: "alice".to_string(),
            status,
            requested_by: "alice".to_string(),
            friendship_date: None,
            friend_username: "alice".to_string(),
            friend_name: None,
            friend_avatar_url: None,
            friend_bio: None,
            mutual_friends_count: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn event(id: &str, collection: Collection, kind: ChangeKind) -> change_event::Model {
        change_event::Model {
            id: id.to_string(),
            collection,
            document_id: "bob_alice".to_string(),
            kind,
            before: Some(serde_json::to_value(doc(FriendshipStatus::Pending)).unwrap()),
            after: None,
            attempts: 0,
            last_error: None,
            processed_at: None,
            created_at: Utc::now().into(),
        }
    }

    fn exec(rows: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: rows,
        }
    }

    fn dispatcher(db: MockDatabase) -> TriggerDispatcher {
        let db = Arc::new(db.into_connection());
        TriggerDispatcher::new(
            ChangeEventRepository::new(db.clone()),
            TriggerService::new(db.clone(), UserRepository::new(db.clone())),
            BlockCascadeService::new(db.clone(), FriendshipRepository::new(db)),
            TriggerConfig::default(),
        )
    }

    #[test]
    fn test_changed_kinds_on_accept() {
        let before = doc(FriendshipStatus::Pending);
        let after = doc(FriendshipStatus::Accepted);

        assert_eq!(
            changed_kinds(Some(&before), Some(&after)),
            vec![ListKind::Received, ListKind::Friends]
        );
        assert_eq!(changed_kinds(Some(&before), None), vec![ListKind::Received]);
    }

    #[tokio::test]
    async fn test_drain_counts_duplicates_and_failures() {
        let dispatcher = dispatcher(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![
                    event("e1", Collection::Friendship, ChangeKind::Deleted),
                    event("e2", Collection::Friendship, ChangeKind::Deleted),
                    event("e3", Collection::Blocking, ChangeKind::Deleted),
                ]])
                // e1: claim + decrement
                .append_exec_results([exec(1), exec(1)])
                // e2: already claimed
                .append_exec_results([exec(0)])
                // e3: marker already set by another worker
                .append_exec_results([exec(0)]),
        );

        let report = dispatcher.drain().await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_drain_empty_ledger() {
        let dispatcher = dispatcher(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<change_event::Model>::new()]),
        );

        assert_eq!(dispatcher.drain().await.unwrap(), DrainReport::default());
    }

    #[tokio::test]
    async fn test_waker_wakes_waiter() {
        let waker = TriggerWaker::new();
        let waiter = waker.clone();
        let handle = tokio::spawn(async move { waiter.notified().await });
        waker.wake();
        handle.await.unwrap();
    }
}
