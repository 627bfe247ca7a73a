//! State-transition triggers for relationship documents.
//!
//! Each ledger row describing a write to a relationship document is turned
//! into a [`TriggerPlan`] by [`plan_friendship_change`], a pure function of the
//! before/after images. [`TriggerService`] executes a plan as one
//! [`WriteBatch`] that also claims the ledger row, so a redelivered row
//! commits nothing.
//!
//! Every handler only touches counters of the document's own owner, except
//! for the accept transition, which fires on the accepter's document alone and
//! covers both participants.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use shelfmate_common::{AppError, AppResult, IdGenerator, relationship_id};
use shelfmate_db::{
    CommitOutcome, ProfileCounter, WriteBatch,
    entities::{
        change_event::{self, ChangeKind, Collection},
        friendship::{self, FriendshipStatus},
        notification::{self, NotificationType},
        user,
    },
    repositories::UserRepository,
};

use crate::services::event_publisher::EventPublisherService;

/// Analytics target for structured product events.
pub const ANALYTICS_TARGET: &str = "analytics";

/// A decoded write to a relationship document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendshipChange {
    pub kind: ChangeKind,
    pub before: Option<friendship::Model>,
    pub after: Option<friendship::Model>,
}

impl FriendshipChange {
    /// Decode a ledger row.
    pub fn from_event(event: &change_event::Model) -> AppResult<Self> {
        if event.collection != Collection::Friendship {
            return Err(AppError::Internal(format!(
                "Change event {} is not a friendship change",
                event.id
            )));
        }

        let decode = |image: &Option<serde_json::Value>| -> AppResult<Option<friendship::Model>> {
            image
                .clone()
                .map(serde_json::from_value)
                .transpose()
                .map_err(AppError::from)
        };

        Ok(Self {
            kind: event.kind,
            before: decode(&event.before)?,
            after: decode(&event.after)?,
        })
    }

    /// Owner of the changed document.
    #[must_use]
    pub fn owner_id(&self) -> Option<&str> {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map(|doc| doc.user_id.as_str())
    }
}

/// A counter adjustment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDelta {
    pub user_id: String,
    pub counter: ProfileCounter,
    pub delta: i32,
}

/// A notification to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNotification {
    pub recipient_id: String,
    pub actor_id: String,
    pub notification_type: NotificationType,
    pub friendship_id: String,
}

/// A product analytics event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsEvent {
    pub name: &'static str,
    pub user_id: String,
    pub friend_id: String,
}

/// Side effects of one relationship-document transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerPlan {
    pub counters: Vec<CounterDelta>,
    pub notifications: Vec<PlannedNotification>,
    pub analytics: Option<AnalyticsEvent>,
}

impl TriggerPlan {
    /// Whether the transition has no side effects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.notifications.is_empty() && self.analytics.is_none()
    }

    fn counter(&mut self, user_id: &str, counter: ProfileCounter, delta: i32) {
        self.counters.push(CounterDelta {
            user_id: user_id.to_string(),
            counter,
            delta,
        });
    }

    fn notify(
        &mut self,
        recipient_id: &str,
        actor_id: &str,
        notification_type: NotificationType,
        friendship_id: String,
    ) {
        self.notifications.push(PlannedNotification {
            recipient_id: recipient_id.to_string(),
            actor_id: actor_id.to_string(),
            notification_type,
            friendship_id,
        });
    }
}

/// Plan the side effects of a relationship-document write.
#[must_use]
pub fn plan_friendship_change(change: &FriendshipChange) -> TriggerPlan {
    let mut plan = TriggerPlan::default();

    match (change.kind, &change.before, &change.after) {
        (ChangeKind::Created, _, Some(doc)) => {
            // The requester's own copy is silent; the recipient's copy fans out.
            if doc.status == FriendshipStatus::Pending && !doc.is_outgoing() {
                plan.notify(
                    &doc.user_id,
                    &doc.requested_by,
                    NotificationType::FriendRequest,
                    doc.id.clone(),
                );
                plan.counter(&doc.user_id, ProfileCounter::PendingRequests, 1);
                plan.counter(&doc.requested_by, ProfileCounter::SentRequests, 1);
            }
        }
        (ChangeKind::Updated, Some(before), Some(after)) => {
            let accepted = before.status == FriendshipStatus::Pending
                && after.status == FriendshipStatus::Accepted;
            // Both siblings transition; only the accepter's copy fires.
            if accepted && !after.is_outgoing() {
                let accepter = &after.user_id;
                let requester = &after.requested_by;

                plan.notify(
                    requester,
                    accepter,
                    NotificationType::FriendAccepted,
                    relationship_id(requester, accepter),
                );
                plan.notify(
                    accepter,
                    requester,
                    NotificationType::FriendAccepted,
                    after.id.clone(),
                );
                plan.counter(requester, ProfileCounter::SentRequests, -1);
                plan.counter(accepter, ProfileCounter::PendingRequests, -1);
                plan.counter(requester, ProfileCounter::Friends, 1);
                plan.counter(accepter, ProfileCounter::Friends, 1);
                plan.analytics = Some(AnalyticsEvent {
                    name: "friendship_accepted",
                    user_id: accepter.clone(),
                    friend_id: requester.clone(),
                });
            }
        }
        (ChangeKind::Deleted, Some(doc), _) => {
            let counter = match doc.status {
                FriendshipStatus::Accepted => ProfileCounter::Friends,
                FriendshipStatus::Pending if doc.is_outgoing() => ProfileCounter::SentRequests,
                FriendshipStatus::Pending => ProfileCounter::PendingRequests,
            };
            plan.counter(&doc.user_id, counter, -1);
        }
        _ => {}
    }

    plan
}

/// What happened to a ledger row handed to a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Side effects committed (possibly none) and the row was claimed.
    Applied,
    /// An earlier delivery already claimed the row.
    AlreadyProcessed,
}

/// Executes relationship-document triggers.
#[derive(Clone)]
pub struct TriggerService {
    db: Arc<DatabaseConnection>,
    user_repo: UserRepository,
    event_publisher: Option<EventPublisherService>,
    id_gen: IdGenerator,
}

impl TriggerService {
    /// Create a new trigger service.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>, user_repo: UserRepository) -> Self {
        Self {
            db,
            user_repo,
            event_publisher: None,
            id_gen: IdGenerator::new(),
        }
    }

    /// Set the event publisher.
    pub fn set_event_publisher(&mut self, event_publisher: EventPublisherService) {
        self.event_publisher = Some(event_publisher);
    }

    /// Run the trigger for one ledger row.
    pub async fn handle(&self, event: &change_event::Model) -> AppResult<TriggerOutcome> {
        let change = FriendshipChange::from_event(event)?;
        let plan = plan_friendship_change(&change);

        let notifications = self.build_notifications(&plan).await?;

        let mut batch = WriteBatch::new();
        batch.claim_event(event.id.clone());
        for delta in &plan.counters {
            batch.adjust_counter(delta.user_id.clone(), delta.counter, delta.delta);
        }
        for n in &notifications {
            batch.notify(n.clone());
        }

        match batch.commit(self.db.as_ref()).await? {
            CommitOutcome::AlreadyProcessed => return Ok(TriggerOutcome::AlreadyProcessed),
            CommitOutcome::Applied(_) => {}
        }

        tracing::debug!(
            event_id = %event.id,
            document_id = %event.document_id,
            kind = ?event.kind,
            counters = plan.counters.len(),
            notifications = notifications.len(),
            "Friendship trigger applied"
        );

        if let Some(analytics) = &plan.analytics {
            tracing::info!(
                target: ANALYTICS_TARGET,
                event = analytics.name,
                user_id = %analytics.user_id,
                friend_id = %analytics.friend_id,
            );
        }

        if let Some(ref publisher) = self.event_publisher {
            for n in &notifications {
                let kind = serde_json::to_value(n.notification_type)?;
                if let Err(e) = publisher
                    .publish_notification(
                        &n.id,
                        &n.user_id,
                        kind.as_str().unwrap_or_default(),
                        &n.actor_id,
                    )
                    .await
                {
                    tracing::warn!(error = %e, notification_id = %n.id, "Failed to publish notification event");
                }
            }
        }

        Ok(TriggerOutcome::Applied)
    }

    /// Resolve planned notifications against the actors' current profiles.
    async fn build_notifications(
        &self,
        plan: &TriggerPlan,
    ) -> AppResult<Vec<notification::Model>> {
        if plan.notifications.is_empty() {
            return Ok(vec![]);
        }

        let actor_ids: Vec<String> = plan
            .notifications
            .iter()
            .map(|n| n.actor_id.clone())
            .collect();
        let actors = self.user_repo.find_by_ids(&actor_ids).await?;
        let now: chrono::DateTime<chrono::FixedOffset> = Utc::now().into();

        Ok(plan
            .notifications
            .iter()
            .map(|planned| {
                let actor = actors.iter().find(|u| u.id == planned.actor_id);
                notification::Model {
                    id: self.id_gen.generate(),
                    user_id: planned.recipient_id.clone(),
                    notification_type: planned.notification_type,
                    actor_id: planned.actor_id.clone(),
                    actor_name: actor.map_or_else(|| planned.actor_id.clone(), display_name),
                    actor_avatar_url: actor.and_then(|u| u.avatar_url.clone()),
                    friendship_id: planned.friendship_id.clone(),
                    is_read: false,
                    created_at: now,
                }
            })
            .collect())
    }
}

/// Name shown for a user: display name, falling back to the username.
#[must_use]
pub fn display_name(user: &user::Model) -> String {
    user.name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| user.username.clone())
}
