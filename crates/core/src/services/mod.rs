//! Business logic services.

#![allow(missing_docs)]

pub mod block_cascade;
pub mod blocking;
pub mod dispatcher;
pub mod event_publisher;
pub mod friendship;
pub mod notification;
pub mod triggers;
pub mod user;

pub use block_cascade::{BlockCascadeService, BlockParties, plan_block_cascade};
pub use blocking::BlockingService;
pub use dispatcher::{DrainReport, TriggerDispatcher, TriggerWaker, changed_kinds};
pub use event_publisher::{EventPublisher, EventPublisherService, NoOpEventPublisher, StreamEvent};
pub use friendship::{
    BulkFailure, BulkOutcome, FriendshipService, Page, plan_accept, plan_send,
};
pub use notification::NotificationService;
pub use triggers::{
    ANALYTICS_TARGET, AnalyticsEvent, CounterDelta, FriendshipChange, PlannedNotification,
    TriggerOutcome, TriggerPlan, TriggerService, display_name, plan_friendship_change,
};
pub use user::{CreateUserInput, UpdateProfileInput, UserService};
