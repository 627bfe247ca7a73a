//! Background processing for Shelfmate.
//!
//! - **Pub/Sub**: cross-instance delivery of real-time events over Redis
//! - **Scheduler**: drives the trigger dispatcher and ledger pruning

pub mod pubsub;
pub mod scheduler;

pub use pubsub::{PubSubSseBridge, RedisPubSub, channel_for, channels as pubsub_channels};
pub use scheduler::{SchedulerConfig, TriggerExecutor, run_scheduler};
