//! Client-side friends state for Shelfmate.
//!
//! This crate keeps a user's friend lists consistent across three sources:
//!
//! - **Fetches** of list pages over the HTTP API
//! - **Real-time snapshots** pushed over Server-Sent Events
//! - **Optimistic mutations** applied locally before the server answers
//!
//! [`ReconcileCache`] holds the state machine, [`FriendsClient`] drives it
//! through a [`FriendshipTransport`], and [`BroadcastHub`] lets clients of the
//! same user in one process nudge each other after a mutation.

pub mod broadcast;
pub mod cache;
pub mod client;
pub mod error;
pub mod model;
pub mod mutation;
pub mod transport;

pub use broadcast::{BroadcastHub, TabMessage};
pub use cache::{FetchTicket, LoadState, MutationToken, PartitionView, PushOutcome, ReconcileCache};
pub use client::{FriendsClient, Toast};
pub use error::{ClientError, ClientResult};
pub use model::{
    BulkFailure, BulkOutcome, Page, PartitionKey, PartitionKind, PushEvent, Relationship,
    RelationshipStatus, SortOrder, ViewOptions,
};
pub use mutation::Mutation;
pub use transport::{FriendshipTransport, HttpTransport, SseDecoder};
