//! HTTP API layer for Shelfmate.
//!
//! This crate provides the REST API and real-time streaming:
//!
//! - **Endpoints**: users, friends, blocking and notifications (POST + JSON)
//! - **Extractors**: bearer-token authentication
//! - **Streaming**: Server-Sent Events carrying partition snapshots and
//!   notifications
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;
pub mod sse;

pub use endpoints::router;
pub use sse::{SseBroadcaster, SseEvent};
