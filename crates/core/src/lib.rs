//! Core business logic for Shelfmate.
//!
//! Client-facing services write relationship documents through ledgered
//! batches; the [`TriggerDispatcher`] drains the ledger and runs the counter,
//! notification and blocking-cascade triggers.

pub mod services;

pub use services::*;
