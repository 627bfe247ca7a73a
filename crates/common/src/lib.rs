//! Common utilities and shared types for Shelfmate.
//!
//! This crate provides foundational components used across all Shelfmate crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID-based identifiers and the composite relationship keys
//!   via [`IdGenerator`] and [`relationship_id`]
//!
//! # Example
//!
//! ```no_run
//! use shelfmate_common::{Config, IdGenerator, AppResult};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     let id = id_gen.generate();
//!     println!("Generated ID: {} (port {})", id, config.server.port);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;

pub use config::Config;
pub use error::{AppError, AppResult, NOT_PERMITTED};
pub use id::{IdGenerator, parse_relationship_id, relationship_id};
