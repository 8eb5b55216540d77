//! Study client storage: a local SQLite repository for offline review and
//! an HTTP repository for the backend. Both implement
//! [`review_core::CardStateRepository`], so a session runs the same way
//! against either.

pub mod api;
pub mod config;
pub mod db;

pub use api::{ApiClientError, HttpRepository, Registration};
pub use config::ClientConfig;
pub use db::{DbError, DeckStats, SqliteRepository};
