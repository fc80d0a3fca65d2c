//! # lobby-store
//!
//! Local storage for the lobby node, backed by SQLite.
//!
//! Holds the engine's persisted configuration (nicknames, flags and
//! subscribed lobbies) and an append-only log of delivered lobby messages.
//! The crate exposes a synchronous [`Database`] handle and a
//! [`SqlitePersistence`] adapter for the engine.

pub mod database;
pub mod history;
pub mod lobby_config;
pub mod migrations;
pub mod persistence;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use persistence::SqlitePersistence;
