//! Persistent storage for CPEE Replay
//!
//! Recorded interactions live in one SQLite table per collection; runtime
//! settings live in the `_settings` key/value table of the same database.

pub mod sqlite;

pub use sqlite::{quote_ident, SqliteStore, SETTINGS_TABLE};
