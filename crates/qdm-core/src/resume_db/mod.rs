//! Persistent manager state (SQLite via sqlx).
//!
//! Stores queues, downloads and each download's saved transfer state
//! (completion bitmap, incomplete part offsets) so the manager can rebuild
//! itself after a restart.

mod db;
mod snapshot;
mod types;

pub use db::ResumeDb;
pub use types::*;

#[cfg(test)]
pub(crate) use db::open_memory;
