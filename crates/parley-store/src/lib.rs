//! # parley-store
//!
//! Message store implementations for the parley chat relay.
//!
//! The relay core defines the [`MessageStore`](parley_core::MessageStore)
//! capability; this crate provides:
//!
//! - [`SqliteStore`] - durable append-only log on SQLite
//! - [`MemoryStore`] - in-process log for tests and benchmarks

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
