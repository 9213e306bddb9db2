//! Local store abstraction for hyperoffline.
//!
//! This module provides a trait-based interface over the two durable tables
//! the offline engine needs: a key/value table of cached resource snapshots
//! and an ordered queue of pending mutating requests.
//!
//! # Design Principles
//! - All-or-nothing writes: every multi-row change is a single [`WriteBatch`]
//! - Ordered queue: request ids only ever grow, so id order is replay order
//! - Backend isolation: SQLite for durable use, memory for tests

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{LocalStore, ScanAction, ScanVisitor, WriteBatch, WriteOp};
