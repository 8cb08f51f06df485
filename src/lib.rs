//! Task Tree Library
//!
//! Task hierarchy engine over a materialized-path SQLite store: create, move,
//! reorder and cascading delete of task subtrees, gated by milestone locks.

pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod lock_guard;
pub mod logging;
pub mod path;
pub mod query;
pub mod types;

pub use db::milestones::StoredMilestones;
pub use db::Database;
pub use engine::TreeEngine;
pub use error::{TreeError, TreeResult};
pub use lock_guard::{LockGuard, MemoryLockGuard};
pub use query::QueryService;
