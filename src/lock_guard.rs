//! Milestone lock checks.
//!
//! The sign-off workflow that locks and unlocks milestones lives outside this
//! crate; the engine only asks whether a milestone is locked right now. Guards
//! are queried on every mutation and their answers are never cached, because
//! sign-off state changes independently of task edits.

use crate::error::{TreeError, TreeResult};
use rusqlite::Connection;
use std::collections::HashSet;
use std::sync::RwLock;

/// Answers "is this milestone locked?".
pub trait LockGuard: Send + Sync {
    /// `store` is the transaction the calling mutation runs in, so guards
    /// backed by the task database read the same snapshot the mutation
    /// decides on. Guards backed by something else may ignore it.
    fn is_locked(&self, store: &Connection, milestone: &str) -> TreeResult<bool>;
}

impl<G: LockGuard + ?Sized> LockGuard for std::sync::Arc<G> {
    fn is_locked(&self, store: &Connection, milestone: &str) -> TreeResult<bool> {
        (**self).is_locked(store, milestone)
    }
}

/// Fail with `Locked` if `milestone` is set and locked. Tasks without a
/// milestone are never locked.
pub fn check_unlocked<G: LockGuard + ?Sized>(
    guard: &G,
    store: &Connection,
    milestone: Option<&str>,
    node_id: &str,
) -> TreeResult<()> {
    match milestone {
        Some(milestone) if guard.is_locked(store, milestone)? => {
            Err(TreeError::locked(milestone, node_id))
        }
        _ => Ok(()),
    }
}

/// Lock state held in process memory, for callers whose milestone subsystem
/// pushes lock and unlock events rather than sharing the task database.
#[derive(Debug, Default)]
pub struct MemoryLockGuard {
    locked: RwLock<HashSet<String>>,
}

impl MemoryLockGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, milestone: impl Into<String>) {
        self.locked
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(milestone.into());
    }

    pub fn unlock(&self, milestone: &str) {
        self.locked
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(milestone);
    }
}

impl LockGuard for MemoryLockGuard {
    fn is_locked(&self, _store: &Connection, milestone: &str) -> TreeResult<bool> {
        Ok(self
            .locked
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(milestone))
    }
}
