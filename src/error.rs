//! Structured error types for tree operations.

use rusqlite::ErrorCode as SqliteCode;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Business-rule violations
    NotFound,
    InvalidMove,
    Locked,
    InvalidFieldValue,
    TreeTooDeep,

    // Retryable
    Conflict,

    // Faults
    StoreUnavailable,
}

/// What a `NotFound` refers to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Task,
    Parent,
    Milestone,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Task => write!(f, "task"),
            Entity::Parent => write!(f, "parent task"),
            Entity::Milestone => write!(f, "milestone"),
        }
    }
}

/// Where a conflict was detected.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictOrigin {
    /// Another writer held the store past the busy timeout.
    Store,
    /// The task changed since the caller (or the engine) read it.
    StaleVersion,
}

/// Why a move was rejected.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MoveRejection {
    SelfParent,
    Cycle,
    CrossProject,
}

impl fmt::Display for MoveRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveRejection::SelfParent => write!(f, "a task cannot be its own parent"),
            MoveRejection::Cycle => write!(f, "target parent is inside the moved subtree"),
            MoveRejection::CrossProject => write!(f, "tasks cannot move between projects"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    #[error("invalid move of task {node_id}: {reason}")]
    InvalidMove {
        node_id: String,
        reason: MoveRejection,
    },

    #[error("task {node_id} is frozen by locked milestone {milestone}")]
    Locked { milestone: String, node_id: String },

    #[error("conflicting update of {id}: {reason}")]
    Conflict {
        id: String,
        reason: String,
        origin: ConflictOrigin,
    },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("tree under {id} is {depth} levels deep, limit is {limit}")]
    TreeTooDeep { id: String, depth: u32, limit: u32 },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] rusqlite::Error),
}

impl TreeError {
    pub fn task_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: Entity::Task,
            id: id.to_string(),
        }
    }

    pub fn parent_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: Entity::Parent,
            id: id.to_string(),
        }
    }

    pub fn milestone_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: Entity::Milestone,
            id: id.to_string(),
        }
    }

    pub fn invalid_move(node_id: &str, reason: MoveRejection) -> Self {
        Self::InvalidMove {
            node_id: node_id.to_string(),
            reason,
        }
    }

    pub fn locked(milestone: &str, node_id: &str) -> Self {
        Self::Locked {
            milestone: milestone.to_string(),
            node_id: node_id.to_string(),
        }
    }

    /// The task or its subtree changed since it was read.
    pub fn conflict(id: &str, reason: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.to_string(),
            reason: reason.into(),
            origin: ConflictOrigin::StaleVersion,
        }
    }

    /// Another writer held the store past the wait limit.
    pub fn store_busy(reason: impl Into<String>) -> Self {
        Self::Conflict {
            id: "store".to_string(),
            reason: reason.into(),
            origin: ConflictOrigin::Store,
        }
    }

    pub fn stale_version(id: &str, expected: i64, actual: i64) -> Self {
        Self::conflict(id, format!("expected version {}, found {}", expected, actual))
    }

    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            TreeError::NotFound { .. } => ErrorCode::NotFound,
            TreeError::InvalidMove { .. } => ErrorCode::InvalidMove,
            TreeError::Locked { .. } => ErrorCode::Locked,
            TreeError::Conflict { .. } => ErrorCode::Conflict,
            TreeError::InvalidField { .. } => ErrorCode::InvalidFieldValue,
            TreeError::TreeTooDeep { .. } => ErrorCode::TreeTooDeep,
            TreeError::StoreUnavailable(_) => ErrorCode::StoreUnavailable,
        }
    }

    /// Only conflicts are safe to retry as a whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TreeError::Conflict { .. })
    }

    /// Conflicts the engine may retry on its own: a stale caller-supplied
    /// version will not change by retrying, a busy store may.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TreeError::Conflict {
                origin: ConflictOrigin::Store,
                ..
            }
        )
    }

    /// Business-rule violations, as opposed to conflicts and store faults.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            TreeError::NotFound { .. }
                | TreeError::InvalidMove { .. }
                | TreeError::Locked { .. }
                | TreeError::InvalidField { .. }
                | TreeError::TreeTooDeep { .. }
        )
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
            milestone: match self {
                TreeError::Locked { milestone, .. } => Some(milestone.clone()),
                _ => None,
            },
        }
    }
}

/// Busy and locked database states mean another writer holds the store;
/// they surface as retryable conflicts rather than faults.
impl From<rusqlite::Error> for TreeError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(SqliteCode::DatabaseBusy) | Some(SqliteCode::DatabaseLocked) => {
                TreeError::store_busy(err.to_string())
            }
            _ => TreeError::StoreUnavailable(err),
        }
    }
}

/// Serializable error view for callers.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<String>,
}

/// Result type for tree operations.
pub type TreeResult<T> = std::result::Result<T, TreeError>;
