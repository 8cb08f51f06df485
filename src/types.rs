//! Core types for the task tree.

use serde::{Deserialize, Serialize};

/// Status given to tasks created without one.
pub const DEFAULT_STATUS: &str = "open";

/// Task payload fields. Carried through the engine untouched; none of the
/// tree invariants depend on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub title: String,
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub assignees: Vec<String>,
}

fn default_status() -> String {
    DEFAULT_STATUS.to_string()
}

impl TaskPayload {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            status: default_status(),
            assignees: Vec::new(),
        }
    }
}

/// A task in the tree.
///
/// `path` lists the ancestor IDs root-first, each followed by `/`
/// (`"A/B/"` for a grandchild of `A`); roots have an empty path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    pub project_id: String,
    pub parent_id: Option<String>,
    pub path: String,
    pub depth: u32,
    pub order: f64,
    /// Creation sequence; breaks ties between siblings with equal `order`.
    pub seq: i64,
    pub milestone: Option<String>,
    pub version: i64,
    #[serde(flatten)]
    pub payload: TaskPayload,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TaskNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A task with its children for tree responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTree {
    #[serde(flatten)]
    pub task: TaskNode,
    pub children: Vec<TaskTree>,
}

impl TaskTree {
    /// Number of nodes in this tree, including the root.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(tree) = pending.pop() {
            count += 1;
            pending.extend(tree.children.iter());
        }
        count
    }
}

/// Unlinks children level by level so dropping a deep chain does not recurse.
impl Drop for TaskTree {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut tree) = pending.pop() {
            pending.append(&mut tree.children);
        }
    }
}

/// Task detail view: the node, its ancestor chain (root-first) and its
/// immediate children in sibling order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    pub task: TaskNode,
    pub ancestors: Vec<TaskNode>,
    pub children: Vec<TaskNode>,
}

/// Denormalized fields rewritten for one descendant during a move cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathUpdate {
    pub id: String,
    pub path: String,
    pub depth: u32,
}

/// Command for creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    /// Custom task ID (UUID7 generated if not provided).
    pub id: Option<String>,
    pub project_id: String,
    pub parent_id: Option<String>,
    pub order: Option<f64>,
    pub milestone: Option<String>,
    pub payload: TaskPayload,
}

impl NewTask {
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: None,
            project_id: project_id.into(),
            parent_id: None,
            order: None,
            milestone: None,
            payload: TaskPayload::titled(title),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn under(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn at_order(mut self, order: f64) -> Self {
        self.order = Some(order);
        self
    }

    pub fn in_milestone(mut self, milestone: impl Into<String>) -> Self {
        self.milestone = Some(milestone.into());
        self
    }
}

/// Command for reparenting a task. `new_parent_id: None` moves it to the root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoveTask {
    pub node_id: String,
    pub new_parent_id: Option<String>,
    pub order: Option<f64>,
    pub expected_version: Option<i64>,
}

impl MoveTask {
    pub fn to_root(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    pub fn under(node_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            new_parent_id: Some(parent_id.into()),
            ..Self::default()
        }
    }

    pub fn at_order(mut self, order: f64) -> Self {
        self.order = Some(order);
        self
    }

    pub fn expecting(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// Result of a move, with the before-values audit collaborators need to
/// build a change record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub node: TaskNode,
    pub previous_parent_id: Option<String>,
    pub previous_path: String,
    pub descendants_updated: usize,
}

/// Result of a cascading delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted_count: usize,
    pub deleted_ids: Vec<String>,
}

/// Partial update of task payload fields. `None` leaves a field unchanged;
/// `description: Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<String>,
    pub assignees: Option<Vec<String>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.assignees.is_none()
    }
}

/// A milestone record as seen by the stored lock guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub locked: bool,
    pub locked_at: Option<i64>,
    pub created_at: i64,
}

/// One broken tree invariant found by a consistency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    /// Parent reference points at a task that does not exist.
    MissingParent { id: String, parent_id: String },
    /// Parent lives in another project.
    CrossProjectParent { id: String, parent_id: String },
    /// Stored path differs from the one derived from the parent.
    PathMismatch { id: String, expected: String, actual: String },
    /// Stored depth differs from the one derived from the parent.
    DepthMismatch { id: String, expected: u32, actual: u32 },
    /// Task appears among its own ancestors.
    SelfAncestor { id: String },
}
