//! Mutation engine: create, move, reorder, update and cascading delete.
//!
//! Every operation runs in one `BEGIN IMMEDIATE` transaction. All reads the
//! decision depends on (task, parent, subtree, lock state) and all writes
//! happen while the transaction holds the store's write lock, so a move's
//! cascade or a delete's subtree removal commits entirely or not at all, and
//! overlapping operations from other connections serialize at the store.
//!
//! Store conflicts (a writer holding the database past the busy timeout) are
//! retried a bounded number of times. A stale caller-supplied version is
//! reported immediately.

use crate::config::EngineConfig;
use crate::db::{now_ms, Database, NodeStore};
use crate::error::{MoveRejection, TreeError, TreeResult};
use crate::lock_guard::{check_unlocked, LockGuard};
use crate::path::{compute_path, is_descendant_or_self, rebase, subtree_prefix, validate_id};
use crate::query::QueryService;
use crate::types::{
    DeleteOutcome, MoveOutcome, MoveTask, NewTask, PathUpdate, TaskNode, TaskPatch,
};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The task hierarchy engine.
pub struct TreeEngine<G> {
    db: Database,
    guard: G,
    config: EngineConfig,
}

impl<G: LockGuard> TreeEngine<G> {
    pub fn new(db: Database, guard: G) -> Self {
        Self {
            db,
            guard,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn guard(&self) -> &G {
        &self.guard
    }

    /// Read-side queries over the same database.
    pub fn queries(&self) -> QueryService {
        QueryService::new(self.db.clone())
    }

    /// Run `op` in an immediate transaction, retrying transient conflicts.
    fn run<T, F>(&self, name: &'static str, mut op: F) -> TreeResult<T>
    where
        F: FnMut(&Connection) -> TreeResult<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            let result = self.db.with_conn_mut(|conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let value = op(&*tx)?;
                tx.commit()?;
                Ok(value)
            });

            match result {
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(op = name, attempt, error = %err, "store conflict, retrying");
                    std::thread::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * u64::from(attempt),
                    ));
                }
                other => return other,
            }
        }
    }

    /// Create a task, at the root or under `parent_id`.
    pub fn create(&self, cmd: NewTask) -> TreeResult<TaskNode> {
        if cmd.project_id.is_empty() {
            return Err(TreeError::invalid_value("project_id", "project ID must not be empty"));
        }
        if cmd.payload.title.trim().is_empty() {
            return Err(TreeError::invalid_value("title", "title must not be empty"));
        }
        if let Some(order) = cmd.order {
            validate_order(order)?;
        }
        let task_id = match &cmd.id {
            Some(id) => {
                validate_id(id)?;
                id.clone()
            }
            None => Uuid::now_v7().to_string(),
        };

        let node = self.run("create", |tx| {
            if tx.get_node(&task_id)?.is_some() {
                return Err(TreeError::invalid_value(
                    "id",
                    format!("task {} already exists", task_id),
                ));
            }

            let parent = match cmd.parent_id.as_deref() {
                Some(parent_id) => {
                    let parent = tx
                        .get_node(parent_id)?
                        .filter(|p| p.project_id == cmd.project_id)
                        .ok_or_else(|| TreeError::parent_not_found(parent_id))?;
                    check_unlocked(&self.guard, tx, parent.milestone.as_deref(), &parent.id)?;
                    Some(parent)
                }
                None => None,
            };
            check_unlocked(&self.guard, tx, cmd.milestone.as_deref(), &task_id)?;

            let (path, depth) = compute_path(parent.as_ref());
            let order = match cmd.order {
                Some(order) => order,
                None => append_order(tx, cmd.parent_id.as_deref(), &cmd.project_id, None)?,
            };
            let now = now_ms();

            let node = TaskNode {
                id: task_id.clone(),
                project_id: cmd.project_id.clone(),
                parent_id: cmd.parent_id.clone(),
                path,
                depth,
                order,
                seq: tx.next_seq()?,
                milestone: cmd.milestone.clone(),
                version: 1,
                payload: cmd.payload.clone(),
                created_at: now,
                updated_at: now,
            };
            tx.insert_node(&node)?;
            Ok(node)
        })?;

        info!(task_id = %node.id, project = %node.project_id, depth = node.depth, "created task");
        Ok(node)
    }

    /// Reparent a task and rewrite the paths of its whole subtree.
    pub fn move_node(&self, cmd: MoveTask) -> TreeResult<MoveOutcome> {
        if let Some(order) = cmd.order {
            validate_order(order)?;
        }

        let outcome = self.run("move", |tx| {
            let node = load(tx, &cmd.node_id)?;
            check_version(&node, cmd.expected_version)?;
            if cmd.new_parent_id.as_deref() == Some(node.id.as_str()) {
                return Err(TreeError::invalid_move(&node.id, MoveRejection::SelfParent));
            }

            let new_parent = match cmd.new_parent_id.as_deref() {
                Some(parent_id) => {
                    let parent = tx
                        .get_node(parent_id)?
                        .ok_or_else(|| TreeError::parent_not_found(parent_id))?;
                    if parent.project_id != node.project_id {
                        return Err(TreeError::invalid_move(&node.id, MoveRejection::CrossProject));
                    }
                    if is_descendant_or_self(&node.id, &parent) {
                        return Err(TreeError::invalid_move(&node.id, MoveRejection::Cycle));
                    }
                    Some(parent)
                }
                None => None,
            };

            let subtree = tx.subtree_of(&node)?;
            self.check_subtree_unlocked(tx, &subtree)?;
            if let Some(parent) = &new_parent {
                check_unlocked(&self.guard, tx, parent.milestone.as_deref(), &parent.id)?;
            }

            let order = match cmd.order {
                Some(order) => order,
                None => append_order(
                    tx,
                    cmd.new_parent_id.as_deref(),
                    &node.project_id,
                    Some(&node.id),
                )?,
            };

            let (path, depth) = compute_path(new_parent.as_ref());
            let moved = TaskNode {
                parent_id: new_parent.map(|p| p.id),
                path,
                depth,
                order,
                version: node.version + 1,
                updated_at: now_ms(),
                ..node.clone()
            };

            let updates = plan_cascade(&node, &moved, &subtree)?;
            let written = tx.bulk_upsert_paths(&updates)?;
            if written != updates.len() {
                return Err(TreeError::conflict(
                    &node.id,
                    format!(
                        "subtree changed during move: {} of {} descendants rewritten",
                        written,
                        updates.len()
                    ),
                ));
            }
            write_node(tx, &moved, node.version)?;

            Ok(MoveOutcome {
                node: moved,
                previous_parent_id: node.parent_id,
                previous_path: node.path,
                descendants_updated: written,
            })
        })?;

        info!(
            task_id = %outcome.node.id,
            from = ?outcome.previous_parent_id,
            to = ?outcome.node.parent_id,
            descendants = outcome.descendants_updated,
            "moved task"
        );
        Ok(outcome)
    }

    /// Change a task's sibling order. Siblings are not renumbered.
    pub fn reorder(
        &self,
        node_id: &str,
        order: f64,
        expected_version: Option<i64>,
    ) -> TreeResult<TaskNode> {
        validate_order(order)?;

        let node = self.run("reorder", |tx| {
            let node = load(tx, node_id)?;
            check_version(&node, expected_version)?;
            check_unlocked(&self.guard, tx, node.milestone.as_deref(), &node.id)?;

            let reordered = TaskNode {
                order,
                version: node.version + 1,
                updated_at: now_ms(),
                ..node.clone()
            };
            write_node(tx, &reordered, node.version)?;
            Ok(reordered)
        })?;

        debug!(task_id = %node.id, order = node.order, "reordered task");
        Ok(node)
    }

    /// Delete a task together with its whole subtree.
    pub fn delete(&self, node_id: &str, expected_version: Option<i64>) -> TreeResult<DeleteOutcome> {
        let outcome = self.run("delete", |tx| {
            let node = load(tx, node_id)?;
            check_version(&node, expected_version)?;

            let subtree = tx.subtree_of(&node)?;
            self.check_subtree_unlocked(tx, &subtree)?;

            let deleted = tx.delete_subtree(&node)?;
            if deleted != subtree.len() {
                return Err(TreeError::conflict(
                    &node.id,
                    format!(
                        "subtree changed during delete: {} of {} tasks removed",
                        deleted,
                        subtree.len()
                    ),
                ));
            }

            Ok(DeleteOutcome {
                deleted_count: deleted,
                deleted_ids: subtree.into_iter().map(|n| n.id).collect(),
            })
        })?;

        info!(task_id = node_id, deleted = outcome.deleted_count, "deleted subtree");
        Ok(outcome)
    }

    /// Patch payload fields of a task.
    pub fn update_payload(
        &self,
        node_id: &str,
        patch: TaskPatch,
        expected_version: Option<i64>,
    ) -> TreeResult<TaskNode> {
        self.update_task(node_id, patch, None, expected_version)
    }

    /// Attach a task to a milestone, or detach it with `None`. Both the
    /// current and the target milestone must be unlocked.
    pub fn assign_milestone(
        &self,
        node_id: &str,
        milestone: Option<String>,
        expected_version: Option<i64>,
    ) -> TreeResult<TaskNode> {
        self.update_task(node_id, TaskPatch::default(), Some(milestone), expected_version)
    }

    /// Patch payload fields and optionally change the milestone in one
    /// write. `milestone: Some(None)` detaches the task.
    ///
    /// Every lock involved is checked before anything is written, so a
    /// `Locked` result leaves the task untouched.
    pub fn update_task(
        &self,
        node_id: &str,
        patch: TaskPatch,
        milestone: Option<Option<String>>,
        expected_version: Option<i64>,
    ) -> TreeResult<TaskNode> {
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(TreeError::invalid_value("title", "title must not be empty"));
            }
        }

        let node = self.run("update", |tx| {
            let node = load(tx, node_id)?;
            check_version(&node, expected_version)?;
            check_unlocked(&self.guard, tx, node.milestone.as_deref(), &node.id)?;
            if let Some(target) = &milestone {
                check_unlocked(&self.guard, tx, target.as_deref(), &node.id)?;
            }

            let milestone_changed = milestone
                .as_ref()
                .is_some_and(|target| *target != node.milestone);
            if patch.is_empty() && !milestone_changed {
                return Ok(node);
            }

            let mut updated = node.clone();
            if let Some(title) = &patch.title {
                updated.payload.title = title.clone();
            }
            if let Some(description) = &patch.description {
                updated.payload.description = description.clone();
            }
            if let Some(status) = &patch.status {
                updated.payload.status = status.clone();
            }
            if let Some(assignees) = &patch.assignees {
                updated.payload.assignees = assignees.clone();
            }
            if let Some(target) = &milestone {
                updated.milestone = target.clone();
            }
            updated.version += 1;
            updated.updated_at = now_ms();

            write_node(tx, &updated, node.version)?;
            Ok(updated)
        })?;

        info!(task_id = %node.id, version = node.version, milestone = ?node.milestone, "updated task");
        Ok(node)
    }

    /// Fail with `Locked` if any milestone referenced inside `subtree` is
    /// locked. Each distinct milestone is checked once, shallowest first.
    fn check_subtree_unlocked(&self, tx: &Connection, subtree: &[TaskNode]) -> TreeResult<()> {
        let mut seen = HashSet::new();
        for node in subtree {
            if let Some(milestone) = node.milestone.as_deref() {
                if seen.insert(milestone) {
                    check_unlocked(&self.guard, tx, Some(milestone), &node.id)?;
                }
            }
        }
        Ok(())
    }
}

fn load(tx: &Connection, node_id: &str) -> TreeResult<TaskNode> {
    tx.get_node(node_id)?
        .ok_or_else(|| TreeError::task_not_found(node_id))
}

fn check_version(node: &TaskNode, expected: Option<i64>) -> TreeResult<()> {
    match expected {
        Some(expected) if expected != node.version => {
            Err(TreeError::stale_version(&node.id, expected, node.version))
        }
        _ => Ok(()),
    }
}

/// Version-checked write of a single task.
fn write_node(tx: &Connection, node: &TaskNode, read_version: i64) -> TreeResult<()> {
    if tx.update_node(node, read_version)? {
        return Ok(());
    }
    let actual = tx.get_node(&node.id)?.map(|n| n.version).unwrap_or_default();
    Err(TreeError::stale_version(&node.id, read_version, actual))
}

fn validate_order(order: f64) -> TreeResult<()> {
    if order.is_finite() {
        Ok(())
    } else {
        Err(TreeError::invalid_value("order", "order must be a finite number"))
    }
}

/// One past the highest sibling order, or 0 for the first child.
fn append_order(
    tx: &Connection,
    parent_id: Option<&str>,
    project_id: &str,
    excluding: Option<&str>,
) -> TreeResult<f64> {
    Ok(tx
        .max_sibling_order(parent_id, project_id, excluding)?
        .map_or(0.0, |max| max + 1.0))
}

/// Path rewrites for every descendant of a moved task.
///
/// `subtree` is the pre-move subtree (including the task itself). Each
/// descendant keeps its suffix below the moved task; only the prefix up to
/// and including the moved task's segment changes, and depth shifts by the
/// same amount as the moved task's.
fn plan_cascade(
    before: &TaskNode,
    after: &TaskNode,
    subtree: &[TaskNode],
) -> TreeResult<Vec<PathUpdate>> {
    let old_prefix = subtree_prefix(before);
    let new_prefix = subtree_prefix(after);
    let depth_delta = i64::from(after.depth) - i64::from(before.depth);

    subtree
        .iter()
        .filter(|n| n.id != before.id)
        .map(|n| -> TreeResult<PathUpdate> {
            let path = rebase(&n.path, &old_prefix, &new_prefix).ok_or_else(|| {
                TreeError::conflict(
                    &n.id,
                    format!("path {} is outside subtree {}", n.path, old_prefix),
                )
            })?;
            let depth = u32::try_from(i64::from(n.depth) + depth_delta).map_err(|_| {
                TreeError::invalid_value("depth", format!("negative depth for task {}", n.id))
            })?;
            Ok(PathUpdate {
                id: n.id.clone(),
                path,
                depth,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::depth_of;
    use crate::types::TaskPayload;

    fn node(id: &str, path: &str) -> TaskNode {
        TaskNode {
            id: id.to_string(),
            project_id: "P".to_string(),
            parent_id: crate::path::segments(path).last().map(str::to_string),
            path: path.to_string(),
            depth: depth_of(path),
            order: 0.0,
            seq: 0,
            milestone: None,
            version: 1,
            payload: TaskPayload::titled(id),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn cascade_rewrites_prefix_and_shifts_depth() {
        let before = node("A", "X/Y/");
        let after = TaskNode {
            parent_id: Some("R".to_string()),
            path: "R/".to_string(),
            depth: 1,
            ..before.clone()
        };
        let subtree = vec![before.clone(), node("B", "X/Y/A/"), node("C", "X/Y/A/B/")];

        let updates = plan_cascade(&before, &after, &subtree).unwrap();

        assert_eq!(
            updates,
            vec![
                PathUpdate {
                    id: "B".to_string(),
                    path: "R/A/".to_string(),
                    depth: 2
                },
                PathUpdate {
                    id: "C".to_string(),
                    path: "R/A/B/".to_string(),
                    depth: 3
                },
            ]
        );
    }

    #[test]
    fn cascade_to_root_shortens_paths() {
        let before = node("T2", "T1/");
        let after = TaskNode {
            parent_id: None,
            path: String::new(),
            depth: 0,
            ..before.clone()
        };
        let subtree = vec![before.clone(), node("T3", "T1/T2/")];

        let updates = plan_cascade(&before, &after, &subtree).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].path, "T2/");
        assert_eq!(updates[0].depth, 1);
    }

    #[test]
    fn cascade_rejects_foreign_paths() {
        let before = node("A", "");
        let after = TaskNode {
            path: "R/".to_string(),
            depth: 1,
            ..before.clone()
        };
        let subtree = vec![before.clone(), node("Z", "Q/")];
        assert!(plan_cascade(&before, &after, &subtree).is_err());
    }

    #[test]
    fn stale_version_is_rejected() {
        let n = node("A", "");
        assert!(check_version(&n, None).is_ok());
        assert!(check_version(&n, Some(1)).is_ok());
        let err = check_version(&n, Some(2)).unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.is_transient());
    }

    #[test]
    fn non_finite_orders_are_rejected() {
        assert!(validate_order(1.5).is_ok());
        assert!(validate_order(f64::NAN).is_err());
        assert!(validate_order(f64::INFINITY).is_err());
    }
}
