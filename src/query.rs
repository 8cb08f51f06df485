//! Read-side queries: ancestor chains, subtrees, nested trees and
//! consistency checks.
//!
//! Each query runs in one read transaction, so it sees a single committed
//! snapshot even while writers are active on other connections.

use crate::config::QueryConfig;
use crate::db::{Database, NodeStore};
use crate::error::{TreeError, TreeResult};
use crate::path::{compute_path, segments};
use crate::types::{InvariantViolation, TaskDetail, TaskNode, TaskTree};
use rusqlite::Connection;
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone)]
pub struct QueryService {
    db: Database,
    config: QueryConfig,
}

impl QueryService {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            config: QueryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Refuse nested responses deeper than the configured limit. `nodes`
    /// come sorted by depth, so the last one is the deepest.
    fn check_nesting(&self, top_id: &str, top_depth: u32, nodes: &[TaskNode]) -> TreeResult<()> {
        let depth = nodes
            .last()
            .map_or(0, |deepest| deepest.depth.saturating_sub(top_depth));
        if depth > self.config.max_tree_depth {
            return Err(TreeError::TreeTooDeep {
                id: top_id.to_string(),
                depth,
                limit: self.config.max_tree_depth,
            });
        }
        Ok(())
    }

    fn read<T, F>(&self, f: F) -> TreeResult<T>
    where
        F: FnOnce(&Connection) -> TreeResult<T>,
    {
        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let value = f(&*tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    /// Get a task by ID.
    pub fn get(&self, id: &str) -> TreeResult<TaskNode> {
        self.read(|conn| {
            conn.get_node(id)?
                .ok_or_else(|| TreeError::task_not_found(id))
        })
    }

    /// Ancestors of `node`, root first.
    pub fn ancestors_of(&self, node: &TaskNode) -> TreeResult<Vec<TaskNode>> {
        self.read(|conn| ancestors_in(conn, node))
    }

    /// `node` and all of its descendants.
    pub fn subtree_of(&self, node: &TaskNode) -> TreeResult<Vec<TaskNode>> {
        self.read(|conn| conn.subtree_of(node))
    }

    /// Nested tree rooted at `id`.
    pub fn tree_of(&self, id: &str) -> TreeResult<TaskTree> {
        self.read(|conn| {
            let root = conn
                .get_node(id)?
                .ok_or_else(|| TreeError::task_not_found(id))?;
            let nodes = conn.subtree_of(&root)?;
            self.check_nesting(&root.id, root.depth, &nodes)?;
            let mut forest = build_forest(nodes, root.parent_id.as_deref());
            forest
                .pop()
                .ok_or_else(|| TreeError::task_not_found(id))
        })
    }

    /// Every root task of a project with its nested tree, in sibling order.
    pub fn forest(&self, project_id: &str) -> TreeResult<Vec<TaskTree>> {
        self.read(|conn| {
            let nodes = conn.project_nodes(project_id)?;
            debug!(project = project_id, tasks = nodes.len(), "building project forest");
            self.check_nesting(project_id, 0, &nodes)?;
            Ok(build_forest(nodes, None))
        })
    }

    /// Task detail view: the task, its ancestor chain and its children.
    pub fn detail(&self, id: &str) -> TreeResult<TaskDetail> {
        self.read(|conn| {
            let task = conn
                .get_node(id)?
                .ok_or_else(|| TreeError::task_not_found(id))?;
            let ancestors = ancestors_in(conn, &task)?;
            let children = conn.children_of(Some(&task.id), &task.project_id)?;
            Ok(TaskDetail {
                task,
                ancestors,
                children,
            })
        })
    }

    /// Immediate children of `parent_id` (roots when `None`), in sibling order.
    pub fn children_of(&self, parent_id: Option<&str>, project_id: &str) -> TreeResult<Vec<TaskNode>> {
        self.read(|conn| conn.children_of(parent_id, project_id))
    }

    /// Check the stored path, depth and parent of every task in a project.
    /// An empty result means the project's tree is consistent.
    pub fn check_project(&self, project_id: &str) -> TreeResult<Vec<InvariantViolation>> {
        self.read(|conn| {
            let nodes = conn.project_nodes(project_id)?;
            let by_id: HashMap<&str, &TaskNode> =
                nodes.iter().map(|n| (n.id.as_str(), n)).collect();

            let mut violations = Vec::new();
            for node in &nodes {
                if segments(&node.path).any(|s| s == node.id) {
                    violations.push(InvariantViolation::SelfAncestor {
                        id: node.id.clone(),
                    });
                }

                let expected = match node.parent_id.as_deref() {
                    None => compute_path(None),
                    Some(parent_id) => {
                        let parent = match by_id.get(parent_id) {
                            Some(parent) => (*parent).clone(),
                            // Not in this project: look it up to tell a
                            // dangling reference from a cross-project one.
                            None => match conn.get_node(parent_id)? {
                                Some(parent) => {
                                    violations.push(InvariantViolation::CrossProjectParent {
                                        id: node.id.clone(),
                                        parent_id: parent_id.to_string(),
                                    });
                                    parent
                                }
                                None => {
                                    violations.push(InvariantViolation::MissingParent {
                                        id: node.id.clone(),
                                        parent_id: parent_id.to_string(),
                                    });
                                    continue;
                                }
                            },
                        };
                        compute_path(Some(&parent))
                    }
                };

                let (expected_path, expected_depth) = expected;
                if node.path != expected_path {
                    violations.push(InvariantViolation::PathMismatch {
                        id: node.id.clone(),
                        expected: expected_path,
                        actual: node.path.clone(),
                    });
                }
                if node.depth != expected_depth {
                    violations.push(InvariantViolation::DepthMismatch {
                        id: node.id.clone(),
                        expected: expected_depth,
                        actual: node.depth,
                    });
                }
            }

            Ok(violations)
        })
    }
}

/// Ancestors of `node` root-first, fetched in one batch and put back in
/// path order (batch fetches come back unordered).
pub fn ancestors_in(conn: &Connection, node: &TaskNode) -> TreeResult<Vec<TaskNode>> {
    let ids: Vec<&str> = segments(&node.path).collect();
    let mut fetched: HashMap<String, TaskNode> = conn
        .get_nodes(&ids)?
        .into_iter()
        .map(|n| (n.id.clone(), n))
        .collect();

    ids.iter()
        .map(|id| {
            fetched
                .remove(*id)
                .ok_or_else(|| TreeError::task_not_found(id))
        })
        .collect()
}

/// Nest a flat node list under `top_parent` (`None` for project roots).
///
/// `nodes` must be sorted by depth, then sibling order, as the store returns
/// them; children keep that order. Built bottom-up without recursion, so tree
/// depth is bounded by memory only.
fn build_forest(nodes: Vec<TaskNode>, top_parent: Option<&str>) -> Vec<TaskTree> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut tops = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        if node.parent_id.as_deref() == top_parent {
            tops.push(i);
        } else if let Some(&parent) = node.parent_id.as_deref().and_then(|p| index.get(p)) {
            children[parent].push(i);
        }
    }

    // Parents before children.
    let mut order = Vec::with_capacity(nodes.len());
    let mut pending: Vec<usize> = tops.iter().rev().copied().collect();
    while let Some(i) = pending.pop() {
        order.push(i);
        pending.extend(children[i].iter().rev().copied());
    }

    let mut tasks: Vec<Option<TaskNode>> = nodes.into_iter().map(Some).collect();
    let mut built: Vec<Option<TaskTree>> = tasks.iter().map(|_| None).collect();
    for &i in order.iter().rev() {
        let Some(task) = tasks[i].take() else { continue };
        let kids = children[i].iter().filter_map(|&c| built[c].take()).collect();
        built[i] = Some(TaskTree {
            task,
            children: kids,
        });
    }

    tops.into_iter().filter_map(|i| built[i].take()).collect()
}
