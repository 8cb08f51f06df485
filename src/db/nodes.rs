//! Task record persistence.
//!
//! [`NodeStore`] is implemented for [`rusqlite::Connection`], so the same
//! methods run on a plain connection for reads and on an open
//! [`rusqlite::Transaction`] (which derefs to a connection) inside the engine.

use super::now_ms;
use crate::error::{TreeError, TreeResult};
use crate::path::{prefix_upper_bound, subtree_prefix};
use crate::types::{PathUpdate, TaskNode, TaskPayload};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

const TASK_COLUMNS: &str = "id, project_id, parent_id, path, depth, sort_order, seq, \
     milestone_id, version, title, description, status, assignees, created_at, updated_at";

pub fn parse_task_row(row: &Row) -> rusqlite::Result<TaskNode> {
    let assignees_json: String = row.get("assignees")?;
    let assignees = serde_json::from_str(&assignees_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            row.as_ref().column_index("assignees").unwrap_or_default(),
            Type::Text,
            Box::new(e),
        )
    })?;

    Ok(TaskNode {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        parent_id: row.get("parent_id")?,
        path: row.get("path")?,
        depth: row.get("depth")?,
        order: row.get("sort_order")?,
        seq: row.get("seq")?,
        milestone: row.get("milestone_id")?,
        version: row.get("version")?,
        payload: TaskPayload {
            title: row.get("title")?,
            description: row.get("description")?,
            status: row.get("status")?,
            assignees,
        },
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Persistence operations over task records.
pub trait NodeStore {
    /// Point lookup.
    fn get_node(&self, id: &str) -> TreeResult<Option<TaskNode>>;

    /// Batch lookup. Result order is unspecified; IDs that do not exist are
    /// simply absent.
    fn get_nodes(&self, ids: &[&str]) -> TreeResult<Vec<TaskNode>>;

    /// Immediate children of `parent_id` (roots when `None`), in sibling order.
    fn children_of(&self, parent_id: Option<&str>, project_id: &str) -> TreeResult<Vec<TaskNode>>;

    /// Root tasks of a project, in sibling order.
    fn roots_of(&self, project_id: &str) -> TreeResult<Vec<TaskNode>> {
        self.children_of(None, project_id)
    }

    /// Highest sibling order under `parent_id`, ignoring `excluding`.
    fn max_sibling_order(
        &self,
        parent_id: Option<&str>,
        project_id: &str,
        excluding: Option<&str>,
    ) -> TreeResult<Option<f64>>;

    /// `node` and every task below it, by path-prefix range scan.
    /// Sorted by depth, then sibling order.
    fn subtree_of(&self, node: &TaskNode) -> TreeResult<Vec<TaskNode>>;

    /// All tasks of a project, sorted by depth, then sibling order.
    fn project_nodes(&self, project_id: &str) -> TreeResult<Vec<TaskNode>>;

    /// Next creation sequence number.
    fn next_seq(&self) -> TreeResult<i64>;

    fn insert_node(&self, node: &TaskNode) -> TreeResult<()>;

    /// Write every mutable field of `node` if the stored version still equals
    /// `expected_version`. The stored version becomes `node.version`.
    /// Returns false when the version check fails.
    fn update_node(&self, node: &TaskNode, expected_version: i64) -> TreeResult<bool>;

    /// Rewrite path and depth for a batch of tasks, bumping their versions.
    fn bulk_upsert_paths(&self, updates: &[PathUpdate]) -> TreeResult<usize>;

    /// Delete `node` and its whole subtree. Returns the number of rows removed.
    fn delete_subtree(&self, node: &TaskNode) -> TreeResult<usize>;
}

impl NodeStore for Connection {
    fn get_node(&self, id: &str) -> TreeResult<Option<TaskNode>> {
        let mut stmt = self.prepare_cached(&format!(
            "SELECT {} FROM tasks WHERE id = ?1",
            TASK_COLUMNS
        ))?;

        Ok(stmt.query_row(params![id], parse_task_row).optional()?)
    }

    fn get_nodes(&self, ids: &[&str]) -> TreeResult<Vec<TaskNode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT {} FROM tasks WHERE id IN ({})",
            TASK_COLUMNS,
            placeholders.join(", ")
        );

        let mut stmt = self.prepare(&sql)?;
        let nodes = stmt
            .query_map(params_from_iter(ids.iter()), parse_task_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(nodes)
    }

    fn children_of(&self, parent_id: Option<&str>, project_id: &str) -> TreeResult<Vec<TaskNode>> {
        let mut stmt = self.prepare_cached(&format!(
            "SELECT {} FROM tasks
             WHERE project_id = ?1 AND parent_id IS ?2
             ORDER BY sort_order, seq",
            TASK_COLUMNS
        ))?;

        let nodes = stmt
            .query_map(params![project_id, parent_id], parse_task_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(nodes)
    }

    fn max_sibling_order(
        &self,
        parent_id: Option<&str>,
        project_id: &str,
        excluding: Option<&str>,
    ) -> TreeResult<Option<f64>> {
        let max: Option<f64> = self.query_row(
            "SELECT MAX(sort_order) FROM tasks
             WHERE project_id = ?1 AND parent_id IS ?2 AND id IS NOT ?3",
            params![project_id, parent_id, excluding],
            |row| row.get(0),
        )?;

        Ok(max)
    }

    fn subtree_of(&self, node: &TaskNode) -> TreeResult<Vec<TaskNode>> {
        let prefix = subtree_prefix(node);
        let upper = prefix_upper_bound(&prefix);

        let mut stmt = self.prepare_cached(&format!(
            "SELECT {} FROM tasks
             WHERE project_id = ?1 AND (id = ?2 OR (path >= ?3 AND path < ?4))
             ORDER BY depth, sort_order, seq",
            TASK_COLUMNS
        ))?;

        let nodes = stmt
            .query_map(
                params![&node.project_id, &node.id, &prefix, &upper],
                parse_task_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!(task_id = %node.id, size = nodes.len(), "loaded subtree");
        Ok(nodes)
    }

    fn project_nodes(&self, project_id: &str) -> TreeResult<Vec<TaskNode>> {
        let mut stmt = self.prepare_cached(&format!(
            "SELECT {} FROM tasks WHERE project_id = ?1 ORDER BY depth, sort_order, seq",
            TASK_COLUMNS
        ))?;

        let nodes = stmt
            .query_map(params![project_id], parse_task_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(nodes)
    }

    fn next_seq(&self) -> TreeResult<i64> {
        let seq: i64 = self.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM tasks", [], |row| {
            row.get(0)
        })?;
        Ok(seq)
    }

    fn insert_node(&self, node: &TaskNode) -> TreeResult<()> {
        let assignees_json = serde_json::to_string(&node.payload.assignees)
            .map_err(|e| TreeError::invalid_value("assignees", e.to_string()))?;

        self.execute(
            "INSERT INTO tasks (
                id, project_id, parent_id, path, depth, sort_order, seq, milestone_id,
                version, title, description, status, assignees, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                &node.id,
                &node.project_id,
                &node.parent_id,
                &node.path,
                node.depth,
                node.order,
                node.seq,
                &node.milestone,
                node.version,
                &node.payload.title,
                &node.payload.description,
                &node.payload.status,
                assignees_json,
                node.created_at,
                node.updated_at,
            ],
        )?;
        Ok(())
    }

    fn update_node(&self, node: &TaskNode, expected_version: i64) -> TreeResult<bool> {
        let assignees_json = serde_json::to_string(&node.payload.assignees)
            .map_err(|e| TreeError::invalid_value("assignees", e.to_string()))?;

        let updated = self.execute(
            "UPDATE tasks SET
                parent_id = ?1, path = ?2, depth = ?3, sort_order = ?4, milestone_id = ?5,
                version = ?6, title = ?7, description = ?8, status = ?9, assignees = ?10,
                updated_at = ?11
            WHERE id = ?12 AND version = ?13",
            params![
                &node.parent_id,
                &node.path,
                node.depth,
                node.order,
                &node.milestone,
                node.version,
                &node.payload.title,
                &node.payload.description,
                &node.payload.status,
                assignees_json,
                node.updated_at,
                &node.id,
                expected_version,
            ],
        )?;

        Ok(updated == 1)
    }

    fn bulk_upsert_paths(&self, updates: &[PathUpdate]) -> TreeResult<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        let now = now_ms();
        let mut stmt = self.prepare_cached(
            "UPDATE tasks SET path = ?1, depth = ?2, version = version + 1, updated_at = ?3
             WHERE id = ?4",
        )?;

        let mut written = 0;
        for update in updates {
            written += stmt.execute(params![&update.path, update.depth, now, &update.id])?;
        }

        debug!(requested = updates.len(), written, "rewrote descendant paths");
        Ok(written)
    }

    fn delete_subtree(&self, node: &TaskNode) -> TreeResult<usize> {
        let prefix = subtree_prefix(node);
        let upper = prefix_upper_bound(&prefix);

        let deleted = self.execute(
            "DELETE FROM tasks
             WHERE project_id = ?1 AND (id = ?2 OR (path >= ?3 AND path < ?4))",
            params![&node.project_id, &node.id, &prefix, &upper],
        )?;

        Ok(deleted)
    }
}
