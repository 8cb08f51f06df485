//! Milestone records and the guard that reads them.

use super::{now_ms, Database};
use crate::error::{TreeError, TreeResult};
use crate::lock_guard::LockGuard;
use crate::path::validate_id;
use crate::types::Milestone;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

fn parse_milestone_row(row: &Row) -> rusqlite::Result<Milestone> {
    let locked: i64 = row.get("locked")?;
    Ok(Milestone {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        name: row.get("name")?,
        locked: locked != 0,
        locked_at: row.get("locked_at")?,
        created_at: row.get("created_at")?,
    })
}

fn get_milestone_internal(conn: &Connection, id: &str) -> TreeResult<Option<Milestone>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, project_id, name, locked, locked_at, created_at
         FROM milestones WHERE id = ?1",
    )?;
    Ok(stmt.query_row(params![id], parse_milestone_row).optional()?)
}

impl Database {
    /// Create a milestone. Milestones start unlocked.
    pub fn create_milestone(
        &self,
        id: Option<String>,
        project_id: &str,
        name: &str,
    ) -> TreeResult<Milestone> {
        let id = match id {
            Some(id) => {
                validate_id(&id)?;
                id
            }
            None => Uuid::now_v7().to_string(),
        };
        let now = now_ms();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO milestones (id, project_id, name, locked, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![&id, project_id, name, now],
            )?;

            Ok(Milestone {
                id: id.clone(),
                project_id: project_id.to_string(),
                name: name.to_string(),
                locked: false,
                locked_at: None,
                created_at: now,
            })
        })
    }

    pub fn get_milestone(&self, id: &str) -> TreeResult<Option<Milestone>> {
        self.with_conn(|conn| get_milestone_internal(conn, id))
    }

    /// Record a sign-off outcome: lock or unlock a milestone.
    pub fn set_milestone_locked(&self, id: &str, locked: bool) -> TreeResult<Milestone> {
        let now = now_ms();

        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE milestones SET locked = ?1, locked_at = ?2 WHERE id = ?3",
                params![locked as i64, locked.then_some(now), id],
            )?;
            if updated == 0 {
                return Err(TreeError::milestone_not_found(id));
            }

            info!(milestone = id, locked, "milestone lock state changed");
            get_milestone_internal(conn, id)?.ok_or_else(|| TreeError::milestone_not_found(id))
        })
    }

    pub fn list_milestones(&self, project_id: &str) -> TreeResult<Vec<Milestone>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, name, locked, locked_at, created_at
                 FROM milestones WHERE project_id = ?1 ORDER BY created_at, id",
            )?;
            let milestones = stmt
                .query_map(params![project_id], parse_milestone_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(milestones)
        })
    }
}

/// Guard backed by the `milestones` table of the task database.
///
/// A task referring to a milestone that has no record is reported as
/// `NotFound` rather than treated as unlocked.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredMilestones;

impl LockGuard for StoredMilestones {
    fn is_locked(&self, store: &Connection, milestone: &str) -> TreeResult<bool> {
        let locked: Option<i64> = store
            .query_row(
                "SELECT locked FROM milestones WHERE id = ?1",
                params![milestone],
                |row| row.get(0),
            )
            .optional()?;

        match locked {
            Some(flag) => Ok(flag != 0),
            None => Err(TreeError::milestone_not_found(milestone)),
        }
    }
}
