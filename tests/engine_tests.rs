//! Integration tests for the mutation engine.
//!
//! These tests run the engine against an in-memory SQLite database.
//! Tests are organized by operation.

use std::sync::Arc;
use task_tree::db::{Database, NodeStore};
use task_tree::error::{Entity, ErrorCode, MoveRejection};
use task_tree::types::{MoveTask, NewTask, TaskNode, TaskPatch};
use task_tree::{MemoryLockGuard, StoredMilestones, TreeEngine, TreeError};

/// Helper to create a fresh in-memory database for testing.
fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn setup_engine() -> TreeEngine<StoredMilestones> {
    TreeEngine::new(setup_db(), StoredMilestones)
}

/// Create a task with a fixed ID in project `P`.
fn add<G: task_tree::LockGuard>(
    engine: &TreeEngine<G>,
    id: &str,
    parent: Option<&str>,
) -> TaskNode {
    let mut cmd = NewTask::new("P", format!("Task {}", id)).with_id(id);
    if let Some(parent) = parent {
        cmd = cmd.under(parent);
    }
    engine.create(cmd).expect("Failed to create task")
}

fn get<G: task_tree::LockGuard>(engine: &TreeEngine<G>, id: &str) -> TaskNode {
    engine.queries().get(id).expect("Failed to get task")
}

/// (id, parent, path, depth, version) of every task in project `P`.
fn snapshot<G: task_tree::LockGuard>(
    engine: &TreeEngine<G>,
) -> Vec<(String, Option<String>, String, u32, i64)> {
    let mut rows: Vec<_> = engine
        .database()
        .with_conn(|conn| conn.project_nodes("P"))
        .expect("Failed to list project")
        .into_iter()
        .map(|n| (n.id, n.parent_id, n.path, n.depth, n.version))
        .collect();
    rows.sort();
    rows
}

fn assert_consistent<G: task_tree::LockGuard>(engine: &TreeEngine<G>) {
    let violations = engine.queries().check_project("P").expect("Failed to check");
    assert!(violations.is_empty(), "violations: {:?}", violations);
}

mod create_tests {
    use super::*;

    #[test]
    fn root_task_has_empty_path() {
        let engine = setup_engine();

        let task = add(&engine, "A", None);

        assert_eq!(task.path, "");
        assert_eq!(task.depth, 0);
        assert_eq!(task.version, 1);
        assert_eq!(task.order, 0.0);
        assert!(task.is_root());
        assert_eq!(task.payload.status, "open");
    }

    #[test]
    fn children_extend_parent_path() {
        let engine = setup_engine();
        add(&engine, "A", None);

        let b = add(&engine, "B", Some("A"));
        let c = add(&engine, "C", Some("B"));

        assert_eq!(b.path, "A/");
        assert_eq!(b.depth, 1);
        assert_eq!(b.parent_id.as_deref(), Some("A"));
        assert_eq!(c.path, "A/B/");
        assert_eq!(c.depth, 2);
    }

    #[test]
    fn siblings_are_appended_in_creation_order() {
        let engine = setup_engine();
        add(&engine, "A", None);

        let orders: Vec<f64> = ["x", "y", "z"]
            .iter()
            .map(|id| add(&engine, id, Some("A")).order)
            .collect();

        assert_eq!(orders, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn explicit_order_is_kept_and_ties_break_by_creation() {
        let engine = setup_engine();
        add(&engine, "A", None);
        engine
            .create(NewTask::new("P", "late").with_id("late").under("A").at_order(5.0))
            .unwrap();
        engine
            .create(NewTask::new("P", "first").with_id("first").under("A").at_order(1.0))
            .unwrap();
        engine
            .create(NewTask::new("P", "tie").with_id("tie").under("A").at_order(1.0))
            .unwrap();

        let ids: Vec<String> = engine
            .queries()
            .children_of(Some("A"), "P")
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();

        assert_eq!(ids, vec!["first", "tie", "late"]);
    }

    #[test]
    fn generated_ids_are_uuids() {
        let engine = setup_engine();

        let task = engine.create(NewTask::new("P", "untitled")).unwrap();

        assert_eq!(task.id.len(), 36);
        assert!(uuid::Uuid::parse_str(&task.id).is_ok());
    }

    #[test]
    fn missing_parent_is_not_found() {
        let engine = setup_engine();

        let err = engine
            .create(NewTask::new("P", "orphan").under("ghost"))
            .unwrap_err();

        assert!(matches!(
            err,
            TreeError::NotFound {
                entity: Entity::Parent,
                ..
            }
        ));
        assert!(snapshot(&engine).is_empty());
    }

    #[test]
    fn parent_in_another_project_is_not_found() {
        let engine = setup_engine();
        engine
            .create(NewTask::new("Q", "elsewhere").with_id("Q1"))
            .unwrap();

        let err = engine
            .create(NewTask::new("P", "child").under("Q1"))
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let engine = setup_engine();
        add(&engine, "A", None);

        let err = engine.create(NewTask::new("P", "again").with_id("A")).unwrap_err();

        assert!(matches!(err, TreeError::InvalidField { field: "id", .. }));
    }

    #[test]
    fn invalid_fields_are_rejected() {
        let engine = setup_engine();

        let empty_title = engine.create(NewTask::new("P", "  ")).unwrap_err();
        let slash_id = engine
            .create(NewTask::new("P", "t").with_id("a/b"))
            .unwrap_err();
        let nan_order = engine
            .create(NewTask::new("P", "t").at_order(f64::NAN))
            .unwrap_err();
        let no_project = engine.create(NewTask::new("", "t")).unwrap_err();

        for err in [empty_title, slash_id, nan_order, no_project] {
            assert_eq!(err.code(), ErrorCode::InvalidFieldValue);
        }
        assert!(snapshot(&engine).is_empty());
    }
}

mod move_tests {
    use super::*;

    #[test]
    fn move_cascades_paths_to_descendants() {
        let engine = setup_engine();
        add(&engine, "R", None);
        add(&engine, "A", None);
        add(&engine, "B", Some("A"));
        add(&engine, "C", Some("B"));

        let outcome = engine.move_node(MoveTask::under("A", "R")).unwrap();

        assert_eq!(outcome.previous_parent_id, None);
        assert_eq!(outcome.previous_path, "");
        assert_eq!(outcome.descendants_updated, 2);
        assert_eq!(outcome.node.path, "R/");
        assert_eq!(outcome.node.depth, 1);
        assert_eq!(outcome.node.version, 2);

        let b = get(&engine, "B");
        let c = get(&engine, "C");
        assert_eq!((b.path.as_str(), b.depth), ("R/A/", 2));
        assert_eq!((c.path.as_str(), c.depth), ("R/A/B/", 3));
        assert_eq!(b.version, 2);
        assert_eq!(c.version, 2);
        assert_consistent(&engine);
    }

    #[test]
    fn move_to_root_shortens_paths() {
        let engine = setup_engine();
        add(&engine, "T1", None);
        add(&engine, "T2", Some("T1"));
        add(&engine, "T3", Some("T2"));

        let outcome = engine.move_node(MoveTask::to_root("T2")).unwrap();

        assert_eq!(outcome.previous_parent_id.as_deref(), Some("T1"));
        assert!(outcome.node.is_root());
        assert_eq!(outcome.node.path, "");
        let t3 = get(&engine, "T3");
        assert_eq!((t3.path.as_str(), t3.depth), ("T2/", 1));
        assert_consistent(&engine);
    }

    #[test]
    fn moved_task_is_appended_after_new_siblings() {
        let engine = setup_engine();
        add(&engine, "R", None);
        add(&engine, "r1", Some("R"));
        add(&engine, "r2", Some("R"));
        add(&engine, "A", None);

        let moved = engine.move_node(MoveTask::under("A", "R")).unwrap().node;

        assert_eq!(moved.order, 2.0);
    }

    #[test]
    fn move_under_current_parent_goes_last() {
        let engine = setup_engine();
        add(&engine, "A", None);
        add(&engine, "x", Some("A"));
        add(&engine, "y", Some("A"));

        let moved = engine.move_node(MoveTask::under("x", "A")).unwrap().node;
        assert_eq!(moved.order, 2.0);

        let moved = engine.move_node(MoveTask::under("x", "A")).unwrap().node;
        assert_eq!(moved.order, 2.0);
    }

    #[test]
    fn explicit_order_is_used() {
        let engine = setup_engine();
        add(&engine, "R", None);
        add(&engine, "A", None);

        let moved = engine
            .move_node(MoveTask::under("A", "R").at_order(-3.5))
            .unwrap()
            .node;

        assert_eq!(moved.order, -3.5);
    }

    #[test]
    fn self_parent_is_rejected_without_writes() {
        let engine = setup_engine();
        add(&engine, "A", None);
        add(&engine, "B", Some("A"));
        let before = snapshot(&engine);

        let err = engine.move_node(MoveTask::under("A", "A")).unwrap_err();

        assert!(matches!(
            err,
            TreeError::InvalidMove {
                reason: MoveRejection::SelfParent,
                ..
            }
        ));
        assert_eq!(snapshot(&engine), before);
    }

    #[test]
    fn move_into_own_subtree_is_a_cycle() {
        let engine = setup_engine();
        add(&engine, "A", None);
        add(&engine, "B", Some("A"));
        add(&engine, "C", Some("B"));
        let before = snapshot(&engine);

        let err = engine.move_node(MoveTask::under("A", "C")).unwrap_err();

        assert!(matches!(
            err,
            TreeError::InvalidMove {
                reason: MoveRejection::Cycle,
                ..
            }
        ));
        assert_eq!(snapshot(&engine), before);
        assert_consistent(&engine);
    }

    #[test]
    fn cross_project_move_is_rejected() {
        let engine = setup_engine();
        add(&engine, "A", None);
        engine.create(NewTask::new("Q", "other").with_id("Q1")).unwrap();

        let err = engine.move_node(MoveTask::under("A", "Q1")).unwrap_err();

        assert!(matches!(
            err,
            TreeError::InvalidMove {
                reason: MoveRejection::CrossProject,
                ..
            }
        ));
        assert_eq!(get(&engine, "A").project_id, "P");
    }

    #[test]
    fn missing_task_is_reported_before_move_rules() {
        let engine = setup_engine();

        let err = engine.move_node(MoveTask::under("ghost", "ghost")).unwrap_err();

        assert!(matches!(
            err,
            TreeError::NotFound {
                entity: Entity::Task,
                ..
            }
        ));
    }

    #[test]
    fn missing_parent_is_not_found() {
        let engine = setup_engine();
        add(&engine, "A", None);

        let err = engine.move_node(MoveTask::under("A", "ghost")).unwrap_err();

        assert!(matches!(
            err,
            TreeError::NotFound {
                entity: Entity::Parent,
                ..
            }
        ));
    }

    #[test]
    fn sibling_ids_sharing_a_prefix_are_not_descendants() {
        let engine = setup_engine();
        add(&engine, "R", None);
        add(&engine, "A", None);
        add(&engine, "A1", Some("A"));
        add(&engine, "AB", None);
        add(&engine, "AB1", Some("AB"));

        // "AB" is not below "A", so this is a legal move.
        let outcome = engine.move_node(MoveTask::under("AB", "A")).unwrap();
        assert_eq!(outcome.descendants_updated, 1);
        assert_eq!(get(&engine, "AB1").path, "A/AB/");

        // Moving it back out only touches AB's subtree.
        let outcome = engine.move_node(MoveTask::to_root("AB")).unwrap();
        assert_eq!(outcome.descendants_updated, 1);
        assert_eq!(get(&engine, "AB1").path, "AB/");

        let outcome = engine.move_node(MoveTask::under("A", "R")).unwrap();
        assert_eq!(outcome.descendants_updated, 1);
        assert_eq!(get(&engine, "A1").path, "R/A/");
        assert_eq!(get(&engine, "AB1").path, "AB/");
        assert_consistent(&engine);
    }
}

mod reorder_tests {
    use super::*;

    #[test]
    fn reorder_changes_sibling_position() {
        let engine = setup_engine();
        add(&engine, "A", None);
        add(&engine, "x", Some("A"));
        add(&engine, "y", Some("A"));
        add(&engine, "z", Some("A"));

        let z = engine.reorder("z", 0.5, None).unwrap();
        assert_eq!(z.order, 0.5);
        assert_eq!(z.version, 2);

        let ids: Vec<String> = engine
            .queries()
            .children_of(Some("A"), "P")
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["x", "z", "y"]);

        // Siblings are not renumbered.
        assert_eq!(get(&engine, "y").order, 1.0);
        assert_eq!(get(&engine, "y").version, 1);
    }

    #[test]
    fn reorder_rejects_non_finite_order() {
        let engine = setup_engine();
        add(&engine, "A", None);

        let err = engine.reorder("A", f64::INFINITY, None).unwrap_err();

        assert_eq!(err.code(), ErrorCode::InvalidFieldValue);
        assert_eq!(get(&engine, "A").order, 0.0);
    }

    #[test]
    fn reorder_missing_task_is_not_found() {
        let engine = setup_engine();

        let err = engine.reorder("ghost", 1.0, None).unwrap_err();

        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}

mod delete_tests {
    use super::*;

    #[test]
    fn delete_removes_whole_subtree() {
        let engine = setup_engine();
        add(&engine, "T1", None);
        add(&engine, "T2", Some("T1"));
        add(&engine, "T3", Some("T2"));

        let outcome = engine.delete("T2", None).unwrap();

        assert_eq!(outcome.deleted_count, 2);
        assert_eq!(outcome.deleted_ids, vec!["T2", "T3"]);
        assert!(engine.queries().get("T1").is_ok());
        assert_eq!(engine.queries().get("T3").unwrap_err().code(), ErrorCode::NotFound);
        assert_consistent(&engine);
    }

    #[test]
    fn delete_leaf_removes_one() {
        let engine = setup_engine();
        add(&engine, "A", None);
        add(&engine, "B", Some("A"));

        let outcome = engine.delete("B", None).unwrap();

        assert_eq!(outcome.deleted_count, 1);
        assert!(engine.queries().children_of(Some("A"), "P").unwrap().is_empty());
    }

    #[test]
    fn delete_does_not_touch_prefix_sharing_siblings() {
        let engine = setup_engine();
        add(&engine, "A", None);
        add(&engine, "A1", Some("A"));
        add(&engine, "AB", None);
        add(&engine, "AB1", Some("AB"));

        let outcome = engine.delete("A", None).unwrap();

        assert_eq!(outcome.deleted_count, 2);
        let remaining: Vec<String> = snapshot(&engine).into_iter().map(|r| r.0).collect();
        assert_eq!(remaining, vec!["AB", "AB1"]);
    }

    #[test]
    fn delete_missing_task_is_not_found() {
        let engine = setup_engine();

        let err = engine.delete("ghost", None).unwrap_err();

        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}

mod update_tests {
    use super::*;

    #[test]
    fn patch_changes_only_given_fields() {
        let engine = setup_engine();
        engine
            .create(NewTask {
                payload: task_tree::types::TaskPayload {
                    description: Some("draft".to_string()),
                    ..task_tree::types::TaskPayload::titled("Write docs")
                },
                ..NewTask::new("P", "ignored").with_id("A")
            })
            .unwrap();

        let updated = engine
            .update_payload(
                "A",
                TaskPatch {
                    status: Some("done".to_string()),
                    assignees: Some(vec!["ana".to_string()]),
                    ..TaskPatch::default()
                },
                Some(1),
            )
            .unwrap();

        assert_eq!(updated.payload.title, "Write docs");
        assert_eq!(updated.payload.description.as_deref(), Some("draft"));
        assert_eq!(updated.payload.status, "done");
        assert_eq!(updated.payload.assignees, vec!["ana"]);
        assert_eq!(updated.version, 2);
        assert_eq!(get(&engine, "A"), updated);
    }

    #[test]
    fn description_can_be_cleared() {
        let engine = setup_engine();
        add(&engine, "A", None);
        engine
            .update_payload(
                "A",
                TaskPatch {
                    description: Some(Some("notes".to_string())),
                    ..TaskPatch::default()
                },
                None,
            )
            .unwrap();

        let cleared = engine
            .update_payload(
                "A",
                TaskPatch {
                    description: Some(None),
                    ..TaskPatch::default()
                },
                None,
            )
            .unwrap();

        assert_eq!(cleared.payload.description, None);
        assert_eq!(cleared.version, 3);
    }

    #[test]
    fn empty_patch_is_a_no_op() {
        let engine = setup_engine();
        add(&engine, "A", None);

        let same = engine.update_payload("A", TaskPatch::default(), None).unwrap();

        assert_eq!(same.version, 1);
    }

    #[test]
    fn empty_title_is_rejected() {
        let engine = setup_engine();
        add(&engine, "A", None);

        let err = engine
            .update_payload(
                "A",
                TaskPatch {
                    title: Some(String::new()),
                    ..TaskPatch::default()
                },
                None,
            )
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::InvalidFieldValue);
    }

    #[test]
    fn fields_and_milestone_change_in_one_version() {
        let engine = setup_engine();
        engine
            .database()
            .create_milestone(Some("m2".to_string()), "P", "Sprint 2")
            .unwrap();
        add(&engine, "A", None);

        let updated = engine
            .update_task(
                "A",
                TaskPatch {
                    title: Some("Renamed".to_string()),
                    ..TaskPatch::default()
                },
                Some(Some("m2".to_string())),
                Some(1),
            )
            .unwrap();

        assert_eq!(updated.payload.title, "Renamed");
        assert_eq!(updated.milestone.as_deref(), Some("m2"));
        assert_eq!(updated.version, 2);
        assert_eq!(get(&engine, "A"), updated);
    }
}

mod lock_tests {
    use super::*;

    /// Engine with task `X` in milestone `m1`, task `Y` free, and `m1` locked.
    fn locked_fixture() -> TreeEngine<StoredMilestones> {
        let engine = setup_engine();
        let db = engine.database();
        db.create_milestone(Some("m1".to_string()), "P", "Sprint 1")
            .unwrap();
        engine
            .create(NewTask::new("P", "frozen").with_id("X").in_milestone("m1"))
            .unwrap();
        add(&engine, "X1", Some("X"));
        add(&engine, "Y", None);
        db.set_milestone_locked("m1", true).unwrap();
        engine
    }

    fn assert_locked(result: Result<impl std::fmt::Debug, TreeError>) {
        match result {
            Err(TreeError::Locked { milestone, .. }) => assert_eq!(milestone, "m1"),
            other => panic!("expected Locked, got {:?}", other),
        }
    }

    #[test]
    fn locked_milestone_blocks_every_mutation() {
        let engine = locked_fixture();
        let before = snapshot(&engine);

        assert_locked(engine.create(NewTask::new("P", "new").under("X")));
        assert_locked(engine.create(NewTask::new("P", "new").in_milestone("m1")));
        assert_locked(engine.move_node(MoveTask::under("X", "Y")));
        assert_locked(engine.move_node(MoveTask::under("Y", "X")));
        assert_locked(engine.reorder("X", 9.0, None));
        assert_locked(engine.delete("X", None));
        assert_locked(engine.update_payload(
            "X",
            TaskPatch {
                title: Some("renamed".to_string()),
                ..TaskPatch::default()
            },
            None,
        ));
        assert_locked(engine.assign_milestone("X", None, None));
        assert_locked(engine.assign_milestone("Y", Some("m1".to_string()), None));

        assert_eq!(snapshot(&engine), before);
    }

    #[test]
    fn locked_report_names_milestone() {
        let engine = locked_fixture();

        let report = engine.delete("X", None).unwrap_err().report();

        assert_eq!(report.code, ErrorCode::Locked);
        assert_eq!(report.milestone.as_deref(), Some("m1"));
    }

    #[test]
    fn unlocking_allows_mutation_again() {
        let engine = locked_fixture();
        engine.database().set_milestone_locked("m1", false).unwrap();

        engine.move_node(MoveTask::under("X", "Y")).unwrap();

        assert_eq!(get(&engine, "X1").path, "Y/X/");
    }

    #[test]
    fn locked_descendant_blocks_ancestor_move_and_delete() {
        let engine = locked_fixture();
        engine.database().set_milestone_locked("m1", false).unwrap();
        add(&engine, "Top", None);
        engine.move_node(MoveTask::under("X", "Top")).unwrap();
        engine.database().set_milestone_locked("m1", true).unwrap();
        let before = snapshot(&engine);

        assert_locked(engine.delete("Top", None));
        assert_locked(engine.move_node(MoveTask::under("Top", "Y")));

        assert_eq!(snapshot(&engine), before);
    }

    #[test]
    fn unlocked_tasks_beside_a_locked_one_are_free() {
        let engine = locked_fixture();

        engine.reorder("Y", 4.0, None).unwrap();
        engine.delete("Y", None).unwrap();
    }

    #[test]
    fn update_into_locked_milestone_writes_nothing() {
        let engine = locked_fixture();
        let before = get(&engine, "Y");

        assert_locked(engine.update_task(
            "Y",
            TaskPatch {
                title: Some("New".to_string()),
                ..TaskPatch::default()
            },
            Some(Some("m1".to_string())),
            None,
        ));

        let after = get(&engine, "Y");
        assert_eq!(after.payload.title, "Task Y");
        assert_eq!(after.milestone, None);
        assert_eq!(after, before);
    }

    #[test]
    fn unknown_milestone_is_not_found() {
        let engine = setup_engine();

        let err = engine
            .create(NewTask::new("P", "t").in_milestone("ghost"))
            .unwrap_err();

        assert!(matches!(
            err,
            TreeError::NotFound {
                entity: Entity::Milestone,
                ..
            }
        ));
    }

    #[test]
    fn lock_state_is_read_on_every_call() {
        let guard = Arc::new(MemoryLockGuard::new());
        let engine = TreeEngine::new(setup_db(), guard.clone());
        engine
            .create(NewTask::new("P", "t").with_id("A").in_milestone("m1"))
            .unwrap();

        guard.lock("m1");
        assert!(matches!(
            engine.reorder("A", 1.0, None),
            Err(TreeError::Locked { .. })
        ));

        guard.unlock("m1");
        assert_eq!(engine.reorder("A", 1.0, None).unwrap().order, 1.0);
    }

    #[test]
    fn milestones_round_trip_through_the_store() {
        let db = setup_db();
        db.create_milestone(Some("m1".to_string()), "P", "Sprint 1")
            .unwrap();
        db.create_milestone(None, "P", "Sprint 2").unwrap();
        db.create_milestone(None, "Q", "Other").unwrap();

        let locked = db.set_milestone_locked("m1", true).unwrap();
        assert!(locked.locked);
        assert!(locked.locked_at.is_some());

        let unlocked = db.set_milestone_locked("m1", false).unwrap();
        assert!(!unlocked.locked);
        assert!(unlocked.locked_at.is_none());

        assert_eq!(db.list_milestones("P").unwrap().len(), 2);
        assert_eq!(
            db.set_milestone_locked("ghost", true).unwrap_err().code(),
            ErrorCode::NotFound
        );
    }
}

mod version_tests {
    use super::*;

    #[test]
    fn stale_version_is_a_conflict_without_writes() {
        let engine = setup_engine();
        add(&engine, "R", None);
        add(&engine, "A", None);
        engine.reorder("A", 3.0, None).unwrap();
        let before = snapshot(&engine);

        let err = engine
            .move_node(MoveTask::under("A", "R").expecting(1))
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::Conflict);
        assert!(err.is_retryable());
        assert!(!err.is_transient());
        assert_eq!(snapshot(&engine), before);
    }

    #[test]
    fn current_version_is_accepted() {
        let engine = setup_engine();
        add(&engine, "A", None);
        add(&engine, "B", Some("A"));

        engine.reorder("B", 2.0, Some(1)).unwrap();
        let outcome = engine.move_node(MoveTask::to_root("B").expecting(2)).unwrap();
        assert_eq!(outcome.node.version, 3);

        let err = engine.delete("B", Some(2)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);
        engine.delete("B", Some(3)).unwrap();
    }

    #[test]
    fn cascade_bumps_descendant_versions() {
        let engine = setup_engine();
        add(&engine, "A", None);
        add(&engine, "B", Some("A"));
        add(&engine, "C", Some("B"));

        engine.move_node(MoveTask::to_root("B")).unwrap();

        // A caller holding C at version 1 must re-read after the cascade.
        let err = engine.reorder("C", 1.0, Some(1)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);
        assert_eq!(get(&engine, "C").version, 2);
    }
}

mod scenario_tests {
    use super::*;

    #[test]
    fn chain_move_then_delete() {
        let engine = setup_engine();
        add(&engine, "T1", None);
        let t2 = add(&engine, "T2", Some("T1"));
        let t3 = add(&engine, "T3", Some("T2"));
        assert_eq!((t2.path.as_str(), t2.depth), ("T1/", 1));
        assert_eq!((t3.path.as_str(), t3.depth), ("T1/T2/", 2));

        engine.move_node(MoveTask::to_root("T2")).unwrap();
        assert_eq!(get(&engine, "T2").path, "");
        assert_eq!(get(&engine, "T3").path, "T2/");
        assert_eq!(get(&engine, "T3").depth, 1);

        let err = engine.move_node(MoveTask::under("T2", "T3")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMove);

        let outcome = engine.delete("T2", None).unwrap();
        assert_eq!(outcome.deleted_count, 2);

        let forest = engine.queries().forest("P").unwrap();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].task.id, "T1");
        assert!(forest[0].children.is_empty());
    }

    /// Small deterministic generator so the sequence is reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn below(&mut self, n: usize) -> usize {
            (self.next() % n as u64) as usize
        }
    }

    #[test]
    fn random_operations_keep_paths_consistent() {
        let engine = setup_engine();
        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
        let mut live: Vec<String> = Vec::new();
        let mut next_id = 0;

        for _ in 0..400 {
            let op = if live.is_empty() { 0 } else { rng.below(10) };
            match op {
                0..=3 => {
                    let id = format!("n{}", next_id);
                    next_id += 1;
                    let mut cmd = NewTask::new("P", id.clone()).with_id(id.clone());
                    if !live.is_empty() && rng.below(4) != 0 {
                        cmd = cmd.under(live[rng.below(live.len())].clone());
                    }
                    engine.create(cmd).unwrap();
                    live.push(id);
                }
                4..=7 => {
                    let node = live[rng.below(live.len())].clone();
                    let cmd = if rng.below(5) == 0 {
                        MoveTask::to_root(node)
                    } else {
                        MoveTask::under(node, live[rng.below(live.len())].clone())
                    };
                    match engine.move_node(cmd) {
                        Ok(_) => {}
                        Err(TreeError::InvalidMove { reason, .. }) => {
                            assert!(matches!(
                                reason,
                                MoveRejection::SelfParent | MoveRejection::Cycle
                            ));
                        }
                        Err(other) => panic!("unexpected move error: {:?}", other),
                    }
                }
                8 => {
                    let node = live[rng.below(live.len())].clone();
                    engine.reorder(&node, rng.below(20) as f64 - 10.0, None).unwrap();
                }
                _ => {
                    let node = live[rng.below(live.len())].clone();
                    let outcome = engine.delete(&node, None).unwrap();
                    live.retain(|id| !outcome.deleted_ids.contains(id));
                }
            }

            assert_consistent(&engine);
        }

        let total: usize = engine
            .queries()
            .forest("P")
            .unwrap()
            .iter()
            .map(|tree| tree.size())
            .sum();
        assert_eq!(total, live.len());
    }
}
