//! Task Tree CLI
//!
//! Operator front end for the task hierarchy engine. Every command prints
//! pretty JSON on stdout; failures print an error report on stderr.

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::process::ExitCode;
use task_tree::cli::milestone::MilestoneCommand;
use task_tree::cli::{Cli, Command, UpdateArgs};
use task_tree::config::ConfigLoader;
use task_tree::logging::{self, LogTarget};
use task_tree::types::{MoveTask, NewTask, TaskPatch, TaskPayload};
use task_tree::{Database, QueryService, StoredMilestones, TreeEngine, TreeError};
use tracing::{debug, info};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Exit codes by error class, so scripts can tell rule violations from
/// retryable conflicts and store faults.
fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<TreeError>() {
        Some(e) if e.is_business_rule() => ExitCode::from(2),
        Some(e) if e.is_retryable() => ExitCode::from(3),
        Some(_) => ExitCode::from(4),
        None => ExitCode::FAILURE,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(&LogTarget::parse(&cli.log), cli.verbose) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<TreeError>() {
                Some(tree_err) => match serde_json::to_string_pretty(&tree_err.report()) {
                    Ok(report) => eprintln!("{report}"),
                    Err(_) => eprintln!("error: {tree_err}"),
                },
                None => eprintln!("error: {err:#}"),
            }
            exit_code(&err)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // An explicit --config replaces tier discovery.
    // SAFETY: set before any other threads are spawned.
    if let Some(config_path) = &cli.config {
        unsafe {
            std::env::set_var("TASK_TREE_CONFIG_PATH", config_path);
        }
    }
    let mut loader = ConfigLoader::load()?;
    if let Some(path) = loader.config_path() {
        debug!(path = %path.display(), "using config file");
    }

    let config = loader.config_mut();
    if let Some(db_path) = &cli.database {
        config.store.db_path = db_path.into();
    }
    config.ensure_db_dir()?;

    let db = Database::open_with(&config.store.db_path, &config.store)?;
    info!(db = %config.store.db_path.display(), "database ready");

    let engine = TreeEngine::new(db.clone(), StoredMilestones).with_config(config.engine.clone());
    let queries = QueryService::new(db.clone()).with_config(config.query.clone());

    match cli.command {
        Command::Create(args) => {
            let node = engine.create(NewTask {
                id: args.id,
                project_id: args.project,
                parent_id: args.parent,
                order: args.order,
                milestone: args.milestone,
                payload: TaskPayload {
                    description: args.description,
                    assignees: args.assignees,
                    ..TaskPayload::titled(args.title)
                },
            })?;
            print_json(&node)
        }
        Command::Move(args) => {
            let outcome = engine.move_node(MoveTask {
                node_id: args.id,
                new_parent_id: if args.root { None } else { args.parent },
                order: args.order,
                expected_version: args.expect_version,
            })?;
            print_json(&outcome)
        }
        Command::Reorder(args) => {
            let node = engine.reorder(&args.id, args.order, args.expect_version)?;
            print_json(&node)
        }
        Command::Delete(args) => {
            let outcome = engine.delete(&args.id, args.expect_version)?;
            print_json(&outcome)
        }
        Command::Update(args) => run_update(&engine, args),
        Command::Show { id } => print_json(&queries.detail(&id)?),
        Command::Tree(args) => match (args.id, args.project) {
            (Some(id), _) => print_json(&queries.tree_of(&id)?),
            (None, Some(project)) => print_json(&queries.forest(&project)?),
            (None, None) => anyhow::bail!("either a task ID or --project is required"),
        },
        Command::Check { project } => {
            let violations = queries.check_project(&project)?;
            print_json(&violations)?;
            if !violations.is_empty() {
                anyhow::bail!("{} invariant violation(s) in project {}", violations.len(), project);
            }
            Ok(())
        }
        Command::Milestone(cmd) => match cmd {
            MilestoneCommand::Create { project, name, id } => {
                print_json(&db.create_milestone(id, &project, &name)?)
            }
            MilestoneCommand::Lock { id } => print_json(&db.set_milestone_locked(&id, true)?),
            MilestoneCommand::Unlock { id } => print_json(&db.set_milestone_locked(&id, false)?),
            MilestoneCommand::List { project } => print_json(&db.list_milestones(&project)?),
        },
    }
}

fn run_update(engine: &TreeEngine<StoredMilestones>, args: UpdateArgs) -> Result<()> {
    let patch = TaskPatch {
        title: args.title,
        description: if args.clear_description {
            Some(None)
        } else {
            args.description.map(Some)
        },
        status: args.status,
        assignees: args.assignees,
    };

    let milestone = if args.clear_milestone {
        Some(None)
    } else {
        args.milestone.map(Some)
    };

    let node = engine.update_task(&args.id, patch, milestone, args.expect_version)?;
    print_json(&node)
}
