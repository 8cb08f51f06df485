//! CLI command definitions for task-tree
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod milestone;

use clap::{Args, Parser, Subcommand};
use milestone::MilestoneCommand;

/// Task hierarchy engine CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a task, at the root or under a parent
    Create(CreateArgs),

    /// Move a task (and its subtree) under another parent or to the root
    Move(MoveArgs),

    /// Set a task's sibling order
    Reorder(ReorderArgs),

    /// Delete a task and its whole subtree
    Delete(DeleteArgs),

    /// Update task fields or milestone
    Update(UpdateArgs),

    /// Show a task with its ancestors and children
    Show {
        /// Task ID
        id: String,
    },

    /// Print the nested tree under a task, or every tree of a project
    Tree(TreeArgs),

    /// Verify path/depth consistency of a project
    Check {
        /// Project ID
        #[arg(short, long)]
        project: String,
    },

    /// Manage milestones
    #[command(subcommand)]
    Milestone(MilestoneCommand),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Project ID
    #[arg(short, long)]
    pub project: String,

    /// Task title
    #[arg(short, long)]
    pub title: String,

    /// Parent task ID (root task if omitted)
    #[arg(long)]
    pub parent: Option<String>,

    /// Custom task ID (UUID7 generated if omitted)
    #[arg(long)]
    pub id: Option<String>,

    /// Sibling order (appended after existing siblings if omitted)
    #[arg(long, allow_negative_numbers = true)]
    pub order: Option<f64>,

    /// Milestone the task belongs to
    #[arg(long)]
    pub milestone: Option<String>,

    /// Task description
    #[arg(long)]
    pub description: Option<String>,

    /// Assignee (repeatable)
    #[arg(long = "assignee")]
    pub assignees: Vec<String>,
}

#[derive(Args, Debug)]
pub struct MoveArgs {
    /// Task ID
    pub id: String,

    /// New parent task ID
    #[arg(long, conflicts_with = "root", required_unless_present = "root")]
    pub parent: Option<String>,

    /// Move to the project root
    #[arg(long)]
    pub root: bool,

    /// Sibling order under the new parent
    #[arg(long, allow_negative_numbers = true)]
    pub order: Option<f64>,

    /// Fail with a conflict unless the task is at this version
    #[arg(long)]
    pub expect_version: Option<i64>,
}

#[derive(Args, Debug)]
pub struct ReorderArgs {
    /// Task ID
    pub id: String,

    /// New sibling order
    #[arg(allow_negative_numbers = true)]
    pub order: f64,

    /// Fail with a conflict unless the task is at this version
    #[arg(long)]
    pub expect_version: Option<i64>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Task ID
    pub id: String,

    /// Fail with a conflict unless the task is at this version
    #[arg(long)]
    pub expect_version: Option<i64>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Task ID
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long, conflicts_with = "clear_description")]
    pub description: Option<String>,

    /// Remove the description
    #[arg(long)]
    pub clear_description: bool,

    #[arg(long)]
    pub status: Option<String>,

    /// Replace assignees (repeatable)
    #[arg(long = "assignee")]
    pub assignees: Option<Vec<String>>,

    /// Attach to a milestone
    #[arg(long, conflicts_with = "clear_milestone")]
    pub milestone: Option<String>,

    /// Detach from its milestone
    #[arg(long)]
    pub clear_milestone: bool,

    /// Fail with a conflict unless the task is at this version
    #[arg(long)]
    pub expect_version: Option<i64>,
}

#[derive(Args, Debug)]
pub struct TreeArgs {
    /// Root task ID
    #[arg(conflicts_with = "project", required_unless_present = "project")]
    pub id: Option<String>,

    /// Print every tree of this project
    #[arg(short, long)]
    pub project: Option<String>,
}
