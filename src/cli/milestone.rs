//! Milestone subcommands.
//!
//! Locking and unlocking stand in for the outcome of the sign-off workflow.

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum MilestoneCommand {
    /// Create an unlocked milestone
    Create {
        /// Project ID
        #[arg(short, long)]
        project: String,

        /// Milestone name
        #[arg(short, long)]
        name: String,

        /// Custom milestone ID
        #[arg(long)]
        id: Option<String>,
    },

    /// Lock a milestone, freezing its tasks
    Lock {
        /// Milestone ID
        id: String,
    },

    /// Unlock a milestone
    Unlock {
        /// Milestone ID
        id: String,
    },

    /// List a project's milestones
    List {
        /// Project ID
        #[arg(short, long)]
        project: String,
    },
}
