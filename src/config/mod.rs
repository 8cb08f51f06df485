//! Configuration system.
//!
//! Merges configuration from tiers field by field:
//! 1. **Defaults** - built into the binary
//! 2. **Project** - `$CWD/.task-tree/config.yaml`
//! 3. **User** - `~/.task-tree/config.yaml`
//! 4. **Environment** - variables below
//!
//! ## Environment Variables
//! - `TASK_TREE_CONFIG_PATH` - Explicit config file (replaces tiers 1-3)
//! - `TASK_TREE_DB_PATH` - Database path
//! - `TASK_TREE_BUSY_TIMEOUT_MS` - Store busy timeout
//! - `TASK_TREE_MAX_RETRIES` - Conflict retry budget
//! - `TASK_TREE_USER_DIR` - User config dir (default: `~/.task-tree`)
//! - `TASK_TREE_PROJECT_DIR` - Project config dir (default: `./.task-tree`)

mod loader;
mod merge;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier};
pub use merge::{deep_merge, deep_merge_all};
pub use types::*;
