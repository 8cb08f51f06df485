//! Configuration loader with tier-based merging.

use super::merge::deep_merge_all;
use super::types::Config;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    /// Built-in defaults (lowest priority)
    Defaults = 0,
    /// Project-level config (./.task-tree/)
    Project = 1,
    /// User-level config (~/.task-tree/)
    User = 2,
    /// Environment variables (highest priority)
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Directories searched for `config.yaml`.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub project_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::discover()
    }
}

impl ConfigPaths {
    /// Discover configuration directories from the environment.
    pub fn discover() -> Self {
        // User dir: TASK_TREE_USER_DIR or ~/.task-tree
        let user_dir = std::env::var("TASK_TREE_USER_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".task-tree")));

        // Project dir: TASK_TREE_PROJECT_DIR or $CWD/.task-tree
        let project_dir = std::env::var("TASK_TREE_PROJECT_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from(".task-tree")));

        Self {
            project_dir,
            user_dir,
        }
    }

    /// Create paths with explicit directories.
    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir,
        }
    }

    fn config_file(dir: Option<&Path>) -> Option<PathBuf> {
        dir.map(|d| d.join("config.yaml")).filter(|f| f.exists())
    }
}

/// Loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub paths: ConfigPaths,
    config: Config,
    /// Highest-priority config file that contributed, if any.
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Load configuration from all tiers with proper merging.
    pub fn load() -> Result<Self> {
        Self::load_with_paths(ConfigPaths::discover())
    }

    /// Load configuration with explicit paths.
    pub fn load_with_paths(paths: ConfigPaths) -> Result<Self> {
        // An explicit file replaces tier discovery entirely.
        if let Ok(explicit_path) = std::env::var("TASK_TREE_CONFIG_PATH") {
            let path = PathBuf::from(&explicit_path);
            let mut config = Config::load(&path)
                .with_context(|| format!("failed to load config file {}", path.display()))?;
            Self::apply_env_overrides(&mut config);
            return Ok(Self {
                paths,
                config,
                config_path: Some(path),
            });
        }

        let mut configs: Vec<Value> = vec![serde_json::to_value(Config::default())?];
        let mut config_path = None;

        let tiers = [
            (ConfigTier::Project, ConfigPaths::config_file(paths.project_dir.as_deref())),
            (ConfigTier::User, ConfigPaths::config_file(paths.user_dir.as_deref())),
        ];

        for (tier, file) in tiers {
            let Some(file) = file else { continue };
            match read_yaml(&file) {
                Ok(value) => {
                    debug!(%tier, path = %file.display(), "loaded config tier");
                    configs.push(value);
                    config_path = Some(file);
                }
                Err(e) => warn!(%tier, path = %file.display(), error = %e, "ignoring unreadable config"),
            }
        }

        let merged = deep_merge_all(configs);
        let mut config: Config = serde_json::from_value(merged)?;

        Self::apply_env_overrides(&mut config);

        Ok(Self {
            paths,
            config,
            config_path,
        })
    }

    /// Apply environment variable overrides to config.
    fn apply_env_overrides(config: &mut Config) {
        if let Ok(db_path) = std::env::var("TASK_TREE_DB_PATH") {
            config.store.db_path = PathBuf::from(db_path);
        }

        if let Ok(timeout) = std::env::var("TASK_TREE_BUSY_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(timeout) => config.store.busy_timeout_ms = timeout,
                Err(_) => warn!(value = %timeout, "ignoring invalid TASK_TREE_BUSY_TIMEOUT_MS"),
            }
        }

        if let Ok(retries) = std::env::var("TASK_TREE_MAX_RETRIES") {
            match retries.parse() {
                Ok(retries) => config.engine.max_retries = retries,
                Err(_) => warn!(value = %retries, "ignoring invalid TASK_TREE_MAX_RETRIES"),
            }
        }

        if let Ok(depth) = std::env::var("TASK_TREE_MAX_TREE_DEPTH") {
            match depth.parse() {
                Ok(depth) => config.query.max_tree_depth = depth,
                Err(_) => warn!(value = %depth, "ignoring invalid TASK_TREE_MAX_TREE_DEPTH"),
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

fn read_yaml(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str::<Value>(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_tier_overrides_project_tier() {
        let project = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        std::fs::write(
            project.path().join("config.yaml"),
            "engine:\n  max_retries: 1\n  retry_backoff_ms: 10\n",
        )
        .unwrap();
        std::fs::write(user.path().join("config.yaml"), "engine:\n  max_retries: 6\n").unwrap();

        let loader = ConfigLoader::load_with_paths(ConfigPaths::with_dirs(
            Some(project.path().to_path_buf()),
            Some(user.path().to_path_buf()),
        ))
        .unwrap();

        assert_eq!(loader.config().engine.max_retries, 6);
        assert_eq!(loader.config().engine.retry_backoff_ms, 10);
        assert_eq!(loader.config_path(), Some(user.path().join("config.yaml").as_path()));
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let empty = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load_with_paths(ConfigPaths::with_dirs(
            Some(empty.path().join("nope")),
            None,
        ))
        .unwrap();

        assert_eq!(loader.config().store.pool_size, 4);
        assert!(loader.config_path().is_none());
    }
}
