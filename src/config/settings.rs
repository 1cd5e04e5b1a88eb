use super::ConfigError;
use crate::governance::execution::PollPolicy;
use crate::shared::logging::governance_log_path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_DATABASE_FILE: &str = "governance.db";

fn default_database_file() -> String {
    DEFAULT_DATABASE_FILE.to_string()
}

fn default_auto_submit() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub state_root: PathBuf,
    #[serde(default = "default_database_file")]
    pub database_file: String,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub review: ReviewConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Submit to the execution engine as soon as a request is approved.
    #[serde(default = "default_auto_submit")]
    pub auto_submit: bool,
    #[serde(default)]
    pub poll: PollPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            auto_submit: default_auto_submit(),
            poll: PollPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewConfig {
    #[serde(default)]
    pub require_decline_comment: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationOptions {
    pub require_state_root_exists: bool,
}

impl Settings {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
            database_file: default_database_file(),
            execution: ExecutionConfig::default(),
            review: ReviewConfig::default(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self, options: ValidationOptions) -> Result<(), ConfigError> {
        if !self.state_root.is_absolute() {
            return Err(ConfigError::Settings(
                "`state_root` must be an absolute path".to_string(),
            ));
        }
        if options.require_state_root_exists && !self.state_root.is_dir() {
            return Err(ConfigError::Settings(format!(
                "`state_root` `{}` is missing or not a directory",
                self.state_root.display()
            )));
        }

        let database_file = self.database_file.trim();
        if database_file.is_empty() {
            return Err(ConfigError::Settings(
                "`database_file` must be non-empty".to_string(),
            ));
        }
        if Path::new(database_file).components().count() != 1 {
            return Err(ConfigError::Settings(
                "`database_file` must be a file name under `state_root`".to_string(),
            ));
        }

        self.execution
            .poll
            .validate()
            .map_err(|message| ConfigError::Settings(format!("execution.poll: {message}")))
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_root.join(self.database_file.trim())
    }

    pub fn log_path(&self) -> PathBuf {
        governance_log_path(&self.state_root)
    }
}
