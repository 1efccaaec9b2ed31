//! Runtime configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via FSMLINK_CONFIG or --config)
//! 3. Environment variables

use fsmlink_core::{ErrorPolicy, ExecutionController, UnknownPeerPolicy, DEFAULT_MAX_ROUNDS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How machines are run.
    pub execution: ExecutionConfig,
    /// Shell and file settings.
    pub shell: ShellConfig,
    /// Initial values of the run-time guard flags.
    pub guards: BTreeMap<String, bool>,
    /// Default log filter when RUST_LOG is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let mut guards = BTreeMap::new();
        guards.insert("is_system_ready".to_string(), true);
        Self {
            execution: ExecutionConfig::default(),
            shell: ShellConfig::default(),
            guards,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from an explicit path or FSMLINK_CONFIG, then
    /// applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("FSMLINK_CONFIG") {
                Ok(path) => Self::from_file(path)?,
                Err(_) => Self::default(),
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.execution.apply_env_overrides();
        self.shell.apply_env_overrides();
    }

    /// Checks values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.max_rounds == 0 {
            return Err(ConfigError::Validation(
                "execution.max_rounds must be at least 1".to_string(),
            ));
        }
        if let Some(name) = self.guards.keys().find(|k| k.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "guard name '{}' is empty",
                name
            )));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

/// Execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// `basic` aborts a run on the first failure, `robust` logs and continues.
    pub mode: ErrorPolicy,
    /// Round bound for dual runs.
    pub max_rounds: usize,
    /// Handling of directives addressed to machines that are not loaded.
    pub unknown_peer: UnknownPeerPolicy,
    /// Reject `goto` targets the machine does not declare.
    pub strict_goto: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ErrorPolicy::LogAndContinue,
            max_rounds: DEFAULT_MAX_ROUNDS,
            unknown_peer: UnknownPeerPolicy::Drop,
            strict_goto: false,
        }
    }
}

impl ExecutionConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(mode) = std::env::var("FSMLINK_MODE") {
            if let Ok(parsed) = mode.parse() {
                self.mode = parsed;
            }
        }

        if let Ok(rounds) = std::env::var("FSMLINK_MAX_ROUNDS") {
            if let Ok(n) = rounds.parse() {
                self.max_rounds = n;
            }
        }

        if let Ok(policy) = std::env::var("FSMLINK_UNKNOWN_PEER") {
            match policy.to_ascii_lowercase().as_str() {
                "drop" => self.unknown_peer = UnknownPeerPolicy::Drop,
                "fail" => self.unknown_peer = UnknownPeerPolicy::Fail,
                _ => {}
            }
        }
    }

    /// Builds the controller these settings describe.
    pub fn controller(&self) -> ExecutionController {
        ExecutionController::new(self.mode).with_max_rounds(self.max_rounds)
    }
}

/// Shell configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Directory holding transition documents.
    pub directory: PathBuf,
    /// REPL history file.
    pub history_file: Option<PathBuf>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./state_machines"),
            history_file: None,
        }
    }
}

impl ShellConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("FSMLINK_DIR") {
            self.directory = PathBuf::from(dir);
        }
    }

    /// History file, defaulting to `~/.fsmlink_history`.
    pub fn history_path(&self) -> PathBuf {
        self.history_file.clone().unwrap_or_else(|| {
            home::home_dir()
                .map(|h| h.join(".fsmlink_history"))
                .unwrap_or_else(|| PathBuf::from(".fsmlink_history"))
        })
    }
}
