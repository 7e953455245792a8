//! Configuration types.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::process::CommandSpec;

use super::ConfigError;

/// Configuration for one supervised script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Executable to launch.
    #[serde(default)]
    pub path: PathBuf,
    /// Arguments, in order.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Start running as soon as the supervisor is built.
    #[serde(default = "default_autostart")]
    pub autostart: bool,
    /// Piece boundary marker. Empty disables segmentation.
    #[serde(default)]
    pub delimiter: String,
    /// Grace period between SIGTERM and SIGKILL on stop.
    #[serde(default = "default_terminate_timeout_ms")]
    pub terminate_timeout_ms: u64,
    /// Regex that marks stderr output as a syntax error.
    #[serde(default)]
    pub syntax_pattern: Option<String>,
}

fn default_autostart() -> bool {
    true
}

fn default_terminate_timeout_ms() -> u64 {
    5000
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            autostart: default_autostart(),
            delimiter: String::new(),
            terminate_timeout_ms: default_terminate_timeout_ms(),
            syntax_pattern: None,
        }
    }
}

impl ScriptConfig {
    /// Create a configuration for `path` with defaults for everything else.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Check that the configuration can be run.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingPath` if no executable is configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingPath);
        }
        Ok(())
    }

    #[must_use]
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    /// The launch request derived from this configuration.
    #[must_use]
    pub fn command_spec(&self) -> CommandSpec {
        CommandSpec {
            path: self.path.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            working_dir: self.working_dir.clone(),
        }
    }
}
