//! Persistent runbook configuration.
//!
//! Settings live in a small JSON file in the standard configuration directory
//! (`~/.config/gcpdiag/runbook.json` on most platforms). Command-line flags are
//! layered on top through [`RunbookConfig::apply_overrides`].

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::expand_tilde;

/// Environment variable allowing callers to override the config file path.
pub const CONFIG_PATH_ENV: &str = "GCPDIAG_CONFIG_PATH";

/// Default filename for the JSON payload.
pub const CONFIG_FILE_NAME: &str = "runbook.json";

/// Default number of times a step may be re-run after a `retest` answer.
pub const DEFAULT_MAX_RETESTS: u32 = 3;

/// Error surfaced when reading or writing the configuration fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Which renderer the engine reports through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// Colorized terminal output with interactive prompts.
    #[default]
    Cli,
    /// Structured events for programmatic callers.
    Api,
}

/// Persisted runbook settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunbookConfig {
    /// Never prompt; mark every remediation as skipped.
    pub auto: bool,
    /// Directory receiving JSON reports for runs with failures.
    pub report_dir: Option<PathBuf>,
    pub interface: InterfaceKind,
    pub color: bool,
    /// Column width used to wrap reason and remediation text.
    pub wrap_width: usize,
    pub max_retests: u32,
}

impl Default for RunbookConfig {
    fn default() -> Self {
        Self {
            auto: false,
            report_dir: None,
            interface: InterfaceKind::Cli,
            color: true,
            wrap_width: 100,
            max_retests: DEFAULT_MAX_RETESTS,
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunbookConfigOverrides {
    pub auto: Option<bool>,
    pub report_dir: Option<PathBuf>,
    pub interface: Option<InterfaceKind>,
    pub color: Option<bool>,
}

impl RunbookConfig {
    /// Loads the config from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&default_config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<RunbookConfig>(&data) {
                Ok(config) => config,
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "Failed to parse runbook config; using defaults"
                    );
                    RunbookConfig::default()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => RunbookConfig::default(),
            Err(error) => return Err(ConfigError::Io(error)),
        };
        config.report_dir = config
            .report_dir
            .take()
            .map(|dir| expand_tilde(&dir.to_string_lossy()));
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn apply_overrides(mut self, overrides: RunbookConfigOverrides) -> Self {
        if let Some(auto) = overrides.auto {
            self.auto = auto;
        }
        if let Some(report_dir) = overrides.report_dir {
            self.report_dir = Some(expand_tilde(&report_dir.to_string_lossy()));
        }
        if let Some(interface) = overrides.interface {
            self.interface = interface;
        }
        if let Some(color) = overrides.color {
            self.color = color;
        }
        self
    }
}

/// Path of the config file, honoring [`CONFIG_PATH_ENV`].
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gcpdiag")
        .join(CONFIG_FILE_NAME)
}
