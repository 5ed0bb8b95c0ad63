//! Panel configuration file handling.
//!
//! The configuration is a single JSON document. Every field has a default,
//! so a missing file or a partial document is valid input.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::updater::UpdateCommands;

/// Where the panel writes its own log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub directory: PathBuf,
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Daily `panel.<date>.log` files kept, today's included
    pub days: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/www/panel/storage/logs"),
            level: "info".to_string(),
            days: 7,
        }
    }
}

impl LogConfig {
    /// Daily rolling `panel.<date>.log` writer in `directory`, pruned to `days` files
    pub fn file_appender(&self) -> Result<RollingFileAppender> {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("panel")
            .filename_suffix("log")
            .max_log_files(self.days)
            .build(&self.directory)
            .with_context(|| format!("Failed to open log directory {:?}", self.directory))
    }
}

/// Panel configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// JSON record store
    pub store_path: PathBuf,
    /// One `<slug>.log` per plugin task
    pub task_log_dir: PathBuf,
    /// Web server access logs, cut by `cutoff`
    pub site_log_dir: PathBuf,
    /// Staging area for database dumps
    pub temp_dir: PathBuf,
    pub log: LogConfig,
    pub update: UpdateCommands,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("/www/panel/storage/panel.json"),
            task_log_dir: PathBuf::from("/tmp"),
            site_log_dir: PathBuf::from("/www/wwwlogs"),
            temp_dir: PathBuf::from("/tmp"),
            log: LogConfig::default(),
            update: UpdateCommands::default(),
        }
    }
}

impl PanelConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise, then validate.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = if path.as_ref().exists() {
            Self::load_from_file(&path)?
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", path.as_ref());
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let paths = [
            ("store_path", &self.store_path),
            ("task_log_dir", &self.task_log_dir),
            ("site_log_dir", &self.site_log_dir),
            ("temp_dir", &self.temp_dir),
            ("log.directory", &self.log.directory),
        ];
        for (field, path) in paths {
            if path.as_os_str().is_empty() {
                anyhow::bail!("{} must be specified", field);
            }
        }

        if self.log.level.trim().is_empty() {
            anyhow::bail!("log.level must be specified");
        }
        if self.log.days == 0 {
            anyhow::bail!("log.days must be at least 1");
        }

        let update = &self.update;
        if update.version_command.trim().is_empty() || update.restart_command.trim().is_empty() {
            anyhow::bail!("update commands must be specified");
        }
        if !update.install_command.contains("{version}") {
            anyhow::bail!("update.install_command must contain {{version}}");
        }

        Ok(())
    }
}
