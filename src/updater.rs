//! Panel self-update
//!
//! The update is admitted only while no task is waiting or running, since
//! the new release may replace the binary those tasks belong to. While it
//! runs the shared [`PanelState`] reads `Upgrading`; it ends `Normal` on
//! success and `Failed` on error, never left at `Upgrading`.
//!
//! The admission check and the status change are not atomic with respect to
//! task creation: a task created between the two is not seen.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{PanelError, Result};
use crate::shell::{ShellExecutor, shell_quote};
use crate::task_engine::TaskEngine;
use crate::types::{FlowStep, PanelStatus};

/// Setting recording the installed panel release
pub const VERSION_SETTING: &str = "version";

/// Process-wide panel status, starts as `Normal`
#[derive(Debug, Default)]
pub struct PanelState {
    status: AtomicU8,
}

impl PanelState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn status(&self) -> PanelStatus {
        PanelStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn set_status(&self, status: PanelStatus) {
        tracing::debug!("Panel status -> {}", status);
        self.status.store(status as u8, Ordering::SeqCst);
    }
}

/// Where releases come from and how they are applied
pub trait UpdateSource: Send + Sync {
    /// Latest published release
    fn latest_version(&self) -> Result<String>;

    /// Download and install `version` over the running panel
    fn install(&self, version: &str) -> Result<()>;

    /// Restart the panel service so the new binary takes over
    fn restart(&self) -> Result<()>;
}

/// Shell command templates used by [`ShellUpdateSource`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateCommands {
    /// Prints the latest version on its first non-empty stdout line
    pub version_command: String,
    /// `{version}` is replaced by the quoted version
    pub install_command: String,
    pub restart_command: String,
}

impl Default for UpdateCommands {
    fn default() -> Self {
        Self {
            version_command: "bash /www/panel/scripts/update/latest.sh".to_string(),
            install_command: "bash /www/panel/scripts/update/install.sh {version}".to_string(),
            restart_command: "systemctl restart panel".to_string(),
        }
    }
}

pub struct ShellUpdateSource {
    shell: Arc<dyn ShellExecutor>,
    commands: UpdateCommands,
}

impl ShellUpdateSource {
    pub fn new(shell: Arc<dyn ShellExecutor>, commands: UpdateCommands) -> Self {
        Self { shell, commands }
    }
}

impl UpdateSource for ShellUpdateSource {
    fn latest_version(&self) -> Result<String> {
        let out = self.shell.run(&self.commands.version_command)?;
        out.ensure_success(FlowStep::FetchVersion)?;
        out.output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PanelError::step(FlowStep::FetchVersion, "no version reported"))
    }

    fn install(&self, version: &str) -> Result<()> {
        let command = self
            .commands
            .install_command
            .replace("{version}", &shell_quote(version));
        self.shell
            .run(&command)?
            .ensure_success(FlowStep::InstallUpdate)
    }

    fn restart(&self) -> Result<()> {
        self.shell
            .run(&self.commands.restart_command)?
            .ensure_success(FlowStep::Restart)
    }
}

/// Drives one self-update run
pub struct Updater {
    engine: Arc<TaskEngine>,
    source: Arc<dyn UpdateSource>,
    state: Arc<PanelState>,
}

impl Updater {
    pub fn new(
        engine: Arc<TaskEngine>,
        source: Arc<dyn UpdateSource>,
        state: Arc<PanelState>,
    ) -> Self {
        Self {
            engine,
            source,
            state,
        }
    }

    pub fn state(&self) -> &Arc<PanelState> {
        &self.state
    }

    /// Update to the latest release and return its version.
    pub fn run(&self) -> Result<String> {
        if self.engine.has_active()? {
            tracing::warn!("Update refused: tasks are still active");
            return Err(PanelError::UpdateBlocked);
        }

        let version = self.source.latest_version()?;
        tracing::info!("Updating panel to {}", version);

        self.state.set_status(PanelStatus::Upgrading);
        if let Err(e) = self.source.install(&version) {
            self.state.set_status(PanelStatus::Failed);
            tracing::error!("Update to {} failed: {}", version, e);
            return Err(e);
        }
        self.state.set_status(PanelStatus::Normal);

        if let Err(e) = self.engine.store().put_setting(VERSION_SETTING, &version) {
            tracing::warn!("Could not record version {}: {}", version, e);
        }
        tracing::info!("Panel updated to {}", version);

        if let Err(e) = self.source.restart() {
            tracing::error!("Restart after update failed: {}", e);
        }
        Ok(version)
    }
}
