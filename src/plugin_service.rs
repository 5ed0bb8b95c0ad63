//! Plugin install/uninstall/update orchestration
//!
//! Validates the request against the installed set, then hands the plugin's
//! command to the task engine. The call returns as soon as the task is
//! scheduled; whether the plugin actually got installed is visible only in
//! the task status and its log file.
//!
//! The installed-plugin records themselves are written by the plugin scripts
//! through the `write-plugin` / `delete-plugin` commands, not by this service
//! on task completion.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::catalog::{self, PluginDescriptor};
use crate::error::{PanelError, Result};
use crate::resolver;
use crate::store::{InstalledPlugin, Task};
use crate::task_engine::TaskEngine;
use crate::types::PluginOp;

/// Catalog entry paired with its installed record, if any
#[derive(Debug, Clone, Serialize)]
pub struct PluginListing {
    pub descriptor: &'static PluginDescriptor,
    pub installed: Option<InstalledPlugin>,
}

pub struct PluginService {
    engine: Arc<TaskEngine>,
    log_dir: PathBuf,
}

impl PluginService {
    /// `log_dir` receives one `<slug>.log` per plugin, shared by all of that
    /// plugin's tasks.
    pub fn new(engine: Arc<TaskEngine>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            log_dir: log_dir.into(),
        }
    }

    pub fn install(&self, slug: &str) -> Result<Task> {
        self.submit(PluginOp::Install, slug)
    }

    pub fn uninstall(&self, slug: &str) -> Result<Task> {
        self.submit(PluginOp::Uninstall, slug)
    }

    pub fn update(&self, slug: &str) -> Result<Task> {
        self.submit(PluginOp::Update, slug)
    }

    /// Log file used by every task of `slug`
    pub fn log_path(&self, slug: &str) -> PathBuf {
        self.log_dir.join(format!("{slug}.log"))
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Validate, create and schedule the task for `op` on `slug`.
    pub fn submit(&self, op: PluginOp, slug: &str) -> Result<Task> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(PanelError::validation("plugin slug is required"));
        }

        let installed = self.installed_slugs()?;
        let plugin = resolver::validate(op, slug, &installed)?;

        let task = self.engine.submit(
            format!("{} plugin {}", op.verb(), plugin.name),
            plugin.command(op),
            self.log_path(plugin.slug),
        )?;
        tracing::info!(
            "Scheduled {} of {} as task {}",
            op,
            plugin.slug,
            task.id
        );
        Ok(task)
    }

    /// Record `slug` as installed at `version` (insert or version bump).
    pub fn write_installed(&self, slug: &str, version: &str) -> Result<InstalledPlugin> {
        let (slug, version) = (slug.trim(), version.trim());
        if slug.is_empty() || version.is_empty() {
            return Err(PanelError::validation("plugin slug and version are required"));
        }
        Ok(self.engine.store().upsert_plugin(slug, version)?)
    }

    /// Remove the installed record for `slug`. Returns whether one existed.
    pub fn delete_installed(&self, slug: &str) -> Result<bool> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(PanelError::validation("plugin slug is required"));
        }
        Ok(self.engine.store().delete_plugin(slug)?)
    }

    /// Every catalog plugin with its installed record.
    pub fn list(&self) -> Result<Vec<PluginListing>> {
        let store = self.engine.store();
        catalog::all()
            .iter()
            .map(|descriptor| {
                Ok(PluginListing {
                    descriptor,
                    installed: store.installed_plugin(descriptor.slug)?,
                })
            })
            .collect()
    }

    fn installed_slugs(&self) -> Result<HashSet<String>> {
        Ok(self
            .engine
            .store()
            .installed_plugins()?
            .into_iter()
            .map(|p| p.slug)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::PluginError;
    use crate::shell::{ShellExecutor, ShellOutput};
    use crate::store::MemoryStore;
    use crate::task_state::TaskStatus;
    use std::sync::Mutex;

    /// Records commands instead of running them
    #[derive(Default)]
    struct RecordingShell {
        commands: Mutex<Vec<(String, PathBuf)>>,
    }

    impl ShellExecutor for RecordingShell {
        fn run(&self, _command: &str) -> Result<ShellOutput> {
            unreachable!()
        }

        fn run_logged(&self, command: &str, log: &Path) -> Result<ShellOutput> {
            self.commands
                .lock()
                .unwrap()
                .push((command.to_string(), log.to_path_buf()));
            Ok(ShellOutput {
                output: String::new(),
                exit_code: Some(0),
                success: true,
            })
        }
    }

    fn service() -> (PluginService, Arc<TaskEngine>, Arc<RecordingShell>) {
        let shell = Arc::new(RecordingShell::default());
        let engine = Arc::new(TaskEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::clone(&shell) as Arc<dyn ShellExecutor>,
        ));
        let service = PluginService::new(Arc::clone(&engine), "/var/log/panel");
        (service, engine, shell)
    }

    #[test]
    fn test_install_schedules_task() {
        let (service, engine, shell) = service();
        let task = service.install("redis").unwrap();

        assert_eq!(task.name, "Install plugin Redis");
        assert_eq!(task.shell, "bash /www/panel/scripts/redis/install.sh");
        assert_eq!(task.log, PathBuf::from("/var/log/panel/redis.log"));

        engine.wait_idle();
        assert_eq!(
            engine.task(task.id).unwrap().unwrap().status,
            TaskStatus::Completed
        );
        let commands = shell.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].1, PathBuf::from("/var/log/panel/redis.log"));
    }

    #[test]
    fn test_install_does_not_record_plugin() {
        let (service, engine, _) = service();
        service.install("redis").unwrap();
        engine.wait_idle();
        assert!(engine.store().installed_plugin("redis").unwrap().is_none());
    }

    #[test]
    fn test_rejected_install_creates_no_task() {
        let (service, engine, _) = service();
        let err = service.install("php81").unwrap_err();
        assert!(matches!(
            err,
            PanelError::Plugin(PluginError::MissingRequirement { .. })
        ));
        assert!(!engine.has_active().unwrap());
        assert!(engine.task(1).unwrap().is_none());
    }

    #[test]
    fn test_uninstall_and_update_use_matching_templates() {
        let (service, engine, _) = service();
        service.write_installed("mysql80", "8.0.36").unwrap();

        let update = service.update("mysql80").unwrap();
        assert_eq!(update.name, "Update plugin MySQL-8.0");
        assert_eq!(update.shell, "bash /www/panel/scripts/mysql/update.sh 80");

        let uninstall = service.uninstall("mysql80").unwrap();
        assert_eq!(uninstall.name, "Uninstall plugin MySQL-8.0");
        assert_eq!(uninstall.log, update.log);
        engine.wait_idle();
    }

    #[test]
    fn test_empty_arguments_rejected() {
        let (service, _, _) = service();
        assert!(matches!(service.install("  "), Err(PanelError::Validation(_))));
        assert!(service.write_installed("redis", "").is_err());
        assert!(service.delete_installed("").is_err());
    }

    #[test]
    fn test_list_reports_installed_versions() {
        let (service, _, _) = service();
        service.write_installed("openresty", "1.25.3").unwrap();

        let listing = service.list().unwrap();
        assert_eq!(listing.len(), catalog::all().len());
        let openresty = listing
            .iter()
            .find(|l| l.descriptor.slug == "openresty")
            .unwrap();
        assert_eq!(openresty.installed.as_ref().unwrap().version, "1.25.3");
        assert!(listing
            .iter()
            .filter(|l| l.descriptor.slug != "openresty")
            .all(|l| l.installed.is_none()));
    }

    #[test]
    fn test_delete_installed() {
        let (service, _, _) = service();
        service.write_installed("redis", "7.2").unwrap();
        assert!(service.delete_installed("redis").unwrap());
        assert!(!service.delete_installed("redis").unwrap());
    }
}
