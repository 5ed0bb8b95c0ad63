//! Website access-log cutoff
//!
//! Archives `<log_dir>/<name>.log` into `<log_dir>/<name>_<timestamp>.log.zip`,
//! truncates the live log in place so the web server keeps its open handle,
//! then prunes old archives of the same site.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use serde::Serialize;

use crate::backup::{check_resource_name, quote_path, short_timestamp};
use crate::error::{PanelError, Result};
use crate::rotation;
use crate::shell::{ShellExecutor, shell_quote};
use crate::store::RecordStore;
use crate::types::FlowStep;

pub const ARCHIVE_SUFFIX: &str = ".log.zip";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CutoffReport {
    pub archive: PathBuf,
    pub pruned: Vec<PathBuf>,
}

pub struct CutoffFlow {
    store: Arc<dyn RecordStore>,
    shell: Arc<dyn ShellExecutor>,
    log_dir: PathBuf,
}

impl CutoffFlow {
    pub fn new(
        store: Arc<dyn RecordStore>,
        shell: Arc<dyn ShellExecutor>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            shell,
            log_dir: log_dir.into(),
        }
    }

    pub fn run(&self, name: &str, keep: usize) -> Result<CutoffReport> {
        self.run_at(name, keep, Local::now().naive_local())
    }

    pub fn run_at(&self, name: &str, keep: usize, at: NaiveDateTime) -> Result<CutoffReport> {
        check_resource_name(name)?;
        if self.store.website(name)?.is_none() {
            return Err(PanelError::not_found(format!("website {name}")));
        }

        // The archive path is handed to zip after it has changed directory
        let log_dir = std::path::absolute(&self.log_dir)?;
        let live_name = format!("{name}.log");
        let live = log_dir.join(&live_name);
        if !live.is_file() {
            return Err(PanelError::not_found(format!("log file {}", live.display())));
        }

        let archive = log_dir.join(format!("{name}_{}{ARCHIVE_SUFFIX}", short_timestamp(at)));
        tracing::info!("Cutting {} into {}", live.display(), archive.display());

        let command = format!(
            "cd {} && zip -r {} {}",
            quote_path(&log_dir),
            quote_path(&archive),
            shell_quote(&live_name)
        );
        self.shell.run(&command)?.ensure_success(FlowStep::Archive)?;

        OpenOptions::new()
            .write(true)
            .open(&live)
            .and_then(|f| f.set_len(0))
            .map_err(|e| PanelError::step(FlowStep::Truncate, e.to_string()))?;

        let pruned = rotation::rotate(&log_dir, name, ARCHIVE_SUFFIX, keep)?;
        Ok(CutoffReport { archive, pruned })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ShellOutput;
    use crate::store::{MemoryStore, Website};
    use chrono::NaiveDate;
    use std::fs;
    use std::path::Path;

    struct ArchivingShell;

    impl ShellExecutor for ArchivingShell {
        // Creates the quoted archive path that follows "zip -r "
        fn run(&self, command: &str) -> Result<ShellOutput> {
            let target = command
                .split("zip -r '")
                .nth(1)
                .and_then(|rest| rest.split('\'').next())
                .unwrap();
            fs::write(target, b"zip").unwrap();
            Ok(ShellOutput {
                output: String::new(),
                exit_code: Some(0),
                success: true,
            })
        }

        fn run_logged(&self, command: &str, _log: &Path) -> Result<ShellOutput> {
            self.run(command)
        }
    }

    struct FailingShell;

    impl ShellExecutor for FailingShell {
        fn run(&self, _command: &str) -> Result<ShellOutput> {
            Ok(ShellOutput {
                output: "zip error: Nothing to do!".into(),
                exit_code: Some(12),
                success: false,
            })
        }

        fn run_logged(&self, command: &str, _log: &Path) -> Result<ShellOutput> {
            self.run(command)
        }
    }

    fn store_with_site(name: &str) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .create_website(Website {
                name: name.into(),
                path: format!("/www/wwwroot/{name}").into(),
            })
            .unwrap();
        store
    }

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap()
    }

    #[test]
    fn test_cutoff_archives_and_truncates() {
        let logs = tempfile::tempdir().unwrap();
        let live = logs.path().join("blog.log");
        fs::write(&live, "GET / 200\n").unwrap();

        let flow = CutoffFlow::new(store_with_site("blog"), Arc::new(ArchivingShell), logs.path());
        let report = flow.run_at("blog", 7, at()).unwrap();

        assert_eq!(report.archive, logs.path().join("blog_20240309000001.log.zip"));
        assert!(report.archive.exists());
        assert!(live.exists());
        assert_eq!(fs::metadata(&live).unwrap().len(), 0);
        assert!(report.pruned.is_empty());
    }

    #[test]
    fn test_cutoff_prunes_archives_only() {
        let logs = tempfile::tempdir().unwrap();
        fs::write(logs.path().join("blog.log"), "x").unwrap();
        fs::write(logs.path().join("blog_20240101000000.log.zip"), "old").unwrap();

        let flow = CutoffFlow::new(store_with_site("blog"), Arc::new(ArchivingShell), logs.path());
        let report = flow.run_at("blog", 0, at()).unwrap();

        assert_eq!(report.pruned.len(), 2);
        assert!(logs.path().join("blog.log").exists());
    }

    #[test]
    fn test_relative_log_dir_is_resolved() {
        let scratch = tempfile::Builder::new()
            .prefix("cutoff-rel")
            .tempdir_in(".")
            .unwrap();
        fs::write(scratch.path().join("blog.log"), "GET / 200\n").unwrap();
        let relative = Path::new(scratch.path().file_name().unwrap()).to_path_buf();

        let flow = CutoffFlow::new(store_with_site("blog"), Arc::new(ArchivingShell), relative);
        let report = flow.run_at("blog", 7, at()).unwrap();

        assert!(report.archive.is_absolute());
        assert_eq!(
            report.archive,
            scratch.path().join("blog_20240309000001.log.zip")
        );
        assert!(report.archive.exists());
        assert_eq!(fs::metadata(scratch.path().join("blog.log")).unwrap().len(), 0);
    }

    #[test]
    fn test_cutoff_unknown_site() {
        let logs = tempfile::tempdir().unwrap();
        let flow = CutoffFlow::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ArchivingShell),
            logs.path(),
        );
        assert!(matches!(flow.run_at("blog", 1, at()), Err(PanelError::NotFound(_))));
    }

    #[test]
    fn test_cutoff_missing_log() {
        let logs = tempfile::tempdir().unwrap();
        let flow = CutoffFlow::new(store_with_site("blog"), Arc::new(ArchivingShell), logs.path());
        assert!(matches!(flow.run_at("blog", 1, at()), Err(PanelError::NotFound(_))));
    }

    #[test]
    fn test_archive_failure_keeps_live_log() {
        let logs = tempfile::tempdir().unwrap();
        let live = logs.path().join("blog.log");
        fs::write(&live, "GET / 200\n").unwrap();

        let flow = CutoffFlow::new(store_with_site("blog"), Arc::new(FailingShell), logs.path());
        let err = flow.run_at("blog", 1, at()).unwrap_err();

        assert!(matches!(err, PanelError::Step { step: FlowStep::Archive, .. }));
        assert_eq!(fs::read_to_string(&live).unwrap(), "GET / 200\n");
    }
}
