//! Backup flow for websites and databases
//!
//! Each run produces one zip artifact in the target directory and then prunes
//! older artifacts of the same resource through [`crate::rotation::rotate`].
//!
//! | Kind       | Artifact                        | Steps                                   |
//! |------------|---------------------------------|-----------------------------------------|
//! | website    | `<name>_<timestamp>.zip`        | archive document root                   |
//! | mysql      | `<name>_<timestamp>.sql.zip`    | export, compress, remove dump, move     |
//! | postgresql | `<name>_<timestamp>.sql.zip`    | look up, export, compress, remove, move |
//!
//! Any failing step aborts the run with [`PanelError::Step`] naming that step.
//! Work already done is left in place.

use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use serde::Serialize;

use crate::error::{PanelError, Result};
use crate::rotation;
use crate::shell::{ShellExecutor, shell_quote};
use crate::store::RecordStore;
use crate::types::{BackupKind, FlowStep};

/// Setting holding the MySQL root password used for dumps
pub const MYSQL_ROOT_PASSWORD: &str = "mysql_root_password";

/// Suffix shared by every backup artifact, used for pruning
pub const ARTIFACT_SUFFIX: &str = ".zip";

/// Record the MySQL root password used by later dumps.
pub fn write_mysql_password(store: &dyn RecordStore, password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(PanelError::validation("MySQL root password is required"));
    }
    store.put_setting(MYSQL_ROOT_PASSWORD, password)?;
    tracing::info!("MySQL root password updated");
    Ok(())
}

/// Outcome of a successful backup run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    pub artifact: PathBuf,
    pub pruned: Vec<PathBuf>,
}

/// `YYYYmmddHHMMSS`, the stamp embedded in artifact names
pub fn short_timestamp(at: NaiveDateTime) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Resource names end up in file names and rotation prefixes.
pub(crate) fn check_resource_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(PanelError::validation("resource name is required"));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(PanelError::validation(format!(
            "invalid resource name: {name}"
        )));
    }
    Ok(())
}

pub struct BackupFlow {
    store: Arc<dyn RecordStore>,
    shell: Arc<dyn ShellExecutor>,
    temp_dir: PathBuf,
}

impl BackupFlow {
    /// Database dumps are staged in `temp_dir` before being moved.
    pub fn new(
        store: Arc<dyn RecordStore>,
        shell: Arc<dyn ShellExecutor>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            shell,
            temp_dir: temp_dir.into(),
        }
    }

    /// Back up `name` into `dir` and keep the `keep` newest artifacts.
    pub fn run(
        &self,
        kind: BackupKind,
        name: &str,
        dir: &Path,
        keep: usize,
    ) -> Result<BackupReport> {
        self.run_at(kind, name, dir, keep, Local::now().naive_local())
    }

    /// Same as [`run`](Self::run) with an explicit timestamp for the artifact name.
    pub fn run_at(
        &self,
        kind: BackupKind,
        name: &str,
        dir: &Path,
        keep: usize,
        at: NaiveDateTime,
    ) -> Result<BackupReport> {
        check_resource_name(name)?;
        if dir.as_os_str().is_empty() {
            return Err(PanelError::validation("backup directory is required"));
        }

        // Commands cd elsewhere before writing into dir
        let dir = std::path::absolute(dir)
            .map_err(|e| PanelError::step(FlowStep::CreateDirectory, e.to_string()))?;
        let dir = dir.as_path();

        tracing::info!("Starting {} backup of {} into {}", kind, name, dir.display());
        ensure_directory(dir)?;

        let stamp = short_timestamp(at);
        let artifact = match kind {
            BackupKind::Website => self.archive_website(name, dir, &stamp)?,
            BackupKind::Mysql | BackupKind::Postgresql => {
                self.dump_database(kind, name, dir, &stamp)?
            }
        };
        tracing::info!("Backup written to {}", artifact.display());

        let pruned = rotation::rotate(dir, name, ARTIFACT_SUFFIX, keep)?;
        Ok(BackupReport { artifact, pruned })
    }

    fn archive_website(&self, name: &str, dir: &Path, stamp: &str) -> Result<PathBuf> {
        let website = self
            .store
            .website(name)?
            .ok_or_else(|| PanelError::not_found(format!("website {name}")))?;

        let artifact = dir.join(format!("{name}_{stamp}.zip"));
        let command = format!(
            "cd {} && zip -r {} .",
            quote_path(&website.path),
            quote_path(&artifact)
        );
        self.shell.run(&command)?.ensure_success(FlowStep::Archive)?;
        Ok(artifact)
    }

    fn dump_database(
        &self,
        kind: BackupKind,
        name: &str,
        dir: &Path,
        stamp: &str,
    ) -> Result<PathBuf> {
        let dump_name = format!("{name}_{stamp}.sql");
        let zip_name = format!("{dump_name}.zip");
        let dump = self.temp_dir.join(&dump_name);
        let staged = self.temp_dir.join(&zip_name);

        let export = match kind {
            BackupKind::Mysql => self.mysql_export(name, &dump)?,
            _ => {
                self.ensure_postgres_database(name)?;
                postgres_export(name, &dump)
            }
        };
        self.shell.run(&export)?.ensure_success(FlowStep::Export)?;

        let compress = format!(
            "cd {} && zip -r {} {}",
            quote_path(&self.temp_dir),
            shell_quote(&zip_name),
            shell_quote(&dump_name)
        );
        self.shell.run(&compress)?.ensure_success(FlowStep::Compress)?;

        fs::remove_file(&dump)
            .map_err(|e| PanelError::step(FlowStep::RemoveDump, e.to_string()))?;

        let artifact = dir.join(&zip_name);
        move_file(&staged, &artifact)
            .map_err(|e| PanelError::step(FlowStep::Move, e.to_string()))?;
        Ok(artifact)
    }

    fn mysql_export(&self, name: &str, dump: &Path) -> Result<String> {
        let password = self.store.setting(MYSQL_ROOT_PASSWORD)?.unwrap_or_default();
        // MYSQL_PWD is scoped to this one command, never the panel's environment
        Ok(format!(
            "MYSQL_PWD={} mysqldump -uroot {} > {}",
            shell_quote(&password),
            shell_quote(name),
            quote_path(dump)
        ))
    }

    fn ensure_postgres_database(&self, name: &str) -> Result<()> {
        let listing = self.shell.run(r#"su - postgres -c "psql -l""#)?;
        listing.ensure_success(FlowStep::LookupDatabase)?;
        if !postgres_databases(&listing.output).any(|db| db == name) {
            return Err(PanelError::not_found(format!("database {name}")));
        }
        Ok(())
    }
}

fn postgres_export(name: &str, dump: &Path) -> String {
    let inner = format!("pg_dump {}", shell_quote(name));
    format!(
        "su - postgres -c {} > {}",
        shell_quote(&inner),
        quote_path(dump)
    )
}

/// Database names from the first column of `psql -l` output
fn postgres_databases(listing: &str) -> impl Iterator<Item = &str> {
    listing
        .lines()
        .filter(|line| line.contains('|'))
        .filter_map(|line| line.split('|').next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

fn ensure_directory(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)
        .map_err(|e| {
            PanelError::step(
                FlowStep::CreateDirectory,
                format!("{}: {}", dir.display(), e),
            )
        })
}

/// Rename, falling back to copy and delete across filesystems.
pub(crate) fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}
