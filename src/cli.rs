use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::types::BackupKind;

/// Panel maintenance commands
#[derive(Parser, Debug)]
#[command(name = "panel")]
#[command(about = "Server panel maintenance: plugins, backups, log cutoff and self-update")]
#[command(version)]
pub struct Cli {
    /// Path to the panel configuration file
    #[arg(
        short,
        long,
        global = true,
        default_value = "/www/panel/config/panel.json"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Update the panel to the latest release
    Update,
    /// Mark waiting and running tasks as failed
    CleanTask,
    /// Back up a website or database and prune old backups
    Backup {
        /// website, mysql or postgresql
        kind: BackupKind,
        /// Website or database name
        name: String,
        /// Directory receiving the backup
        dir: PathBuf,
        /// Number of backups to keep (non-numeric or negative keeps none)
        #[arg(allow_hyphen_values = true)]
        save: String,
    },
    /// Archive and truncate a website's access log
    Cutoff {
        /// Website name
        name: String,
        /// Number of archives to keep (non-numeric or negative keeps none)
        #[arg(allow_hyphen_values = true)]
        save: String,
    },
    /// Install a plugin
    InstallPlugin { slug: String },
    /// Uninstall a plugin
    UninstallPlugin { slug: String },
    /// Update a plugin
    UpdatePlugin { slug: String },
    /// Record a plugin as installed (called by plugin scripts)
    WritePlugin { slug: String, version: String },
    /// Remove a plugin's installed record (called by plugin scripts)
    DeletePlugin { slug: String },
    /// Store the MySQL root password used for database backups
    WriteMysqlPassword {
        #[arg(allow_hyphen_values = true)]
        password: String,
    },
    /// Register a website
    WriteSite { name: String, path: PathBuf },
    /// List catalog plugins and installed versions
    Plugins,
    /// Show a task
    Task { id: u64 },
}
