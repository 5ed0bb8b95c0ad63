//! Type-safe vocabulary shared by the panel flows
//!
//! These enums replace the stringly-typed arguments of the command-line layer
//! with closed sets that parse once and match exhaustively afterwards.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// What a backup run exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Website document root, archived as-is
    Website,
    /// MySQL database dump
    Mysql,
    /// PostgreSQL database dump
    Postgresql,
}

impl BackupKind {
    /// Database kinds go through export, compress and move steps
    pub fn is_database(self) -> bool {
        matches!(self, Self::Mysql | Self::Postgresql)
    }
}

/// Operation requested against a catalog plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum PluginOp {
    Install,
    Uninstall,
    Update,
}

impl PluginOp {
    /// Task name prefix shown in the task list
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Install => "Install",
            Self::Uninstall => "Uninstall",
            Self::Update => "Update",
        }
    }
}

/// Process-wide panel status, observed by status-reporting callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum PanelStatus {
    #[default]
    Normal = 0,
    Upgrading = 1,
    Failed = 2,
}

impl PanelStatus {
    /// Decode the value stored in an atomic cell
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Upgrading,
            2 => Self::Failed,
            _ => Self::Normal,
        }
    }
}

/// Named steps of the backup, cutoff and update flows, used in error reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FlowStep {
    #[strum(serialize = "create backup directory")]
    CreateDirectory,
    #[strum(serialize = "look up database")]
    LookupDatabase,
    #[strum(serialize = "archive")]
    Archive,
    #[strum(serialize = "export")]
    Export,
    #[strum(serialize = "compress")]
    Compress,
    #[strum(serialize = "remove raw dump")]
    RemoveDump,
    #[strum(serialize = "move artifact")]
    Move,
    #[strum(serialize = "truncate log")]
    Truncate,
    #[strum(serialize = "clean up old artifacts")]
    Cleanup,
    #[strum(serialize = "fetch latest version")]
    FetchVersion,
    #[strum(serialize = "install update")]
    InstallUpdate,
    #[strum(serialize = "restart panel")]
    Restart,
}
