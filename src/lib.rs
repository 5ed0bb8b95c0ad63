//! Host panel core
//!
//! Backend pieces of a single-host server panel: a task engine that runs
//! shell commands in the background, a closed plugin catalog with dependency
//! checks, retention-based artifact rotation, and the backup, log cutoff and
//! self-update flows built on them.

pub mod backup;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod cutoff;
pub mod error;
pub mod plugin_service;
pub mod process_guard;
pub mod resolver;
pub mod rotation;
pub mod shell;
pub mod store;
pub mod task_engine;
pub mod task_state;
pub mod types;
pub mod updater;

// Re-export main types for convenience
pub use backup::{BackupFlow, BackupReport};
pub use catalog::{Plugin, PluginDescriptor};
pub use config::PanelConfig;
pub use cutoff::{CutoffFlow, CutoffReport};
pub use error::{PanelError, Result};
pub use plugin_service::{PluginListing, PluginService};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use resolver::PluginError;
pub use rotation::{parse_keep_count, rotate};
pub use shell::{BashExecutor, ShellExecutor, ShellOutput};
pub use store::{InstalledPlugin, JsonFileStore, MemoryStore, RecordStore, Task, Website};
pub use task_engine::TaskEngine;
pub use task_state::{TaskStatus, TaskTransitionError};
pub use types::{BackupKind, FlowStep, PanelStatus, PluginOp};
pub use updater::{PanelState, ShellUpdateSource, UpdateCommands, UpdateSource, Updater};
