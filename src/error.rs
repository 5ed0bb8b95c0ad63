//! Error handling module for the panel core
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Validation and infrastructure failures propagate to the immediate caller;
//! execution failures of scheduled tasks never appear here, they are recorded
//! as task status and log contents instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::resolver::PluginError;
use crate::store::StoreError;
use crate::types::FlowStep;

/// Main error type for the panel core
#[derive(Error, Debug)]
pub enum PanelError {
    /// IO errors (file operations, process spawn)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid or missing arguments
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced record or file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Plugin dependency or conflict violation
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Record store read/write failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A step of a multi-step maintenance flow failed
    #[error("{step} failed: {message}")]
    Step { step: FlowStep, message: String },

    /// Retention pruning could not delete a file
    #[error("Failed to delete {}: {source}", path.display())]
    Rotation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Self-update refused because tasks are still waiting or running
    #[error("Update blocked: tasks are still waiting or running")]
    UpdateBlocked,

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for panel operations
pub type Result<T> = std::result::Result<T, PanelError>;

// Convenient error constructors
impl PanelError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a flow step error
    pub fn step(step: FlowStep, msg: impl Into<String>) -> Self {
        Self::Step {
            step,
            message: msg.into(),
        }
    }

    /// True for errors the caller caused (bad input, unknown names, conflicts)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::Plugin(_) | Self::UpdateBlocked
        )
    }
}
