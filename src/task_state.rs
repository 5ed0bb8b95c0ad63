//! Task Status State Machine
//!
//! Every status change a task goes through is validated here. The engine and
//! the stale-task sweep both derive the legal `from` set for a transition from
//! this module, so a task that reached a terminal status can never leave it.
//!
//! # Status Flow
//!
//! ```text
//! Waiting ──► Running ──► Completed
//!    │           │
//!    └───────────┴──────► Failed
//! ```
//!
//! `Waiting → Failed` and `Running → Failed` are taken either by a failed
//! execution or by the administrative sweep of orphaned tasks.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString};
use thiserror::Error;

/// Status of a persisted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet picked up by a worker
    Waiting,
    /// A worker is executing the shell command
    Running,
    /// Command exited successfully (terminal)
    Completed,
    /// Command failed, could not start, or was swept (terminal)
    Failed,
}

impl TaskStatus {
    /// Statuses that count as in-flight work
    pub const ACTIVE: &'static [TaskStatus] = &[TaskStatus::Waiting, TaskStatus::Running];

    /// Returns true for Completed and Failed
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true for Waiting and Running
    #[inline]
    pub const fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if `next` is a legal successor of `self`
    pub const fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Waiting | Self::Running, Self::Failed)
        )
    }

    /// All statuses from which `next` may be entered
    pub fn predecessors(next: TaskStatus) -> &'static [TaskStatus] {
        match next {
            Self::Waiting => &[],
            Self::Running => &[Self::Waiting],
            Self::Completed => &[Self::Running],
            Self::Failed => Self::ACTIVE,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised when a status change is not allowed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskTransitionError {
    /// Task already reached Completed or Failed
    #[error("Task {id} is already {from} and cannot become {to}")]
    FromTerminalState {
        id: u64,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Transition skips or reverses the lifecycle
    #[error("Task {id} cannot move from {from} to {to}")]
    Illegal {
        id: u64,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// Check a single transition for task `id`.
pub fn check_transition(
    id: u64,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<(), TaskTransitionError> {
    if from.is_terminal() {
        return Err(TaskTransitionError::FromTerminalState { id, from, to });
    }
    if !from.can_transition_to(to) {
        return Err(TaskTransitionError::Illegal { id, from, to });
    }
    Ok(())
}
