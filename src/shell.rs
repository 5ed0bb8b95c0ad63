//! Shell command execution
//!
//! The panel core hands fully formed command strings to a [`ShellExecutor`]
//! and only looks at the combined output and the exit status. A non-zero exit
//! and a failure to start are both treated as failure by callers.
//!
//! [`BashExecutor`] is the production implementation: `bash -c <command>` in
//! a fresh process group, registered with the [`ChildRegistry`] for as long
//! as it runs so a panel shutdown takes its commands down with it.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};

use crate::error::{PanelError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use crate::types::FlowStep;

/// Result of a finished shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    /// Captured stdout followed by stderr. Empty for logged runs, whose
    /// output went to the log file.
    pub output: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the command exited with status 0.
    pub success: bool,
}

impl ShellOutput {
    /// Turn a non-zero exit into a step failure carrying the command output
    pub fn ensure_success(&self, step: FlowStep) -> Result<()> {
        if self.success {
            return Ok(());
        }
        let code = self.exit_code.unwrap_or(-1);
        let detail = self.output.trim();
        if detail.is_empty() {
            Err(PanelError::step(step, format!("exited with code {code}")))
        } else {
            Err(PanelError::step(
                step,
                format!("exited with code {code}: {detail}"),
            ))
        }
    }
}

/// Command-execution collaborator.
pub trait ShellExecutor: Send + Sync {
    /// Run `command` and capture its combined output.
    fn run(&self, command: &str) -> Result<ShellOutput>;

    /// Run `command` with stdout and stderr appended to `log`.
    fn run_logged(&self, command: &str, log: &Path) -> Result<ShellOutput>;
}

/// Runs commands through `bash -c` in their own process group.
#[derive(Debug, Default, Clone, Copy)]
pub struct BashExecutor;

impl BashExecutor {
    pub fn new() -> Self {
        Self
    }

    fn command(command: &str) -> Command {
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .in_new_process_group();
        cmd
    }

    /// Spawn, register the pid while the child runs, and wait for it.
    fn supervise(mut cmd: Command) -> Result<Output> {
        let child: Child = cmd.spawn()?;
        let pid = child.id();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }

        let output = child.wait_with_output();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }

        Ok(output?)
    }
}

impl ShellExecutor for BashExecutor {
    fn run(&self, command: &str) -> Result<ShellOutput> {
        tracing::debug!("run: {}", command);

        let mut cmd = Self::command(command);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let output = Self::supervise(cmd)?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ShellOutput {
            output: combined,
            exit_code: output.status.code(),
            success: output.status.success(),
        })
    }

    fn run_logged(&self, command: &str, log: &Path) -> Result<ShellOutput> {
        tracing::debug!("run_logged: {} >> {}", command, log.display());

        if let Some(parent) = log.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let stdout = OpenOptions::new().create(true).append(true).open(log)?;
        let stderr = stdout.try_clone()?;

        let mut cmd = Self::command(command);
        cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
        let output = Self::supervise(cmd)?;

        Ok(ShellOutput {
            output: String::new(),
            exit_code: output.status.code(),
            success: output.status.success(),
        })
    }
}

/// Quote `value` for safe inclusion in a `bash -c` string.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_stdout_and_stderr() {
        let out = BashExecutor::new().run("echo out; echo err >&2").unwrap();
        assert!(out.success);
        assert_eq!(out.exit_code, Some(0));
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[test]
    fn test_run_reports_exit_code() {
        let out = BashExecutor::new().run("exit 3").unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert!(out.ensure_success(FlowStep::Archive).is_err());
    }

    #[test]
    fn test_run_logged_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs").join("redis.log");
        let shell = BashExecutor::new();

        shell.run_logged("echo first", &log).unwrap();
        let out = shell.run_logged("echo second >&2; exit 1", &log).unwrap();

        assert!(!out.success);
        let content = fs::read_to_string(&log).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");

        let out = BashExecutor::new()
            .run(&format!("printf %s {}", shell_quote("a b'c")))
            .unwrap();
        assert_eq!(out.output, "a b'c");
    }

    #[test]
    fn test_ensure_success_includes_output() {
        let out = ShellOutput {
            output: "Device not found\n".to_string(),
            exit_code: Some(1),
            success: false,
        };
        let err = out.ensure_success(FlowStep::Export).unwrap_err();
        assert_eq!(
            err.to_string(),
            "export failed: exited with code 1: Device not found"
        );
    }
}
