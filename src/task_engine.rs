//! Task execution engine
//!
//! Owns the task lifecycle: tasks are created `Waiting`, handed to a worker
//! thread by [`TaskEngine::schedule`], moved to `Running` when the worker
//! picks them up, and finished as `Completed` or `Failed` depending on the
//! command's exit status. Command output is appended to the task's log file.
//!
//! Scheduling never waits for the command. Callers that need the outcome poll
//! the task record. There is no cancellation and no timeout: a hung command
//! keeps its task `Running` until [`TaskEngine::sweep_stale`] is invoked.
//!
//! Every status change goes through the store's filtered update with the
//! legal predecessor set from [`crate::task_state`], so a task the sweep has
//! already failed stays failed even if its command finishes later.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::Result;
use crate::shell::ShellExecutor;
use crate::store::{NewTask, RecordStore, Task};
use crate::task_state::{TaskStatus, check_transition};

pub struct TaskEngine {
    store: Arc<dyn RecordStore>,
    shell: Arc<dyn ShellExecutor>,
    /// Worker threads that may still be running
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskEngine {
    pub fn new(store: Arc<dyn RecordStore>, shell: Arc<dyn ShellExecutor>) -> Self {
        Self {
            store,
            shell,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Persist a new `Waiting` task. The command is stored verbatim; quoting
    /// is the caller's job.
    pub fn create(
        &self,
        name: impl Into<String>,
        shell: impl Into<String>,
        log: impl Into<PathBuf>,
    ) -> Result<Task> {
        let task = self.store.create_task(NewTask {
            name: name.into(),
            shell: shell.into(),
            log: log.into(),
        })?;
        tracing::info!("Created task {} ({})", task.id, task.name);
        Ok(task)
    }

    /// Run task `id` on a new worker thread and return immediately.
    ///
    /// Scheduling a task that is no longer `Waiting` is a no-op on the worker
    /// side.
    pub fn schedule(&self, id: u64) -> Result<()> {
        let store = Arc::clone(&self.store);
        let shell = Arc::clone(&self.shell);

        let handle = std::thread::Builder::new()
            .name(format!("task-{id}"))
            .spawn(move || execute(store.as_ref(), shell.as_ref(), id))?;

        if let Ok(mut workers) = self.workers.lock() {
            workers.retain(|w| !w.is_finished());
            workers.push(handle);
        }
        Ok(())
    }

    /// Create a task and schedule it.
    ///
    /// A task that cannot be scheduled is failed right away so it does not
    /// sit `Waiting` with no worker behind it.
    pub fn submit(
        &self,
        name: impl Into<String>,
        shell: impl Into<String>,
        log: impl Into<PathBuf>,
    ) -> Result<Task> {
        let task = self.create(name, shell, log)?;
        if let Err(e) = self.schedule(task.id) {
            tracing::error!("Failed to schedule task {}: {}", task.id, e);
            self.fail_unscheduled(task.id);
            return Err(e);
        }
        Ok(task)
    }

    /// Fail task `id` if no worker has picked it up.
    fn fail_unscheduled(&self, id: u64) {
        match self
            .store
            .transition_task(id, &[TaskStatus::Waiting], TaskStatus::Failed)
        {
            Ok(true) => tracing::warn!("Task {} failed without running", id),
            Ok(false) => {}
            Err(e) => tracing::error!("Failed to mark task {} failed: {}", id, e),
        }
    }

    /// Current record for task `id`.
    pub fn task(&self, id: u64) -> Result<Option<Task>> {
        Ok(self.store.task(id)?)
    }

    /// Force every `Waiting` or `Running` task to `Failed`.
    ///
    /// Meant for startup or on-demand recovery after a crash left tasks with
    /// no worker behind them. Returns the number of tasks changed.
    pub fn sweep_stale(&self) -> Result<usize> {
        let changed = self
            .store
            .transition_all(TaskStatus::predecessors(TaskStatus::Failed), TaskStatus::Failed)?;
        if changed > 0 {
            tracing::warn!("Marked {} stale task(s) as failed", changed);
        } else {
            tracing::debug!("No stale tasks");
        }
        Ok(changed)
    }

    /// True if at least one task is `Waiting` or `Running`.
    ///
    /// A task created concurrently with this call may be missed.
    pub fn has_active(&self) -> Result<bool> {
        Ok(!self.store.tasks_with_status(TaskStatus::ACTIVE)?.is_empty())
    }

    /// Block until every worker scheduled so far has finished.
    ///
    /// Short-lived processes call this before exiting so that scheduled
    /// commands are not cut off.
    pub fn wait_idle(&self) {
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for worker in workers {
            let name = worker.thread().name().unwrap_or("task").to_string();
            if worker.join().is_err() {
                tracing::error!("Worker {} panicked", name);
            }
        }
    }
}

/// Worker body for task `id`.
///
/// Errors are logged, never propagated: there is nobody waiting on them.
fn execute(store: &dyn RecordStore, shell: &dyn ShellExecutor, id: u64) {
    let task = match store.task(id) {
        Ok(Some(task)) => task,
        Ok(None) => {
            tracing::warn!("Task {} does not exist", id);
            return;
        }
        Err(e) => {
            tracing::error!("Failed to load task {}: {}", id, e);
            return;
        }
    };

    if let Err(e) = check_transition(id, task.status, TaskStatus::Running) {
        tracing::debug!("Not running task: {}", e);
        return;
    }

    match store.transition_task(
        id,
        TaskStatus::predecessors(TaskStatus::Running),
        TaskStatus::Running,
    ) {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!("Task {} was picked up or swept concurrently", id);
            return;
        }
        Err(e) => {
            tracing::error!("Failed to mark task {} running: {}", id, e);
            return;
        }
    }

    tracing::info!("Task {} running: {}", id, task.name);

    let outcome = match shell.run_logged(&task.shell, &task.log) {
        Ok(out) if out.success => TaskStatus::Completed,
        Ok(out) => {
            tracing::warn!(
                "Task {} command exited with {:?}, see {}",
                id,
                out.exit_code,
                task.log.display()
            );
            TaskStatus::Failed
        }
        Err(e) => {
            tracing::error!("Task {} command could not run: {}", id, e);
            append_to_log(&task, &format!("failed to start command: {e}\n"));
            TaskStatus::Failed
        }
    };

    match store.transition_task(id, TaskStatus::predecessors(outcome), outcome) {
        Ok(true) => tracing::info!("Task {} {}", id, outcome),
        Ok(false) => tracing::warn!(
            "Task {} finished as {} but was already finalized elsewhere",
            id,
            outcome
        ),
        Err(e) => tracing::error!("Failed to record task {} as {}: {}", id, outcome, e),
    }
}

fn append_to_log(task: &Task, line: &str) {
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&task.log)
        .and_then(|mut f| f.write_all(line.as_bytes()));
    if let Err(e) = result {
        tracing::error!("Cannot write to {}: {}", task.log.display(), e);
    }
}
