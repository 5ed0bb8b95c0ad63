//! Record store for tasks, installed plugins, websites and settings.
//!
//! The panel core only needs create/read/update by key, "first or fail" single
//! lookups (absence is `Ok(None)`, never an error) and update-by-filter. Those
//! operations form the [`RecordStore`] trait. Two backends ship with the crate:
//!
//! - [`MemoryStore`]: mutex-guarded state, used by tests and short-lived tools
//! - [`JsonFileStore`]: the same state persisted to a JSON file after every write
//!
//! Writes are serialized per backend (state mutex in memory, an advisory file
//! lock on disk); there are no cross-record transactions.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task_state::TaskStatus;

/// Store failures (infrastructure errors)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store state lock poisoned")]
    Poisoned,

    #[error("Record already exists: {0}")]
    Duplicate(String),
}

/// A unit of deferred shell work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub name: String,
    pub shell: String,
    pub log: PathBuf,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the caller when creating a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub name: String,
    pub shell: String,
    pub log: PathBuf,
}

/// Persisted fact that a plugin is present on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPlugin {
    pub slug: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Website record (only what the maintenance flows read)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Website {
    pub name: String,
    pub path: PathBuf,
}

/// Complete record state held by the built-in backends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    next_task_id: u64,
    #[serde(default)]
    tasks: BTreeMap<u64, Task>,
    #[serde(default)]
    plugins: BTreeMap<String, InstalledPlugin>,
    #[serde(default)]
    websites: BTreeMap<String, Website>,
    #[serde(default)]
    settings: BTreeMap<String, String>,
}

impl StoreState {
    fn create_task(&mut self, new: NewTask) -> Task {
        self.next_task_id += 1;
        let now = Utc::now();
        let task = Task {
            id: self.next_task_id,
            name: new.name,
            shell: new.shell,
            log: new.log,
            status: TaskStatus::Waiting,
            created_at: now,
            updated_at: now,
        };
        self.tasks.insert(task.id, task.clone());
        task
    }

    fn transition_task(&mut self, id: u64, from: &[TaskStatus], to: TaskStatus) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) if from.contains(&task.status) => {
                task.status = to;
                task.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn transition_all(&mut self, from: &[TaskStatus], to: TaskStatus) -> usize {
        let now = Utc::now();
        let mut changed = 0;
        for task in self.tasks.values_mut() {
            if from.contains(&task.status) {
                task.status = to;
                task.updated_at = now;
                changed += 1;
            }
        }
        changed
    }

    fn upsert_plugin(&mut self, slug: &str, version: &str) -> InstalledPlugin {
        let now = Utc::now();
        let plugin = self
            .plugins
            .entry(slug.to_string())
            .and_modify(|p| {
                p.version = version.to_string();
                p.updated_at = now;
            })
            .or_insert_with(|| InstalledPlugin {
                slug: slug.to_string(),
                version: version.to_string(),
                created_at: now,
                updated_at: now,
            });
        plugin.clone()
    }

    fn create_website(&mut self, website: Website) -> Result<(), StoreError> {
        if self.websites.contains_key(&website.name) {
            return Err(StoreError::Duplicate(format!("website {}", website.name)));
        }
        self.websites.insert(website.name.clone(), website);
        Ok(())
    }
}

/// Persistence operations consumed by the panel core.
pub trait RecordStore: Send + Sync {
    /// Persist a new task in Waiting status and assign its id
    fn create_task(&self, task: NewTask) -> Result<Task, StoreError>;

    /// Single task by id
    fn task(&self, id: u64) -> Result<Option<Task>, StoreError>;

    /// All tasks whose status is one of `statuses`, ordered by id
    fn tasks_with_status(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>, StoreError>;

    /// Set `to` on task `id` only if its current status is in `from`.
    /// Returns whether the filter matched.
    fn transition_task(
        &self,
        id: u64,
        from: &[TaskStatus],
        to: TaskStatus,
    ) -> Result<bool, StoreError>;

    /// Set `to` on every task whose status is in `from`; returns the count
    fn transition_all(&self, from: &[TaskStatus], to: TaskStatus) -> Result<usize, StoreError>;

    fn installed_plugins(&self) -> Result<Vec<InstalledPlugin>, StoreError>;

    fn installed_plugin(&self, slug: &str) -> Result<Option<InstalledPlugin>, StoreError>;

    /// Insert or bump the version of an installed plugin
    fn upsert_plugin(&self, slug: &str, version: &str) -> Result<InstalledPlugin, StoreError>;

    /// Returns whether a record was removed
    fn delete_plugin(&self, slug: &str) -> Result<bool, StoreError>;

    fn website(&self, name: &str) -> Result<Option<Website>, StoreError>;

    /// Fails with `Duplicate` if a website with the same name exists
    fn create_website(&self, website: Website) -> Result<(), StoreError>;

    fn setting(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Backing for the built-in stores: anything that can hand out the
/// [`StoreState`] for reading and for an all-or-nothing write.
pub trait StateBackend: Send + Sync {
    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> Result<T, StoreError>;

    fn write<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError>;
}

impl<B: StateBackend> RecordStore for B {
    fn create_task(&self, task: NewTask) -> Result<Task, StoreError> {
        self.write(|s| Ok(s.create_task(task)))
    }

    fn task(&self, id: u64) -> Result<Option<Task>, StoreError> {
        self.read(|s| s.tasks.get(&id).cloned())
    }

    fn tasks_with_status(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>, StoreError> {
        self.read(|s| {
            s.tasks
                .values()
                .filter(|t| statuses.contains(&t.status))
                .cloned()
                .collect()
        })
    }

    fn transition_task(
        &self,
        id: u64,
        from: &[TaskStatus],
        to: TaskStatus,
    ) -> Result<bool, StoreError> {
        self.write(|s| Ok(s.transition_task(id, from, to)))
    }

    fn transition_all(&self, from: &[TaskStatus], to: TaskStatus) -> Result<usize, StoreError> {
        self.write(|s| Ok(s.transition_all(from, to)))
    }

    fn installed_plugins(&self) -> Result<Vec<InstalledPlugin>, StoreError> {
        self.read(|s| s.plugins.values().cloned().collect())
    }

    fn installed_plugin(&self, slug: &str) -> Result<Option<InstalledPlugin>, StoreError> {
        self.read(|s| s.plugins.get(slug).cloned())
    }

    fn upsert_plugin(&self, slug: &str, version: &str) -> Result<InstalledPlugin, StoreError> {
        self.write(|s| Ok(s.upsert_plugin(slug, version)))
    }

    fn delete_plugin(&self, slug: &str) -> Result<bool, StoreError> {
        self.write(|s| Ok(s.plugins.remove(slug).is_some()))
    }

    fn website(&self, name: &str) -> Result<Option<Website>, StoreError> {
        self.read(|s| s.websites.get(name).cloned())
    }

    fn create_website(&self, website: Website) -> Result<(), StoreError> {
        self.write(|s| s.create_website(website))
    }

    fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(|s| s.settings.get(key).cloned())
    }

    fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write(|s| {
            s.settings.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }
}

/// In-memory record store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for MemoryStore {
    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> Result<T, StoreError> {
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&state))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut state)
    }
}

/// Record store persisted as a single JSON document.
///
/// The file is the source of truth: every read loads it, every write loads,
/// applies the change, writes a temporary file and renames it over the store
/// file. Plugin scripts run `panel write-plugin` in a separate process while
/// the parent panel process is still running their task, so nothing may be
/// cached between calls.
///
/// Every call holds a `flock` on the sibling `<file>.lock`: shared for reads,
/// exclusive across load, modify and persist for writes. The lock is taken on
/// a fresh open file each time, so it excludes other handles and threads in
/// this process as well as other processes.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

/// Distinguishes temp files of writers within one process
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `<file><suffix>` next to `path`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

impl JsonFileStore {
    /// Open the store at `path`, creating parent directories if the file does
    /// not exist yet. An existing file must parse.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let store = Self {
            lock_path: sibling(&path, ".lock"),
            path,
        };
        store.read(|_| ())?;
        tracing::debug!("Opened record store at {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self, arg: FlockArg) -> Result<Flock<File>, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|source| StoreError::Io {
                path: self.lock_path.clone(),
                source,
            })?;
        Flock::lock(file, arg).map_err(|(_, errno)| StoreError::Io {
            path: self.lock_path.clone(),
            source: errno.into(),
        })
    }

    fn load(&self) -> Result<StoreState, StoreError> {
        if !self.path.exists() {
            return Ok(StoreState::default());
        }
        let content = fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(state).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let tmp = sibling(
            &self.path,
            &format!(
                ".{}.{}.tmp",
                std::process::id(),
                TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
            ),
        );
        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            StoreError::Io {
                path: self.path.clone(),
                source,
            }
        })
    }
}

impl StateBackend for JsonFileStore {
    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> Result<T, StoreError> {
        let _lock = self.lock(FlockArg::LockShared)?;
        Ok(f(&self.load()?))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _lock = self.lock(FlockArg::LockExclusive)?;
        let mut state = self.load()?;
        let out = f(&mut state)?;
        self.persist(&state)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task(name: &str) -> NewTask {
        NewTask {
            name: name.to_string(),
            shell: "true".to_string(),
            log: PathBuf::from("/tmp/test.log"),
        }
    }

    #[test]
    fn test_task_ids_increase() {
        let store = MemoryStore::new();
        let a = store.create_task(new_task("a")).unwrap();
        let b = store.create_task(new_task("b")).unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.status, TaskStatus::Waiting);
    }

    #[test]
    fn test_missing_task_is_none() {
        let store = MemoryStore::new();
        assert!(store.task(42).unwrap().is_none());
    }

    #[test]
    fn test_transition_task_respects_filter() {
        let store = MemoryStore::new();
        let task = store.create_task(new_task("a")).unwrap();

        assert!(!store
            .transition_task(task.id, &[TaskStatus::Running], TaskStatus::Completed)
            .unwrap());
        assert!(store
            .transition_task(task.id, &[TaskStatus::Waiting], TaskStatus::Running)
            .unwrap());
        assert_eq!(store.task(task.id).unwrap().unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn test_transition_unknown_task_matches_nothing() {
        let store = MemoryStore::new();
        assert!(!store
            .transition_task(9, TaskStatus::ACTIVE, TaskStatus::Failed)
            .unwrap());
    }

    #[test]
    fn test_transition_all_counts() {
        let store = MemoryStore::new();
        let a = store.create_task(new_task("a")).unwrap();
        store.create_task(new_task("b")).unwrap();
        store
            .transition_task(a.id, &[TaskStatus::Waiting], TaskStatus::Running)
            .unwrap();

        let changed = store
            .transition_all(TaskStatus::ACTIVE, TaskStatus::Failed)
            .unwrap();
        assert_eq!(changed, 2);
        assert!(store.tasks_with_status(TaskStatus::ACTIVE).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_plugin_keeps_one_record_per_slug() {
        let store = MemoryStore::new();
        store.upsert_plugin("redis", "7.0").unwrap();
        let bumped = store.upsert_plugin("redis", "7.2").unwrap();

        assert_eq!(bumped.version, "7.2");
        assert_eq!(store.installed_plugins().unwrap().len(), 1);
        assert!(store.delete_plugin("redis").unwrap());
        assert!(!store.delete_plugin("redis").unwrap());
    }

    #[test]
    fn test_duplicate_website_rejected() {
        let store = MemoryStore::new();
        let site = Website {
            name: "blog".to_string(),
            path: PathBuf::from("/www/wwwroot/blog"),
        };
        store.create_website(site.clone()).unwrap();
        assert!(matches!(
            store.create_website(site),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn test_website_record_holds_name_and_path() {
        let site = Website {
            name: "blog".to_string(),
            path: PathBuf::from("/www/wwwroot/blog"),
        };
        assert_eq!(
            serde_json::to_value(&site).unwrap(),
            serde_json::json!({ "name": "blog", "path": "/www/wwwroot/blog" })
        );

        // Records written with extra columns still load
        let legacy: Website = serde_json::from_str(
            r#"{ "name": "blog", "path": "/www/wwwroot/blog", "enabled": false }"#,
        )
        .unwrap();
        assert_eq!(legacy, site);
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("panel.json");

        let id = {
            let store = JsonFileStore::open(&path).unwrap();
            store.upsert_plugin("openresty", "1.25").unwrap();
            store.put_setting("mysql_root_password", "secret").unwrap();
            store.create_task(new_task("persisted")).unwrap().id
        };

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.task(id).unwrap().unwrap().name, "persisted");
        assert_eq!(
            store.installed_plugin("openresty").unwrap().unwrap().version,
            "1.25"
        );
        assert_eq!(
            store.setting("mysql_root_password").unwrap().as_deref(),
            Some("secret")
        );
        // ids keep increasing after reopen
        assert!(store.create_task(new_task("next")).unwrap().id > id);
    }

    #[test]
    fn test_json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_failed_write_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.json");
        let store = JsonFileStore::open(&path).unwrap();
        let site = Website {
            name: "blog".to_string(),
            path: PathBuf::from("/srv/blog"),
        };
        store.create_website(site.clone()).unwrap();
        assert!(store.create_website(site).is_err());
        assert!(store.website("blog").unwrap().is_some());
    }

    #[test]
    fn test_json_store_sees_writes_from_other_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.json");

        let panel = JsonFileStore::open(&path).unwrap();
        let task = panel.create_task(new_task("Install plugin Redis")).unwrap();

        // A second process records the plugin while the task is running
        JsonFileStore::open(&path)
            .unwrap()
            .upsert_plugin("redis", "7.2")
            .unwrap();

        panel
            .transition_task(task.id, &[TaskStatus::Waiting], TaskStatus::Running)
            .unwrap();
        assert!(panel.installed_plugin("redis").unwrap().is_some());
        assert_eq!(
            JsonFileStore::open(&path).unwrap().task(task.id).unwrap().unwrap().status,
            TaskStatus::Running
        );
    }

    #[test]
    fn test_json_store_handles_on_many_threads_keep_every_write() {
        use std::collections::HashSet;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.json");

        let workers: Vec<_> = (0..8)
            .map(|t| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = JsonFileStore::open(&path).unwrap();
                    (0..20)
                        .map(|i| {
                            store.upsert_plugin(&format!("plugin-{t}-{i}"), "1.0").unwrap();
                            store.create_task(new_task("concurrent")).unwrap().id
                        })
                        .collect::<Vec<u64>>()
                })
            })
            .collect();
        let ids: Vec<u64> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();

        let unique: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 160);

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.installed_plugins().unwrap().len(), 160);
        assert_eq!(
            store
                .tasks_with_status(&[TaskStatus::Waiting])
                .unwrap()
                .len(),
            160
        );
        // No temp files left behind
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
