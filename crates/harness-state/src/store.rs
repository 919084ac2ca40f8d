//! Locked snapshot store.
//!
//! One JSON snapshot exists per (project directory, mode) pair, shared by
//! every process working on that project: the interactive CLI and the
//! detached daemon both read and write
//! `<project>/.aidp/harness/<mode>_state.json`. Writers serialize through
//! an advisory lock file next to the snapshot; readers are lock-free and
//! rely on the writer's atomic rename to never observe a half-written
//! document.
//!
//! Nothing is cached across calls: every logical read re-parses the file
//! so that writes from another process are visible.

use chrono::Utc;
use serde_json::{json, Value};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::StateError;

/// The open-ended snapshot document.
pub type StateMap = serde_json::Map<String, Value>;

/// Directory under the project root that holds harness state.
pub const STATE_DIR: &str = ".aidp/harness";

/// Environment override for the lock acquisition timeout (humantime format).
pub const ENV_LOCK_TIMEOUT: &str = "AIDP_LOCK_TIMEOUT";

/// Environment override for the lock poll interval (humantime format).
pub const ENV_LOCK_POLL_INTERVAL: &str = "AIDP_LOCK_POLL_INTERVAL";

/// Lock acquisition tuning.
///
/// Tests shrink these to sub-second values; operators can override them
/// through [`ENV_LOCK_TIMEOUT`] and [`ENV_LOCK_POLL_INTERVAL`], which are
/// read at acquisition time rather than cached at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    /// How long to poll before giving up with a timeout error.
    pub timeout: Duration,

    /// Sleep between acquisition attempts.
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl LockOptions {
    /// Apply environment overrides on top of these options.
    fn with_env_overrides(&self) -> Self {
        Self {
            timeout: env_duration(ENV_LOCK_TIMEOUT).unwrap_or(self.timeout),
            poll_interval: env_duration(ENV_LOCK_POLL_INTERVAL).unwrap_or(self.poll_interval),
        }
    }
}

/// Read a duration from the environment, ignoring unparseable values.
fn env_duration(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match humantime::parse_duration(&raw) {
        Ok(duration) => Some(duration),
        Err(error) => {
            tracing::warn!(%name, %raw, %error, "ignoring unparseable duration override");
            None
        }
    }
}

/// Held advisory lock; removing the file on drop releases it.
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Poll until the lock file can be created exclusively.
    ///
    /// The file is created with `create_new`, so exactly one process wins
    /// each round; the holder's pid is written into it for diagnostics
    /// when contention has to be debugged by hand.
    fn acquire(path: PathBuf, options: &LockOptions) -> Result<Self, StateError> {
        let options = options.with_env_overrides();
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    tracing::debug!(path = %path.display(), "acquired state lock");
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if started.elapsed() >= options.timeout {
                        return Err(StateError::LockTimeout {
                            path,
                            timeout: options.timeout,
                        });
                    }
                    thread::sleep(options.poll_interval);
                }
                Err(err) => return Err(StateError::io(path, err)),
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), %error, "failed to remove state lock");
        } else {
            tracing::debug!(path = %self.path.display(), "released state lock");
        }
    }
}

/// Persistent snapshot store for one (project directory, mode) pair.
///
/// The snapshot lives at `<project>/.aidp/harness/<mode>_state.json`. An
/// absent file is a valid, expected state and reads as an empty mapping;
/// so does a corrupt one, with a logged warning. Writes always replace
/// the whole document under the advisory lock.
#[derive(Debug, Clone)]
pub struct StateStore {
    project_dir: PathBuf,
    mode: String,
    state_dir: PathBuf,
    lock_options: LockOptions,
    noop: bool,
}

impl StateStore {
    /// Create a store for `mode` within `project_dir`.
    pub fn new(project_dir: impl Into<PathBuf>, mode: impl Into<String>) -> Self {
        let project_dir = project_dir.into();
        let state_dir = project_dir.join(STATE_DIR);
        Self {
            project_dir,
            mode: mode.into(),
            state_dir,
            lock_options: LockOptions::default(),
            noop: false,
        }
    }

    /// Create a store that never touches the filesystem.
    ///
    /// Used for ephemeral contexts such as dry runs: saves and clears
    /// succeed as no-ops, loads return an empty mapping.
    pub fn noop(project_dir: impl Into<PathBuf>, mode: impl Into<String>) -> Self {
        Self {
            noop: true,
            ..Self::new(project_dir, mode)
        }
    }

    /// Replace the lock tuning (environment overrides still apply).
    pub fn with_lock_options(mut self, lock_options: LockOptions) -> Self {
        self.lock_options = lock_options;
        self
    }

    /// The mode this store is scoped to.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// The project directory this store is scoped to.
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Path of the snapshot file.
    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}_state.json", self.mode))
    }

    /// Path of the advisory lock file (absent in steady state).
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}_state.lock", self.mode))
    }

    /// Whether a snapshot file currently exists.
    pub fn has_state(&self) -> bool {
        !self.noop && self.state_path().exists()
    }

    /// Load the snapshot, re-parsing the file on every call.
    ///
    /// Absent and corrupt snapshots both read as an empty mapping; the
    /// corrupt case logs a warning. This never fails.
    pub fn load_state(&self) -> StateMap {
        if self.noop {
            return StateMap::new();
        }
        self.read_snapshot()
    }

    /// Persist `data` merged with fresh metadata.
    ///
    /// The caller's mapping is not mutated; `mode`, `project_dir`, and
    /// `saved_at` are stamped onto a copy. The lock file is gone by the
    /// time this returns, on both the success and the failure path.
    pub fn save_state(&self, data: &StateMap) -> Result<(), StateError> {
        if self.noop {
            return Ok(());
        }
        self.with_lock(|| self.write_snapshot(data.clone()).map(|_| ()))
    }

    /// Read-modify-write the snapshot in one locked cycle.
    ///
    /// Holds the lock across load, `apply`, and write, so two concurrent
    /// updaters can never lose each other's changes. Returns the document
    /// as written (metadata included).
    pub fn update_state<F>(&self, apply: F) -> Result<StateMap, StateError>
    where
        F: FnOnce(&mut StateMap) -> Result<(), StateError>,
    {
        if self.noop {
            let mut doc = StateMap::new();
            apply(&mut doc)?;
            return Ok(doc);
        }
        self.with_lock(|| {
            let mut doc = self.read_snapshot();
            apply(&mut doc)?;
            self.write_snapshot(doc)
        })
    }

    /// Delete the snapshot file; deleting a nonexistent file is a no-op.
    pub fn clear_state(&self) -> Result<(), StateError> {
        if self.noop {
            return Ok(());
        }
        let path = self.state_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StateError::io(path, err)),
        }
    }

    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T, StateError>) -> Result<T, StateError> {
        fs::create_dir_all(&self.state_dir)
            .map_err(|err| StateError::io(self.state_dir.clone(), err))?;
        let guard = LockGuard::acquire(self.lock_path(), &self.lock_options)?;
        let result = f();
        drop(guard);
        result
    }

    fn read_snapshot(&self) -> StateMap {
        let path = self.state_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return StateMap::new(),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "could not read state snapshot");
                return StateMap::new();
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(doc)) => doc,
            Ok(_) => {
                tracing::warn!(path = %path.display(), "state snapshot is not a JSON object, treating as empty");
                StateMap::new()
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "state snapshot is corrupt, treating as empty");
                StateMap::new()
            }
        }
    }

    /// Stamp metadata and write the whole document via temp file + rename.
    fn write_snapshot(&self, mut doc: StateMap) -> Result<StateMap, StateError> {
        doc.insert("mode".to_string(), json!(self.mode));
        doc.insert(
            "project_dir".to_string(),
            json!(self.project_dir.display().to_string()),
        );
        doc.insert("saved_at".to_string(), json!(Utc::now().to_rfc3339()));

        let raw = serde_json::to_string_pretty(&doc)?;
        let path = self.state_path();
        let tmp = self.state_dir.join(format!("{}_state.json.tmp", self.mode));

        fs::write(&tmp, raw).map_err(|err| StateError::io(tmp.clone(), err))?;
        fs::rename(&tmp, &path).map_err(|err| StateError::io(path.clone(), err))?;

        Ok(doc)
    }
}
