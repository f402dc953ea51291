//! Durable port-lease store and the in-memory sandbox record table.
//!
//! The persisted lease file is the single source of truth for which user
//! holds which port. The in-process map in [`FilePortStore`] is only a
//! read-through cache and is rewritten on every mutation. Record state
//! that can be recomputed from the runtime (status, activity) lives in
//! [`SandboxStore`] and is never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::lifecycle::error::{LifecycleError, Result};

/// Operational state of a user's sandbox.
///
/// A closed enum rather than free-form strings so state transitions are
/// exhaustive and compiler-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    NotCreated,
    Starting,
    Running,
    Stopped,
    Error,
    RuntimeUnavailable,
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotCreated => write!(f, "not_created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
            Self::RuntimeUnavailable => write!(f, "runtime_unavailable"),
        }
    }
}

/// Snapshot of everything known about one user's sandbox.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxRecord {
    pub user_id: i64,
    pub assigned_port: Option<u16>,
    pub container_name: String,
    pub workspace_path: PathBuf,
    pub status: SandboxStatus,
    pub last_activity_at: DateTime<Utc>,
}

/// Persistence contract for port assignments.
///
/// The core depends only on these four methods; any durable backend
/// (a file here, a relational table in larger deployments) can satisfy it.
pub trait PortStore: Send + Sync {
    fn get(&self, user_id: i64) -> Result<Option<u16>>;
    fn set(&self, user_id: i64, port: u16) -> Result<()>;
    fn clear(&self, user_id: i64) -> Result<()>;
    fn list_all(&self) -> Result<Vec<(i64, u16)>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LeaseFile {
    #[serde(default)]
    leases: HashMap<String, u16>,
}

/// Toml-file backed [`PortStore`].
pub struct FilePortStore {
    path: PathBuf,
    // Read-through cache of the file contents, rewritten on every mutation.
    cache: Mutex<HashMap<i64, u16>>,
}

impl FilePortStore {
    /// Open (or create) the lease file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let leases = Self::read_file(&path)?;
        Ok(Self {
            path,
            cache: Mutex::new(leases),
        })
    }

    fn read_file(path: &Path) -> Result<HashMap<i64, u16>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            LifecycleError::store(format!("failed to read {}: {e}", path.display()))
        })?;
        let file: LeaseFile = toml::from_str(&content).map_err(|e| {
            LifecycleError::store(format!("failed to parse {}: {e}", path.display()))
        })?;

        let mut leases = HashMap::new();
        for (key, port) in file.leases {
            let user_id = key.parse::<i64>().map_err(|_| {
                LifecycleError::store(format!("invalid user id '{key}' in {}", path.display()))
            })?;
            leases.insert(user_id, port);
        }
        Ok(leases)
    }

    fn write_file(&self, leases: &HashMap<i64, u16>) -> Result<()> {
        let file = LeaseFile {
            leases: leases
                .iter()
                .map(|(uid, port)| (uid.to_string(), *port))
                .collect(),
        };
        let content = toml::to_string_pretty(&file)
            .map_err(|e| LifecycleError::store(format!("failed to serialize leases: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    LifecycleError::store(format!(
                        "failed to create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        fs::write(&self.path, content).map_err(|e| {
            LifecycleError::store(format!("failed to write {}: {e}", self.path.display()))
        })
    }
}

impl PortStore for FilePortStore {
    fn get(&self, user_id: i64) -> Result<Option<u16>> {
        let cache = self
            .cache
            .lock()
            .map_err(|_| LifecycleError::store("lease cache poisoned"))?;
        Ok(cache.get(&user_id).copied())
    }

    fn set(&self, user_id: i64, port: u16) -> Result<()> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| LifecycleError::store("lease cache poisoned"))?;
        let previous = cache.insert(user_id, port);
        if let Err(err) = self.write_file(&cache) {
            // The file stays authoritative: roll the cache back rather
            // than carry a lease the file never recorded.
            match previous {
                Some(port) => cache.insert(user_id, port),
                None => cache.remove(&user_id),
            };
            return Err(err);
        }
        Ok(())
    }

    fn clear(&self, user_id: i64) -> Result<()> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| LifecycleError::store("lease cache poisoned"))?;
        let Some(previous) = cache.remove(&user_id) else {
            return Ok(());
        };
        if let Err(err) = self.write_file(&cache) {
            cache.insert(user_id, previous);
            return Err(err);
        }
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<(i64, u16)>> {
        let cache = self
            .cache
            .lock()
            .map_err(|_| LifecycleError::store("lease cache poisoned"))?;
        let mut all: Vec<_> = cache.iter().map(|(uid, port)| (*uid, *port)).collect();
        all.sort_unstable();
        Ok(all)
    }
}

/// In-memory fields of a record; the port lives in the [`PortStore`].
#[derive(Debug, Clone)]
struct RecordState {
    container_name: String,
    workspace_path: PathBuf,
    status: SandboxStatus,
    last_activity_at: DateTime<Utc>,
}

/// Source of truth for per-user sandbox records.
///
/// Records are created lazily on first use and never deleted; stop/release
/// resets their transient fields so a later start can reuse the last port.
pub struct SandboxStore {
    ports: Box<dyn PortStore>,
    records: RwLock<HashMap<i64, RecordState>>,
}

impl SandboxStore {
    pub fn new(ports: Box<dyn PortStore>) -> Self {
        Self {
            ports,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn ports(&self) -> &dyn PortStore {
        self.ports.as_ref()
    }

    /// Create the record for a user if it does not exist yet.
    /// `last_activity_at` defaults to creation time.
    pub fn ensure_record(&self, user_id: i64, container_name: &str, workspace_path: &Path) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.entry(user_id).or_insert_with(|| RecordState {
            container_name: container_name.to_string(),
            workspace_path: workspace_path.to_path_buf(),
            status: SandboxStatus::NotCreated,
            last_activity_at: Utc::now(),
        });
    }

    /// Refresh the activity timestamp. Called by external collaborators
    /// whenever the user is observed interacting with their sandbox.
    pub fn touch(&self, user_id: i64) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = records.get_mut(&user_id) {
            record.last_activity_at = Utc::now();
        }
    }

    pub fn set_status(&self, user_id: i64, status: SandboxStatus) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = records.get_mut(&user_id) {
            record.status = status;
        }
    }

    pub fn status(&self, user_id: i64) -> SandboxStatus {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .get(&user_id)
            .map(|r| r.status)
            .unwrap_or(SandboxStatus::NotCreated)
    }

    /// Snapshot of one record, with the port read through from the
    /// persisted store.
    pub fn snapshot(&self, user_id: i64) -> Result<Option<SandboxRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let Some(record) = records.get(&user_id) else {
            return Ok(None);
        };
        Ok(Some(SandboxRecord {
            user_id,
            assigned_port: self.ports.get(user_id)?,
            container_name: record.container_name.clone(),
            workspace_path: record.workspace_path.clone(),
            status: record.status,
            last_activity_at: record.last_activity_at,
        }))
    }

    /// Backdate a record's activity timestamp. Idle sweep tests use
    /// this in place of waiting out an hours-scale threshold.
    #[cfg(test)]
    pub fn set_last_activity(&self, user_id: i64, at: DateTime<Utc>) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = records.get_mut(&user_id) {
            record.last_activity_at = at;
        }
    }

    /// Snapshots of every known record, sorted by user id.
    pub fn snapshots(&self) -> Result<Vec<SandboxRecord>> {
        let user_ids: Vec<i64> = {
            let records = self.records.read().unwrap_or_else(|e| e.into_inner());
            records.keys().copied().collect()
        };
        let mut all = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            if let Some(record) = self.snapshot(user_id)? {
                all.push(record);
            }
        }
        all.sort_by_key(|r| r.user_id);
        Ok(all)
    }
}
