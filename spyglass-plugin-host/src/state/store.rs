//! Snapshot persistence
//!
//! Stores exported atom snapshots keyed by instance identity so a freshly
//! constructed instance can import the state its predecessor left behind.

use super::Snapshot;
use serde::{Deserialize, Serialize};
use spyglass_plugin_api::InstanceId;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

/// Error type for snapshot store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read snapshot store: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse snapshot store: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Trait for snapshot storage
///
/// Host integrations implement this to choose where exported snapshots live.
pub trait SnapshotStore: Send + Sync {
    /// Load the last saved snapshot for an instance
    fn load(&self, instance: &InstanceId) -> Result<Option<Snapshot>, StoreError>;

    /// Save a snapshot for an instance
    fn save(&self, instance: &InstanceId, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Remove the stored snapshot for an instance
    fn remove(&self, instance: &InstanceId) -> Result<(), StoreError>;

    /// List instance keys with a stored snapshot
    fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// Persistent file data structure
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotFileData {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<String>,
    instances: HashMap<String, Snapshot>,
}

impl SnapshotFileData {
    fn new() -> Self {
        Self {
            version: 1,
            saved_at: None,
            instances: HashMap::new(),
        }
    }
}

/// File-based snapshot store
///
/// Keeps all instances in one JSON file at a configurable location.
/// Default: `~/.config/<app>/snapshots.json`
pub struct FileSnapshotStore {
    path: PathBuf,
    data: RwLock<SnapshotFileData>,
}

impl FileSnapshotStore {
    /// Create a file-based store at the specified path
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let data = if path.exists() {
            let file = File::open(&path)?;
            let reader = BufReader::new(file);
            serde_json::from_reader(reader)?
        } else {
            SnapshotFileData::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Create a store in the default location for an application
    pub fn default_for_app(app_name: &str) -> Result<Self, StoreError> {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        let path = config_dir.join(app_name).join("snapshots.json");
        Self::new(path)
    }

    /// Get the store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = self.data.read().unwrap();
        let file = File::create(&self.path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &*data)?;
        Ok(())
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, instance: &InstanceId) -> Result<Option<Snapshot>, StoreError> {
        let data = self.data.read().unwrap();
        Ok(data.instances.get(&instance.to_string()).cloned())
    }

    fn save(&self, instance: &InstanceId, snapshot: &Snapshot) -> Result<(), StoreError> {
        {
            let mut data = self.data.write().unwrap();
            data.saved_at = Some(chrono::Utc::now().to_rfc3339());
            data.instances
                .insert(instance.to_string(), snapshot.clone());
        }
        self.persist()
    }

    fn remove(&self, instance: &InstanceId) -> Result<(), StoreError> {
        {
            let mut data = self.data.write().unwrap();
            data.instances.remove(&instance.to_string());
        }
        self.persist()
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().unwrap();
        Ok(data.instances.keys().cloned().collect())
    }
}

impl std::fmt::Debug for FileSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSnapshotStore")
            .field("path", &self.path)
            .finish()
    }
}

/// In-memory snapshot store for testing or session-only persistence
pub struct MemorySnapshotStore {
    data: RwLock<HashMap<String, Snapshot>>,
}

impl MemorySnapshotStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored snapshots
    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.data.read().unwrap().is_empty()
    }
}

impl Default for MemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, instance: &InstanceId) -> Result<Option<Snapshot>, StoreError> {
        let data = self.data.read().unwrap();
        Ok(data.get(&instance.to_string()).cloned())
    }

    fn save(&self, instance: &InstanceId, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut data = self.data.write().unwrap();
        data.insert(instance.to_string(), snapshot.clone());
        Ok(())
    }

    fn remove(&self, instance: &InstanceId) -> Result<(), StoreError> {
        let mut data = self.data.write().unwrap();
        data.remove(&instance.to_string());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().unwrap();
        Ok(data.keys().cloned().collect())
    }
}

impl std::fmt::Debug for MemorySnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySnapshotStore")
            .field("count", &self.len())
            .finish()
    }
}
