//! Per-instance state containers
//!
//! Each plugin instance owns one `AtomRegistry`. Atoms created with a
//! persist key participate in snapshot export/import; snapshot import is
//! applied once, while the instance is being constructed.

pub mod atom;
pub mod store;

pub use atom::{StateAtom, Subscription};
pub use store::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore, StoreError};

use atom::AtomShared;
use serde::de::DeserializeOwned;
use serde::Serialize;
use spyglass_plugin_api::Payload;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Serialized capture of all persisted atoms for one instance
pub type Snapshot = BTreeMap<String, Payload>;

/// Errors raised while creating atoms
#[derive(Debug, Error)]
pub enum AtomError {
    /// Two atoms in one registry claimed the same persist key. Fatal to
    /// plugin initialization.
    #[error("duplicate persist key: {0}")]
    DuplicateKey(String),
}

/// Errors raised while exporting a snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to serialize atom '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

trait ErasedAtom: Send + Sync {
    fn export_value(&self) -> Result<Payload, serde_json::Error>;
}

impl<T> ErasedAtom for AtomShared<T>
where
    T: Serialize + Send + Sync,
{
    fn export_value(&self) -> Result<Payload, serde_json::Error> {
        self.with_value(|value| serde_json::to_value(value))
    }
}

/// Collection of state atoms for one plugin instance.
///
/// Atom mutation and snapshot export both run on the instance's serialized
/// timeline, which is what makes `export_snapshot` a point-in-time view.
pub struct AtomRegistry {
    persisted: Mutex<BTreeMap<String, Arc<dyn ErasedAtom>>>,
    import: Option<Snapshot>,
}

impl AtomRegistry {
    /// Create an empty registry with no import source
    pub fn new() -> Self {
        Self {
            persisted: Mutex::new(BTreeMap::new()),
            import: None,
        }
    }

    /// Create a registry whose persisted atoms take their initial values
    /// from a previously exported snapshot
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            persisted: Mutex::new(BTreeMap::new()),
            import: Some(snapshot),
        }
    }

    /// Create an atom that is not persisted across snapshots
    pub fn create_atom<T>(&self, initial: T) -> StateAtom<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        StateAtom::new(initial)
    }

    /// Create an atom whose value is captured by `export_snapshot` under
    /// `key` and restored from an import snapshot when one is present.
    ///
    /// A snapshot value that fails to decode as `T` is logged and replaced
    /// by `initial`. An empty key creates a plain unpersisted atom.
    pub fn create_persisted_atom<T>(
        &self,
        key: impl Into<String>,
        initial: T,
    ) -> Result<StateAtom<T>, AtomError>
    where
        T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let key = key.into();
        if key.is_empty() {
            return Ok(StateAtom::new(initial));
        }

        let mut persisted = self.persisted.lock().unwrap();
        if persisted.contains_key(&key) {
            return Err(AtomError::DuplicateKey(key));
        }

        let initial = match self.import.as_ref().and_then(|s| s.get(&key)) {
            Some(value) => match serde_json::from_value::<T>(value.clone()) {
                Ok(restored) => restored,
                Err(e) => {
                    tracing::warn!(
                        key = %key,
                        error = %e,
                        "snapshot value failed to decode, using initial value"
                    );
                    initial
                }
            },
            None => initial,
        };

        let atom = StateAtom::new(initial);
        persisted.insert(key, atom.shared() as Arc<dyn ErasedAtom>);
        Ok(atom)
    }

    /// Read every persisted atom and return a serializable capture.
    ///
    /// Keys come back in sorted order so repeated exports of unchanged state
    /// compare equal.
    pub fn export_snapshot(&self) -> Result<Snapshot, SnapshotError> {
        let persisted = self.persisted.lock().unwrap();
        let mut snapshot = Snapshot::new();
        for (key, atom) in persisted.iter() {
            let value = atom.export_value().map_err(|source| SnapshotError::Serialize {
                key: key.clone(),
                source,
            })?;
            snapshot.insert(key.clone(), value);
        }
        Ok(snapshot)
    }

    /// Persist keys currently registered, in sorted order
    pub fn persisted_keys(&self) -> Vec<String> {
        self.persisted.lock().unwrap().keys().cloned().collect()
    }
}

impl Default for AtomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
