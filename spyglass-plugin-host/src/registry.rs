//! Instance registry
//!
//! Tracks the live plugin instances of a host session and routes inbound
//! transport frames to them. At most one live instance exists per
//! (plugin, client) pair.

use crate::host::HostBridge;
use crate::runtime::PluginRuntime;
use crate::state::{AtomError, Snapshot, SnapshotStore};
use crate::transport::Transport;
use spyglass_plugin_api::{CallId, InstanceId, Payload, PluginDescriptor, RemoteError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Errors that can occur during registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("instance already live: {0}")]
    InstanceExists(InstanceId),

    #[error("plugin setup failed: {0}")]
    Setup(#[from] AtomError),
}

/// A thread-safe registry of live plugin instances
#[derive(Clone)]
pub struct InstanceRegistry {
    inner: Arc<RwLock<HashMap<InstanceId, Arc<PluginRuntime>>>>,
    transport: Arc<dyn Transport>,
    host: Arc<dyn HostBridge>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl InstanceRegistry {
    /// Create an empty registry over the given transport and host bridge
    pub fn new(transport: Arc<dyn Transport>, host: Arc<dyn HostBridge>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            transport,
            host,
            store: None,
        }
    }

    /// Persist atom snapshots through `store`: saved when an instance is
    /// stopped, imported when one starts without an explicit snapshot
    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Construct and register an instance for a plugin/client pairing.
    ///
    /// `setup` is the plugin's own initialization: it creates atoms and
    /// registers handlers against the fresh runtime. A setup failure (for
    /// example a duplicate persist key) aborts instance creation.
    pub async fn start_instance(
        &self,
        descriptor: PluginDescriptor,
        client_id: impl Into<String>,
        snapshot: Option<Snapshot>,
        setup: impl FnOnce(&Arc<PluginRuntime>) -> Result<(), AtomError>,
    ) -> Result<Arc<PluginRuntime>, RegistryError> {
        let client_id = client_id.into();
        let id = InstanceId::new(descriptor.id.clone(), client_id.clone());

        let mut inner = self.inner.write().await;
        if inner.contains_key(&id) {
            return Err(RegistryError::InstanceExists(id));
        }

        let snapshot = match snapshot {
            Some(snapshot) => Some(snapshot),
            None => self.load_stored_snapshot(&id),
        };

        let runtime = PluginRuntime::new(
            descriptor,
            client_id,
            self.transport.clone(),
            self.host.clone(),
            snapshot,
        );
        setup(&runtime)?;

        inner.insert(id.clone(), runtime.clone());
        tracing::info!(instance = %id, "plugin instance started");
        Ok(runtime)
    }

    /// Destroy and remove an instance. Returns false when it was not live.
    ///
    /// With a snapshot store attached, the instance's persisted atoms are
    /// saved before teardown.
    pub async fn stop_instance(&self, id: &InstanceId) -> bool {
        let removed = self.inner.write().await.remove(id);
        match removed {
            Some(runtime) => {
                self.save_snapshot(&runtime);
                runtime.destroy().await;
                tracing::info!(instance = %id, "plugin instance stopped");
                true
            }
            None => false,
        }
    }

    fn load_stored_snapshot(&self, id: &InstanceId) -> Option<Snapshot> {
        let store = self.store.as_ref()?;
        match store.load(id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(instance = %id, error = %e, "failed to load stored snapshot");
                None
            }
        }
    }

    fn save_snapshot(&self, runtime: &PluginRuntime) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match runtime.export_snapshot() {
            Ok(snapshot) => {
                if let Err(e) = store.save(runtime.id(), &snapshot) {
                    tracing::warn!(instance = %runtime.id(), error = %e, "failed to save snapshot");
                }
            }
            Err(e) => {
                tracing::warn!(instance = %runtime.id(), error = %e, "failed to export snapshot");
            }
        }
    }

    /// Destroy every instance belonging to a client that went away
    pub async fn stop_client(&self, client_id: &str) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.inner.write().await;
            let ids: Vec<InstanceId> = inner
                .keys()
                .filter(|id| id.client_id == client_id)
                .cloned()
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.remove(&id))
                .collect()
        };
        let count = drained.len();
        for runtime in drained {
            self.save_snapshot(&runtime);
            runtime.destroy().await;
        }
        if count > 0 {
            tracing::info!(client = %client_id, count, "client instances stopped");
        }
        count
    }

    /// Route an inbound event to its instance
    pub async fn deliver_event(&self, id: &InstanceId, name: &str, payload: Payload) {
        match self.get(id).await {
            Some(runtime) => runtime.deliver_event(name, payload).await,
            None => tracing::warn!(instance = %id, event = %name, "event for unknown instance"),
        }
    }

    /// Route a method-call reply to its instance
    pub async fn deliver_call_reply(
        &self,
        id: &InstanceId,
        call_id: CallId,
        outcome: Result<Payload, RemoteError>,
    ) {
        match self.get(id).await {
            Some(runtime) => runtime.deliver_call_reply(call_id, outcome),
            None => tracing::warn!(instance = %id, call_id, "call reply for unknown instance"),
        }
    }

    /// Route a connection state change to its instance
    pub async fn connection_changed(&self, id: &InstanceId, connected: bool) {
        match self.get(id).await {
            Some(runtime) => runtime.connection_changed(connected).await,
            None => tracing::warn!(instance = %id, connected, "connection change for unknown instance"),
        }
    }

    /// Look up a live instance
    pub async fn get(&self, id: &InstanceId) -> Option<Arc<PluginRuntime>> {
        self.inner.read().await.get(id).cloned()
    }

    /// Ids of all live instances
    pub async fn instance_ids(&self) -> Vec<InstanceId> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Number of live instances
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
