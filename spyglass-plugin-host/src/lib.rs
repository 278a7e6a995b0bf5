//! spyglass-plugin-host: plugin messaging and lifecycle runtime
//!
//! Hosts plugin instances for the spyglass desktop inspector: tracks each
//! instance through its activation lifecycle, queues events while it cannot
//! deliver them, correlates method calls with asynchronous replies, and
//! keeps the observable state atoms plugin logic and UI bindings share.

pub mod harness;
pub mod host;
pub mod invoker;
pub mod lifecycle;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod transport;

pub use harness::{RecordingHost, RecordingTransport, TestHarness};
pub use host::{HostBridge, MenuEntryDescriptor, NoopHost};
pub use invoker::{CallError, MethodInvoker};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use queue::{MessageQueue, QueuedMessage};
pub use registry::{InstanceRegistry, RegistryError};
pub use runtime::{MenuEntry, PluginRuntime};
pub use state::{
    AtomError, AtomRegistry, FileSnapshotStore, MemorySnapshotStore, Snapshot, SnapshotError,
    SnapshotStore, StateAtom, StoreError, Subscription,
};
pub use transport::{Transport, TransportError};

pub use spyglass_plugin_api::{
    CallId, InstanceId, MethodCall, Payload, PluginDescriptor, RemoteError, PROTOCOL_VERSION,
};
