//! Deterministic plugin test harness
//!
//! Drives one `PluginRuntime` through scripted lifecycle and message
//! sequences without a real transport, records every outbound call and
//! host action, and exposes the instance's persisted state for assertions.

use crate::host::{HostBridge, MenuEntryDescriptor};
use crate::runtime::PluginRuntime;
use crate::state::{AtomError, Snapshot, SnapshotError};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use spyglass_plugin_api::{CallId, InstanceId, MethodCall, Payload, PluginDescriptor, RemoteError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Client id used by harness-driven instances
pub const TEST_CLIENT_ID: &str = "test-client";

/// Transport stub that records outbound method calls
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<MethodCall>>,
    refuse: AtomicBool,
}

impl RecordingTransport {
    /// Create a transport that accepts and records every send
    pub fn new() -> Self {
        Self::default()
    }

    /// All method calls sent so far, in send order
    pub fn sent_calls(&self) -> Vec<MethodCall> {
        self.sent.lock().unwrap().clone()
    }

    /// Identifier of the most recently sent call
    pub fn last_call_id(&self) -> Option<CallId> {
        self.sent.lock().unwrap().last().map(|c| c.call_id)
    }

    /// Make subsequent sends fail, simulating a dead channel
    pub fn refuse_sends(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, _instance: &InstanceId, call: MethodCall) -> Result<(), TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.sent.lock().unwrap().push(call);
        Ok(())
    }
}

/// Host bridge that records menu registrations and plugin selections
#[derive(Default)]
pub struct RecordingHost {
    menu_entries: Mutex<Vec<MenuEntryDescriptor>>,
    selections: Mutex<Vec<(String, Option<Payload>)>>,
    available: Mutex<HashSet<String>>,
}

impl RecordingHost {
    /// Create an empty recording host
    pub fn new() -> Self {
        Self::default()
    }

    /// Menu entries registered so far
    pub fn menu_entries(&self) -> Vec<MenuEntryDescriptor> {
        self.menu_entries.lock().unwrap().clone()
    }

    /// Plugin selections requested so far
    pub fn selections(&self) -> Vec<(String, Option<Payload>)> {
        self.selections.lock().unwrap().clone()
    }

    /// Mark a plugin id as available to `is_plugin_available`
    pub fn mark_available(&self, plugin_id: impl Into<String>) {
        self.available.lock().unwrap().insert(plugin_id.into());
    }
}

impl HostBridge for RecordingHost {
    fn register_menu_entry(&self, _instance: &InstanceId, entry: &MenuEntryDescriptor) {
        self.menu_entries.lock().unwrap().push(entry.clone());
    }

    fn select_plugin(&self, plugin_id: &str, payload: Option<Payload>) {
        self.selections
            .lock()
            .unwrap()
            .push((plugin_id.to_string(), payload));
    }

    fn is_plugin_available(&self, plugin_id: &str) -> bool {
        self.available.lock().unwrap().contains(plugin_id)
    }
}

/// Scripted driver around one plugin instance.
///
/// Lifecycle drivers mirror the signals a real host would emit; message
/// injectors stand in for the device side of the transport.
pub struct TestHarness {
    runtime: Arc<PluginRuntime>,
    transport: Arc<RecordingTransport>,
    host: Arc<RecordingHost>,
}

impl TestHarness {
    /// Build a harness around a fresh instance, running the plugin's setup
    pub fn new(
        descriptor: PluginDescriptor,
        setup: impl FnOnce(&Arc<PluginRuntime>) -> Result<(), AtomError>,
    ) -> Result<Self, AtomError> {
        Self::with_snapshot(descriptor, None, setup)
    }

    /// Build a harness whose instance imports a previously exported snapshot
    pub fn with_snapshot(
        descriptor: PluginDescriptor,
        snapshot: Option<Snapshot>,
        setup: impl FnOnce(&Arc<PluginRuntime>) -> Result<(), AtomError>,
    ) -> Result<Self, AtomError> {
        let transport = Arc::new(RecordingTransport::new());
        let host = Arc::new(RecordingHost::new());
        let runtime = PluginRuntime::new(
            descriptor,
            TEST_CLIENT_ID,
            transport.clone() as Arc<dyn Transport>,
            host.clone() as Arc<dyn HostBridge>,
            snapshot,
        );
        setup(&runtime)?;
        Ok(Self {
            runtime,
            transport,
            host,
        })
    }

    /// The runtime under test
    pub fn runtime(&self) -> &Arc<PluginRuntime> {
        &self.runtime
    }

    /// The recording transport behind the runtime
    pub fn transport(&self) -> &Arc<RecordingTransport> {
        &self.transport
    }

    /// The recording host bridge behind the runtime
    pub fn host(&self) -> &Arc<RecordingHost> {
        &self.host
    }

    /// Signal the transport coming up
    pub async fn connect(&self) {
        self.runtime.connect().await;
    }

    /// Open the plugin in the host UI
    pub async fn activate(&self) {
        self.runtime.activate().await;
    }

    /// Leave the plugin in the host UI
    pub async fn deactivate(&self) {
        self.runtime.deactivate().await;
    }

    /// Signal the transport going away
    pub async fn disconnect(&self) {
        self.runtime.disconnect().await;
    }

    /// Tear the instance down
    pub async fn destroy(&self) {
        self.runtime.destroy().await;
    }

    /// Inject one device-side event
    pub async fn send_event(&self, name: &str, payload: Payload) {
        self.runtime.deliver_event(name, payload).await;
    }

    /// Inject a sequence of device-side events in order
    pub async fn send_events(&self, events: Vec<(&str, Payload)>) {
        for (name, payload) in events {
            self.runtime.deliver_event(name, payload).await;
        }
    }

    /// Outbound method calls recorded so far
    pub fn sent_calls(&self) -> Vec<MethodCall> {
        self.transport.sent_calls()
    }

    /// Answer an outstanding call with a result payload
    pub fn respond(&self, call_id: CallId, result: Payload) {
        self.runtime.deliver_call_reply(call_id, Ok(result));
    }

    /// Answer an outstanding call with a remote error
    pub fn respond_error(&self, call_id: CallId, message: &str) {
        self.runtime
            .deliver_call_reply(call_id, Err(RemoteError::new(message)));
    }

    /// Export the instance's persisted atoms
    pub fn export_state(&self) -> Result<Snapshot, SnapshotError> {
        self.runtime.export_snapshot()
    }

    /// Trigger a deep link into the instance
    pub async fn trigger_deep_link(&self, payload: Payload) {
        self.runtime.trigger_deep_link(payload).await;
    }

    /// Invoke a registered menu entry by label
    pub async fn invoke_menu_entry(&self, label: &str) {
        self.runtime.invoke_menu_entry(label).await;
    }
}
