//! Plugin runtime facade
//!
//! Composes the lifecycle controller, atom registry, method invoker and
//! host bridge into the contract plugin logic programs against: event
//! subscription, lifecycle hooks, RPC, state atoms and host actions.
//!
//! One `tokio::sync::Mutex` serializes everything that touches the
//! instance's timeline (transitions, queue operations, handler dispatch)
//! and is held across handler awaits, so no two deliveries for the same
//! instance ever interleave. Call replies settle through the invoker's own
//! pending table and never take this lock, which is what lets a handler
//! await a method call without stalling its instance.

use crate::host::{HostBridge, MenuEntryDescriptor};
use crate::invoker::{CallError, MethodInvoker};
use crate::lifecycle::{EventDisposition, LifecycleController, LifecycleState, SignalOutcome};
use crate::queue::QueuedMessage;
use crate::state::{AtomError, AtomRegistry, Snapshot, SnapshotError, StateAtom};
use crate::transport::Transport;
use serde::de::DeserializeOwned;
use serde::Serialize;
use spyglass_plugin_api::{CallId, InstanceId, Payload, PluginDescriptor, RemoteError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type MessageHandler = Arc<dyn Fn(Payload) -> HandlerFuture + Send + Sync>;
type UnhandledHandler = Arc<dyn Fn(String, Payload) -> HandlerFuture + Send + Sync>;
type LifecycleHook = Arc<dyn Fn() + Send + Sync>;
type DeepLinkHook = Arc<dyn Fn(Payload) + Send + Sync>;
type MenuAction = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct HandlerTable {
    by_name: HashMap<String, MessageHandler>,
    unhandled: Option<UnhandledHandler>,
}

#[derive(Default)]
struct HookSet {
    connect: Vec<LifecycleHook>,
    disconnect: Vec<LifecycleHook>,
    activate: Vec<LifecycleHook>,
    deactivate: Vec<LifecycleHook>,
    destroy: Vec<LifecycleHook>,
    deep_link: Vec<DeepLinkHook>,
}

/// A menu entry a plugin contributes to the host shell.
///
/// The host renders the label and routes invocations back into the
/// instance as direct calls; they never pass through the event queue.
pub struct MenuEntry {
    label: String,
    accelerator: Option<String>,
    action: MenuAction,
}

impl MenuEntry {
    /// Create a menu entry with a label and an on-select action
    pub fn new(label: impl Into<String>, action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            label: label.into(),
            accelerator: None,
            action: Arc::new(action),
        }
    }

    /// Set a keyboard accelerator
    pub fn accelerator(mut self, accelerator: impl Into<String>) -> Self {
        self.accelerator = Some(accelerator.into());
        self
    }
}

/// One running plugin/client association.
///
/// Constructed by the host when a plugin is enabled for a client; torn down
/// with `destroy` when the client goes away or the plugin is disabled.
pub struct PluginRuntime {
    id: InstanceId,
    descriptor: PluginDescriptor,
    core: tokio::sync::Mutex<LifecycleController>,
    handlers: Mutex<HandlerTable>,
    hooks: Mutex<HookSet>,
    menu: Mutex<HashMap<String, MenuAction>>,
    atoms: AtomRegistry,
    invoker: MethodInvoker,
    host: Arc<dyn HostBridge>,
}

impl PluginRuntime {
    /// Create a runtime for one plugin/client pairing.
    ///
    /// When `snapshot` is given, persisted atoms created during plugin
    /// setup take their initial values from it.
    pub fn new(
        descriptor: PluginDescriptor,
        client_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        host: Arc<dyn HostBridge>,
        snapshot: Option<Snapshot>,
    ) -> Arc<Self> {
        let id = InstanceId::new(descriptor.id.clone(), client_id);
        let atoms = match snapshot {
            Some(snapshot) => AtomRegistry::with_snapshot(snapshot),
            None => AtomRegistry::new(),
        };
        tracing::info!(instance = %id, background = descriptor.background, "plugin instance created");
        Arc::new(Self {
            core: tokio::sync::Mutex::new(LifecycleController::new(
                id.clone(),
                descriptor.background,
            )),
            invoker: MethodInvoker::new(id.clone(), transport),
            handlers: Mutex::new(HandlerTable::default()),
            hooks: Mutex::new(HookSet::default()),
            menu: Mutex::new(HashMap::new()),
            atoms,
            host,
            descriptor,
            id,
        })
    }

    /// Identity of this instance
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Descriptor of the hosted plugin
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Current lifecycle state
    pub async fn lifecycle_state(&self) -> LifecycleState {
        self.core.lock().await.state()
    }

    // ------------------------------------------------------------------
    // Plugin-facing contract
    // ------------------------------------------------------------------

    /// Register the handler for a named event.
    ///
    /// One active handler per event name; registering again replaces the
    /// previous handler, for queued and direct delivery alike.
    pub fn on_message<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: MessageHandler = Arc::new(move |payload| Box::pin(handler(payload)));
        self.handlers
            .lock()
            .unwrap()
            .by_name
            .insert(name.into(), handler);
    }

    /// Register the sink for events no handler is registered for.
    ///
    /// Registering again replaces the previous sink.
    pub fn on_unhandled_message<F, Fut>(&self, handler: F)
    where
        F: Fn(String, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: UnhandledHandler = Arc::new(move |name, payload| Box::pin(handler(name, payload)));
        self.handlers.lock().unwrap().unhandled = Some(handler);
    }

    /// Observe the transport coming up
    pub fn on_connect(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks.lock().unwrap().connect.push(Arc::new(hook));
    }

    /// Observe the transport going away
    pub fn on_disconnect(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks.lock().unwrap().disconnect.push(Arc::new(hook));
    }

    /// Observe the plugin becoming visible
    pub fn on_activate(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks.lock().unwrap().activate.push(Arc::new(hook));
    }

    /// Observe the plugin being hidden
    pub fn on_deactivate(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks.lock().unwrap().deactivate.push(Arc::new(hook));
    }

    /// Observe teardown
    pub fn on_destroy(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks.lock().unwrap().destroy.push(Arc::new(hook));
    }

    /// Observe deep-link navigation targeting this instance
    pub fn on_deep_link(&self, hook: impl Fn(Payload) + Send + Sync + 'static) {
        self.hooks.lock().unwrap().deep_link.push(Arc::new(hook));
    }

    /// Invoke a remote method and wait for its reply
    pub async fn send(
        &self,
        method: impl Into<String>,
        params: Payload,
    ) -> Result<Payload, CallError> {
        self.invoker.call(method, params).await
    }

    /// Query whether the remote side implements a method; never fails
    pub async fn supports_method(&self, method: &str) -> bool {
        self.invoker.supports_method(method).await
    }

    /// Invoker handle for plugin logic that wants to issue calls from
    /// spawned work without holding the runtime itself
    pub fn invoker(&self) -> MethodInvoker {
        self.invoker.clone()
    }

    /// Create an atom that does not participate in snapshots
    pub fn create_atom<T>(&self, initial: T) -> StateAtom<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        self.atoms.create_atom(initial)
    }

    /// Create an atom persisted under `key` in snapshot export/import
    pub fn create_persisted_atom<T>(
        &self,
        key: impl Into<String>,
        initial: T,
    ) -> Result<StateAtom<T>, AtomError>
    where
        T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.atoms.create_persisted_atom(key, initial)
    }

    /// Capture all persisted atoms
    pub fn export_snapshot(&self) -> Result<Snapshot, SnapshotError> {
        self.atoms.export_snapshot()
    }

    /// Atom registry of this instance
    pub fn atoms(&self) -> &AtomRegistry {
        &self.atoms
    }

    /// Contribute a menu entry to the host shell
    pub fn add_menu_entry(&self, entry: MenuEntry) {
        let MenuEntry {
            label,
            accelerator,
            action,
        } = entry;
        let descriptor = MenuEntryDescriptor {
            label: label.clone(),
            accelerator,
        };
        self.menu.lock().unwrap().insert(label, action);
        self.host.register_menu_entry(&self.id, &descriptor);
    }

    /// Ask the host to navigate to another plugin
    pub fn select_plugin(&self, plugin_id: &str, payload: Option<Payload>) {
        self.host.select_plugin(plugin_id, payload);
    }

    /// Whether the host has a plugin installed
    pub fn is_plugin_available(&self, plugin_id: &str) -> bool {
        self.host.is_plugin_available(plugin_id)
    }

    // ------------------------------------------------------------------
    // Transport- and host-facing entry points
    // ------------------------------------------------------------------

    /// Deliver an inbound event from the instrumented client.
    ///
    /// Delivered directly to the registered handler while the instance can
    /// show it, parked otherwise, dropped with a log line after destroy.
    pub async fn deliver_event(&self, name: impl Into<String>, payload: Payload) {
        let mut core = self.core.lock().await;
        match core.offer_event(name, payload) {
            EventDisposition::Deliver(message) => self.dispatch(message).await,
            EventDisposition::Enqueued | EventDisposition::Discarded => {}
        }
    }

    /// Deliver the reply (or remote error) for an outstanding method call
    pub fn deliver_call_reply(&self, call_id: CallId, outcome: Result<Payload, RemoteError>) {
        self.invoker.resolve_reply(call_id, outcome);
    }

    /// Transport connection state changed
    pub async fn connection_changed(&self, connected: bool) {
        if connected {
            self.connect().await;
        } else {
            self.disconnect().await;
        }
    }

    /// Transport came up
    pub async fn connect(&self) {
        let mut core = self.core.lock().await;
        if let SignalOutcome::Connected {
            treat_as_activated,
            drained,
        } = core.connect()
        {
            self.invoker.set_link_up(true);
            self.fire_hooks(|hooks| &hooks.connect);
            if treat_as_activated {
                self.fire_hooks(|hooks| &hooks.activate);
            }
            self.dispatch_all(drained).await;
        }
    }

    /// User opened the plugin
    pub async fn activate(&self) {
        let mut core = self.core.lock().await;
        if let SignalOutcome::Activated { drained } = core.activate() {
            self.fire_hooks(|hooks| &hooks.activate);
            self.dispatch_all(drained).await;
        }
    }

    /// User left the plugin.
    ///
    /// For a foreground plugin further events are parked until the next
    /// activation; the connection stays up and calls remain permitted.
    pub async fn deactivate(&self) {
        let mut core = self.core.lock().await;
        if let SignalOutcome::Deactivated = core.deactivate() {
            self.fire_hooks(|hooks| &hooks.deactivate);
        }
    }

    /// Transport went away; every pending call is rejected exactly once
    pub async fn disconnect(&self) {
        let mut core = self.core.lock().await;
        if let SignalOutcome::Disconnected = core.disconnect() {
            self.invoker.set_link_up(false);
            self.fire_hooks(|hooks| &hooks.disconnect);
            self.invoker.fail_all_pending();
        }
    }

    /// Tear the instance down.
    ///
    /// Rejects outstanding calls, releases the queue and drops every
    /// registered handler, hook and menu action. Terminal; later signals
    /// are logged and ignored.
    pub async fn destroy(&self) {
        let mut core = self.core.lock().await;
        if let SignalOutcome::Destroyed { fire_deactivate } = core.destroy() {
            self.invoker.set_link_up(false);
            if fire_deactivate {
                self.fire_hooks(|hooks| &hooks.deactivate);
            }
            self.fire_hooks(|hooks| &hooks.destroy);
            self.invoker.fail_all_pending();

            *self.handlers.lock().unwrap() = HandlerTable::default();
            *self.hooks.lock().unwrap() = HookSet::default();
            self.menu.lock().unwrap().clear();
            tracing::info!(instance = %self.id, "plugin instance destroyed");
        }
    }

    /// Host-driven deep-link navigation into this instance.
    ///
    /// Direct call into the registered hooks; never queued.
    pub async fn trigger_deep_link(&self, payload: Payload) {
        let core = self.core.lock().await;
        if core.is_destroyed() {
            tracing::warn!(instance = %self.id, "deep link after destroy, ignoring");
            return;
        }
        let hooks: Vec<DeepLinkHook> = self.hooks.lock().unwrap().deep_link.clone();
        if hooks.is_empty() {
            tracing::warn!(instance = %self.id, "deep link with no registered handler");
        }
        for hook in hooks {
            hook(payload.clone());
        }
    }

    /// Host-driven invocation of a registered menu entry
    pub async fn invoke_menu_entry(&self, label: &str) {
        let core = self.core.lock().await;
        if core.is_destroyed() {
            tracing::warn!(instance = %self.id, label, "menu invocation after destroy, ignoring");
            return;
        }
        let action = self.menu.lock().unwrap().get(label).cloned();
        match action {
            Some(action) => action(),
            None => tracing::warn!(instance = %self.id, label, "menu invocation for unknown entry"),
        }
    }

    /// Number of calls awaiting a reply
    pub fn pending_calls(&self) -> usize {
        self.invoker.pending_count()
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    async fn dispatch_all(&self, messages: Vec<QueuedMessage>) {
        for message in messages {
            self.dispatch(message).await;
        }
    }

    async fn dispatch(&self, message: QueuedMessage) {
        let (handler, unhandled) = {
            let table = self.handlers.lock().unwrap();
            (
                table.by_name.get(&message.name).cloned(),
                table.unhandled.clone(),
            )
        };
        match handler {
            Some(handler) => handler(message.payload).await,
            None => match unhandled {
                Some(sink) => sink(message.name, message.payload).await,
                None => tracing::warn!(
                    instance = %self.id,
                    event = %message.name,
                    "event has no handler and no unhandled-message sink"
                ),
            },
        }
    }

    fn fire_hooks(&self, select: fn(&HookSet) -> &Vec<LifecycleHook>) {
        let hooks: Vec<LifecycleHook> = {
            let set = self.hooks.lock().unwrap();
            select(&set).clone()
        };
        for hook in hooks {
            hook();
        }
    }
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("id", &self.id)
            .field("background", &self.descriptor.background)
            .finish()
    }
}
