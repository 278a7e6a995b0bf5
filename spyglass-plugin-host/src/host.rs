//! Host shell boundary
//!
//! Actions a plugin asks the surrounding desktop shell to perform. Host
//! integrations implement `HostBridge`; the bundled `NoopHost` is for
//! embedding the runtime without a shell.

use spyglass_plugin_api::{InstanceId, Payload};

/// Shell-facing description of a registered menu entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntryDescriptor {
    /// Label shown in the host menu
    pub label: String,

    /// Optional keyboard accelerator, e.g. `"Ctrl+R"`
    pub accelerator: Option<String>,
}

/// Host actions exposed to plugin logic
pub trait HostBridge: Send + Sync {
    /// A plugin instance registered a menu entry
    fn register_menu_entry(&self, instance: &InstanceId, entry: &MenuEntryDescriptor);

    /// Navigate the host UI to another plugin, optionally with a deep-link
    /// payload for it
    fn select_plugin(&self, plugin_id: &str, payload: Option<Payload>);

    /// Whether a plugin is installed and usable in this host
    fn is_plugin_available(&self, plugin_id: &str) -> bool;
}

/// Host bridge that ignores all actions
#[derive(Debug, Default)]
pub struct NoopHost;

impl HostBridge for NoopHost {
    fn register_menu_entry(&self, _instance: &InstanceId, _entry: &MenuEntryDescriptor) {}

    fn select_plugin(&self, _plugin_id: &str, _payload: Option<Payload>) {}

    fn is_plugin_available(&self, _plugin_id: &str) -> bool {
        false
    }
}
