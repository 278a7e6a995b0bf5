//! spyglass-plugin-api: Shared types for the spyglass plugin runtime
//!
//! This crate defines the types exchanged between the host runtime, the
//! transport that reaches an instrumented client, and plugin logic.
//! Payloads are opaque JSON values; the wire encoding underneath is the
//! transport's concern.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Reserved method name for the remote capability query.
///
/// The remote side answers with a boolean payload indicating whether the
/// method named in the params is implemented.
pub const SUPPORTS_METHOD: &str = "__supports_method";

/// Opaque event/method payload
pub type Payload = serde_json::Value;

/// Identifier correlating a method call with its asynchronous reply
pub type CallId = u64;

/// Static description of a plugin, provided by its author
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin id (used for routing and instance identity)
    pub id: String,

    /// Human-readable name shown by the host
    pub title: String,

    /// Plugin version (semver)
    #[serde(default)]
    pub version: Option<String>,

    /// Whether the plugin runs in the background: its connect/disconnect
    /// lifecycle is decoupled from UI activation, and events are delivered
    /// whenever it is connected rather than only while visible.
    #[serde(default)]
    pub background: bool,
}

impl PluginDescriptor {
    /// Create a new descriptor
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            version: None,
            background: false,
        }
    }

    /// Set the plugin version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Mark the plugin as a background plugin
    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }
}

/// Identity of one running plugin/client association.
///
/// At most one live instance exists per (plugin, client) pair at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId {
    /// Plugin id from the descriptor
    pub plugin_id: String,

    /// Id of the instrumented client process
    pub client_id: String,
}

impl InstanceId {
    /// Create a new instance id
    pub fn new(plugin_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            client_id: client_id.into(),
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.plugin_id, self.client_id)
    }
}

/// Outbound method invocation handed to the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodCall {
    /// Call identifier, unique per instance; replies carry it back
    pub call_id: CallId,

    /// Remote method name
    pub method: String,

    /// Method parameters
    pub params: Payload,
}

impl MethodCall {
    /// Create a new method call frame
    pub fn new(call_id: CallId, method: impl Into<String>, params: Payload) -> Self {
        Self {
            call_id,
            method: method.into(),
            params,
        }
    }
}

/// Typed application error returned by the remote side of a method call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("remote method error: {message}")]
pub struct RemoteError {
    /// Error message, surfaced verbatim to the caller
    pub message: String,
}

impl RemoteError {
    /// Create a new remote error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
