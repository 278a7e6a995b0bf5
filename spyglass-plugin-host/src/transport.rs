//! Transport collaborator boundary
//!
//! The transport moves frames between the desktop host and an instrumented
//! client. This runtime only depends on the outbound half; inbound frames
//! come back through `PluginRuntime::deliver_event`, `deliver_call_reply`
//! and `connection_changed`.

use async_trait::async_trait;
use spyglass_plugin_api::{InstanceId, MethodCall};
use thiserror::Error;

/// Errors surfaced by a transport implementation
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport channel closed")]
    ChannelClosed,

    #[error("transport send failed: {0}")]
    Send(#[source] anyhow::Error),
}

/// Outbound half of the connection to an instrumented client
#[async_trait]
pub trait Transport: Send + Sync {
    /// Forward a method call frame to the remote side of an instance
    async fn send(&self, instance: &InstanceId, call: MethodCall) -> Result<(), TransportError>;
}
