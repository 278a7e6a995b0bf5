//! Outbound method calls and reply correlation
//!
//! Every call gets a fresh identifier and a pending resolver; the reply (or
//! the connection going away) settles it exactly once. Settlement happens
//! directly through the pending map, never through the instance's timeline
//! lock, so a handler awaiting a call cannot stall its own instance.

use crate::transport::{Transport, TransportError};
use spyglass_plugin_api::{CallId, InstanceId, MethodCall, Payload, RemoteError, SUPPORTS_METHOD};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors surfaced to a method caller
#[derive(Debug, Error)]
pub enum CallError {
    /// The instance disconnected or was destroyed before a reply arrived,
    /// or the call was issued without a live connection.
    #[error("connection lost")]
    ConnectionLost,

    /// The remote side returned a typed application error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The transport refused the outbound frame
    #[error(transparent)]
    Transport(#[from] TransportError),
}

type CallResult = Result<Payload, CallError>;

struct InvokerShared {
    instance: InstanceId,
    transport: Arc<dyn Transport>,
    link_up: AtomicBool,
    next_call_id: AtomicU64,
    pending: Mutex<HashMap<CallId, oneshot::Sender<CallResult>>>,
}

/// Correlates outbound method calls with their asynchronous replies.
///
/// Handles are cheap to clone and share one pending-call table.
#[derive(Clone)]
pub struct MethodInvoker {
    shared: Arc<InvokerShared>,
}

impl MethodInvoker {
    /// Create an invoker for one instance over the given transport
    pub fn new(instance: InstanceId, transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(InvokerShared {
                instance,
                transport,
                link_up: AtomicBool::new(false),
                next_call_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Invoke a remote method and wait for its reply.
    ///
    /// Fails immediately with `ConnectionLost` when no connection is up.
    /// There is no ordering guarantee between concurrent calls; each reply
    /// settles only the call whose identifier it carries.
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Payload,
    ) -> Result<Payload, CallError> {
        if !self.shared.link_up.load(Ordering::Acquire) {
            return Err(CallError::ConnectionLost);
        }

        let call_id = self.shared.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(call_id, tx);

        let frame = MethodCall::new(call_id, method, params);
        tracing::debug!(instance = %self.shared.instance, call_id, method = %frame.method, "sending method call");

        if let Err(e) = self.shared.transport.send(&self.shared.instance, frame).await {
            self.shared.pending.lock().unwrap().remove(&call_id);
            return Err(CallError::Transport(e));
        }

        match rx.await {
            Ok(result) => result,
            // Resolver dropped without settling: the instance went away.
            Err(_) => Err(CallError::ConnectionLost),
        }
    }

    /// Query whether the remote side implements a method.
    ///
    /// Never fails the caller; every failure path resolves to `false`.
    pub async fn supports_method(&self, method: &str) -> bool {
        match self
            .call(SUPPORTS_METHOD, serde_json::json!({ "method": method }))
            .await
        {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Settle the pending call carrying `call_id`.
    ///
    /// The pending entry is removed before resolution, so a duplicate reply
    /// cannot settle a call twice; it is logged and ignored instead.
    pub fn resolve_reply(&self, call_id: CallId, outcome: Result<Payload, RemoteError>) {
        let resolver = self.shared.pending.lock().unwrap().remove(&call_id);
        match resolver {
            Some(tx) => {
                let _ = tx.send(outcome.map_err(CallError::from));
            }
            None => {
                tracing::warn!(
                    instance = %self.shared.instance,
                    call_id,
                    "reply for unknown or already settled call"
                );
            }
        }
    }

    /// Reject every outstanding call with `ConnectionLost`
    pub fn fail_all_pending(&self) {
        let drained: Vec<_> = {
            let mut pending = self.shared.pending.lock().unwrap();
            pending.drain().collect()
        };
        if !drained.is_empty() {
            tracing::debug!(
                instance = %self.shared.instance,
                count = drained.len(),
                "rejecting pending calls"
            );
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(CallError::ConnectionLost));
        }
    }

    /// Gate call permission on the connection state
    pub fn set_link_up(&self, up: bool) {
        self.shared.link_up.store(up, Ordering::Release);
    }

    /// Number of calls awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().unwrap().len()
    }
}

impl std::fmt::Debug for MethodInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodInvoker")
            .field("instance", &self.shared.instance)
            .field("pending", &self.pending_count())
            .finish()
    }
}
