//! Pending-event buffer
//!
//! Events that arrive while an instance cannot deliver them are parked here
//! in arrival order and consumed exactly once when delivery becomes
//! possible.

use spyglass_plugin_api::Payload;
use std::collections::VecDeque;

/// One inbound event with its arrival-order stamp
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Event name
    pub name: String,

    /// Event payload
    pub payload: Payload,

    /// Strictly increasing per-instance arrival stamp
    pub received_at: u64,
}

/// Unbounded FIFO buffer of pending inbound events.
///
/// The stamp counter covers every arrival, queued or not, so delivered and
/// queued events share one ordering.
#[derive(Debug, Default)]
pub struct MessageQueue {
    items: VecDeque<QueuedMessage>,
    next_seq: u64,
}

impl MessageQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp an arriving event with the next ordering key
    pub fn stamp(&mut self, name: impl Into<String>, payload: Payload) -> QueuedMessage {
        let received_at = self.next_seq;
        self.next_seq += 1;
        QueuedMessage {
            name: name.into(),
            payload,
            received_at,
        }
    }

    /// Park a stamped message at the back of the queue
    pub fn enqueue(&mut self, message: QueuedMessage) {
        self.items.push_back(message);
    }

    /// Remove and return all queued messages in arrival order
    pub fn drain(&mut self) -> Vec<QueuedMessage> {
        self.items.drain(..).collect()
    }

    /// Discard all queued messages
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fifo_order() {
        let mut queue = MessageQueue::new();
        for i in 0..3 {
            let msg = queue.stamp("row", json!({ "i": i }));
            queue.enqueue(msg);
        }

        let drained = queue.drain();
        assert_eq!(drained.len(), 3);
        for (i, msg) in drained.iter().enumerate() {
            assert_eq!(msg.payload["i"], i);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stamps_are_strictly_increasing() {
        let mut queue = MessageQueue::new();
        let a = queue.stamp("a", json!(null));
        let b = queue.stamp("b", json!(null));
        // Stamps advance even when a message is delivered instead of queued.
        queue.enqueue(b);
        let c = queue.stamp("c", json!(null));

        assert!(a.received_at < queue.drain()[0].received_at);
        assert!(c.received_at > a.received_at + 1);
    }

    #[test]
    fn test_drain_consumes_exactly_once() {
        let mut queue = MessageQueue::new();
        let msg = queue.stamp("row", json!(1));
        queue.enqueue(msg);

        assert_eq!(queue.drain().len(), 1);
        assert_eq!(queue.drain().len(), 0);
    }

    #[test]
    fn test_clear() {
        let mut queue = MessageQueue::new();
        let msg = queue.stamp("row", json!(1));
        queue.enqueue(msg);
        queue.clear();
        assert!(queue.is_empty());
    }
}
