//! Plugin instance lifecycle
//!
//! A pure state machine over one instance's activation lifecycle. It owns
//! the pending-event queue and decides when queued events flush; the facade
//! fires hooks and rejects pending calls based on the returned outcome, so
//! every effect of a transition is observable and testable in isolation.
//!
//! Transitions are monotonic except the `Activated`/`Deactivated` cycle.
//! `Destroyed` is terminal; signals arriving afterwards are logged and
//! ignored, as are transitions the table does not allow.

use crate::queue::{MessageQueue, QueuedMessage};
use spyglass_plugin_api::{InstanceId, Payload};

/// Lifecycle state of one plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, transport not yet connected
    Created,
    /// Transport connected, plugin not shown
    Connected,
    /// Plugin visible in the host UI
    Activated,
    /// Plugin hidden again, transport still connected
    Deactivated,
    /// Transport gone
    Disconnected,
    /// Torn down, terminal
    Destroyed,
}

/// What the facade must do after a lifecycle signal was applied
#[derive(Debug)]
pub enum SignalOutcome {
    /// Transport came up. For background plugins this doubles as
    /// activation and flushes the queue.
    Connected {
        treat_as_activated: bool,
        drained: Vec<QueuedMessage>,
    },
    /// Plugin opened; deliver the drained backlog in order
    Activated { drained: Vec<QueuedMessage> },
    /// Plugin left
    Deactivated,
    /// Transport went away; pending calls must be rejected
    Disconnected,
    /// Instance torn down; `fire_deactivate` is set when it was visible
    Destroyed { fire_deactivate: bool },
    /// Signal was illegal in the current state and has been logged
    Ignored,
}

/// Where an inbound event ended up
#[derive(Debug)]
pub enum EventDisposition {
    /// Deliver to a handler now
    Deliver(QueuedMessage),
    /// Parked until delivery becomes possible
    Enqueued,
    /// Arrived after destruction; logged and dropped
    Discarded,
}

/// State machine for one plugin instance
#[derive(Debug)]
pub struct LifecycleController {
    instance: InstanceId,
    state: LifecycleState,
    background: bool,
    queue: MessageQueue,
}

impl LifecycleController {
    /// Create a controller in the `Created` state
    pub fn new(instance: InstanceId, background: bool) -> Self {
        Self {
            instance,
            state: LifecycleState::Created,
            background,
            queue: MessageQueue::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether this instance follows the background-plugin variant
    pub fn is_background(&self) -> bool {
        self.background
    }

    /// Whether the instance has been torn down
    pub fn is_destroyed(&self) -> bool {
        self.state == LifecycleState::Destroyed
    }

    /// Number of events currently parked
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Transport connected
    pub fn connect(&mut self) -> SignalOutcome {
        match self.state {
            LifecycleState::Created => {
                self.enter(LifecycleState::Connected);
                let drained = if self.background {
                    self.queue.drain()
                } else {
                    Vec::new()
                };
                SignalOutcome::Connected {
                    treat_as_activated: self.background,
                    drained,
                }
            }
            _ => self.ignore("connect"),
        }
    }

    /// User opened the plugin
    pub fn activate(&mut self) -> SignalOutcome {
        match self.state {
            LifecycleState::Connected | LifecycleState::Deactivated => {
                self.enter(LifecycleState::Activated);
                SignalOutcome::Activated {
                    drained: self.queue.drain(),
                }
            }
            _ => self.ignore("activate"),
        }
    }

    /// User left the plugin
    pub fn deactivate(&mut self) -> SignalOutcome {
        match self.state {
            LifecycleState::Activated => {
                self.enter(LifecycleState::Deactivated);
                SignalOutcome::Deactivated
            }
            _ => self.ignore("deactivate"),
        }
    }

    /// Transport disconnected
    pub fn disconnect(&mut self) -> SignalOutcome {
        match self.state {
            LifecycleState::Connected
            | LifecycleState::Activated
            | LifecycleState::Deactivated => {
                self.enter(LifecycleState::Disconnected);
                SignalOutcome::Disconnected
            }
            _ => self.ignore("disconnect"),
        }
    }

    /// Tear the instance down. Legal from any non-destroyed state; the
    /// queue is released and nothing is delivered afterwards.
    pub fn destroy(&mut self) -> SignalOutcome {
        match self.state {
            LifecycleState::Destroyed => self.ignore("destroy"),
            current => {
                let fire_deactivate = current == LifecycleState::Activated;
                self.enter(LifecycleState::Destroyed);
                self.queue.clear();
                SignalOutcome::Destroyed { fire_deactivate }
            }
        }
    }

    /// Classify an inbound event: deliver now, park it, or drop it.
    ///
    /// Foreground plugins deliver only while `Activated`; background
    /// plugins deliver from `Connected` until the transport goes away.
    pub fn offer_event(&mut self, name: impl Into<String>, payload: Payload) -> EventDisposition {
        let name = name.into();
        if self.state == LifecycleState::Destroyed {
            tracing::warn!(
                instance = %self.instance,
                event = %name,
                "event received after destroy, dropping"
            );
            return EventDisposition::Discarded;
        }

        let message = self.queue.stamp(name, payload);
        if self.can_deliver() {
            EventDisposition::Deliver(message)
        } else {
            tracing::debug!(
                instance = %self.instance,
                event = %message.name,
                state = ?self.state,
                "queueing event until instance can deliver"
            );
            self.queue.enqueue(message);
            EventDisposition::Enqueued
        }
    }

    fn can_deliver(&self) -> bool {
        if self.background {
            matches!(
                self.state,
                LifecycleState::Connected | LifecycleState::Activated | LifecycleState::Deactivated
            )
        } else {
            self.state == LifecycleState::Activated
        }
    }

    fn enter(&mut self, next: LifecycleState) {
        tracing::debug!(
            instance = %self.instance,
            from = ?self.state,
            to = ?next,
            "lifecycle transition"
        );
        self.state = next;
    }

    fn ignore(&self, signal: &str) -> SignalOutcome {
        tracing::warn!(
            instance = %self.instance,
            state = ?self.state,
            signal,
            "ignoring illegal lifecycle signal"
        );
        SignalOutcome::Ignored
    }
}
