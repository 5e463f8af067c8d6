//! Session event system.
//!
//! Diagnostic consumers (loggers, recorders, the CLI's JSON output) can
//! follow a session through [`SessionEvent`]s broadcast by an
//! [`EventDispatcher`]. Presentation code should watch
//! [`UiSnapshot`](crate::aggregator::UiSnapshot)s instead.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use stressband_types::{Sample, SignalKind};

use crate::transport::PeripheralIdentity;

/// Events emitted while a session runs.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// The session state changed.
    StateChanged {
        from: String,
        to: String,
        generation: u64,
    },
    /// A peripheral was picked from the scan.
    PeripheralSelected { peripheral: PeripheralIdentity },
    /// A decoded sample reached the aggregator.
    SampleApplied { sample: Sample },
    /// A notification could not be decoded and was dropped.
    SampleDropped {
        signal: Option<SignalKind>,
        reason: String,
    },
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
