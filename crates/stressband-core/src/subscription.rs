//! Serialized notification subscription.
//!
//! BLE stacks do not order or reliably deliver concurrent attribute writes,
//! so enabling notifications on several characteristics must happen one
//! descriptor write at a time. [`SubscriptionQueue`] enforces that: the head
//! of the queue is the only request ever in flight.

use std::collections::VecDeque;

use tracing::debug;
use uuid::Uuid;

use stressband_types::SignalKind;

use crate::error::Error;

/// A pending descriptor write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Characteristic whose CCCD is written.
    pub characteristic: Uuid,
    /// `true` to enable notifications, `false` to disable them.
    pub enable: bool,
}

impl SubscriptionRequest {
    /// Request notifications for a signal.
    pub fn enable(kind: SignalKind) -> Self {
        Self {
            characteristic: kind.uuid(),
            enable: true,
        }
    }

    /// Signal targeted by this request, if it is one of ours.
    pub fn signal(&self) -> Option<SignalKind> {
        SignalKind::from_uuid(&self.characteristic)
    }
}

/// Result of feeding an acknowledgment to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Head popped; this request is now in flight and must be issued.
    Next(SubscriptionRequest),
    /// Head popped and nothing is left.
    Drained,
    /// Acknowledgment did not match the head; queue untouched.
    Ignored {
        /// Characteristic of the in-flight request, if any.
        expected: Option<Uuid>,
        /// Characteristic named by the acknowledgment.
        actual: Uuid,
    },
}

impl AckOutcome {
    /// The mismatch as an [`Error::QueueMismatch`], for ignored acks.
    pub fn mismatch(&self) -> Option<Error> {
        match self {
            AckOutcome::Ignored { expected, actual } => Some(Error::QueueMismatch {
                expected: *expected,
                actual: *actual,
            }),
            _ => None,
        }
    }
}

/// FIFO of descriptor writes with at most one outstanding.
#[derive(Debug, Default)]
pub struct SubscriptionQueue {
    pending: VecDeque<SubscriptionRequest>,
}

impl SubscriptionQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request.
    ///
    /// Returns the request when the queue was empty: it became the in-flight
    /// write and the caller must issue it now. Returns `None` when it is
    /// waiting behind another request.
    #[must_use = "a returned request must be issued to the transport"]
    pub fn enqueue(&mut self, request: SubscriptionRequest) -> Option<SubscriptionRequest> {
        let was_empty = self.pending.is_empty();
        self.pending.push_back(request);
        if was_empty {
            debug!("Issuing subscription for {}", request.characteristic);
            Some(request)
        } else {
            debug!(
                "Queued subscription for {} ({} pending)",
                request.characteristic,
                self.pending.len()
            );
            None
        }
    }

    /// Feed a write acknowledgment for `characteristic`.
    pub fn on_write_acknowledged(&mut self, characteristic: Uuid) -> AckOutcome {
        let expected = self.pending.front().map(|r| r.characteristic);
        if expected != Some(characteristic) {
            debug!(
                "Ignoring descriptor ack for {} (in flight: {:?})",
                characteristic, expected
            );
            return AckOutcome::Ignored {
                expected,
                actual: characteristic,
            };
        }

        self.pending.pop_front();
        match self.pending.front() {
            Some(next) => {
                debug!("Issuing subscription for {}", next.characteristic);
                AckOutcome::Next(*next)
            }
            None => AckOutcome::Drained,
        }
    }

    /// Drop all pending and in-flight requests.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            debug!("Discarding {} subscription request(s)", self.pending.len());
        }
        self.pending.clear();
    }

    /// The request currently awaiting acknowledgment.
    pub fn in_flight(&self) -> Option<&SubscriptionRequest> {
        self.pending.front()
    }

    /// Outstanding writes: always 0 or 1.
    pub fn outstanding(&self) -> usize {
        usize::from(!self.pending.is_empty())
    }

    /// Number of requests, in flight included.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
