//! The BLE transport seam.
//!
//! The [`Transport`] trait abstracts over the real btleplug backend
//! ([`BleTransport`](crate::ble::BleTransport)) and the scripted
//! [`MockTransport`](crate::mock::MockTransport) used in tests.
//!
//! Every command is fire-and-forget: the method returns as soon as the
//! command is issued, and its outcome comes back later as a
//! [`TransportEvent`] through the [`EventSink`] passed with it. Each sink is
//! stamped with the session generation that issued the command, so events
//! from a session that has since been cleaned up can be recognized and
//! dropped.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use stressband_types::RawNotification;

use crate::error::Result;
use crate::subscription::SubscriptionRequest;

/// Scan failure code: the stack refused to register the scanner.
pub const SCAN_FAILED_REGISTRATION: i32 = 2;
/// Scan failure code: internal stack error.
pub const SCAN_FAILED_INTERNAL_ERROR: i32 = 3;

/// The peripheral picked for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeripheralIdentity {
    /// Transport address: MAC on Linux/Windows, CoreBluetooth UUID on macOS.
    pub address: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Service the peripheral was discovered by.
    pub service: Uuid,
}

impl PeripheralIdentity {
    /// Create an identity from an address and service.
    pub fn new(address: impl Into<String>, service: Uuid) -> Self {
        Self {
            address: address.into(),
            name: None,
            service,
        }
    }

    /// Attach an advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for PeripheralIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// What to scan for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    /// Only peripherals advertising this service match.
    pub service: Uuid,
    /// Optional case-insensitive substring the advertised name must contain.
    pub name_contains: Option<String>,
}

impl ScanFilter {
    /// Filter on a service UUID only.
    pub fn service(service: Uuid) -> Self {
        Self {
            service,
            name_contains: None,
        }
    }

    /// Whether an advertisement matches.
    pub fn matches(&self, services: &[Uuid], name: Option<&str>) -> bool {
        if !services.contains(&self.service) {
            return false;
        }
        match (&self.name_contains, name) {
            (None, _) => true,
            (Some(needle), Some(name)) => name.to_lowercase().contains(&needle.to_lowercase()),
            (Some(_), None) => false,
        }
    }
}

/// Asynchronous outcomes reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A peripheral matching the scan filter advertised.
    PeripheralFound(PeripheralIdentity),
    /// The scan could not run.
    ScanFailed {
        /// Platform failure code.
        code: i32,
    },
    /// The link is up.
    LinkEstablished,
    /// The link dropped or never came up.
    LinkLost,
    /// Discovery finished; characteristics found under the target service.
    ServicesResolved(Vec<Uuid>),
    /// Discovery finished without the target service.
    ServiceNotFound,
    /// A CCCD write completed.
    DescriptorWritten(Uuid),
    /// A CCCD write failed.
    DescriptorWriteFailed {
        /// The characteristic UUID.
        characteristic: Uuid,
        /// Transport-provided reason.
        reason: String,
    },
    /// A characteristic pushed a value.
    Notification(RawNotification),
}

/// Session generation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A transport event together with the generation it was issued under.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    /// Generation of the sink the event was sent through.
    pub generation: Generation,
    /// The event.
    pub event: TransportEvent,
}

/// Where a transport reports the outcome of a command.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: Generation,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    /// Create a sink stamping events with `generation`.
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    /// Generation this sink stamps.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Report an event. Returns `false` once the receiving side is gone.
    pub fn send(&self, event: TransportEvent) -> bool {
        trace!("Transport event {} {:?}", self.generation, event);
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    /// Whether the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Trait abstracting the BLE central operations the session needs.
///
/// Implementations must not block: each command is issued and the method
/// returns, with results delivered through the sink. An `Err` return means
/// the command could not even be issued.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the local radio exists and is usable.
    async fn adapter_available(&self) -> bool;

    /// Start scanning; report the first match via
    /// [`TransportEvent::PeripheralFound`] or a failure via
    /// [`TransportEvent::ScanFailed`].
    async fn start_scan(&self, filter: ScanFilter, sink: EventSink) -> Result<()>;

    /// Stop any running scan. Must be safe to call when not scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect; report [`TransportEvent::LinkEstablished`] or
    /// [`TransportEvent::LinkLost`], and `LinkLost` whenever the link later drops.
    async fn connect(&self, peripheral: &PeripheralIdentity, sink: EventSink) -> Result<()>;

    /// Discover services; report [`TransportEvent::ServicesResolved`] or
    /// [`TransportEvent::ServiceNotFound`]. Notifications start flowing
    /// through this sink once characteristics are subscribed.
    async fn discover_services(&self, service: Uuid, sink: EventSink) -> Result<()>;

    /// Write one CCCD; report [`TransportEvent::DescriptorWritten`] or
    /// [`TransportEvent::DescriptorWriteFailed`].
    async fn write_subscription_descriptor(
        &self,
        request: SubscriptionRequest,
        sink: EventSink,
    ) -> Result<()>;

    /// Tear down the link and release the peripheral handle. Must be safe to
    /// call when not connected.
    async fn disconnect(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use stressband_types::uuid::STRESS_SERVICE;

    #[test]
    fn test_scan_filter_requires_service() {
        let filter = ScanFilter::service(STRESS_SERVICE);
        assert!(filter.matches(&[STRESS_SERVICE], None));
        assert!(!filter.matches(&[Uuid::nil()], Some("Band")));
        assert!(!filter.matches(&[], None));
    }

    #[test]
    fn test_scan_filter_name() {
        let filter = ScanFilter {
            service: STRESS_SERVICE,
            name_contains: Some("band".to_string()),
        };
        assert!(filter.matches(&[STRESS_SERVICE], Some("StressBand 01")));
        assert!(!filter.matches(&[STRESS_SERVICE], Some("Other")));
        assert!(!filter.matches(&[STRESS_SERVICE], None));
    }

    #[test]
    fn test_identity_display() {
        let id = PeripheralIdentity::new("AA:BB:CC:DD:EE:FF", STRESS_SERVICE);
        assert_eq!(id.to_string(), "AA:BB:CC:DD:EE:FF");
        let id = id.with_name("Band");
        assert_eq!(id.to_string(), "Band (AA:BB:CC:DD:EE:FF)");
    }

    #[test]
    fn test_generation_next() {
        assert_eq!(Generation(0).next(), Generation(1));
        assert_eq!(Generation(u64::MAX).next(), Generation(0));
    }

    #[test]
    fn test_sink_tags_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(Generation(7), tx);
        assert!(sink.send(TransportEvent::LinkEstablished));
        let tagged = rx.try_recv().unwrap();
        assert_eq!(tagged.generation, Generation(7));
        assert_eq!(tagged.event, TransportEvent::LinkEstablished);

        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.send(TransportEvent::LinkLost));
    }
}
