//! Mock transport implementation for testing.
//!
//! This module provides a scripted [`Transport`] that can drive a
//! [`ConnectionManager`](crate::manager::ConnectionManager) through every
//! session phase without BLE hardware.
//!
//! # Features
//!
//! - **Auto-responses**: each command answers with its success event, so a
//!   default mock goes from `start_connect` to `Streaming` on its own
//! - **Failure injection**: missing adapter, scan failure codes, missing
//!   service or characteristics, failed descriptor writes, commands that
//!   cannot be issued
//! - **Stalls**: a phase that never answers, for timeout tests
//! - **Manual events**: push any event or notification through the last sink

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use stressband_types::uuid::STRESS_SERVICE;
use stressband_types::{RawNotification, SignalKind};

use crate::error::{Error, Result};
use crate::subscription::SubscriptionRequest;
use crate::transport::{
    EventSink, PeripheralIdentity, ScanFilter, Transport, TransportEvent,
};

/// A command received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `start_scan`.
    StartScan,
    /// `stop_scan`.
    StopScan,
    /// `connect` with the peripheral address.
    Connect(String),
    /// `discover_services`.
    DiscoverServices,
    /// `write_subscription_descriptor`.
    WriteDescriptor(SubscriptionRequest),
    /// `disconnect`.
    Disconnect,
}

/// A mock phase, for stalls and issue failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// Scanning.
    Scan,
    /// Connecting.
    Connect,
    /// Service discovery.
    Discover,
    /// Descriptor writes.
    Subscribe,
}

#[derive(Debug, Clone)]
struct Behavior {
    peripheral: PeripheralIdentity,
    characteristics: Option<Vec<Uuid>>,
    scan_failure: Option<i32>,
    failing_descriptor: Option<Uuid>,
    stalled: HashSet<MockOp>,
    issue_failures: HashSet<MockOp>,
}

/// A scripted [`Transport`] for tests.
///
/// # Example
///
/// ```
/// use stressband_core::{ConnectionManager, ManagerConfig, MockTransport, SessionState};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let manager = ConnectionManager::new(MockTransport::new(), ManagerConfig::default()).unwrap();
///     manager.start_connect().await.unwrap();
///     for _ in 0..20 {
///         tokio::task::yield_now().await;
///     }
///     assert_eq!(manager.state().await, SessionState::Streaming);
/// }
/// ```
pub struct MockTransport {
    adapter_available: AtomicBool,
    behavior: RwLock<Behavior>,
    calls: RwLock<Vec<MockCall>>,
    sink: RwLock<Option<EventSink>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field(
                "adapter_available",
                &self.adapter_available.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A mock band exposing all three characteristics that answers every
    /// command successfully.
    pub fn new() -> Self {
        MockTransportBuilder::new().build()
    }

    /// Start building a customized mock.
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder::new()
    }

    /// Commands received so far, in order.
    pub async fn calls(&self) -> Vec<MockCall> {
        self.calls.read().await.clone()
    }

    /// Descriptor writes received so far, in order.
    pub async fn descriptor_writes(&self) -> Vec<SubscriptionRequest> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|call| match call {
                MockCall::WriteDescriptor(request) => Some(*request),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded commands.
    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    /// The sink passed with the most recent command.
    pub async fn last_sink(&self) -> Option<EventSink> {
        self.sink.read().await.clone()
    }

    /// Push an event through the most recent sink. Returns `false` when no
    /// sink has been captured yet or the manager is gone.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        match self.sink.read().await.as_ref() {
            Some(sink) => sink.send(event),
            None => false,
        }
    }

    /// Push a notification for `kind` through the most recent sink.
    pub async fn notify(&self, kind: SignalKind, bytes: &[u8]) -> bool {
        self.emit(TransportEvent::Notification(RawNotification::now(
            kind.uuid(),
            bytes.to_vec(),
        )))
        .await
    }

    /// Toggle adapter availability.
    pub fn set_adapter_available(&self, available: bool) {
        self.adapter_available.store(available, Ordering::Relaxed);
    }

    /// Make a phase stop answering, or answer again.
    pub async fn set_stalled(&self, op: MockOp, stalled: bool) {
        let mut behavior = self.behavior.write().await;
        if stalled {
            behavior.stalled.insert(op);
        } else {
            behavior.stalled.remove(&op);
        }
    }

    async fn record(&self, call: MockCall, sink: Option<EventSink>) {
        self.calls.write().await.push(call);
        if let Some(sink) = sink {
            *self.sink.write().await = Some(sink);
        }
    }

    async fn behavior(&self) -> Behavior {
        self.behavior.read().await.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn adapter_available(&self) -> bool {
        self.adapter_available.load(Ordering::Relaxed)
    }

    async fn start_scan(&self, filter: ScanFilter, sink: EventSink) -> Result<()> {
        self.record(MockCall::StartScan, Some(sink.clone())).await;
        let behavior = self.behavior().await;
        if behavior.issue_failures.contains(&MockOp::Scan) {
            return Err(Error::AdapterUnavailable);
        }
        if let Some(code) = behavior.scan_failure {
            sink.send(TransportEvent::ScanFailed { code });
            return Ok(());
        }
        let peripheral = behavior.peripheral;
        if !behavior.stalled.contains(&MockOp::Scan)
            && filter.matches(&[peripheral.service], peripheral.name.as_deref())
        {
            sink.send(TransportEvent::PeripheralFound(peripheral));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(MockCall::StopScan, None).await;
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralIdentity, sink: EventSink) -> Result<()> {
        self.record(MockCall::Connect(peripheral.address.clone()), Some(sink.clone()))
            .await;
        let behavior = self.behavior().await;
        if behavior.issue_failures.contains(&MockOp::Connect) {
            return Err(Error::NotConnected);
        }
        if !behavior.stalled.contains(&MockOp::Connect) {
            sink.send(TransportEvent::LinkEstablished);
        }
        Ok(())
    }

    async fn discover_services(&self, service: Uuid, sink: EventSink) -> Result<()> {
        self.record(MockCall::DiscoverServices, Some(sink.clone()))
            .await;
        let behavior = self.behavior().await;
        if behavior.issue_failures.contains(&MockOp::Discover) {
            return Err(Error::NotConnected);
        }
        if behavior.stalled.contains(&MockOp::Discover) {
            return Ok(());
        }
        match behavior.characteristics {
            Some(found) if service == behavior.peripheral.service => {
                sink.send(TransportEvent::ServicesResolved(found));
            }
            _ => {
                sink.send(TransportEvent::ServiceNotFound);
            }
        }
        Ok(())
    }

    async fn write_subscription_descriptor(
        &self,
        request: SubscriptionRequest,
        sink: EventSink,
    ) -> Result<()> {
        self.record(MockCall::WriteDescriptor(request), Some(sink.clone()))
            .await;
        let behavior = self.behavior().await;
        if behavior.issue_failures.contains(&MockOp::Subscribe) {
            return Err(Error::NotConnected);
        }
        if behavior.failing_descriptor == Some(request.characteristic) {
            sink.send(TransportEvent::DescriptorWriteFailed {
                characteristic: request.characteristic,
                reason: "mock write failure".to_string(),
            });
        } else if !behavior.stalled.contains(&MockOp::Subscribe) {
            sink.send(TransportEvent::DescriptorWritten(request.characteristic));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(MockCall::Disconnect, None).await;
        Ok(())
    }
}

/// Builder for creating mock transports with custom behavior.
#[derive(Debug)]
pub struct MockTransportBuilder {
    adapter_available: bool,
    behavior: Behavior,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self {
            adapter_available: true,
            behavior: Behavior {
                peripheral: PeripheralIdentity::new("AA:BB:CC:DD:EE:FF", STRESS_SERVICE)
                    .with_name("StressBand Mock"),
                characteristics: Some(SignalKind::ALL.iter().map(|k| k.uuid()).collect()),
                scan_failure: None,
                failing_descriptor: None,
                stalled: HashSet::new(),
                issue_failures: HashSet::new(),
            },
        }
    }
}

impl MockTransportBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the adapter is present.
    #[must_use]
    pub fn adapter_available(mut self, available: bool) -> Self {
        self.adapter_available = available;
        self
    }

    /// Set the advertised peripheral.
    #[must_use]
    pub fn peripheral(mut self, peripheral: PeripheralIdentity) -> Self {
        self.behavior.peripheral = peripheral;
        self
    }

    /// Set the characteristics discovery reports under the service.
    #[must_use]
    pub fn characteristics(mut self, characteristics: Vec<Uuid>) -> Self {
        self.behavior.characteristics = Some(characteristics);
        self
    }

    /// Report the service as missing during discovery.
    #[must_use]
    pub fn without_service(mut self) -> Self {
        self.behavior.characteristics = None;
        self
    }

    /// Fail scans with `code`.
    #[must_use]
    pub fn scan_failure(mut self, code: i32) -> Self {
        self.behavior.scan_failure = Some(code);
        self
    }

    /// Fail the descriptor write for `characteristic`.
    #[must_use]
    pub fn failing_descriptor(mut self, characteristic: Uuid) -> Self {
        self.behavior.failing_descriptor = Some(characteristic);
        self
    }

    /// Never answer `op`.
    #[must_use]
    pub fn stall(mut self, op: MockOp) -> Self {
        self.behavior.stalled.insert(op);
        self
    }

    /// Refuse to issue `op` at all.
    #[must_use]
    pub fn fail_issue(mut self, op: MockOp) -> Self {
        self.behavior.issue_failures.insert(op);
        self
    }

    /// Build the mock transport.
    #[must_use]
    pub fn build(self) -> MockTransport {
        MockTransport {
            adapter_available: AtomicBool::new(self.adapter_available),
            behavior: RwLock::new(self.behavior),
            calls: RwLock::new(Vec::new()),
            sink: RwLock::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Generation, TaggedEvent};
    use tokio::sync::mpsc;

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<TaggedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(Generation(1), tx), rx)
    }

    #[tokio::test]
    async fn test_scan_reports_peripheral() {
        let mock = MockTransport::new();
        let (sink, mut rx) = sink();
        mock.start_scan(ScanFilter::service(STRESS_SERVICE), sink)
            .await
            .unwrap();
        let tagged = rx.recv().await.unwrap();
        assert!(matches!(tagged.event, TransportEvent::PeripheralFound(_)));
        assert_eq!(mock.calls().await, vec![MockCall::StartScan]);
    }

    #[tokio::test]
    async fn test_scan_filter_mismatch_stays_silent() {
        let mock = MockTransport::new();
        let (sink, mut rx) = sink();
        mock.start_scan(ScanFilter::service(Uuid::nil()), sink)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_scan_failure_code() {
        let mock = MockTransport::builder().scan_failure(3).build();
        let (sink, mut rx) = sink();
        mock.start_scan(ScanFilter::service(STRESS_SERVICE), sink)
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap().event,
            TransportEvent::ScanFailed { code: 3 }
        );
    }

    #[tokio::test]
    async fn test_missing_service() {
        let mock = MockTransport::builder().without_service().build();
        let (sink, mut rx) = sink();
        mock.discover_services(STRESS_SERVICE, sink).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().event, TransportEvent::ServiceNotFound);
    }

    #[tokio::test]
    async fn test_failing_descriptor() {
        let mock = MockTransport::builder()
            .failing_descriptor(SignalKind::Eda.uuid())
            .build();
        let (sink, mut rx) = sink();
        mock.write_subscription_descriptor(SubscriptionRequest::enable(SignalKind::Eda), sink)
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap().event,
            TransportEvent::DescriptorWriteFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_issue_failure() {
        let mock = MockTransport::builder().fail_issue(MockOp::Connect).build();
        let (sink, _rx) = sink();
        let peripheral = PeripheralIdentity::new("AA", STRESS_SERVICE);
        assert!(mock.connect(&peripheral, sink).await.is_err());
    }

    #[tokio::test]
    async fn test_stall_and_resume() {
        let mock = MockTransport::builder().stall(MockOp::Connect).build();
        let peripheral = PeripheralIdentity::new("AA", STRESS_SERVICE);
        let (sink, mut rx) = sink();
        mock.connect(&peripheral, sink.clone()).await.unwrap();
        assert!(rx.try_recv().is_err());

        mock.set_stalled(MockOp::Connect, false).await;
        mock.connect(&peripheral, sink).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().event, TransportEvent::LinkEstablished);
    }

    #[tokio::test]
    async fn test_emit_without_sink() {
        let mock = MockTransport::new();
        assert!(!mock.emit(TransportEvent::LinkLost).await);
    }

    #[tokio::test]
    async fn test_notify_uses_last_sink() {
        let mock = MockTransport::new();
        let (sink, mut rx) = sink();
        mock.connect(&PeripheralIdentity::new("AA", STRESS_SERVICE), sink)
            .await
            .unwrap();
        let _ = rx.recv().await;

        assert!(mock.notify(SignalKind::Hrv, &[0, 0, 0x48, 0x42]).await);
        match rx.recv().await.unwrap().event {
            TransportEvent::Notification(raw) => {
                assert_eq!(raw.characteristic, SignalKind::Hrv.uuid());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
