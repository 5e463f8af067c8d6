//! btleplug-backed transport.
//!
//! [`BleTransport`] implements [`Transport`] on the host's first Bluetooth
//! adapter. Each command spawns a short task that does the blocking BLE work
//! and reports its outcome through the command's [`EventSink`], so no
//! transport call ever waits on the radio.
//!
//! # Platform Differences
//!
//! - **macOS**: peripherals report a zero MAC address; the CoreBluetooth
//!   UUID is used as the identity address instead.
//! - **Linux**: BlueZ signals a connection before its GATT cache is filled,
//!   so discovery waits [`ConnectionConfig::discovery_settle`] first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _,
    ScanFilter as BleScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stressband_types::RawNotification;

use crate::error::{Error, Result};
use crate::subscription::SubscriptionRequest;
use crate::transport::{
    EventSink, PeripheralIdentity, SCAN_FAILED_INTERNAL_ERROR, SCAN_FAILED_REGISTRATION,
    ScanFilter, Transport, TransportEvent,
};

/// Default timeout for a single descriptor write.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for tearing down a link.
const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Address reported by CoreBluetooth for every peripheral.
const ZERO_ADDRESS: &str = "00:00:00:00:00:00";

/// Configuration for the btleplug transport.
///
/// Phase timeouts live in
/// [`ManagerConfig`](crate::manager::ManagerConfig); these only bound the
/// individual radio operations the transport performs.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stressband_core::ble::ConnectionConfig;
///
/// let config = ConnectionConfig::default().write_timeout(Duration::from_secs(5));
/// assert_eq!(config.write_timeout, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for one CCCD write.
    pub write_timeout: Duration,
    /// Timeout for the disconnect request.
    pub disconnect_timeout: Duration,
    /// Pause between link-up and service discovery.
    pub discovery_settle: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            discovery_settle: if cfg!(target_os = "linux") {
                Duration::from_millis(600)
            } else {
                Duration::ZERO
            },
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the descriptor write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the disconnect timeout.
    #[must_use]
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Set the pause before service discovery.
    #[must_use]
    pub fn discovery_settle(mut self, settle: Duration) -> Self {
        self.discovery_settle = settle;
        self
    }
}

/// Format a peripheral ID as a string.
fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Identity address: the MAC where the platform exposes one, otherwise the
/// platform peripheral ID.
fn identity_address(address: &str, fallback: impl FnOnce() -> String) -> String {
    if address == ZERO_ADDRESS {
        fallback()
    } else {
        address.to_string()
    }
}

#[derive(Default)]
struct LinkState {
    scan_task: Option<JoinHandle<()>>,
    candidates: HashMap<String, Peripheral>,
    peripheral: Option<Peripheral>,
    characteristics: HashMap<Uuid, Characteristic>,
    link_tasks: Vec<JoinHandle<()>>,
    /// Bumped by every connect and every release. Connect and discovery
    /// tasks only publish while their attempt is still current.
    attempt: u64,
}

impl LinkState {
    fn abort_link_tasks(&mut self) {
        for handle in self.link_tasks.drain(..) {
            handle.abort();
        }
    }

    fn begin_attempt(&mut self) -> u64 {
        self.attempt = self.attempt.wrapping_add(1);
        self.attempt
    }

    fn is_current(&self, attempt: u64) -> bool {
        self.attempt == attempt
    }

    /// Supersede any attempt in flight and hand back the live peripheral.
    fn release(&mut self) -> Option<Peripheral> {
        self.attempt = self.attempt.wrapping_add(1);
        self.abort_link_tasks();
        self.characteristics.clear();
        self.peripheral.take()
    }
}

/// [`Transport`] over the host's first Bluetooth adapter.
pub struct BleTransport {
    adapter: Option<Adapter>,
    config: ConnectionConfig,
    state: Arc<Mutex<LinkState>>,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport")
            .field("has_adapter", &self.adapter.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BleTransport {
    /// Open the first adapter with default settings.
    ///
    /// A host without any adapter still yields a transport; it reports
    /// itself unavailable through [`Transport::adapter_available`].
    pub async fn new() -> Result<Self> {
        Self::with_config(ConnectionConfig::default()).await
    }

    /// Open the first adapter with custom settings.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn with_config(config: ConnectionConfig) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?.into_iter().next();
        if adapter.is_none() {
            warn!("No Bluetooth adapter found");
        }
        Ok(Self {
            adapter,
            config,
            state: Arc::new(Mutex::new(LinkState::default())),
        })
    }

    /// The transport configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn adapter(&self) -> Result<Adapter> {
        self.adapter.clone().ok_or(Error::AdapterUnavailable)
    }

    async fn connected_peripheral(&self) -> Result<Peripheral> {
        self.state
            .lock()
            .await
            .peripheral
            .clone()
            .ok_or(Error::NotConnected)
    }
}

/// Drop a link nobody owns any more.
async fn release_orphan(peripheral: Peripheral, disconnect_timeout: Duration) {
    match timeout(disconnect_timeout, peripheral.disconnect()).await {
        Ok(Ok(())) => debug!("Released superseded link"),
        Ok(Err(e)) => warn!("Failed to release superseded link: {}", e),
        Err(_) => warn!("Releasing superseded link timed out after {:?}", disconnect_timeout),
    }
}

/// Identity for a peripheral if it advertises what the filter wants.
async fn matching_identity(
    peripheral: &Peripheral,
    filter: &ScanFilter,
) -> Option<PeripheralIdentity> {
    let properties = peripheral.properties().await.ok().flatten()?;
    if !filter.matches(&properties.services, properties.local_name.as_deref()) {
        return None;
    }
    let id = peripheral.id();
    let address = identity_address(&properties.address.to_string(), || format_peripheral_id(&id));
    let mut identity = PeripheralIdentity::new(address, filter.service);
    identity.name = properties.local_name;
    Some(identity)
}

async fn run_scan(
    adapter: Adapter,
    filter: ScanFilter,
    sink: EventSink,
    state: Arc<Mutex<LinkState>>,
) {
    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            warn!("Could not subscribe to adapter events: {}", e);
            sink.send(TransportEvent::ScanFailed {
                code: SCAN_FAILED_REGISTRATION,
            });
            return;
        }
    };
    let ble_filter = BleScanFilter {
        services: vec![filter.service],
    };
    if let Err(e) = adapter.start_scan(ble_filter).await {
        warn!("Failed to start scan: {}", e);
        sink.send(TransportEvent::ScanFailed {
            code: SCAN_FAILED_INTERNAL_ERROR,
        });
        return;
    }
    debug!("Scanning for service {}", filter.service);

    while let Some(event) = events.next().await {
        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            _ => continue,
        };
        let Ok(peripheral) = adapter.peripheral(&id).await else {
            continue;
        };
        if let Some(identity) = matching_identity(&peripheral, &filter).await {
            info!("Matched {}", identity);
            state
                .lock()
                .await
                .candidates
                .insert(identity.address.clone(), peripheral);
            sink.send(TransportEvent::PeripheralFound(identity));
            break;
        }
    }
}

/// Report `LinkLost` when the adapter says the peripheral went away.
async fn watch_disconnect(adapter: Adapter, id: PeripheralId, sink: EventSink) {
    match adapter.events().await {
        Ok(mut events) => {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event
                    && gone == id
                {
                    info!("Peripheral {:?} disconnected", gone);
                    sink.send(TransportEvent::LinkLost);
                    break;
                }
            }
        }
        Err(e) => warn!("Disconnect watcher could not subscribe to adapter events: {}", e),
    }
}

/// Forward every notification as a [`RawNotification`].
async fn pump_notifications(peripheral: Peripheral, sink: EventSink) {
    let mut stream = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Could not open notification stream: {}", e);
            return;
        }
    };
    while let Some(notification) = stream.next().await {
        let raw = RawNotification::now(notification.uuid, notification.value);
        if !sink.send(TransportEvent::Notification(raw)) {
            break;
        }
    }
    debug!("Notification stream ended");
}

#[async_trait]
impl Transport for BleTransport {
    async fn adapter_available(&self) -> bool {
        match &self.adapter {
            Some(adapter) => adapter.adapter_info().await.is_ok(),
            None => false,
        }
    }

    async fn start_scan(&self, filter: ScanFilter, sink: EventSink) -> Result<()> {
        let adapter = self.adapter()?;
        let mut state = self.state.lock().await;
        if let Some(previous) = state.scan_task.take() {
            previous.abort();
        }
        state.candidates.clear();
        state.scan_task = Some(tokio::spawn(run_scan(
            adapter,
            filter,
            sink,
            Arc::clone(&self.state),
        )));
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Some(task) = self.state.lock().await.scan_task.take() {
            task.abort();
        }
        if let Some(adapter) = &self.adapter {
            adapter.stop_scan().await?;
        }
        Ok(())
    }

    async fn connect(&self, identity: &PeripheralIdentity, sink: EventSink) -> Result<()> {
        let adapter = self.adapter()?;
        let (peripheral, attempt) = {
            let mut state = self.state.lock().await;
            let peripheral = state
                .candidates
                .remove(&identity.address)
                .ok_or(Error::NotConnected)?;
            (peripheral, state.begin_attempt())
        };
        let state = Arc::clone(&self.state);
        let disconnect_timeout = self.config.disconnect_timeout;

        // Not aborted on release: the platform may finish the connection
        // anyway, so a superseded task disconnects what it got.
        tokio::spawn(async move {
            info!("Connecting to {}", format_peripheral_id(&peripheral.id()));
            if let Err(e) = peripheral.connect().await {
                warn!("Connect failed: {}", e);
                sink.send(TransportEvent::LinkLost);
                return;
            }
            let mut state = state.lock().await;
            if !state.is_current(attempt) {
                drop(state);
                release_orphan(peripheral, disconnect_timeout).await;
                return;
            }
            let watcher = tokio::spawn(watch_disconnect(adapter, peripheral.id(), sink.clone()));
            state.abort_link_tasks();
            state.link_tasks.push(watcher);
            state.peripheral = Some(peripheral);
            drop(state);
            sink.send(TransportEvent::LinkEstablished);
        });
        Ok(())
    }

    async fn discover_services(&self, service: Uuid, sink: EventSink) -> Result<()> {
        let (peripheral, attempt) = {
            let state = self.state.lock().await;
            let peripheral = state.peripheral.clone().ok_or(Error::NotConnected)?;
            (peripheral, state.attempt)
        };
        let settle = self.config.discovery_settle;
        let state = Arc::clone(&self.state);

        let discovery = tokio::spawn(async move {
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
            if let Err(e) = peripheral.discover_services().await {
                warn!("Service discovery failed: {}", e);
                sink.send(TransportEvent::ServiceNotFound);
                return;
            }

            let Some(target) = peripheral.services().into_iter().find(|s| s.uuid == service)
            else {
                debug!("Service {} not present", service);
                sink.send(TransportEvent::ServiceNotFound);
                return;
            };
            let found: Vec<Uuid> = target.characteristics.iter().map(|c| c.uuid).collect();
            debug!("Service {} exposes {} characteristics", service, found.len());

            let mut state = state.lock().await;
            if !state.is_current(attempt) {
                debug!("Discovery finished after the link was released");
                return;
            }
            let pump = tokio::spawn(pump_notifications(peripheral.clone(), sink.clone()));
            state.characteristics = target
                .characteristics
                .into_iter()
                .map(|c| (c.uuid, c))
                .collect();
            state.link_tasks.push(pump);
            drop(state);
            sink.send(TransportEvent::ServicesResolved(found));
        });
        self.state.lock().await.link_tasks.push(discovery);
        Ok(())
    }

    async fn write_subscription_descriptor(
        &self,
        request: SubscriptionRequest,
        sink: EventSink,
    ) -> Result<()> {
        let peripheral = self.connected_peripheral().await?;
        let characteristic = self
            .state
            .lock()
            .await
            .characteristics
            .get(&request.characteristic)
            .cloned()
            .ok_or_else(|| {
                Error::subscription_failed(request.characteristic, "characteristic not discovered")
            })?;
        let write_timeout = self.config.write_timeout;

        tokio::spawn(async move {
            let write = async {
                if request.enable {
                    peripheral.subscribe(&characteristic).await
                } else {
                    peripheral.unsubscribe(&characteristic).await
                }
            };
            let event = match timeout(write_timeout, write).await {
                Ok(Ok(())) => TransportEvent::DescriptorWritten(request.characteristic),
                Ok(Err(e)) => TransportEvent::DescriptorWriteFailed {
                    characteristic: request.characteristic,
                    reason: e.to_string(),
                },
                Err(_) => TransportEvent::DescriptorWriteFailed {
                    characteristic: request.characteristic,
                    reason: format!("timed out after {:?}", write_timeout),
                },
            };
            sink.send(event);
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let peripheral = self.state.lock().await.release();
        let Some(peripheral) = peripheral else {
            return Ok(());
        };
        info!("Disconnecting from {}", format_peripheral_id(&peripheral.id()));
        timeout(self.config.disconnect_timeout, peripheral.disconnect())
            .await
            .map_err(|_| Error::timeout("disconnect", self.config.disconnect_timeout))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_builder() {
        let config = ConnectionConfig::new()
            .write_timeout(Duration::from_secs(3))
            .disconnect_timeout(Duration::from_secs(1))
            .discovery_settle(Duration::ZERO);
        assert_eq!(config.write_timeout, Duration::from_secs(3));
        assert_eq!(config.disconnect_timeout, Duration::from_secs(1));
        assert!(config.discovery_settle.is_zero());
    }

    #[test]
    fn test_default_settle_is_linux_only() {
        let config = ConnectionConfig::default();
        assert_eq!(cfg!(target_os = "linux"), !config.discovery_settle.is_zero());
    }

    #[test]
    fn test_release_supersedes_attempt_in_flight() {
        let mut state = LinkState::default();
        let attempt = state.begin_attempt();
        assert!(state.is_current(attempt));

        assert!(state.release().is_none());
        assert!(!state.is_current(attempt));

        let next = state.begin_attempt();
        assert!(state.is_current(next));
        assert!(!state.is_current(attempt));
    }

    #[tokio::test]
    async fn test_release_aborts_link_tasks() {
        let mut state = LinkState::default();
        let task = tokio::spawn(std::future::pending::<()>());
        state.link_tasks.push(task);
        let attempt = state.begin_attempt();

        assert!(state.release().is_none());
        assert!(state.link_tasks.is_empty());
        assert!(!state.is_current(attempt));
    }

    #[test]
    fn test_identity_address_uses_mac() {
        let address = identity_address("AA:BB:CC:DD:EE:FF", || "fallback".to_string());
        assert_eq!(address, "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_identity_address_falls_back_on_zero_mac() {
        let address = identity_address(ZERO_ADDRESS, || "1F2E3D4C".to_string());
        assert_eq!(address, "1F2E3D4C");
    }
}
