//! Connection manager.
//!
//! [`ConnectionManager`] is the orchestration root. It owns the
//! [`SessionMachine`], the [`StreamAggregator`] and a [`Transport`], and is
//! the only place any of them is mutated: all three live behind a single
//! [`tokio::sync::Mutex`]. Transport outcomes arrive on one `mpsc` channel
//! drained by a single pump task; phase timers report back on a second
//! channel drained by the same task.
//!
//! Observers never see the machine or the buffers. They get whole
//! [`UiSnapshot`]s from a `watch` channel and, for diagnostics,
//! [`SessionEvent`]s from an [`EventDispatcher`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stressband_types::{RawNotification, SignalKind, decode_notification, uuid::STRESS_SERVICE};

use crate::aggregator::{StreamAggregator, UiSnapshot};
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, SessionEvent};
use crate::session::{Command, PhaseTimeouts, SessionMachine, SessionState, Step};
use crate::transport::{
    EventSink, Generation, SCAN_FAILED_INTERNAL_ERROR, ScanFilter, TaggedEvent, Transport,
    TransportEvent,
};

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Service UUID to scan and discover.
    pub service: Uuid,
    /// Optional substring the advertised name must contain.
    pub name_filter: Option<String>,
    /// Bound on `Connecting`.
    pub connect_timeout: Duration,
    /// Bound on `ServicesDiscovering`.
    pub discovery_timeout: Duration,
    /// Bound on `Subscribing`.
    pub subscribe_timeout: Duration,
    /// Empty the histories whenever a new session starts.
    pub reset_history_on_connect: bool,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let timeouts = PhaseTimeouts::default();
        Self {
            service: STRESS_SERVICE,
            name_filter: None,
            connect_timeout: timeouts.connect,
            discovery_timeout: timeouts.discovery,
            subscribe_timeout: timeouts.subscribe,
            reset_history_on_connect: false,
            event_capacity: 100,
        }
    }
}

impl ManagerConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service UUID.
    #[must_use]
    pub fn service(mut self, service: Uuid) -> Self {
        self.service = service;
        self
    }

    /// Only accept peripherals whose name contains `filter`.
    #[must_use]
    pub fn name_filter(mut self, filter: impl Into<String>) -> Self {
        self.name_filter = Some(filter.into());
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the subscription timeout.
    #[must_use]
    pub fn subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Reset history at the start of every session.
    #[must_use]
    pub fn reset_history_on_connect(mut self, reset: bool) -> Self {
        self.reset_history_on_connect = reset;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("discovery_timeout", self.discovery_timeout),
            ("subscribe_timeout", self.subscribe_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{} must be non-zero", name)));
            }
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be at least 1"));
        }
        if self.service.is_nil() {
            return Err(Error::invalid_config("service UUID must not be nil"));
        }
        Ok(())
    }

    /// Phase bounds for the state machine.
    pub fn timeouts(&self) -> PhaseTimeouts {
        PhaseTimeouts {
            connect: self.connect_timeout,
            discovery: self.discovery_timeout,
            subscribe: self.subscribe_timeout,
        }
    }

    /// Scan filter for this configuration.
    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter {
            service: self.service,
            name_contains: self.name_filter.clone(),
        }
    }
}

/// Everything behind the session mutex.
#[derive(Debug)]
struct Session {
    machine: SessionMachine,
    aggregator: StreamAggregator,
}

/// State shared between the manager handle and its pump task.
struct Shared<T> {
    transport: T,
    config: ManagerConfig,
    session: Mutex<Session>,
    snapshots: watch::Sender<UiSnapshot>,
    events: EventDispatcher,
    event_tx: mpsc::UnboundedSender<TaggedEvent>,
    timer_tx: mpsc::UnboundedSender<u64>,
}

/// Drives one band session over a [`Transport`].
///
/// # Example
///
/// ```no_run
/// use stressband_core::{BleTransport, ConnectionManager, ManagerConfig};
///
/// # async fn example() -> stressband_core::Result<()> {
/// let transport = BleTransport::new().await?;
/// let manager = ConnectionManager::new(transport, ManagerConfig::default())?;
/// let mut snapshots = manager.subscribe();
///
/// manager.start_connect().await?;
/// while snapshots.changed().await.is_ok() {
///     let snapshot = snapshots.borrow().clone();
///     println!("{}: HRV {:?}", snapshot.status, snapshot.latest_hrv);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager<T: Transport + 'static> {
    shared: Arc<Shared<T>>,
    shutdown: CancellationToken,
}

impl<T: Transport + 'static> std::fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl<T: Transport + 'static> ConnectionManager<T> {
    /// Create a manager and spawn its event pump.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: T, config: ManagerConfig) -> Result<Self> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let aggregator = StreamAggregator::new();
        let (snapshots, _) = watch::channel(aggregator.snapshot());

        let shared = Arc::new(Shared {
            transport,
            session: Mutex::new(Session {
                machine: SessionMachine::new(config.timeouts()),
                aggregator,
            }),
            snapshots,
            events: EventDispatcher::new(config.event_capacity),
            event_tx,
            timer_tx,
            config,
        });

        let shutdown = CancellationToken::new();
        tokio::spawn(pump(
            Arc::clone(&shared),
            event_rx,
            timer_rx,
            shutdown.clone(),
        ));

        Ok(Self { shared, shutdown })
    }

    /// Begin a session: `Idle`, `Disconnected` or `Error` move to `Scanning`.
    ///
    /// While a session is already running this only updates the status
    /// line. Returns [`Error::AdapterUnavailable`] when the radio is missing
    /// or off; the state does not change.
    #[tracing::instrument(skip(self))]
    pub async fn start_connect(&self) -> Result<()> {
        let mut session = self.shared.session.lock().await;
        let adapter_available = if session.machine.state().can_start() {
            self.shared.transport.adapter_available().await
        } else {
            true
        };

        match session.machine.start_connect(adapter_available) {
            Ok(step) => {
                if step.transition.is_some() && self.shared.config.reset_history_on_connect {
                    debug!("Resetting history for new session");
                    session.aggregator.reset_history();
                }
                self.shared.apply_step(&mut session, step).await;
                Ok(())
            }
            Err(err) => {
                warn!("Cannot start session: {}", err);
                let snapshot = session.aggregator.set_status(err.to_string());
                self.shared.publish(snapshot);
                Err(err)
            }
        }
    }

    /// The presentation layer's connect trigger; same as
    /// [`start_connect`](Self::start_connect).
    pub async fn request_connect(&self) -> Result<()> {
        self.start_connect().await
    }

    /// Decode a raw notification and fold it into the aggregator.
    ///
    /// Decode failures are logged and dropped; they never touch the session.
    pub async fn on_notification(&self, characteristic: Uuid, bytes: &[u8]) {
        let mut session = self.shared.session.lock().await;
        self.shared
            .apply_notification(&mut session, RawNotification::now(characteristic, bytes.to_vec()));
    }

    /// Stop any scan, drop the link, clear pending subscriptions and return
    /// to `Idle`. Calling it again is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup(&self) {
        let mut session = self.shared.session.lock().await;
        let step = session.machine.cleanup();
        if step.is_noop() {
            debug!("Already idle");
            return;
        }
        self.shared.apply_step(&mut session, step).await;
    }

    /// Latest published snapshot.
    pub fn current_snapshot(&self) -> UiSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    /// Watch snapshots as they are published.
    pub fn subscribe(&self) -> watch::Receiver<UiSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Diagnostic event stream.
    pub fn events(&self) -> &EventDispatcher {
        &self.shared.events
    }

    /// Current session state.
    pub async fn state(&self) -> SessionState {
        self.shared.session.lock().await.machine.state().clone()
    }

    /// Current session generation.
    pub async fn generation(&self) -> Generation {
        self.shared.session.lock().await.machine.generation()
    }

    /// Number of subscription writes queued or in flight.
    pub async fn pending_subscriptions(&self) -> usize {
        self.shared.session.lock().await.machine.queue().len()
    }

    /// The manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }
}

impl<T: Transport + 'static> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<T: Transport + 'static> Shared<T> {
    fn sink(&self, generation: Generation) -> EventSink {
        EventSink::new(generation, self.event_tx.clone())
    }

    fn publish(&self, snapshot: UiSnapshot) {
        self.snapshots.send_replace(snapshot);
    }

    /// Publish the step's effects, then issue its commands.
    async fn apply_step(&self, session: &mut Session, step: Step) {
        let Step {
            commands,
            status,
            transition,
            selected,
        } = step;

        if let Some(status) = status {
            let connected = session.machine.state().is_connected();
            let snapshot = session.aggregator.set_link(connected, status);
            self.publish(snapshot);
        }
        if let Some((from, to)) = transition {
            self.events.send(SessionEvent::StateChanged {
                from: from.to_string(),
                to: to.to_string(),
                generation: session.machine.generation().0,
            });
        }
        if let Some(peripheral) = selected {
            self.events
                .send(SessionEvent::PeripheralSelected { peripheral });
        }

        let generation = session.machine.generation();
        for command in commands {
            self.issue(generation, command).await;
        }
    }

    /// Hand one command to the transport. A command that cannot even be
    /// issued is reported back as the failure event of its phase.
    async fn issue(&self, generation: Generation, command: Command) {
        let sink = self.sink(generation);
        let (result, on_failure) = match command {
            Command::StartScan => (
                self.transport
                    .start_scan(self.config.scan_filter(), sink.clone())
                    .await,
                Some(TransportEvent::ScanFailed {
                    code: SCAN_FAILED_INTERNAL_ERROR,
                }),
            ),
            Command::StopScan => (self.transport.stop_scan().await, None),
            Command::Connect(peripheral) => (
                self.transport.connect(&peripheral, sink.clone()).await,
                Some(TransportEvent::LinkLost),
            ),
            Command::DiscoverServices => (
                self.transport
                    .discover_services(self.config.service, sink.clone())
                    .await,
                Some(TransportEvent::ServiceNotFound),
            ),
            Command::WriteDescriptor(request) => {
                let result = self
                    .transport
                    .write_subscription_descriptor(request, sink.clone())
                    .await;
                let reason = result.as_ref().err().map(|e| e.to_string());
                (
                    result,
                    reason.map(|reason| TransportEvent::DescriptorWriteFailed {
                        characteristic: request.characteristic,
                        reason,
                    }),
                )
            }
            Command::Disconnect => (self.transport.disconnect().await, None),
            Command::ArmTimer { epoch, after } => {
                let timer_tx = self.timer_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = timer_tx.send(epoch);
                });
                (Ok(()), None)
            }
        };

        if let Err(err) = result {
            warn!("Transport command failed: {}", err);
            if let Some(event) = on_failure {
                sink.send(event);
            }
        }
    }

    fn apply_notification(&self, session: &mut Session, raw: RawNotification) {
        let signal = SignalKind::from_uuid(&raw.characteristic);
        match decode_notification(raw) {
            Ok(sample) => {
                let snapshot = session.aggregator.apply(sample);
                self.publish(snapshot);
                self.events.send(SessionEvent::SampleApplied { sample });
            }
            Err(err) => {
                debug!("Dropping notification: {}", err);
                self.events.send(SessionEvent::SampleDropped {
                    signal,
                    reason: err.to_string(),
                });
            }
        }
    }

    async fn dispatch(&self, tagged: TaggedEvent) {
        let mut session = self.session.lock().await;
        if !session.machine.is_current(tagged.generation) {
            debug!(
                "Discarding event from superseded session {}: {:?}",
                tagged.generation, tagged.event
            );
            return;
        }
        match tagged.event {
            TransportEvent::Notification(raw) => {
                if session.machine.state().accepts_samples() {
                    self.apply_notification(&mut session, raw);
                } else {
                    debug!(
                        "Dropping notification from {} in {}",
                        raw.characteristic,
                        session.machine.state()
                    );
                }
            }
            event => {
                let step = session.machine.handle_event(event);
                self.apply_step(&mut session, step).await;
            }
        }
    }

    async fn fire_timer(&self, epoch: u64) {
        let mut session = self.session.lock().await;
        let step = session.machine.on_phase_timeout(epoch);
        self.apply_step(&mut session, step).await;
    }
}

async fn pump<T: Transport + 'static>(
    shared: Arc<Shared<T>>,
    mut event_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    mut timer_rx: mpsc::UnboundedReceiver<u64>,
    shutdown: CancellationToken,
) {
    info!("Event pump started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(tagged) = event_rx.recv() => shared.dispatch(tagged).await,
            Some(epoch) = timer_rx.recv() => shared.fire_timer(epoch).await,
            else => break,
        }
    }
    debug!("Event pump stopped");
}
