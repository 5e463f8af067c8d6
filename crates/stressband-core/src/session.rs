//! Session state machine.
//!
//! [`SessionMachine`] is a pure, synchronous state machine. It is driven by
//! user triggers ([`start_connect`](SessionMachine::start_connect),
//! [`cleanup`](SessionMachine::cleanup)), transport events and phase
//! timeouts, and answers each with a [`Step`]: the transport [`Command`]s to
//! issue and the status line to publish. It never performs I/O itself, which
//! keeps every transition testable without a radio.
//!
//! ```text
//! Idle ─start─▶ Scanning ─found─▶ Connecting ─link─▶ ServicesDiscovering
//!                                                          │ resolved
//!                             Streaming ◀─drained─ Subscribing ◀┘
//! ```
//!
//! Any state other than `Idle` moves to `Disconnected` on link loss. Scan
//! failures, missing services, failed descriptor writes and phase timeouts
//! land in `Error`. Only an explicit `start_connect` leaves `Disconnected`
//! or `Error`.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stressband_types::SignalKind;

use crate::error::{Error, Result, SessionError};
use crate::subscription::{AckOutcome, SubscriptionQueue, SubscriptionRequest};
use crate::transport::{Generation, PeripheralIdentity, TransportEvent};

/// Lifecycle of a band session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum SessionState {
    /// Nothing running.
    #[default]
    Idle,
    /// Waiting for a matching advertisement.
    Scanning,
    /// Link being established.
    Connecting,
    /// Link up, waiting for the GATT table.
    ServicesDiscovering,
    /// Enabling notifications one characteristic at a time.
    Subscribing,
    /// Notifications flowing.
    Streaming,
    /// Link dropped.
    Disconnected,
    /// Session ended on a failure.
    Error(SessionError),
}

impl SessionState {
    /// Short name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Scanning => "Scanning",
            SessionState::Connecting => "Connecting",
            SessionState::ServicesDiscovering => "ServicesDiscovering",
            SessionState::Subscribing => "Subscribing",
            SessionState::Streaming => "Streaming",
            SessionState::Disconnected => "Disconnected",
            SessionState::Error(_) => "Error",
        }
    }

    /// Whether a link to the band is up in this state.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionState::ServicesDiscovering | SessionState::Subscribing | SessionState::Streaming
        )
    }

    /// Why the session ended, once it has.
    pub fn end_reason(&self) -> Option<Error> {
        match self {
            SessionState::Disconnected => Some(Error::LinkLost),
            SessionState::Error(err) => Some(err.clone().into()),
            _ => None,
        }
    }

    /// Whether band notifications reach the aggregator in this state.
    pub fn accepts_samples(&self) -> bool {
        matches!(self, SessionState::Subscribing | SessionState::Streaming)
    }

    /// Whether `start_connect` may begin a new session from here.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Disconnected | SessionState::Error(_)
        )
    }

    /// Phase bounded by a timeout in this state, if any.
    pub fn timed_phase(&self) -> Option<Phase> {
        match self {
            SessionState::Connecting => Some(Phase::Connect),
            SessionState::ServicesDiscovering => Some(Phase::Discovery),
            SessionState::Subscribing => Some(Phase::Subscribe),
            _ => None,
        }
    }

    fn busy_message(&self) -> &'static str {
        match self {
            SessionState::Scanning => "Already scanning",
            SessionState::Connecting => "Already connecting",
            SessionState::ServicesDiscovering => "Already discovering services",
            SessionState::Subscribing => "Already subscribing",
            SessionState::Streaming => "Already streaming",
            _ => "Already running",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Error(reason) => write!(f, "Error({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// A timeout-bounded phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// `Connecting`.
    Connect,
    /// `ServicesDiscovering`.
    Discovery,
    /// `Subscribing`.
    Subscribe,
}

impl Phase {
    /// Label used in timeout reasons.
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Connect => "connect",
            Phase::Discovery => "service discovery",
            Phase::Subscribe => "subscription",
        }
    }
}

/// Upper bounds for the timed phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    /// Bound on `Connecting`.
    pub connect: Duration,
    /// Bound on `ServicesDiscovering`.
    pub discovery: Duration,
    /// Bound on `Subscribing`.
    pub subscribe: Duration,
}

impl PhaseTimeouts {
    /// Bound for a phase.
    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Connect => self.connect,
            Phase::Discovery => self.discovery,
            Phase::Subscribe => self.subscribe,
        }
    }
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            discovery: Duration::from_secs(10),
            subscribe: Duration::from_secs(10),
        }
    }
}

/// Transport work requested by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Begin scanning for the target service.
    StartScan,
    /// Stop scanning.
    StopScan,
    /// Connect to the chosen peripheral.
    Connect(PeripheralIdentity),
    /// Discover services on the connected peripheral.
    DiscoverServices,
    /// Write one subscription descriptor.
    WriteDescriptor(SubscriptionRequest),
    /// Drop the link and release the peripheral handle.
    Disconnect,
    /// Fire [`SessionMachine::on_phase_timeout`] with `epoch` after `after`.
    ArmTimer {
        /// Transition epoch the timer belongs to.
        epoch: u64,
        /// Delay before firing.
        after: Duration,
    },
}

/// Outcome of feeding one input to the machine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    /// Commands to issue, in order.
    pub commands: Vec<Command>,
    /// New status line, when it changed.
    pub status: Option<String>,
    /// `(from, to)` when the state changed.
    pub transition: Option<(SessionState, SessionState)>,
    /// Peripheral chosen by this step.
    pub selected: Option<PeripheralIdentity>,
}

impl Step {
    fn with_status(message: impl Into<String>) -> Self {
        Self {
            status: Some(message.into()),
            ..Self::default()
        }
    }

    /// Put `lead` ahead of this step's own commands.
    fn preceded_by(mut self, mut lead: Vec<Command>) -> Self {
        lead.append(&mut self.commands);
        self.commands = lead;
        self
    }

    /// Whether the step changes nothing.
    pub fn is_noop(&self) -> bool {
        self.commands.is_empty() && self.status.is_none() && self.transition.is_none()
    }
}

/// The session state machine.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    generation: Generation,
    epoch: u64,
    queue: SubscriptionQueue,
    peripheral: Option<PeripheralIdentity>,
    timeouts: PhaseTimeouts,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new(PhaseTimeouts::default())
    }
}

impl SessionMachine {
    /// Create an idle machine.
    pub fn new(timeouts: PhaseTimeouts) -> Self {
        Self {
            state: SessionState::Idle,
            generation: Generation::default(),
            epoch: 0,
            queue: SubscriptionQueue::new(),
            peripheral: None,
            timeouts,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current session generation.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Current transition epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The subscription queue.
    pub fn queue(&self) -> &SubscriptionQueue {
        &self.queue
    }

    /// Peripheral whose handle is currently held.
    pub fn peripheral(&self) -> Option<&PeripheralIdentity> {
        self.peripheral.as_ref()
    }

    /// Whether an event stamped with `generation` belongs to this session.
    pub fn is_current(&self, generation: Generation) -> bool {
        generation == self.generation
    }

    /// Status line for the current state.
    pub fn status_text(&self) -> String {
        match &self.state {
            SessionState::Idle => "Idle".to_string(),
            SessionState::Scanning => "Scanning for device…".to_string(),
            SessionState::Connecting => match &self.peripheral {
                Some(peripheral) => format!("Connecting to {}…", peripheral.address),
                None => "Connecting…".to_string(),
            },
            SessionState::ServicesDiscovering => "Discovering services…".to_string(),
            SessionState::Subscribing => "Subscribing to notifications…".to_string(),
            SessionState::Streaming => "Streaming".to_string(),
            SessionState::Disconnected => "Disconnected".to_string(),
            SessionState::Error(reason) => format!("Error: {}", reason),
        }
    }

    /// Begin a new session.
    ///
    /// Outside `Idle`, `Disconnected` and `Error` this only reports the busy
    /// state through the status line. With no usable adapter it returns
    /// [`Error::AdapterUnavailable`] and leaves the state untouched.
    pub fn start_connect(&mut self, adapter_available: bool) -> Result<Step> {
        if !self.state.can_start() {
            debug!("start_connect ignored in {}", self.state);
            return Ok(Step::with_status(self.state.busy_message()));
        }
        if !adapter_available {
            return Err(Error::AdapterUnavailable);
        }

        let mut commands = Vec::new();
        if self.peripheral.take().is_some() {
            commands.push(Command::Disconnect);
        }
        self.queue.clear();
        self.generation = self.generation.next();
        commands.push(Command::StartScan);

        info!("Session {} started", self.generation);
        Ok(self.transition(SessionState::Scanning).preceded_by(commands))
    }

    /// Tear the session down and return to `Idle`. A no-op from `Idle`.
    pub fn cleanup(&mut self) -> Step {
        if self.state == SessionState::Idle && self.peripheral.is_none() {
            return Step::default();
        }

        let mut commands = Vec::new();
        if self.state == SessionState::Scanning {
            commands.push(Command::StopScan);
        }
        if self.peripheral.take().is_some() {
            commands.push(Command::Disconnect);
        }
        self.queue.clear();
        self.generation = self.generation.next();

        info!("Session cleaned up");
        self.transition(SessionState::Idle).preceded_by(commands)
    }

    /// Feed a transport event that already passed the generation check.
    ///
    /// Notifications never change state and yield an empty step here; the
    /// caller routes them to the aggregator.
    pub fn handle_event(&mut self, event: TransportEvent) -> Step {
        let state = self.state.clone();
        match (&state, event) {
            (SessionState::Scanning, TransportEvent::PeripheralFound(peripheral)) => {
                info!("Found {}", peripheral);
                self.peripheral = Some(peripheral.clone());
                let step = self.transition(SessionState::Connecting);
                let mut step = step.preceded_by(vec![
                    Command::StopScan,
                    Command::Connect(peripheral.clone()),
                ]);
                step.selected = Some(peripheral);
                step
            }
            (_, TransportEvent::PeripheralFound(peripheral)) => {
                debug!("Ignoring late scan result {}", peripheral);
                Step::default()
            }

            (SessionState::Scanning, TransportEvent::ScanFailed { code }) => {
                warn!("Scan failed with code {}", code);
                self.fail(SessionError::ScanFailure { code })
            }

            (SessionState::Connecting, TransportEvent::LinkEstablished) => {
                self.transition(SessionState::ServicesDiscovering)
                    .preceded_by(vec![Command::DiscoverServices])
            }

            (SessionState::Idle | SessionState::Disconnected, TransportEvent::LinkLost) => {
                debug!("Ignoring link loss in {}", state);
                Step::default()
            }
            (state, TransportEvent::LinkLost) => {
                warn!("Link lost in {}", state);
                let mut commands = Vec::new();
                if *state == SessionState::Scanning {
                    commands.push(Command::StopScan);
                }
                self.queue.clear();
                self.transition(SessionState::Disconnected).preceded_by(commands)
            }

            (SessionState::ServicesDiscovering, TransportEvent::ServiceNotFound) => {
                self.fail(SessionError::ServiceNotFound)
            }

            (SessionState::ServicesDiscovering, TransportEvent::ServicesResolved(found)) => {
                self.subscribe_all(&found)
            }

            (SessionState::Subscribing, TransportEvent::DescriptorWritten(characteristic)) => {
                match self.queue.on_write_acknowledged(characteristic) {
                    AckOutcome::Next(request) => Step {
                        commands: vec![Command::WriteDescriptor(request)],
                        ..Step::default()
                    },
                    AckOutcome::Drained => self.transition(SessionState::Streaming),
                    outcome @ AckOutcome::Ignored { .. } => {
                        if let Some(mismatch) = outcome.mismatch() {
                            warn!("{}", mismatch);
                        }
                        Step::default()
                    }
                }
            }

            (
                SessionState::Subscribing,
                TransportEvent::DescriptorWriteFailed {
                    characteristic,
                    reason,
                },
            ) if self.queue.in_flight().map(|r| r.characteristic) == Some(characteristic) => {
                warn!("Subscription to {} failed: {}", characteristic, reason);
                self.fail(SessionError::SubscriptionFailed {
                    characteristic,
                    reason,
                })
            }

            (_, TransportEvent::Notification(_)) => Step::default(),

            (state, event) => {
                debug!("Ignoring {:?} in {}", event, state);
                Step::default()
            }
        }
    }

    /// Fire a phase timer. Ignored unless `epoch` is the current epoch.
    pub fn on_phase_timeout(&mut self, epoch: u64) -> Step {
        if epoch != self.epoch {
            debug!("Stale timer for epoch {} (now {})", epoch, self.epoch);
            return Step::default();
        }
        match self.state.timed_phase() {
            Some(phase) => {
                let after = self.timeouts.for_phase(phase);
                warn!("{} timed out after {:?}", phase.label(), after);
                self.fail(SessionError::Timeout {
                    phase: phase.label(),
                    after,
                })
            }
            None => Step::default(),
        }
    }

    fn subscribe_all(&mut self, found: &[Uuid]) -> Step {
        let targets: Vec<SignalKind> = SignalKind::ALL
            .into_iter()
            .filter(|kind| found.contains(&kind.uuid()))
            .collect();
        for kind in SignalKind::ALL {
            if !targets.contains(&kind) {
                debug!("Characteristic for {} not present, skipping", kind);
            }
        }
        if targets.is_empty() {
            return self.fail(SessionError::NoTargetCharacteristics);
        }

        let mut issued = Vec::new();
        for kind in targets {
            if let Some(request) = self.queue.enqueue(SubscriptionRequest::enable(kind)) {
                issued.push(Command::WriteDescriptor(request));
            }
        }
        self.transition(SessionState::Subscribing).preceded_by(issued)
    }

    fn fail(&mut self, reason: SessionError) -> Step {
        self.queue.clear();
        self.transition(SessionState::Error(reason))
    }

    fn transition(&mut self, to: SessionState) -> Step {
        let from = std::mem::replace(&mut self.state, to.clone());
        self.epoch += 1;
        debug!("{} -> {} (epoch {})", from, to, self.epoch);

        let mut commands = Vec::new();
        if let Some(phase) = to.timed_phase() {
            commands.push(Command::ArmTimer {
                epoch: self.epoch,
                after: self.timeouts.for_phase(phase),
            });
        }
        Step {
            commands,
            status: Some(self.status_text()),
            transition: Some((from, to)),
            selected: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stressband_types::uuid::STRESS_SERVICE;

    fn band() -> PeripheralIdentity {
        PeripheralIdentity::new("AA:BB:CC:DD:EE:FF", STRESS_SERVICE)
    }

    fn all_characteristics() -> Vec<Uuid> {
        SignalKind::ALL.iter().map(|k| k.uuid()).collect()
    }

    fn writes(step: &Step) -> Vec<Uuid> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                Command::WriteDescriptor(r) => Some(r.characteristic),
                _ => None,
            })
            .collect()
    }

    fn streaming_machine() -> SessionMachine {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        machine.handle_event(TransportEvent::PeripheralFound(band()));
        machine.handle_event(TransportEvent::LinkEstablished);
        machine.handle_event(TransportEvent::ServicesResolved(all_characteristics()));
        for kind in SignalKind::ALL {
            machine.handle_event(TransportEvent::DescriptorWritten(kind.uuid()));
        }
        machine
    }

    #[test]
    fn test_start_connect_from_idle() {
        let mut machine = SessionMachine::default();
        let step = machine.start_connect(true).unwrap();
        assert_eq!(machine.state(), &SessionState::Scanning);
        assert_eq!(step.commands, vec![Command::StartScan]);
        assert_eq!(step.status.as_deref(), Some("Scanning for device…"));
        assert_eq!(machine.generation(), Generation(1));
    }

    #[test]
    fn test_start_connect_without_adapter() {
        let mut machine = SessionMachine::default();
        let err = machine.start_connect(false).unwrap_err();
        assert!(matches!(err, Error::AdapterUnavailable));
        assert_eq!(machine.state(), &SessionState::Idle);
        assert_eq!(machine.generation(), Generation(0));
    }

    #[test]
    fn test_start_connect_while_scanning_is_noop() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        let epoch = machine.epoch();

        let step = machine.start_connect(true).unwrap();
        assert!(step.commands.is_empty());
        assert!(step.transition.is_none());
        assert_eq!(step.status.as_deref(), Some("Already scanning"));
        assert_eq!(machine.state(), &SessionState::Scanning);
        assert_eq!(machine.epoch(), epoch);
    }

    #[test]
    fn test_peripheral_found_stops_scan_and_connects() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        let step = machine.handle_event(TransportEvent::PeripheralFound(band()));

        assert_eq!(machine.state(), &SessionState::Connecting);
        assert_eq!(step.commands[0], Command::StopScan);
        assert_eq!(step.commands[1], Command::Connect(band()));
        assert!(matches!(step.commands[2], Command::ArmTimer { .. }));
        assert_eq!(
            step.status.as_deref(),
            Some("Connecting to AA:BB:CC:DD:EE:FF…")
        );
        assert_eq!(step.selected, Some(band()));
    }

    #[test]
    fn test_second_scan_result_ignored() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        machine.handle_event(TransportEvent::PeripheralFound(band()));
        let other = PeripheralIdentity::new("11:22:33:44:55:66", STRESS_SERVICE);
        let step = machine.handle_event(TransportEvent::PeripheralFound(other));
        assert!(step.is_noop());
        assert_eq!(machine.peripheral(), Some(&band()));
    }

    #[test]
    fn test_scan_failure() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        let step = machine.handle_event(TransportEvent::ScanFailed { code: 2 });
        assert_eq!(
            machine.state(),
            &SessionState::Error(SessionError::ScanFailure { code: 2 })
        );
        assert_eq!(step.status.as_deref(), Some("Error: scan failed (code 2)"));
    }

    #[test]
    fn test_full_flow_to_streaming() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        machine.handle_event(TransportEvent::PeripheralFound(band()));

        let step = machine.handle_event(TransportEvent::LinkEstablished);
        assert_eq!(machine.state(), &SessionState::ServicesDiscovering);
        assert_eq!(step.commands[0], Command::DiscoverServices);
        assert!(machine.state().is_connected());

        let step = machine.handle_event(TransportEvent::ServicesResolved(all_characteristics()));
        assert_eq!(machine.state(), &SessionState::Subscribing);
        assert_eq!(writes(&step), vec![SignalKind::Hrv.uuid()]);
        assert_eq!(machine.queue().len(), 3);

        let step = machine.handle_event(TransportEvent::DescriptorWritten(SignalKind::Hrv.uuid()));
        assert_eq!(writes(&step), vec![SignalKind::Eda.uuid()]);
        let step = machine.handle_event(TransportEvent::DescriptorWritten(SignalKind::Eda.uuid()));
        assert_eq!(writes(&step), vec![SignalKind::StressState.uuid()]);
        let step = machine.handle_event(TransportEvent::DescriptorWritten(
            SignalKind::StressState.uuid(),
        ));
        assert_eq!(machine.state(), &SessionState::Streaming);
        assert_eq!(step.status.as_deref(), Some("Streaming"));
        assert!(machine.queue().is_empty());
    }

    #[test]
    fn test_missing_characteristics_are_skipped() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        machine.handle_event(TransportEvent::PeripheralFound(band()));
        machine.handle_event(TransportEvent::LinkEstablished);

        let step = machine.handle_event(TransportEvent::ServicesResolved(vec![
            SignalKind::StressState.uuid(),
            Uuid::nil(),
        ]));
        assert_eq!(machine.state(), &SessionState::Subscribing);
        assert_eq!(writes(&step), vec![SignalKind::StressState.uuid()]);
        assert_eq!(machine.queue().len(), 1);
    }

    #[test]
    fn test_no_target_characteristics() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        machine.handle_event(TransportEvent::PeripheralFound(band()));
        machine.handle_event(TransportEvent::LinkEstablished);
        machine.handle_event(TransportEvent::ServicesResolved(vec![Uuid::nil()]));
        assert_eq!(
            machine.state(),
            &SessionState::Error(SessionError::NoTargetCharacteristics)
        );
    }

    #[test]
    fn test_service_not_found() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        machine.handle_event(TransportEvent::PeripheralFound(band()));
        machine.handle_event(TransportEvent::LinkEstablished);
        let step = machine.handle_event(TransportEvent::ServiceNotFound);
        assert_eq!(
            machine.state(),
            &SessionState::Error(SessionError::ServiceNotFound)
        );
        assert_eq!(
            step.status.as_deref(),
            Some("Error: stress service not found")
        );
    }

    #[test]
    fn test_descriptor_write_failure() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        machine.handle_event(TransportEvent::PeripheralFound(band()));
        machine.handle_event(TransportEvent::LinkEstablished);
        machine.handle_event(TransportEvent::ServicesResolved(all_characteristics()));
        machine.handle_event(TransportEvent::DescriptorWriteFailed {
            characteristic: SignalKind::Hrv.uuid(),
            reason: "gatt error".to_string(),
        });
        assert!(matches!(
            machine.state(),
            SessionState::Error(SessionError::SubscriptionFailed { .. })
        ));
        assert!(machine.queue().is_empty());
    }

    #[test]
    fn test_mismatched_ack_keeps_subscribing() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        machine.handle_event(TransportEvent::PeripheralFound(band()));
        machine.handle_event(TransportEvent::LinkEstablished);
        machine.handle_event(TransportEvent::ServicesResolved(all_characteristics()));

        let step = machine.handle_event(TransportEvent::DescriptorWritten(SignalKind::Eda.uuid()));
        assert!(step.is_noop());
        assert_eq!(machine.state(), &SessionState::Subscribing);
        assert_eq!(machine.queue().len(), 3);
    }

    #[test]
    fn test_link_lost_discards_pending_requests() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        machine.handle_event(TransportEvent::PeripheralFound(band()));
        machine.handle_event(TransportEvent::LinkEstablished);
        machine.handle_event(TransportEvent::ServicesResolved(all_characteristics()));

        let step = machine.handle_event(TransportEvent::LinkLost);
        assert_eq!(machine.state(), &SessionState::Disconnected);
        assert_eq!(step.status.as_deref(), Some("Disconnected"));
        assert!(machine.queue().is_empty());

        // A late ack after the link dropped does nothing.
        let step = machine.handle_event(TransportEvent::DescriptorWritten(SignalKind::Hrv.uuid()));
        assert!(step.is_noop());
    }

    #[test]
    fn test_link_lost_in_idle_ignored() {
        let mut machine = SessionMachine::default();
        assert!(machine.handle_event(TransportEvent::LinkLost).is_noop());
        assert_eq!(machine.state(), &SessionState::Idle);
    }

    #[test]
    fn test_no_auto_retry_after_disconnect() {
        let mut machine = streaming_machine();
        machine.handle_event(TransportEvent::LinkLost);
        for event in [
            TransportEvent::LinkEstablished,
            TransportEvent::PeripheralFound(band()),
            TransportEvent::ServicesResolved(all_characteristics()),
        ] {
            assert!(machine.handle_event(event).is_noop());
        }
        assert_eq!(machine.state(), &SessionState::Disconnected);
    }

    #[test]
    fn test_restart_after_disconnect_releases_handle() {
        let mut machine = streaming_machine();
        machine.handle_event(TransportEvent::LinkLost);
        let before = machine.generation();

        let step = machine.start_connect(true).unwrap();
        assert_eq!(step.commands[0], Command::Disconnect);
        assert_eq!(step.commands[1], Command::StartScan);
        assert_eq!(machine.state(), &SessionState::Scanning);
        assert_eq!(machine.generation(), before.next());
    }

    #[test]
    fn test_phase_timeout() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        let step = machine.handle_event(TransportEvent::PeripheralFound(band()));
        let epoch = match step.commands.last() {
            Some(Command::ArmTimer { epoch, after }) => {
                assert_eq!(*after, Duration::from_secs(15));
                *epoch
            }
            other => panic!("expected timer, got {:?}", other),
        };

        let step = machine.on_phase_timeout(epoch);
        assert_eq!(
            step.status.as_deref(),
            Some("Error: connect timed out after 15s")
        );
        assert!(matches!(
            machine.state(),
            SessionState::Error(SessionError::Timeout { phase: "connect", .. })
        ));
    }

    #[test]
    fn test_stale_timer_ignored() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        machine.handle_event(TransportEvent::PeripheralFound(band()));
        let connect_epoch = machine.epoch();
        machine.handle_event(TransportEvent::LinkEstablished);

        assert!(machine.on_phase_timeout(connect_epoch).is_noop());
        assert_eq!(machine.state(), &SessionState::ServicesDiscovering);
    }

    #[test]
    fn test_cleanup_from_streaming() {
        let mut machine = streaming_machine();
        let generation = machine.generation();
        let step = machine.cleanup();
        assert_eq!(step.commands, vec![Command::Disconnect]);
        assert_eq!(machine.state(), &SessionState::Idle);
        assert!(machine.queue().is_empty());
        assert!(machine.peripheral().is_none());
        assert_eq!(machine.generation(), generation.next());
        assert!(!machine.is_current(generation));
    }

    #[test]
    fn test_cleanup_from_scanning_stops_scan() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        let step = machine.cleanup();
        assert_eq!(step.commands, vec![Command::StopScan]);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let mut machine = streaming_machine();
        machine.cleanup();
        let generation = machine.generation();
        let step = machine.cleanup();
        assert!(step.is_noop());
        assert_eq!(machine.generation(), generation);
    }

    #[test]
    fn test_cleanup_mid_subscription() {
        let mut machine = SessionMachine::default();
        machine.start_connect(true).unwrap();
        machine.handle_event(TransportEvent::PeripheralFound(band()));
        machine.handle_event(TransportEvent::LinkEstablished);
        machine.handle_event(TransportEvent::ServicesResolved(all_characteristics()));
        machine.cleanup();
        assert!(machine.queue().is_empty());
        assert_eq!(machine.state(), &SessionState::Idle);
    }

    #[test]
    fn test_end_reason() {
        assert!(SessionState::Streaming.end_reason().is_none());
        assert!(SessionState::Idle.end_reason().is_none());
        assert!(matches!(
            SessionState::Disconnected.end_reason(),
            Some(Error::LinkLost)
        ));
        assert!(matches!(
            SessionState::Error(SessionError::ScanFailure { code: 2 }).end_reason(),
            Some(Error::ScanFailure { code: 2 })
        ));
    }

    #[test]
    fn test_only_subscribed_states_accept_samples() {
        assert!(SessionState::Subscribing.accepts_samples());
        assert!(SessionState::Streaming.accepts_samples());
        for state in [
            SessionState::Idle,
            SessionState::Scanning,
            SessionState::Connecting,
            SessionState::ServicesDiscovering,
            SessionState::Disconnected,
            SessionState::Error(SessionError::ServiceNotFound),
        ] {
            assert!(!state.accepts_samples(), "{} accepts samples", state);
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Streaming.to_string(), "Streaming");
        assert_eq!(
            SessionState::Error(SessionError::ServiceNotFound).to_string(),
            "Error(stress service not found)"
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use stressband_types::uuid::STRESS_SERVICE;

    #[derive(Debug, Clone)]
    enum Input {
        Start,
        Cleanup,
        Event(TransportEvent),
        Timeout,
    }

    fn input() -> impl Strategy<Value = Input> {
        let kind = prop_oneof![
            Just(SignalKind::Hrv),
            Just(SignalKind::Eda),
            Just(SignalKind::StressState)
        ];
        prop_oneof![
            Just(Input::Start),
            Just(Input::Cleanup),
            Just(Input::Timeout),
            Just(Input::Event(TransportEvent::PeripheralFound(
                PeripheralIdentity::new("AA:BB:CC:DD:EE:FF", STRESS_SERVICE)
            ))),
            Just(Input::Event(TransportEvent::LinkEstablished)),
            Just(Input::Event(TransportEvent::LinkLost)),
            Just(Input::Event(TransportEvent::ServiceNotFound)),
            Just(Input::Event(TransportEvent::ServicesResolved(
                SignalKind::ALL.iter().map(|k| k.uuid()).collect()
            ))),
            (1..5i32).prop_map(|code| Input::Event(TransportEvent::ScanFailed { code })),
            kind.prop_map(|k| Input::Event(TransportEvent::DescriptorWritten(k.uuid()))),
        ]
    }

    proptest! {
        #[test]
        fn cleanup_always_lands_idle(inputs in proptest::collection::vec(input(), 0..40)) {
            let mut machine = SessionMachine::default();
            for input in inputs {
                match input {
                    Input::Start => { let _ = machine.start_connect(true); }
                    Input::Cleanup => { machine.cleanup(); }
                    Input::Event(event) => { machine.handle_event(event); }
                    Input::Timeout => { machine.on_phase_timeout(machine.epoch()); }
                }
                prop_assert!(machine.queue().outstanding() <= 1);
            }
            machine.cleanup();
            prop_assert_eq!(machine.state(), &SessionState::Idle);
            prop_assert!(machine.queue().is_empty());
            prop_assert!(machine.cleanup().is_noop());
        }
    }
}
