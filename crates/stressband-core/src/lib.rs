//! Connection and streaming-protocol manager for stress band wearables.
//!
//! This crate connects to a single stress band over Bluetooth Low Energy,
//! subscribes to its three notification characteristics, decodes every
//! payload into a typed sample and keeps a bounded rolling view of the most
//! recent readings for presentation.
//!
//! # Features
//!
//! - **Session state machine**: scan, connect, discover, subscribe, stream,
//!   with explicit `Disconnected` and `Error` states and no silent retries
//! - **Serialized subscriptions**: at most one descriptor write in flight
//! - **Phase timeouts**: connect, discovery and subscription are bounded
//! - **Stale event rejection**: every transport event carries the session
//!   generation it belongs to
//! - **Snapshots**: presentation code watches immutable [`UiSnapshot`]s
//! - **Pluggable transport**: [`BleTransport`] for real hardware,
//!   [`MockTransport`] for tests
//!
//! # Architecture
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | Pure state machine: inputs in, transport commands out |
//! | [`subscription`] | FIFO of descriptor writes, one outstanding |
//! | [`aggregator`] | Rolling histories and the published snapshot |
//! | [`manager`] | Mutex-guarded orchestration, event pump, timers |
//! | [`transport`] | The [`Transport`] trait and its event types |
//! | [`ble`] | btleplug implementation of [`Transport`] |
//! | [`mock`] | Scripted implementation of [`Transport`] |
//!
//! Payload decoding lives in `stressband-types` and is re-exported here.
//!
//! # Quick Start
//!
//! ```no_run
//! use stressband_core::{BleTransport, ConnectionManager, ManagerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = BleTransport::new().await?;
//!     let manager = ConnectionManager::new(transport, ManagerConfig::default())?;
//!     let mut snapshots = manager.subscribe();
//!
//!     manager.start_connect().await?;
//!     while snapshots.changed().await.is_ok() {
//!         let snapshot = snapshots.borrow().clone();
//!         println!("{} | HRV {:?} ms", snapshot.status, snapshot.latest_hrv);
//!     }
//!
//!     manager.cleanup().await;
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod ble;
pub mod error;
pub mod events;
pub mod manager;
pub mod mock;
pub mod session;
pub mod subscription;
pub mod transport;

pub use stressband_types::types;
pub use stressband_types::uuid;

// Core exports
pub use aggregator::{HISTORY_CAPACITY, HistoryBuffer, StreamAggregator, UiSnapshot};
pub use ble::{BleTransport, ConnectionConfig};
pub use error::{Error, Result, SessionError};
pub use events::{EventDispatcher, EventReceiver, EventSender, SessionEvent};
pub use manager::{ConnectionManager, ManagerConfig};
pub use mock::{MockCall, MockOp, MockTransport, MockTransportBuilder};
pub use session::{Command, Phase, PhaseTimeouts, SessionMachine, SessionState, Step};
pub use subscription::{AckOutcome, SubscriptionQueue, SubscriptionRequest};
pub use transport::{
    EventSink, Generation, PeripheralIdentity, ScanFilter, TaggedEvent, Transport, TransportEvent,
};

// Re-export from stressband-types
pub use stressband_types::{
    ContinuousSignal, DecodeError, RawNotification, Sample, SignalKind, StressState, decode,
};
