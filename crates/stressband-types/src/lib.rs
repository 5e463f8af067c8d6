//! Platform-agnostic types for stress band wearables.
//!
//! This crate holds everything about the band that does not need a Bluetooth
//! stack: the GATT UUIDs, the signal and sample types, the classification
//! table, and the payload decoder.
//!
//! # Wire format
//!
//! | Characteristic | Payload | Unit |
//! |----------------|---------|------|
//! | HRV | `f32` little-endian (first 4 bytes) | ms |
//! | EDA | `f32` little-endian (first 4 bytes) | µS |
//! | Stress state | `u8` code (first byte) | `0` calm, `1` stress, `2` amusement |
//!
//! # Example
//!
//! ```
//! use stressband_types::{decode::decode, uuid::STRESS_STATE_CHARACTERISTIC, Sample, StressState};
//!
//! let sample = decode(&STRESS_STATE_CHARACTERISTIC, &[0x02]).unwrap();
//! assert_eq!(sample, Sample::Classification { code: 2, state: StressState::Amusement });
//! ```

pub mod decode;
pub mod error;
pub mod types;
pub mod uuid;

pub use decode::{decode, decode_notification, decode_signal};
pub use error::{DecodeError, DecodeResult};
pub use types::{
    CLASSIFICATION_TABLE, ContinuousSignal, RawNotification, Sample, SignalKind, StressState,
};
