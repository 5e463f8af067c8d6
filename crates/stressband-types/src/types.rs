//! Core data types for stress band readings.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::uuid::{EDA_CHARACTERISTIC, HRV_CHARACTERISTIC, STRESS_STATE_CHARACTERISTIC};

/// One of the three data channels the band streams.
///
/// The set is closed: matching on it is exhaustive, so adding a signal is a
/// compile-time change everywhere samples are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SignalKind {
    /// Heart-rate variability (milliseconds).
    Hrv,
    /// Electrodermal activity (microsiemens).
    Eda,
    /// Discrete stress classification.
    StressState,
}

impl SignalKind {
    /// All signals, in subscription order.
    pub const ALL: [SignalKind; 3] = [SignalKind::Hrv, SignalKind::Eda, SignalKind::StressState];

    /// Resolve a characteristic UUID to its signal.
    ///
    /// ```
    /// use stressband_types::SignalKind;
    /// use stressband_types::uuid::EDA_CHARACTERISTIC;
    ///
    /// assert_eq!(SignalKind::from_uuid(&EDA_CHARACTERISTIC), Some(SignalKind::Eda));
    /// assert_eq!(SignalKind::from_uuid(&uuid::Uuid::nil()), None);
    /// ```
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.uuid() == *uuid)
    }

    /// Characteristic UUID carrying this signal.
    pub fn uuid(self) -> Uuid {
        match self {
            SignalKind::Hrv => HRV_CHARACTERISTIC,
            SignalKind::Eda => EDA_CHARACTERISTIC,
            SignalKind::StressState => STRESS_STATE_CHARACTERISTIC,
        }
    }

    /// Minimum payload length for this signal.
    pub fn min_payload_len(self) -> usize {
        match self {
            SignalKind::Hrv | SignalKind::Eda => CONTINUOUS_PAYLOAD_BYTES,
            SignalKind::StressState => CLASSIFICATION_PAYLOAD_BYTES,
        }
    }

    /// The continuous signal this kind represents, if any.
    pub fn as_continuous(self) -> Option<ContinuousSignal> {
        match self {
            SignalKind::Hrv => Some(ContinuousSignal::Hrv),
            SignalKind::Eda => Some(ContinuousSignal::Eda),
            SignalKind::StressState => None,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Hrv => write!(f, "HRV"),
            SignalKind::Eda => write!(f, "EDA"),
            SignalKind::StressState => write!(f, "stress state"),
        }
    }
}

/// The two signals that carry scalar measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ContinuousSignal {
    /// Heart-rate variability.
    Hrv,
    /// Electrodermal activity.
    Eda,
}

impl ContinuousSignal {
    /// Unit label for display.
    pub fn unit(self) -> &'static str {
        match self {
            ContinuousSignal::Hrv => "ms",
            ContinuousSignal::Eda => "µS",
        }
    }
}

impl From<ContinuousSignal> for SignalKind {
    fn from(signal: ContinuousSignal) -> Self {
        match signal {
            ContinuousSignal::Hrv => SignalKind::Hrv,
            ContinuousSignal::Eda => SignalKind::Eda,
        }
    }
}

/// Stress classification reported by the band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StressState {
    /// No classification yet, or a code outside the table.
    #[default]
    Unknown,
    /// Baseline.
    Calm,
    /// Stressed.
    Stress,
    /// Amused.
    Amusement,
}

/// Classification code table. Codes not listed map to [`StressState::Unknown`].
pub const CLASSIFICATION_TABLE: [(i64, StressState); 3] = [
    (0, StressState::Calm),
    (1, StressState::Stress),
    (2, StressState::Amusement),
];

impl StressState {
    /// Map a raw classification code through [`CLASSIFICATION_TABLE`].
    ///
    /// ```
    /// use stressband_types::StressState;
    ///
    /// assert_eq!(StressState::from_code(1), StressState::Stress);
    /// assert_eq!(StressState::from_code(-3), StressState::Unknown);
    /// ```
    pub fn from_code(code: i64) -> Self {
        CLASSIFICATION_TABLE
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, state)| *state)
            .unwrap_or(StressState::Unknown)
    }
}

impl From<u8> for StressState {
    fn from(value: u8) -> Self {
        Self::from_code(i64::from(value))
    }
}

impl fmt::Display for StressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StressState::Unknown => write!(f, "Unknown"),
            StressState::Calm => write!(f, "Calm"),
            StressState::Stress => write!(f, "Stress"),
            StressState::Amusement => write!(f, "Amusement"),
        }
    }
}

/// Bytes in a continuous-signal payload (`f32` LE).
pub const CONTINUOUS_PAYLOAD_BYTES: usize = 4;

/// Bytes in a classification payload (`u8`).
pub const CLASSIFICATION_PAYLOAD_BYTES: usize = 1;

/// A decoded physiological reading.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum Sample {
    /// A scalar measurement from HRV or EDA.
    Continuous {
        /// Which signal produced the value.
        signal: ContinuousSignal,
        /// The measurement, in the signal's unit.
        value: f32,
    },
    /// A stress classification.
    Classification {
        /// Raw code as sent by the band.
        code: u8,
        /// Code mapped through the classification table.
        state: StressState,
    },
}

impl Sample {
    /// Build a classification sample from a raw code.
    pub fn classification(code: u8) -> Self {
        Sample::Classification {
            code,
            state: StressState::from(code),
        }
    }

    /// Signal this sample belongs to.
    pub fn kind(&self) -> SignalKind {
        match self {
            Sample::Continuous { signal, .. } => (*signal).into(),
            Sample::Classification { .. } => SignalKind::StressState,
        }
    }
}

/// A notification as it arrived from the link. Never stored past decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// Characteristic that pushed the value.
    pub characteristic: Uuid,
    /// Payload bytes.
    pub value: Vec<u8>,
    /// Local arrival time.
    pub received_at: OffsetDateTime,
}

impl RawNotification {
    /// Stamp a payload with the current UTC time.
    pub fn now(characteristic: Uuid, value: Vec<u8>) -> Self {
        Self {
            characteristic,
            value,
            received_at: OffsetDateTime::now_utc(),
        }
    }
}
