//! Error types for payload decoding in stressband-types.

use thiserror::Error;
use uuid::Uuid;

use crate::types::SignalKind;

/// Errors produced when a notification payload cannot become a sample.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in stressband-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// Payload shorter than the signal's wire format.
    #[error("Truncated {signal} payload: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Signal the payload was addressed to.
        signal: SignalKind,
        /// Minimum byte count for the signal.
        expected: usize,
        /// Bytes actually received.
        actual: usize,
    },

    /// Notification came from a characteristic this crate does not know.
    #[error("Unrecognized characteristic: {0}")]
    UnrecognizedSource(Uuid),
}

/// Result type alias using stressband-types' DecodeError type.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
