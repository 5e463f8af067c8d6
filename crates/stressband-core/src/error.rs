//! Error types for stressband-core.
//!
//! This module defines every error that can come out of a stress band
//! session, plus [`SessionError`], the reason carried by
//! [`SessionState::Error`](crate::session::SessionState::Error).
//!
//! # Propagation
//!
//! | Error | Surfaced as | Session effect |
//! |-------|-------------|----------------|
//! | [`Error::AdapterUnavailable`] | status text, returned from `start_connect` | none |
//! | [`Error::ScanFailure`] | status text | `Error` |
//! | [`Error::LinkLost`] | status text | `Disconnected` |
//! | [`Error::ServiceNotFound`] | status text | `Error` |
//! | [`Error::Timeout`] | status text | `Error` |
//! | [`Error::Decode`] | debug log only | none |
//! | [`Error::QueueMismatch`] | warn log only | none |
//!
//! Every session-ending error is recoverable by calling
//! [`ConnectionManager::start_connect`](crate::manager::ConnectionManager::start_connect)
//! again; the session never retries on its own.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use stressband_types::DecodeError;

/// Errors that can occur while talking to a stress band.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Local radio is missing or powered off.
    #[error("Bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// The transport reported a scan failure.
    #[error("Scan failed with code {code}")]
    ScanFailure {
        /// Platform scan failure code.
        code: i32,
    },

    /// The link dropped.
    #[error("Link lost")]
    LinkLost,

    /// The peripheral does not expose the target service.
    #[error("Service not found: {service}")]
    ServiceNotFound {
        /// The service that was searched for.
        service: Uuid,
    },

    /// The service exposes none of the band characteristics.
    #[error("No band characteristics found under the target service")]
    NoTargetCharacteristics,

    /// A descriptor write acknowledgment did not match the in-flight request.
    #[error("Subscription acknowledgment mismatch: expected {expected:?}, got {actual}")]
    QueueMismatch {
        /// Characteristic of the in-flight request, if any.
        expected: Option<Uuid>,
        /// Characteristic named by the acknowledgment.
        actual: Uuid,
    },

    /// The transport failed to write a subscription descriptor.
    #[error("Subscription to {characteristic} failed: {reason}")]
    SubscriptionFailed {
        /// The characteristic UUID.
        characteristic: Uuid,
        /// The reason for the failure.
        reason: String,
    },

    /// A notification payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// No peripheral is connected.
    #[error("Not connected to device")]
    NotConnected,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a subscription failure.
    pub fn subscription_failed(characteristic: Uuid, reason: impl Into<String>) -> Self {
        Self::SubscriptionFailed {
            characteristic,
            reason: reason.into(),
        }
    }
}

/// Reason a session ended up in the `Error` state.
///
/// Unlike [`Error`], this is a plain value: it is cloned into snapshots and
/// compared in tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionError {
    /// Scan failed with a transport code.
    ScanFailure {
        /// Platform scan failure code.
        code: i32,
    },
    /// Target service absent.
    ServiceNotFound,
    /// Service present but none of the band characteristics.
    NoTargetCharacteristics,
    /// A descriptor write failed.
    SubscriptionFailed {
        /// The characteristic UUID.
        characteristic: Uuid,
        /// The reason for the failure.
        reason: String,
    },
    /// A connect, discovery or subscribe phase exceeded its bound.
    Timeout {
        /// Phase that stalled.
        phase: &'static str,
        /// The bound that was exceeded.
        after: Duration,
    },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScanFailure { code } => write!(f, "scan failed (code {})", code),
            Self::ServiceNotFound => write!(f, "stress service not found"),
            Self::NoTargetCharacteristics => write!(f, "no band characteristics found"),
            Self::SubscriptionFailed {
                characteristic,
                reason,
            } => write!(f, "subscription to {} failed: {}", characteristic, reason),
            Self::Timeout { phase, after } => write!(f, "{} timed out after {:?}", phase, after),
        }
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::ScanFailure { code } => Error::ScanFailure { code },
            SessionError::ServiceNotFound => Error::ServiceNotFound {
                service: stressband_types::uuid::STRESS_SERVICE,
            },
            SessionError::NoTargetCharacteristics => Error::NoTargetCharacteristics,
            SessionError::SubscriptionFailed {
                characteristic,
                reason,
            } => Error::SubscriptionFailed {
                characteristic,
                reason,
            },
            SessionError::Timeout { phase, after } => Error::timeout(phase, after),
        }
    }
}

/// Result type alias using stressband-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AdapterUnavailable;
        assert_eq!(err.to_string(), "Bluetooth adapter unavailable");

        let err = Error::ScanFailure { code: 2 };
        assert!(err.to_string().contains("code 2"));

        let err = Error::timeout("connect", Duration::from_secs(15));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("15s"));
    }

    #[test]
    fn test_decode_error_is_transparent() {
        let err: Error = DecodeError::UnrecognizedSource(Uuid::nil()).into();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.to_string().starts_with("Unrecognized characteristic"));
    }

    #[test]
    fn test_session_error_display() {
        assert_eq!(
            SessionError::ScanFailure { code: 3 }.to_string(),
            "scan failed (code 3)"
        );
        let timeout = SessionError::Timeout {
            phase: "service discovery",
            after: Duration::from_secs(10),
        };
        assert_eq!(timeout.to_string(), "service discovery timed out after 10s");
    }

    #[test]
    fn test_session_error_into_error() {
        let err: Error = SessionError::ServiceNotFound.into();
        assert!(matches!(err, Error::ServiceNotFound { .. }));

        let err: Error = SessionError::ScanFailure { code: 4 }.into();
        assert!(matches!(err, Error::ScanFailure { code: 4 }));
    }

    #[test]
    fn test_session_error_serialization() {
        let err = SessionError::SubscriptionFailed {
            characteristic: Uuid::nil(),
            reason: "write rejected".into(),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "subscription_failed");
        assert_eq!(value["characteristic"], Uuid::nil().to_string());
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }
}
