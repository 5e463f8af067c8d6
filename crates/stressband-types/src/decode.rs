//! Payload decoding for stress band notifications.
//!
//! Every function here is pure and total: any characteristic UUID and any
//! byte slice produce either a [`Sample`] or a [`DecodeError`], never a panic.

use bytes::Buf;
use uuid::Uuid;

use crate::error::{DecodeError, DecodeResult};
use crate::types::{ContinuousSignal, RawNotification, Sample, SignalKind};

/// Decode a payload addressed to a characteristic UUID.
///
/// # Errors
///
/// Returns [`DecodeError::UnrecognizedSource`] for any UUID outside the three
/// band characteristics, and [`DecodeError::Truncated`] for short payloads.
///
/// ```
/// use stressband_types::decode::decode;
/// use stressband_types::uuid::HRV_CHARACTERISTIC;
/// use stressband_types::{ContinuousSignal, Sample};
///
/// let sample = decode(&HRV_CHARACTERISTIC, &[0x00, 0x00, 0x48, 0x42]).unwrap();
/// assert_eq!(sample, Sample::Continuous { signal: ContinuousSignal::Hrv, value: 50.0 });
/// ```
pub fn decode(characteristic: &Uuid, data: &[u8]) -> DecodeResult<Sample> {
    let kind = SignalKind::from_uuid(characteristic)
        .ok_or(DecodeError::UnrecognizedSource(*characteristic))?;
    decode_signal(kind, data)
}

/// Decode a [`RawNotification`], consuming it.
pub fn decode_notification(notification: RawNotification) -> DecodeResult<Sample> {
    decode(&notification.characteristic, &notification.value)
}

/// Decode a payload for a known signal.
pub fn decode_signal(kind: SignalKind, data: &[u8]) -> DecodeResult<Sample> {
    match kind {
        SignalKind::Hrv => decode_continuous(ContinuousSignal::Hrv, data),
        SignalKind::Eda => decode_continuous(ContinuousSignal::Eda, data),
        SignalKind::StressState => decode_classification(data),
    }
}

/// Decode a continuous reading: the first 4 bytes as a little-endian `f32`.
/// Trailing bytes are ignored.
pub fn decode_continuous(signal: ContinuousSignal, data: &[u8]) -> DecodeResult<Sample> {
    let kind = SignalKind::from(signal);
    if data.len() < kind.min_payload_len() {
        return Err(DecodeError::Truncated {
            signal: kind,
            expected: kind.min_payload_len(),
            actual: data.len(),
        });
    }

    let mut buf = data;
    let value = buf.get_f32_le();
    Ok(Sample::Continuous { signal, value })
}

/// Decode a classification: the first byte is the raw code.
pub fn decode_classification(data: &[u8]) -> DecodeResult<Sample> {
    match data.first() {
        Some(&code) => Ok(Sample::classification(code)),
        None => Err(DecodeError::Truncated {
            signal: SignalKind::StressState,
            expected: SignalKind::StressState.min_payload_len(),
            actual: 0,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StressState;
    use crate::uuid::{EDA_CHARACTERISTIC, STRESS_STATE_CHARACTERISTIC, STRESS_SERVICE};

    #[test]
    fn test_decode_fifty() {
        let sample = decode_continuous(ContinuousSignal::Hrv, &[0x00, 0x00, 0x48, 0x42]).unwrap();
        assert_eq!(
            sample,
            Sample::Continuous {
                signal: ContinuousSignal::Hrv,
                value: 50.0
            }
        );
    }

    #[test]
    fn test_decode_eda_by_uuid() {
        // 2.5 = 0x40200000
        let sample = decode(&EDA_CHARACTERISTIC, &[0x00, 0x00, 0x20, 0x40]).unwrap();
        assert_eq!(
            sample,
            Sample::Continuous {
                signal: ContinuousSignal::Eda,
                value: 2.5
            }
        );
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let sample =
            decode_continuous(ContinuousSignal::Eda, &[0x00, 0x00, 0x48, 0x42, 0xFF, 0x01])
                .unwrap();
        assert!(matches!(sample, Sample::Continuous { value, .. } if value == 50.0));
    }

    #[test]
    fn test_truncated_continuous() {
        let err = decode_continuous(ContinuousSignal::Hrv, &[0x00, 0x48, 0x42]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                signal: SignalKind::Hrv,
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn test_classification_stress() {
        let sample = decode(&STRESS_STATE_CHARACTERISTIC, &[0x01]).unwrap();
        assert_eq!(
            sample,
            Sample::Classification {
                code: 1,
                state: StressState::Stress
            }
        );
    }

    #[test]
    fn test_classification_unknown_code_is_not_an_error() {
        let sample = decode(&STRESS_STATE_CHARACTERISTIC, &[0x07, 0x00]).unwrap();
        assert_eq!(
            sample,
            Sample::Classification {
                code: 7,
                state: StressState::Unknown
            }
        );
    }

    #[test]
    fn test_classification_empty() {
        let err = decode_classification(&[]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { actual: 0, .. }));
    }

    #[test]
    fn test_unrecognized_source() {
        let err = decode(&STRESS_SERVICE, &[0x00, 0x00, 0x48, 0x42]).unwrap_err();
        assert_eq!(err, DecodeError::UnrecognizedSource(STRESS_SERVICE));
    }

    #[test]
    fn test_decode_notification() {
        let notification = RawNotification::now(STRESS_STATE_CHARACTERISTIC, vec![0x00]);
        let sample = decode_notification(notification).unwrap();
        assert_eq!(sample, Sample::classification(0));
    }
}
