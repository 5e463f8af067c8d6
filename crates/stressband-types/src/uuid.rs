//! Bluetooth UUIDs for the stress band.
//!
//! The band exposes one vendor service carrying three notify-only
//! characteristics. Each one is enabled independently through its
//! Client Characteristic Configuration Descriptor.

use uuid::{Uuid, uuid};

// --- Stress band service ---

/// Vendor service advertised by the band; also used as the scan filter.
pub const STRESS_SERVICE: Uuid = uuid!("f5a10000-7d2b-4c8e-9e3a-5b6c7d8e9f01");

// --- Characteristics ---

/// Heart-rate variability, little-endian `f32` in milliseconds.
pub const HRV_CHARACTERISTIC: Uuid = uuid!("f5a10001-7d2b-4c8e-9e3a-5b6c7d8e9f01");

/// Electrodermal activity, little-endian `f32` in microsiemens.
pub const EDA_CHARACTERISTIC: Uuid = uuid!("f5a10002-7d2b-4c8e-9e3a-5b6c7d8e9f01");

/// On-device stress classification, single `u8` code.
pub const STRESS_STATE_CHARACTERISTIC: Uuid = uuid!("f5a10003-7d2b-4c8e-9e3a-5b6c7d8e9f01");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristics_share_service_base() {
        let service = STRESS_SERVICE.to_string();
        for uuid in [
            HRV_CHARACTERISTIC,
            EDA_CHARACTERISTIC,
            STRESS_STATE_CHARACTERISTIC,
        ] {
            assert_eq!(uuid.to_string()[8..], service[8..]);
        }
    }

    #[test]
    fn test_characteristics_are_distinct() {
        assert_ne!(HRV_CHARACTERISTIC, EDA_CHARACTERISTIC);
        assert_ne!(HRV_CHARACTERISTIC, STRESS_STATE_CHARACTERISTIC);
        assert_ne!(EDA_CHARACTERISTIC, STRESS_STATE_CHARACTERISTIC);
        assert_ne!(STRESS_SERVICE, HRV_CHARACTERISTIC);
    }
}
