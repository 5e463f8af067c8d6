//! Hardware integration tests for stressband-core
//!
//! These tests require a powered-on stress band in range and should be run with:
//! ```text
//! cargo test --package stressband-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Set `STRESSBAND_NAME` to only accept a band whose advertised name contains
//! that text.

use std::env;
use std::time::Duration;

use stressband_core::{BleTransport, ConnectionManager, ManagerConfig, SessionState, Transport};
use tokio::time::timeout;

/// Upper bound on reaching `Streaming`.
const SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// How long to collect samples once streaming.
const STREAM_WINDOW: Duration = Duration::from_secs(10);

fn config() -> ManagerConfig {
    match env::var("STRESSBAND_NAME").ok().filter(|s| !s.is_empty()) {
        Some(name) => ManagerConfig::default().name_filter(name),
        None => ManagerConfig::default(),
    }
}

async fn wait_for(manager: &ConnectionManager<BleTransport>, wanted: SessionState) {
    let mut rx = manager.subscribe();
    let result = timeout(SESSION_TIMEOUT, async {
        loop {
            let state = manager.state().await;
            if state == wanted {
                return;
            }
            if let SessionState::Error(reason) = state {
                panic!("Session failed: {}", reason);
            }
            if rx.changed().await.is_err() {
                panic!("Snapshot channel closed");
            }
        }
    })
    .await;
    if result.is_err() {
        panic!("Timed out waiting for {}", wanted);
    }
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_adapter_available() {
    let transport = BleTransport::new().await.expect("Bluetooth manager");
    assert!(transport.adapter_available().await, "No usable adapter");
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_stream_from_band() {
    let transport = BleTransport::new().await.expect("Bluetooth manager");
    let manager = ConnectionManager::new(transport, config()).expect("valid config");

    manager.start_connect().await.expect("start session");
    wait_for(&manager, SessionState::Streaming).await;

    tokio::time::sleep(STREAM_WINDOW).await;
    let snapshot = manager.current_snapshot();
    println!(
        "HRV samples: {}, EDA samples: {}, state: {}",
        snapshot.hrv_history.len(),
        snapshot.eda_history.len(),
        snapshot.stress_state
    );
    assert!(
        !snapshot.hrv_history.is_empty() || !snapshot.eda_history.is_empty(),
        "No samples received in {:?}",
        STREAM_WINDOW
    );

    manager.cleanup().await;
    assert_eq!(manager.state().await, SessionState::Idle);
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_reconnect_after_cleanup() {
    let transport = BleTransport::new().await.expect("Bluetooth manager");
    let manager = ConnectionManager::new(transport, config()).expect("valid config");

    for round in 1..=2 {
        println!("Round {}", round);
        manager.start_connect().await.expect("start session");
        wait_for(&manager, SessionState::Streaming).await;
        manager.cleanup().await;
    }
}
