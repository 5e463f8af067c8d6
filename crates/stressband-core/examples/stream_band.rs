//! Example: Streaming From a Stress Band
//!
//! This example scans for a stress band, subscribes to its HRV, EDA and
//! stress-state characteristics and prints every snapshot until Ctrl-C.
//!
//! Run with: `cargo run --example stream_band -- [NAME_FILTER]`

use std::env;

use stressband_core::{BleTransport, ConnectionManager, ManagerConfig, SessionState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let mut config = ManagerConfig::default();
    if let Some(filter) = env::args().nth(1) {
        println!("Only accepting bands named like \"{}\"", filter);
        config = config.name_filter(filter);
    }

    let transport = BleTransport::new().await?;
    let manager = ConnectionManager::new(transport, config)?;
    let mut snapshots = manager.subscribe();

    manager.start_connect().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                println!(
                    "[{}] HRV {:>7} ms | EDA {:>7} µS | {}",
                    snapshot.status,
                    snapshot.latest_hrv.map_or("-".to_string(), |v| format!("{:.1}", v)),
                    snapshot.latest_eda.map_or("-".to_string(), |v| format!("{:.2}", v)),
                    snapshot.stress_state,
                );
                if matches!(
                    manager.state().await,
                    SessionState::Disconnected | SessionState::Error(_)
                ) {
                    println!("Session ended; press Ctrl-C to exit or wait to retry.");
                }
            }
        }
    }

    println!();
    println!("Cleaning up...");
    manager.cleanup().await;
    Ok(())
}
