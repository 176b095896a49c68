//! Simulated equipment
//!
//! ```text
//! cargo run -p secs --example equipment -- 0.0.0.0:5000
//! ```

use anyhow::Context;
use secs::equipment::{EquipmentConfig, EquipmentServer};
use secs::gem::AlarmSeverity;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let address = std::env::args().nth(1).unwrap_or_else(|| "0.0.0.0:5000".to_string());
    let server = Arc::new(EquipmentServer::new(EquipmentConfig::new(&address)));

    // simulate a processing cycle every few seconds
    let gem = Arc::clone(server.gem());
    tokio::spawn(async move {
        let mut cycle = 0u32;
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cycle += 1;
            let job = format!("PJ-{}", cycle);
            gem.create_process_job(&job, "RECIPE_A", Vec::new());
            gem.start_process_job(&job);
            gem.process_substrate(&format!("W{}", cycle), "RECIPE_A");
            gem.complete_process_job(&job);
            if cycle % 3 == 0 {
                gem.set_alarm(1, "Simulated chamber alarm", AlarmSeverity::Warning);
            } else {
                gem.clear_alarm(1);
            }
        }
    });

    let shutdown = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.shutdown();
        }
    });

    println!("Equipment listening on {}", address);
    server
        .run()
        .await
        .with_context(|| format!("equipment server on {} failed", address))?;
    Ok(())
}
