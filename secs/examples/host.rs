//! Host that interrogates an equipment once
//!
//! ```text
//! cargo run -p secs --example host -- 127.0.0.1:5000
//! ```

use anyhow::Context;
use secs::host::HostClientBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let address = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:5000".to_string());
    let host = HostClientBuilder::new()
        .tcp(&address)
        .build()
        .context("invalid equipment address")?;

    host.connect()
        .await
        .with_context(|| format!("could not select a session with {}", address))?;

    let identity = host.are_you_there().await?;
    println!("Equipment: {} {}", identity.model_name, identity.software_revision);
    println!("COMMACK: {}", host.establish_communications().await?);
    println!("ONLACK: {}", host.request_online().await?);
    println!("Clock: {}", host.request_date_time().await?);
    for value in host.request_status(&["EqState", "SubstCount", "PPID"]).await? {
        println!("  {}", value);
    }
    println!("Linktest: {:?}", host.linktest().await?);

    host.disconnect().await;
    Ok(())
}
