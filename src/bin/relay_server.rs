//! Signaling relay
//! Pairs initiators and receivers by token over Socket.IO

use anyhow::{Context, Result};
use rtc_signaling::{relay, RelayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    rtc_signaling::init_logging();

    let config = RelayConfig::from_env();
    log::info!("Starting signaling relay...");

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr))?;
    relay::serve(listener).await?;

    Ok(())
}
