//! infergate-probe: keeps one connection busy against a running server.
//!
//! Sends a random payload every `--interval-ms` and logs what comes back.
//! Useful for watching the server's metrics move while poking at it by hand.
//!
//! ```text
//! infergate-probe --addr 127.0.0.1:9000 --count 10
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rand::Rng;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use infergate_server::infrastructure::FrameClient;

/// Periodic request generator for infergate.
#[derive(Debug, Parser)]
#[command(name = "infergate-probe", version)]
struct Cli {
    /// Server address.
    #[arg(long, default_value = "127.0.0.1:9000", env = "INFERGATE_PROBE_ADDR")]
    addr: SocketAddr,

    /// Length prefix width; must match the server.
    #[arg(long, default_value_t = 4, env = "INFERGATE_LENGTH_FIELD_SIZE")]
    length_field_size: usize,

    /// Delay between requests in milliseconds.
    #[arg(long, default_value_t = 333)]
    interval_ms: u64,

    /// Size of each random payload.
    #[arg(long, default_value_t = 128)]
    payload_size: usize,

    /// Stop after this many requests (runs until Ctrl+C if omitted).
    #[arg(long)]
    count: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut client = FrameClient::connect(cli.addr, cli.length_field_size)
        .await
        .with_context(|| format!("failed to connect to {}", cli.addr))?;
    info!(addr = %cli.addr, "connected");

    let mut ticker = time::interval(Duration::from_millis(cli.interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent: u64 = 0;

    loop {
        if cli.count.is_some_and(|limit| sent >= limit) {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = ticker.tick() => {}
        }

        let mut payload = vec![0u8; cli.payload_size];
        rand::thread_rng().fill(&mut payload[..]);
        let response = client
            .request(&payload)
            .await
            .with_context(|| format!("request {} failed", sent + 1))?;
        sent += 1;

        match std::str::from_utf8(&response) {
            Ok(text) if text.len() <= 64 => info!(n = sent, len = response.len(), "response: {text}"),
            _ => info!(n = sent, len = response.len(), "response"),
        }
    }

    if let Err(e) = client.close().await {
        warn!("close failed: {e}");
    }
    info!(requests = sent, "probe finished");
    Ok(())
}
