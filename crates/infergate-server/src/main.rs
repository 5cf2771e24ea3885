//! infergate: length-prefixed TCP inference server, entry point.
//!
//! # Usage
//!
//! ```text
//! infergate [OPTIONS]
//!
//! Options:
//!   --config <PATH>                    Settings file [default: infergate.toml]
//!   --host <HOST>                      Bind address
//!   --port <PORT>                      Bind port
//!   --length-field-size <BYTES>        Length prefix width: 2, 4 or 8
//!   --max-connections <N>              Concurrent session cap
//!   --max-payload-size-kb <KB>         Largest accepted payload
//!   --payload-timeout-seconds <SECS>   Per-read deadline
//!   --response-size <BYTES>            Response length of the random engine
//!   --log-level <LEVEL>                trace | debug | info | warn | error
//! ```
//!
//! # Precedence
//!
//! Built-in defaults, then the settings file, then environment variables,
//! then command-line flags.
//!
//! | Variable                            | Settings key                      |
//! |-------------------------------------|-----------------------------------|
//! | `INFERGATE_CONFIG`                  | (path of the settings file)       |
//! | `INFERGATE_HOST`                    | `server.host`                     |
//! | `INFERGATE_PORT`                    | `server.port`                     |
//! | `INFERGATE_LENGTH_FIELD_SIZE`       | `server.length_field_size`        |
//! | `INFERGATE_MAX_CONNECTIONS`         | `server.max_connections`          |
//! | `INFERGATE_MAX_PAYLOAD_SIZE_KB`     | `server.max_payload_size_kb`      |
//! | `INFERGATE_PAYLOAD_TIMEOUT_SECONDS` | `server.payload_timeout_seconds`  |
//! | `INFERGATE_RESPONSE_SIZE`           | `inference.response_size`         |
//! | `INFERGATE_LOG_LEVEL`               | `logging.log_level`               |
//!
//! `RUST_LOG`, when set, replaces the configured log level entirely.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use infergate_server::application::MetricsAggregator;
use infergate_server::infrastructure::{
    render_json, spawn_reporter, Server, Settings, SettingsOverrides,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Length-prefixed TCP inference server.
#[derive(Debug, Parser)]
#[command(
    name = "infergate",
    about = "Serve an inference engine over a length-prefixed TCP protocol",
    version
)]
struct Cli {
    /// TOML settings file.  A missing file means built-in defaults.
    #[arg(long, default_value = "infergate.toml", env = "INFERGATE_CONFIG")]
    config: PathBuf,

    /// IP address to bind.
    #[arg(long, env = "INFERGATE_HOST")]
    host: Option<String>,

    #[arg(long, env = "INFERGATE_PORT")]
    port: Option<u16>,

    /// Width of the length prefix in bytes (2, 4 or 8).
    #[arg(long, env = "INFERGATE_LENGTH_FIELD_SIZE")]
    length_field_size: Option<usize>,

    #[arg(long, env = "INFERGATE_MAX_CONNECTIONS")]
    max_connections: Option<usize>,

    #[arg(long, env = "INFERGATE_MAX_PAYLOAD_SIZE_KB")]
    max_payload_size_kb: Option<usize>,

    /// Seconds a single read may wait for data.
    #[arg(long, env = "INFERGATE_PAYLOAD_TIMEOUT_SECONDS")]
    payload_timeout_seconds: Option<u64>,

    /// Bytes returned per request by the `random` engine.
    #[arg(long, env = "INFERGATE_RESPONSE_SIZE")]
    response_size: Option<usize>,

    #[arg(long, env = "INFERGATE_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            host: self.host.clone(),
            port: self.port,
            length_field_size: self.length_field_size,
            max_connections: self.max_connections,
            max_payload_size_kb: self.max_payload_size_kb,
            payload_timeout_seconds: self.payload_timeout_seconds,
            response_size: self.response_size,
            log_level: self.log_level.clone(),
        }
    }

    /// Loads the settings file and applies the flag/environment overrides.
    fn into_settings(self) -> anyhow::Result<Settings> {
        let mut settings = Settings::load(Some(self.config.as_path()))
            .with_context(|| format!("failed to load settings from {}", self.config.display()))?;
        settings.apply(self.overrides());
        settings.validate().context("invalid settings")?;
        Ok(settings)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Cli::parse().into_settings()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level())),
        )
        .init();

    let server_config = settings
        .server_config()
        .context("invalid server configuration")?;
    info!(
        bind = %server_config.bind_addr(),
        engine = ?settings.inference.engine,
        "infergate starting"
    );
    debug!(?settings, "effective settings");

    // ── Metrics pipeline ──────────────────────────────────────────────────────
    let mut aggregator = MetricsAggregator::new(settings.aggregator_config());
    aggregator.start();
    let metrics = aggregator.handle();

    // ── Listener ──────────────────────────────────────────────────────────────
    let server = Server::new(server_config, settings.engine(), metrics.clone());
    let handle = server.startup().await.context("failed to start listener")?;
    let reporter = spawn_reporter(
        metrics.clone(),
        settings.report_interval(),
        handle.shutdown_signal(),
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C; initiating graceful shutdown"),
        Err(e) => error!("failed to listen for Ctrl+C signal: {e}; shutting down"),
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    handle.shutdown().await;
    if let Err(e) = reporter.await {
        warn!("metrics reporter ended abnormally: {e}");
    }
    aggregator.stop().await;

    match render_json(&metrics.snapshot()) {
        Ok(line) => info!("final metrics: {line}"),
        Err(e) => warn!("cannot serialize final metrics: {e}"),
    }
    info!("infergate stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
