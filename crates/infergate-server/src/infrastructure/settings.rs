//! TOML settings file for the `infergate` binary.
//!
//! Every field is optional; a missing field, section or file falls back to the
//! defaults below.  Command-line flags and `INFERGATE_*` environment variables
//! are applied on top through [`SettingsOverrides`].
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 9000
//! length_field_size = 4
//! max_connections = 100
//! max_payload_size_kb = 1024
//! payload_timeout_seconds = 30
//!
//! [inference]
//! engine = "random"        # random | fixed | canned
//! response_size = 1024
//! fixed_response = "XXXXX"
//!
//! [metrics]
//! queue_capacity = 10000
//! batch_size = 100
//! flush_interval_ms = 1000
//! report_interval_secs = 10
//!
//! [logging]
//! log_level = "info"
//! ```
//!
//! [`Settings::validate`] applies the range checks; [`Settings::server_config`]
//! turns the result into the immutable [`ServerConfig`] the listener uses.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::inference::{build_engine, EngineKind, InferenceEngine};
use crate::application::metrics::AggregatorConfig;
use crate::domain::{ConfigError, ServerConfig};

/// Log levels accepted in `[logging] log_level`.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Error type for loading and validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file exists but could not be read.
    #[error("I/O error reading settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse settings TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its allowed range.
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid server configuration: {0}")]
    Config(#[from] ConfigError),
}

// ── Settings schema ───────────────────────────────────────────────────────────

/// Top-level settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub inference: InferenceSection,
    #[serde(default)]
    pub metrics: MetricsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener and framing limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Width of the length prefix in bytes: 2, 4 or 8.
    #[serde(default = "default_length_field_size")]
    pub length_field_size: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_payload_size_kb")]
    pub max_payload_size_kb: usize,
    /// Per-read deadline.
    #[serde(default = "default_payload_timeout_seconds")]
    pub payload_timeout_seconds: u64,
}

/// Which stand-in engine answers requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceSection {
    #[serde(default = "default_engine")]
    pub engine: EngineKind,
    /// Bytes returned by the `random` engine.
    #[serde(default = "default_response_size")]
    pub response_size: usize,
    /// Text returned by the `fixed` engine.
    #[serde(default = "default_fixed_response")]
    pub fixed_response: String,
}

/// Metrics pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// How often the reporter logs a snapshot.
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9000
}
fn default_length_field_size() -> usize {
    4
}
fn default_max_connections() -> usize {
    100
}
fn default_max_payload_size_kb() -> usize {
    1024
}
fn default_payload_timeout_seconds() -> u64 {
    30
}
fn default_engine() -> EngineKind {
    EngineKind::Random
}
fn default_response_size() -> usize {
    1024
}
fn default_fixed_response() -> String {
    "XXXXX".to_string()
}
fn default_queue_capacity() -> usize {
    10_000
}
fn default_batch_size() -> usize {
    100
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_report_interval_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            length_field_size: default_length_field_size(),
            max_connections: default_max_connections(),
            max_payload_size_kb: default_max_payload_size_kb(),
            payload_timeout_seconds: default_payload_timeout_seconds(),
        }
    }
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            response_size: default_response_size(),
            fixed_response: default_fixed_response(),
        }
    }
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// ── Overrides ─────────────────────────────────────────────────────────────────

/// Values supplied on the command line or through the environment.
///
/// `None` leaves the file value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub length_field_size: Option<usize>,
    pub max_connections: Option<usize>,
    pub max_payload_size_kb: Option<usize>,
    pub payload_timeout_seconds: Option<u64>,
    pub response_size: Option<usize>,
    pub log_level: Option<String>,
}

// ── Loading and conversion ────────────────────────────────────────────────────

impl Settings {
    /// Loads settings from `path`, or returns the defaults if the file does
    /// not exist (or no path is given).
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Io`] for file-system errors other than "not
    /// found", and [`SettingsError::Parse`] if the TOML is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Parses settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    /// Applies command-line / environment overrides.
    pub fn apply(&mut self, overrides: SettingsOverrides) {
        let server = &mut self.server;
        if let Some(host) = overrides.host {
            server.host = host;
        }
        if let Some(port) = overrides.port {
            server.port = port;
        }
        if let Some(size) = overrides.length_field_size {
            server.length_field_size = size;
        }
        if let Some(max) = overrides.max_connections {
            server.max_connections = max;
        }
        if let Some(kb) = overrides.max_payload_size_kb {
            server.max_payload_size_kb = kb;
        }
        if let Some(secs) = overrides.payload_timeout_seconds {
            server.payload_timeout_seconds = secs;
        }
        if let Some(size) = overrides.response_size {
            self.inference.response_size = size;
        }
        if let Some(level) = overrides.log_level {
            self.logging.log_level = level;
        }
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let s = &self.server;
        if s.port < 1024 {
            return Err(invalid("server.port", format!("must be between 1024-65535, got {}", s.port)));
        }
        if ![2, 4, 8].contains(&s.length_field_size) {
            return Err(invalid(
                "server.length_field_size",
                format!("must be 2, 4, or 8, got {}", s.length_field_size),
            ));
        }
        positive("server.max_connections", s.max_connections as u64)?;
        positive("server.max_payload_size_kb", s.max_payload_size_kb as u64)?;
        positive("server.payload_timeout_seconds", s.payload_timeout_seconds)?;
        positive("inference.response_size", self.inference.response_size as u64)?;

        let m = &self.metrics;
        positive("metrics.queue_capacity", m.queue_capacity as u64)?;
        positive("metrics.batch_size", m.batch_size as u64)?;
        positive("metrics.flush_interval_ms", m.flush_interval_ms)?;
        positive("metrics.report_interval_secs", m.report_interval_secs)?;

        if !LOG_LEVELS.contains(&self.log_level().as_str()) {
            return Err(invalid(
                "logging.log_level",
                format!("expected one of {LOG_LEVELS:?}, got {:?}", self.logging.log_level),
            ));
        }
        Ok(())
    }

    /// Validates and builds the listener configuration.
    pub fn server_config(&self) -> Result<ServerConfig, SettingsError> {
        self.validate()?;
        let s = &self.server;
        let ip: IpAddr = s
            .host
            .parse()
            .map_err(|e| invalid("server.host", format!("{:?} is not an IP address: {e}", s.host)))?;
        let max_payload = s
            .max_payload_size_kb
            .checked_mul(1024)
            .ok_or_else(|| invalid("server.max_payload_size_kb", "too large".to_string()))?;

        Ok(ServerConfig::new(
            SocketAddr::new(ip, s.port),
            s.length_field_size,
            max_payload,
            Duration::from_secs(s.payload_timeout_seconds),
            s.max_connections,
        )?)
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            queue_capacity: self.metrics.queue_capacity,
            batch_size: self.metrics.batch_size,
            flush_interval: Duration::from_millis(self.metrics.flush_interval_ms),
        }
    }

    /// Builds the engine selected in `[inference]`.
    pub fn engine(&self) -> Arc<dyn InferenceEngine> {
        let inf = &self.inference;
        build_engine(inf.engine, inf.response_size, &inf.fixed_response)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.metrics.report_interval_secs)
    }

    /// The configured level, lower-cased.
    pub fn log_level(&self) -> String {
        self.logging.log_level.to_ascii_lowercase()
    }
}

fn invalid(field: &'static str, reason: String) -> SettingsError {
    SettingsError::Invalid { field, reason }
}

fn positive(field: &'static str, value: u64) -> Result<(), SettingsError> {
    if value == 0 {
        return Err(invalid(field, "must be positive".to_string()));
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use infergate_core::LengthWidth;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("infergate-{}-{name}", uuid::Uuid::new_v4()))
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_defaults_match_documented_values() {
        // Arrange / Act
        let settings = Settings::default();

        // Assert
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.length_field_size, 4);
        assert_eq!(settings.server.max_connections, 100);
        assert_eq!(settings.server.max_payload_size_kb, 1024);
        assert_eq!(settings.server.payload_timeout_seconds, 30);
        assert_eq!(settings.inference.response_size, 1024);
        assert_eq!(settings.inference.engine, EngineKind::Random);
        assert_eq!(settings.logging.log_level, "info");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let settings = Settings::from_toml(
            r#"
            [server]
            port = 9100
            length_field_size = 8

            [inference]
            engine = "fixed"
            "#,
        )
        .unwrap();

        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.length_field_size, 8);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.inference.engine, EngineKind::Fixed);
        assert_eq!(settings.metrics.batch_size, 100);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        assert_eq!(Settings::from_toml("").unwrap(), Settings::default());
    }

    // ── Loading ───────────────────────────────────────────────────────────────

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let path = temp_path("missing.toml");
        let settings = Settings::load(Some(path.as_path())).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_without_path_returns_defaults() {
        assert_eq!(Settings::load(None).unwrap(), Settings::default());
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        // Arrange
        let path = temp_path("settings.toml");
        std::fs::write(&path, "[logging]\nlog_level = \"debug\"\n").unwrap();

        // Act
        let settings = Settings::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).unwrap();

        // Assert
        assert_eq!(settings.logging.log_level, "debug");
    }

    #[test]
    fn test_load_malformed_file_is_parse_error() {
        let path = temp_path("broken.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();

        let result = Settings::load(Some(path.as_path()));
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(SettingsError::Parse(_))));
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn test_validate_rejects_privileged_port() {
        let mut settings = Settings::default();
        settings.server.port = 80;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid { field: "server.port", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unsupported_width() {
        let mut settings = Settings::default();
        settings.server.length_field_size = 3;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid { field: "server.length_field_size", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut settings = Settings::default();
        settings.server.payload_timeout_seconds = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid { field: "server.payload_timeout_seconds", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut settings = Settings::default();
        settings.logging.log_level = "verbose".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_upper_case_log_level() {
        let mut settings = Settings::default();
        settings.logging.log_level = "WARN".to_string();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.log_level(), "warn");
    }

    // ── Overrides and conversion ──────────────────────────────────────────────

    #[test]
    fn test_overrides_replace_file_values() {
        // Arrange
        let mut settings = Settings::from_toml("[server]\nport = 9100\n").unwrap();

        // Act
        settings.apply(SettingsOverrides {
            port: Some(9200),
            log_level: Some("trace".to_string()),
            ..Default::default()
        });

        // Assert
        assert_eq!(settings.server.port, 9200);
        assert_eq!(settings.server.length_field_size, 4);
        assert_eq!(settings.logging.log_level, "trace");
    }

    #[test]
    fn test_response_size_override_is_validated() {
        // Arrange
        let mut settings = Settings::from_toml("[inference]\nresponse_size = 64\n").unwrap();

        // Act
        settings.apply(SettingsOverrides {
            response_size: Some(0),
            ..Default::default()
        });

        // Assert
        assert_eq!(settings.inference.response_size, 0);
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid {
                field: "inference.response_size",
                ..
            })
        ));
    }

    #[test]
    fn test_server_config_converts_units() {
        let mut settings = Settings::default();
        settings.server.host = "127.0.0.1".to_string();
        settings.server.max_payload_size_kb = 2;
        settings.server.payload_timeout_seconds = 7;

        let config = settings.server_config().unwrap();

        let expected: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(config.bind_addr(), expected);
        assert_eq!(config.max_payload_size(), 2048);
        assert_eq!(config.read_timeout(), Duration::from_secs(7));
        assert_eq!(config.length_width(), LengthWidth::U32);
    }

    #[test]
    fn test_server_config_rejects_hostname() {
        let mut settings = Settings::default();
        settings.server.host = "localhost".to_string();
        assert!(matches!(
            settings.server_config(),
            Err(SettingsError::Invalid { field: "server.host", .. })
        ));
    }

    #[test]
    fn test_aggregator_config_from_metrics_section() {
        let settings = Settings::from_toml("[metrics]\nflush_interval_ms = 250\nbatch_size = 10\n")
            .unwrap();
        let agg = settings.aggregator_config();
        assert_eq!(agg.flush_interval, Duration::from_millis(250));
        assert_eq!(agg.batch_size, 10);
        assert_eq!(agg.queue_capacity, 10_000);
    }
}
