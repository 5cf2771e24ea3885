//! Server configuration.
//!
//! [`ServerConfig`] is the single source of truth for the connection core's
//! runtime limits.  It is validated once, in [`ServerConfig::new`], and has no
//! setters; wrap it in an `Arc` to share it across session tasks.
//!
//! Where the values come from (TOML file, CLI flags, environment) is the
//! infrastructure layer's business, see `infrastructure::settings`.

use std::net::SocketAddr;
use std::time::Duration;

use infergate_core::{FrameCodec, FramingError, LengthWidth};
use thiserror::Error;

/// Reasons a [`ServerConfig`] can be refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid length field: {0}")]
    LengthField(#[from] FramingError),
    #[error("max payload size must be positive")]
    ZeroMaxPayload,
    #[error("read timeout must be positive")]
    ZeroReadTimeout,
    #[error("max connections must be positive")]
    ZeroMaxConnections,
}

/// Immutable limits of one server instance.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use infergate_server::domain::ServerConfig;
///
/// let cfg = ServerConfig::new(
///     "127.0.0.1:9000".parse().unwrap(),
///     4,
///     1024 * 1024,
///     Duration::from_secs(30),
///     100,
/// )
/// .unwrap();
/// assert_eq!(cfg.codec().prefix_len(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    bind_addr: SocketAddr,
    codec: FrameCodec,
    max_payload_size: usize,
    read_timeout: Duration,
    max_connections: usize,
}

impl ServerConfig {
    /// Validates and builds a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the width is not 2, 4 or 8, or if any limit
    /// is zero.
    pub fn new(
        bind_addr: SocketAddr,
        length_field_size: usize,
        max_payload_size: usize,
        read_timeout: Duration,
        max_connections: usize,
    ) -> Result<Self, ConfigError> {
        let codec = FrameCodec::new(length_field_size)?;
        if max_payload_size == 0 {
            return Err(ConfigError::ZeroMaxPayload);
        }
        if read_timeout.is_zero() {
            return Err(ConfigError::ZeroReadTimeout);
        }
        if max_connections == 0 {
            return Err(ConfigError::ZeroMaxConnections);
        }
        Ok(Self {
            bind_addr,
            codec,
            max_payload_size,
            read_timeout,
            max_connections,
        })
    }

    /// Address the listener binds to.  Port 0 asks the OS for a free port.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Codec for the configured length-prefix width.
    pub fn codec(&self) -> FrameCodec {
        self.codec
    }

    pub fn length_width(&self) -> LengthWidth {
        self.codec.width()
    }

    /// Largest payload, in bytes, a client may declare.
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Deadline applied to every individual read.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Number of sessions allowed at once.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
