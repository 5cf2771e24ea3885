//! Domain layer for infergate-server.
//!
//! Pure types with no I/O: the validated server limits and the vocabulary
//! used to describe a session (identity, peer, lifecycle state).
//!
//! No `tokio`, `TcpStream` or file access belongs here.

pub mod config;
pub mod session;

pub use config::{ConfigError, ServerConfig};
pub use session::{SessionId, SessionInfo, SessionState};
