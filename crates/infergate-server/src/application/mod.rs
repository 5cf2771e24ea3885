//! Application layer for infergate-server.
//!
//! Knows *what* happens to a connection and to a metrics event, but not where
//! the bytes come from: sessions run over any `AsyncRead + AsyncWrite`, and the
//! aggregator never touches a socket.
//!
//! # Responsibilities
//!
//! - The per-connection request/response state machine (`session`)
//! - The inference engine seam and its stand-in engines (`inference`)
//! - The bounded, non-blocking metrics pipeline (`metrics`)
//!
//! # What does NOT belong here?
//!
//! - Binding or accepting on a `TcpListener` (infrastructure)
//! - Reading settings files or environment variables (infrastructure)

pub mod inference;
pub mod metrics;
pub mod session;

pub use inference::{build_engine, EngineKind, InferenceEngine, InferenceError};
pub use metrics::{AggregatorConfig, MetricsAggregator, MetricsHandle};
pub use session::{Session, SessionContext, SessionEnd, SessionError, SessionSummary};
