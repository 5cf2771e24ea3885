//! infergate-server library crate.
//!
//! A long-lived TCP service: clients send length-prefixed binary requests and
//! get one length-prefixed response per request from a pluggable inference
//! engine.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! TCP clients (framed requests)
//!         ↕
//! [infergate-server]
//!   ├── domain/           Pure types: ServerConfig, SessionId, SessionState
//!   ├── application/
//!   │     ├── session/    Per-connection state machine
//!   │     ├── inference/  InferenceEngine trait + stand-in engines
//!   │     └── metrics/    Bounded queue → single consumer → snapshots
//!   └── infrastructure/
//!         ├── listener/   Accept loop, admission control, shutdown
//!         ├── settings/   TOML settings + overrides
//!         ├── reporter/   Periodic metrics log line
//!         └── client/     Framed TCP client (probe, tests)
//! ```
//!
//! # Layer rules
//!
//! - `domain` does no I/O and spawns nothing.
//! - `application` is generic over the byte stream; it never opens sockets.
//! - `infrastructure` depends on all other layers plus `tokio::net`.

pub mod application;
pub mod domain;
pub mod infrastructure;
