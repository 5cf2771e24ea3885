//! # infergate-core
//!
//! Shared library for infergate containing the wire framing codec and the
//! pure metrics fold.
//!
//! This crate is used by both the server and the client/probe binaries.
//! It has zero dependencies on async runtimes or network sockets.
//!
//! # Architecture overview
//!
//! infergate is a TCP service that hands every received message to an
//! inference engine and sends the engine's answer back on the same
//! connection.  This crate holds the two pieces that carry no I/O:
//!
//! - **`protocol`** – How bytes travel over the network.  Every message is a
//!   big-endian length prefix (2, 4 or 8 bytes wide) followed by exactly that
//!   many payload bytes.
//!
//! - **`metrics`** – The event vocabulary emitted by sessions and the
//!   single-writer fold that turns a batch of events into counters and a
//!   [`MetricsSnapshot`].  The async queue that feeds it lives in the server.

pub mod metrics;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `infergate_core::FrameCodec` instead of `infergate_core::protocol::codec::FrameCodec`.
pub use metrics::{MetricsEvent, MetricsEventKind, MetricsSnapshot, MetricsState};
pub use protocol::codec::{
    decode_length, encode, EncodingError, FrameCodec, FramingError, LengthWidth,
};
