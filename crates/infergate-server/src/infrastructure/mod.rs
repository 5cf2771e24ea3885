//! Infrastructure layer for infergate-server.
//!
//! Everything that touches the operating system: the TCP listener and its
//! accept loop, the settings file, the periodic metrics reporter and the
//! client used by the probe binary.
//!
//! # What does NOT belong here?
//!
//! - The per-session request/response logic (application layer)
//! - Validation of the server limits themselves (domain layer)

pub mod client;
pub mod listener;
pub mod reporter;
pub mod settings;

pub use client::{ClientError, FrameClient};
pub use listener::{Server, ServerError, ServerHandle};
pub use reporter::{render_json, spawn_reporter};
pub use settings::{Settings, SettingsError, SettingsOverrides};
