//! Session identity and lifecycle states.

use std::fmt;
use std::net::SocketAddr;
use std::time::SystemTime;

use uuid::Uuid;

/// Unique identifier of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first block of the UUID is plenty to tell sessions apart in logs.
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// What the listener knows about an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer_addr: SocketAddr,
    pub connected_at: SystemTime,
}

impl SessionInfo {
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            id: SessionId::new(),
            peer_addr,
            connected_at: SystemTime::now(),
        }
    }
}

/// Where a session is in its request/response cycle.
///
/// ```text
/// Admitted → ReadingLength → ReadingPayload → Inferring → Writing ─┐
///                 ↑                                                │
///                 └────────────────────────────────────────────────┘
/// any state → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Admitted,
    ReadingLength,
    ReadingPayload,
    Inferring,
    Writing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Admitted => "admitted",
            SessionState::ReadingLength => "length prefix",
            SessionState::ReadingPayload => "payload",
            SessionState::Inferring => "inference",
            SessionState::Writing => "response write",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
