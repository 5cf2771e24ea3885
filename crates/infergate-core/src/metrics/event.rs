//! Events emitted by sessions for the metrics pipeline.

use std::time::SystemTime;

use serde::Serialize;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsEventKind {
    /// A connection was admitted and its session started.
    Connect,
    /// A session reached its terminal state.
    Disconnect,
    /// One request/response cycle completed.
    Request,
    /// A session failed on framing, timeout, size limit or write.
    Error,
    /// The inference engine failed for a request.
    InferenceError,
}

/// One immutable observation, consumed exactly once by the fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsEvent {
    pub kind: MetricsEventKind,
    pub timestamp: SystemTime,
}

impl MetricsEvent {
    /// Creates an event stamped with the current wall-clock time.
    pub fn now(kind: MetricsEventKind) -> Self {
        Self {
            kind,
            timestamp: SystemTime::now(),
        }
    }
}

impl From<MetricsEventKind> for MetricsEvent {
    fn from(kind: MetricsEventKind) -> Self {
        Self::now(kind)
    }
}
