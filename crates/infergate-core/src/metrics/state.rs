//! Counters and derived metrics.
//!
//! [`MetricsState`] holds the raw counters.  Rates and uptime are never
//! stored; [`MetricsState::snapshot_at`] computes them from the counters each
//! time, so they cannot drift from their sources.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};
use tracing::debug;

use super::event::{MetricsEvent, MetricsEventKind};

/// A consistent point-in-time view of the aggregated metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Wall-clock time the aggregator was created, as Unix seconds.
    #[serde(serialize_with = "serialize_unix_secs")]
    pub start_time: SystemTime,
    /// Time since `start_time` when the snapshot was computed, in seconds.
    #[serde(serialize_with = "serialize_secs")]
    pub uptime: Duration,
    pub active_connections: u64,
    pub total_requests: u64,
    pub requests_per_second: f64,
    pub errors: u64,
    pub error_rate: f64,
    pub inference_errors: u64,
    pub inference_error_rate: f64,
    /// Sticky: at least one event has been dropped because the queue was full.
    pub queue_overloaded: bool,
}

impl MetricsSnapshot {
    /// Returns a copy with `queue_overloaded` set to `overloaded`.
    pub fn with_queue_overloaded(mut self, overloaded: bool) -> Self {
        self.queue_overloaded = overloaded;
        self
    }
}

fn serialize_unix_secs<S: Serializer>(time: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    s.serialize_f64(secs)
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Raw counters owned by a single writer.
#[derive(Debug, Clone)]
pub struct MetricsState {
    start_time: SystemTime,
    started: Instant,
    active_connections: u64,
    total_requests: u64,
    errors: u64,
    inference_errors: u64,
}

impl MetricsState {
    /// Creates an empty state whose uptime starts now.
    pub fn new() -> Self {
        Self {
            start_time: SystemTime::now(),
            started: Instant::now(),
            active_connections: 0,
            total_requests: 0,
            errors: 0,
            inference_errors: 0,
        }
    }

    /// Applies one event to the counters.
    pub fn apply(&mut self, event: &MetricsEvent) {
        match event.kind {
            MetricsEventKind::Connect => self.active_connections += 1,
            MetricsEventKind::Disconnect => {
                // A dropped Connect under queue overload can leave this at zero.
                if self.active_connections == 0 {
                    debug!("disconnect folded with no active connections");
                }
                self.active_connections = self.active_connections.saturating_sub(1);
            }
            MetricsEventKind::Request => self.total_requests += 1,
            MetricsEventKind::Error => self.errors += 1,
            MetricsEventKind::InferenceError => self.inference_errors += 1,
        }
    }

    /// Applies every event of a batch in order.
    pub fn fold<'a, I>(&mut self, batch: I)
    where
        I: IntoIterator<Item = &'a MetricsEvent>,
    {
        for event in batch {
            self.apply(event);
        }
    }

    /// Computes a snapshot with derived fields evaluated at `now`.
    ///
    /// `queue_overloaded` is always `false` here; the queue owner overlays it.
    pub fn snapshot_at(&self, now: Instant) -> MetricsSnapshot {
        let uptime = now.saturating_duration_since(self.started);
        let uptime_secs = uptime.as_secs_f64();
        let requests = self.total_requests as f64;

        let requests_per_second = if uptime_secs > 0.0 {
            requests / uptime_secs
        } else {
            0.0
        };
        let (error_rate, inference_error_rate) = if self.total_requests > 0 {
            (
                self.errors as f64 / requests,
                self.inference_errors as f64 / requests,
            )
        } else {
            (0.0, 0.0)
        };

        MetricsSnapshot {
            start_time: self.start_time,
            uptime,
            active_connections: self.active_connections,
            total_requests: self.total_requests,
            requests_per_second,
            errors: self.errors,
            error_rate,
            inference_errors: self.inference_errors,
            inference_error_rate,
            queue_overloaded: false,
        }
    }

    /// Computes a snapshot at the current instant.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_at(Instant::now())
    }

    /// The instant uptime is measured from.
    pub fn started(&self) -> Instant {
        self.started
    }
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
