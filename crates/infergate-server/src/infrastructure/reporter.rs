//! Periodic metrics reporter.
//!
//! A read-only consumer of [`MetricsHandle::snapshot`]: every interval it logs
//! the snapshot as structured `tracing` fields plus a single JSON line, until
//! the stop signal flips to `true`.

use std::time::Duration;

use infergate_core::MetricsSnapshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::metrics::MetricsHandle;

/// Spawns the reporter task.
pub fn spawn_reporter(
    metrics: MetricsHandle,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; there is nothing to report yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => report(&metrics.snapshot()),
            }
        }
        debug!("metrics reporter stopped");
    })
}

/// Serializes a snapshot as one JSON object.
pub fn render_json(snapshot: &MetricsSnapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string(snapshot)
}

fn report(snapshot: &MetricsSnapshot) {
    info!(
        uptime_secs = snapshot.uptime.as_secs(),
        active_connections = snapshot.active_connections,
        total_requests = snapshot.total_requests,
        requests_per_second = snapshot.requests_per_second,
        errors = snapshot.errors,
        error_rate = snapshot.error_rate,
        inference_errors = snapshot.inference_errors,
        queue_overloaded = snapshot.queue_overloaded,
        "metrics"
    );
    match render_json(snapshot) {
        Ok(line) => info!(target: "infergate::metrics_json", "{line}"),
        Err(e) => warn!("cannot serialize metrics snapshot: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infergate_core::MetricsState;

    #[test]
    fn test_render_json_has_every_field() {
        // Arrange
        let snapshot = MetricsState::new().snapshot().with_queue_overloaded(true);

        // Act
        let json = render_json(&snapshot).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        // Assert
        for field in [
            "start_time",
            "uptime",
            "active_connections",
            "total_requests",
            "requests_per_second",
            "errors",
            "error_rate",
            "inference_errors",
            "inference_error_rate",
            "queue_overloaded",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["queue_overloaded"], serde_json::Value::Bool(true));
        assert_eq!(value["total_requests"], 0);
    }

    #[tokio::test]
    async fn test_reporter_stops_on_signal() {
        // Arrange
        let (metrics, _rx) = MetricsHandle::detached(4);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_reporter(metrics, Duration::from_millis(10), stop_rx);
        time::sleep(Duration::from_millis(35)).await;

        // Act
        stop_tx.send(true).unwrap();

        // Assert
        time::timeout(Duration::from_secs(2), task)
            .await
            .expect("reporter must stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_reporter_stops_when_signal_dropped() {
        let (metrics, _rx) = MetricsHandle::detached(4);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_reporter(metrics, Duration::from_secs(60), stop_rx);

        drop(stop_tx);

        time::timeout(Duration::from_secs(2), task)
            .await
            .expect("reporter must stop")
            .unwrap();
    }
}
