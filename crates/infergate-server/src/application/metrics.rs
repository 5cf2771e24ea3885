//! Asynchronous metrics aggregation.
//!
//! Sessions call [`MetricsHandle::record`] on the hot path.  That call only
//! tries to push the event into a bounded `mpsc` queue: it never awaits, never
//! takes a lock and never fails.  When the queue is full the event is dropped
//! and a sticky `queue_overloaded` flag is raised.
//!
//! A single consumer task owned by [`MetricsAggregator`] drains the queue in
//! batches, folds them into a [`MetricsState`] and publishes the result on a
//! `watch` channel.  [`MetricsHandle::snapshot`] clones the last published
//! value, so readers never wait for the consumer either.
//!
//! ```text
//! session ──try_send──▶ [ bounded queue ] ──▶ consumer ──fold──▶ watch ──▶ snapshot()
//! ```
//!
//! Events still queued when [`MetricsAggregator::stop`] runs are discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use infergate_core::{MetricsEvent, MetricsEventKind, MetricsSnapshot, MetricsState};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

/// Tuning for the aggregation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Capacity of the event queue.
    pub queue_capacity: usize,
    /// Fold as soon as this many events are pending.
    pub batch_size: usize,
    /// Fold pending events at least this often.
    pub flush_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
        }
    }
}

/// Cheap, cloneable producer/reader handle.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    tx: mpsc::Sender<MetricsEvent>,
    overloaded: Arc<AtomicBool>,
    published: watch::Receiver<MetricsSnapshot>,
}

impl MetricsHandle {
    /// Creates a handle with no consumer attached.
    ///
    /// The caller receives the queue's receiving end and decides what to do
    /// with it; [`MetricsAggregator`] hands it to its consumer task.
    pub fn detached(queue_capacity: usize) -> (Self, mpsc::Receiver<MetricsEvent>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (_publish_tx, published) = watch::channel(MetricsState::new().snapshot());
        let handle = Self {
            tx,
            overloaded: Arc::new(AtomicBool::new(false)),
            published,
        };
        (handle, rx)
    }

    /// Enqueues an event without waiting.
    ///
    /// A full queue drops the event and sets the overload flag.  A closed
    /// queue (aggregator stopped) drops it silently.
    pub fn record(&self, kind: MetricsEventKind) {
        match self.tx.try_send(MetricsEvent::now(kind)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                if !self.overloaded.swap(true, Ordering::Relaxed) {
                    warn!(kind = ?event.kind, "metrics queue full; dropping events");
                }
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                trace!(kind = ?event.kind, "metrics queue closed; event discarded");
            }
        }
    }

    /// Returns the latest published snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let published = self.published.borrow().clone();
        published.with_queue_overloaded(self.is_overloaded())
    }

    /// Whether any event has ever been dropped because the queue was full.
    pub fn is_overloaded(&self) -> bool {
        self.overloaded.load(Ordering::Relaxed)
    }
}

/// Everything the consumer task takes ownership of when started.
struct Consumer {
    rx: mpsc::Receiver<MetricsEvent>,
    publish_tx: watch::Sender<MetricsSnapshot>,
    state: MetricsState,
}

/// Owner of the consumer task.
pub struct MetricsAggregator {
    config: AggregatorConfig,
    handle: MetricsHandle,
    pending: Option<Consumer>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl MetricsAggregator {
    /// Creates an aggregator.  Nothing is folded until [`start`](Self::start).
    pub fn new(config: AggregatorConfig) -> Self {
        let config = AggregatorConfig {
            queue_capacity: config.queue_capacity.max(1),
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval.max(Duration::from_millis(1)),
        };
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let state = MetricsState::new();
        let (publish_tx, published) = watch::channel(state.snapshot());
        let handle = MetricsHandle {
            tx,
            overloaded: Arc::new(AtomicBool::new(false)),
            published,
        };
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            handle,
            pending: Some(Consumer {
                rx,
                publish_tx,
                state,
            }),
            stop_tx,
            task: None,
        }
    }

    /// A handle for producers and readers.
    pub fn handle(&self) -> MetricsHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> AggregatorConfig {
        self.config
    }

    /// Spawns the consumer task.  Returns `false` if it was already started.
    pub fn start(&mut self) -> bool {
        let Some(consumer) = self.pending.take() else {
            warn!("metrics aggregator already started");
            return false;
        };
        let stop_rx = self.stop_tx.subscribe();
        let config = self.config;
        self.task = Some(tokio::spawn(consume(consumer, stop_rx, config)));
        info!(
            capacity = config.queue_capacity,
            batch_size = config.batch_size,
            flush_ms = config.flush_interval.as_millis() as u64,
            "metrics aggregator started"
        );
        true
    }

    /// Stops the consumer.  Events still queued are discarded.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("metrics consumer ended abnormally: {e}");
            }
        }
        // Dropping an unstarted receiver closes the queue as well.
        self.pending = None;
        info!("metrics aggregator stopped");
    }
}

/// The single writer: drains the queue and publishes folded snapshots.
async fn consume(consumer: Consumer, mut stop_rx: watch::Receiver<bool>, config: AggregatorConfig) {
    let Consumer {
        mut rx,
        publish_tx,
        mut state,
    } = consumer;
    let mut batch: Vec<MetricsEvent> = Vec::with_capacity(config.batch_size);
    let mut deadline = Instant::now() + config.flush_interval;

    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    debug!(discarded = batch.len() + rx.len(), "metrics consumer stopping");
                    break;
                }
                continue;
            }
            received = time::timeout_at(deadline, rx.recv()) => match received {
                Ok(Some(event)) => {
                    batch.push(event);
                    if batch.len() < config.batch_size {
                        continue;
                    }
                }
                Ok(None) => {
                    // Every producer handle is gone; fold what is left and exit.
                    flush(&mut state, &mut batch, &publish_tx);
                    break;
                }
                Err(_elapsed) => {}
            }
        }

        flush(&mut state, &mut batch, &publish_tx);
        deadline = Instant::now() + config.flush_interval;
    }
}

/// Folds the pending batch (possibly empty) and publishes fresh derived fields.
fn flush(
    state: &mut MetricsState,
    batch: &mut Vec<MetricsEvent>,
    publish_tx: &watch::Sender<MetricsSnapshot>,
) {
    if !batch.is_empty() {
        trace!(events = batch.len(), "folding metrics batch");
        state.fold(batch.iter());
        batch.clear();
    }
    publish_tx.send_replace(state.snapshot());
}

// ── Tests ─────────────────────────────────────────────────────────────────────
