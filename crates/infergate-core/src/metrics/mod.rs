//! Metrics vocabulary and the single-writer fold.
//!
//! Sessions describe what happened to them as [`MetricsEvent`]s.  Exactly one
//! owner, the aggregator's consumer task in the server, applies those events
//! to a [`MetricsState`] and publishes the resulting [`MetricsSnapshot`].
//! Nothing in this module is shared or locked; concurrency is the caller's
//! concern.

pub mod event;
pub mod state;

pub use event::{MetricsEvent, MetricsEventKind};
pub use state::{MetricsSnapshot, MetricsState};
