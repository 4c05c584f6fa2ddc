//! Stack event correlation and tailing.
//!
//! Events are fetched newest first and cut off at a watermark, usually the
//! creation time of the change-set being executed.

mod correlator;
mod tail;

pub use correlator::{
    EventCorrelator, ResourceDuration, ResourceTimeline, collect_events, correlate, durations,
    resource_key,
};
pub use tail::{DEFAULT_TAIL_INTERVAL, EventTailer, TailOutcome};
