//! Metrics Collector
//!
//! Turns the stream of readings delivered by the query engine into a map of
//! stat-annotated [`Metric`]s that any number of screens can read
//! concurrently. Statistics are not computed here: min/max/mean and sampling
//! rate are mirrored from the engine's [`Diagnostics`] supplier.

mod collector;
mod diagnostics;
mod metric;

pub use collector::{MetricsCollector, SessionStats};
pub use diagnostics::{
    Diagnostics, HistogramStats, PidDefinition, PidRegistry, Reading, StaticPidRegistry, ValueType,
};
pub use metric::Metric;

/// Stable numeric key of one queryable vehicle parameter
pub type PidId = u64;
