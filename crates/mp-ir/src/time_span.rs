//! Playback positions expressed in a caller-chosen unit.

use core::time::Duration;

use crate::tempo_map::{ConversionError, TempoMap};

/// Unit for reporting a playback position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeUnit {
    /// Wall-clock duration at speed 1.0.
    #[default]
    Metric,
    /// Ticks according to the tempo map.
    Ticks,
}

/// A position in one of the supported units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeSpan {
    Metric(Duration),
    Ticks(u64),
}

impl TempoMap {
    /// Express a metric position in `unit`.
    pub fn convert(&self, time: Duration, unit: TimeUnit) -> Result<TimeSpan, ConversionError> {
        match unit {
            TimeUnit::Metric => Ok(TimeSpan::Metric(time)),
            TimeUnit::Ticks => self.metric_to_ticks(time).map(TimeSpan::Ticks),
        }
    }
}
