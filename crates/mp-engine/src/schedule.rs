//! Delta-time to absolute-time scheduling.
//!
//! Walks an event source once, accumulating delta ticks into absolute
//! positions and converting them through the tempo map, producing the
//! table the dispatch loop consumes.

use core::time::Duration;

use mp_ir::{ConversionError, MidiEvent, TempoMap, TimedEvent};

/// An event placed at an absolute metric time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub event: MidiEvent,
    /// Time from the start of the sequence at speed 1.0.
    pub time: Duration,
}

/// Build the event table for a sequence of delta-timed events.
///
/// Source order is preserved. Times are non-decreasing because tick
/// positions only grow and the tempo map is monotonic.
pub fn build_schedule<I>(events: I, tempo_map: &TempoMap) -> Result<Vec<EventRecord>, ConversionError>
where
    I: IntoIterator<Item = TimedEvent>,
{
    let events = events.into_iter();
    let mut records = Vec::with_capacity(events.size_hint().0);
    let mut tick: u64 = 0;

    for TimedEvent { event, delta } in events {
        tick = tick
            .checked_add(delta)
            .ok_or(ConversionError::TickOutOfRange { tick: u64::MAX })?;
        let time = tempo_map.ticks_to_metric(tick)?;
        records.push(EventRecord { event, time });
    }

    Ok(records)
}
