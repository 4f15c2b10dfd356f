//! Cursor over the scheduled event table.

use core::time::Duration;

use crate::schedule::EventRecord;

/// The immutable event table plus a playback cursor.
///
/// Events are consumed by advancing the cursor rather than removing them,
/// so the table can be replayed after a loop or a rewind without
/// rebuilding it.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    records: Vec<EventRecord>,
    /// Next record to dispatch.
    cursor: usize,
}

impl EventQueue {
    pub fn new(records: Vec<EventRecord>) -> Self {
        debug_assert!(records.windows(2).all(|w| w[0].time <= w[1].time));
        Self { records, cursor: 0 }
    }

    /// Next record to dispatch, if any remain.
    pub fn peek(&self) -> Option<&EventRecord> {
        self.records.get(self.cursor)
    }

    /// Move past the current record.
    pub fn advance(&mut self) {
        if self.cursor < self.records.len() {
            self.cursor += 1;
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Rewind to the first record.
    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// True once every record has been dispatched.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.records.len()
    }

    /// Time of the last record: the length of one pass.
    pub fn duration(&self) -> Duration {
        self.records.last().map(|r| r.time).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
