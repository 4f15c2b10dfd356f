//! In-memory device that logs every event it receives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mp_ir::MidiEvent;
use parking_lot::{Condvar, Mutex};

use crate::traits::{DeviceError, OutputDevice};

/// An event together with the instant it was sent.
#[derive(Clone, Debug, PartialEq)]
pub struct SentEvent {
    pub event: MidiEvent,
    pub at: Instant,
}

#[derive(Default)]
struct Log {
    events: Mutex<Vec<SentEvent>>,
    grew: Condvar,
}

/// Records sent events into a shared log.
///
/// Clones share the same log, so a caller can keep one handle for
/// inspection while the engine owns another.
#[derive(Clone, Default)]
pub struct RecordingOutput {
    log: Arc<Log>,
    failures: Arc<AtomicUsize>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything sent so far.
    pub fn events(&self) -> Vec<SentEvent> {
        self.log.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.log.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next `count` sends fail without being recorded.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Block until at least `count` events were sent or `timeout` elapsed.
    /// Returns whether the count was reached.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.log.events.lock();
        while events.len() < count {
            if self.log.grew.wait_until(&mut events, deadline).timed_out() {
                return events.len() >= count;
            }
        }
        true
    }
}

impl OutputDevice for RecordingOutput {
    fn send(&mut self, event: &MidiEvent) -> Result<(), DeviceError> {
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(DeviceError::Send("injected failure".into()));
        }

        let mut events = self.log.events.lock();
        events.push(SentEvent {
            event: event.clone(),
            at: Instant::now(),
        });
        self.log.grew.notify_all();
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
