//! The real-time playback engine.
//!
//! All mutable state lives behind one mutex shared with a background
//! dispatch thread. Control calls take the lock, change the state, and
//! signal the thread through a condition variable. The thread never
//! sleeps on the clock alone: it waits on the condition variable for at
//! most [`CHECKPOINT_INTERVAL`], so stop, seek and speed changes are seen
//! promptly. A second condition variable wakes callers blocked in
//! [`PlaybackEngine::play`] when playback stops.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, trace, warn};
use mp_device::{DeviceError, OutputDevice};
use mp_ir::{TempoMap, TimeSpan, TimeUnit, TimedEvent};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::active_notes::ActiveNotes;
use crate::error::PlaybackError;
use crate::event_queue::EventQueue;
use crate::note_stop::{self, NoteStopPolicy, PendingNotes};
use crate::schedule::build_schedule;
use crate::transport::Transport;

/// Longest the dispatch thread waits before re-checking its state.
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_millis(5);

const DISPOSED: PlaybackError = PlaybackError::InvalidState("engine has been disposed");

struct State<D> {
    output: D,
    queue: EventQueue,
    transport: Transport,
    notes: ActiveNotes,
    pending: PendingNotes,
    policy: NoteStopPolicy,
    loop_enabled: bool,
    /// Device failure from the dispatch thread, kept until taken.
    error: Option<DeviceError>,
    disposed: bool,
}

impl<D: OutputDevice> State<D> {
    /// Stop the clock and apply the note-stop policy.
    fn halt(&mut self, now: Instant) -> Result<(), DeviceError> {
        self.transport.stop(now);
        let State { output, notes, pending, policy, .. } = self;
        note_stop::on_stop(*policy, notes, pending, output)
    }
}

struct Shared<D> {
    state: Mutex<State<D>>,
    /// Control state changed; wakes the dispatch thread.
    wake: Condvar,
    /// Playback stopped; wakes `play()` callers.
    idle: Condvar,
}

/// Plays a scheduled event table to an output device in real time.
///
/// Every method takes `&self`, so the engine can be shared between the
/// thread blocked in [`play`](Self::play) and threads that control it.
pub struct PlaybackEngine<D: OutputDevice + 'static> {
    shared: Arc<Shared<D>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    tempo_map: TempoMap,
    duration: Duration,
    event_count: usize,
}

impl<D: OutputDevice + 'static> PlaybackEngine<D> {
    /// Schedule `events` against `tempo_map` and bind the engine to `output`.
    ///
    /// Fails only if an event position cannot be converted to metric time.
    pub fn new<I>(events: I, tempo_map: &TempoMap, output: D) -> Result<Self, PlaybackError>
    where
        I: IntoIterator<Item = TimedEvent>,
    {
        let records = build_schedule(events, tempo_map)?;
        let queue = EventQueue::new(records);
        let duration = queue.duration();
        let event_count = queue.len();
        debug!(
            "Scheduled {} events ({:?}) for '{}'",
            event_count,
            duration,
            output.name()
        );

        let state = State {
            output,
            queue,
            transport: Transport::default(),
            notes: ActiveNotes::new(),
            pending: PendingNotes::new(),
            policy: NoteStopPolicy::default(),
            loop_enabled: false,
            error: None,
            disposed: false,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                wake: Condvar::new(),
                idle: Condvar::new(),
            }),
            worker: Mutex::new(None),
            tempo_map: tempo_map.clone(),
            duration,
            event_count,
        })
    }

    // --- Transport control ---

    /// Begin or resume playback without blocking. No-op while running.
    ///
    /// Under [`NoteStopPolicy::Split`], notes released by the last stop are
    /// struck again before any scheduled event. If that fails, playback
    /// does not start.
    pub fn start(&self) -> Result<(), PlaybackError> {
        {
            let mut st = self.lock()?;
            if st.transport.is_running() {
                return Ok(());
            }
            st.error = None;

            let State { output, notes, pending, .. } = &mut *st;
            note_stop::on_resume(pending, notes, output)?;

            let now = Instant::now();
            st.transport.start(now);
            debug!("Playback started at {:?}", st.transport.position(now));
        }

        self.ensure_worker()?;
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Start and block until playback stops, either at the end of the
    /// sequence or through [`stop`](Self::stop) from another thread.
    ///
    /// Returns the device error that stopped playback, if any.
    pub fn play(&self) -> Result<(), PlaybackError> {
        self.start()?;

        let mut st = self.shared.state.lock();
        while st.transport.is_running() && !st.disposed {
            self.shared.idle.wait(&mut st);
        }
        match st.error.take() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Pause playback, freezing the position. No-op while stopped.
    ///
    /// The note-stop policy is applied before this returns.
    pub fn stop(&self) -> Result<(), PlaybackError> {
        let result = {
            let mut st = self.lock()?;
            if !st.transport.is_running() {
                return Ok(());
            }
            let now = Instant::now();
            let result = st.halt(now);
            debug!("Playback stopped at {:?}", st.transport.position(now));
            result
        };

        self.shared.wake.notify_all();
        self.shared.idle.notify_all();
        result.map_err(PlaybackError::from)
    }

    /// Rewind to the first event. Keeps the run state and the sounding notes.
    pub fn move_to_start(&self) -> Result<(), PlaybackError> {
        {
            let mut st = self.lock()?;
            st.queue.reset_cursor();
            st.transport.rewind(Instant::now());
        }
        debug!("Moved to start");
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Stop with the current policy and join the dispatch thread.
    ///
    /// Control calls fail with [`PlaybackError::InvalidState`] afterwards.
    /// Calling it again is a no-op.
    pub fn dispose(&self) -> Result<(), PlaybackError> {
        let result = {
            let mut st = self.shared.state.lock();
            if st.disposed {
                return Ok(());
            }
            let result = st.halt(Instant::now());
            st.disposed = true;
            result
        };

        self.shared.wake.notify_all();
        self.shared.idle.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("Dispatch thread panicked");
            }
        }
        debug!("Engine disposed");
        result.map_err(PlaybackError::from)
    }

    /// Dispose the engine and hand back its output device.
    pub fn into_output(self) -> Result<D, PlaybackError> {
        if let Err(e) = self.dispose() {
            warn!("Releasing notes on dispose failed: {}", e);
        }
        let shared = Arc::clone(&self.shared);
        drop(self);
        match Arc::try_unwrap(shared) {
            Ok(shared) => Ok(shared.state.into_inner().output),
            Err(_) => Err(PlaybackError::InvalidState("output is still in use")),
        }
    }

    // --- Properties ---

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().transport.is_running()
    }

    /// Musical time played so far, at speed 1.0.
    ///
    /// Frozen while stopped; keeps growing across loop passes.
    pub fn current_time(&self) -> Duration {
        self.shared.state.lock().transport.position(Instant::now())
    }

    /// [`current_time`](Self::current_time) expressed in `unit`.
    pub fn current_time_as(&self, unit: TimeUnit) -> Result<TimeSpan, PlaybackError> {
        Ok(self.tempo_map.convert(self.current_time(), unit)?)
    }

    pub fn speed(&self) -> f64 {
        self.shared.state.lock().transport.speed()
    }

    /// Change the playback rate. The position stays continuous; the wait
    /// for the next event is rescaled.
    pub fn set_speed(&self, speed: f64) -> Result<(), PlaybackError> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(PlaybackError::InvalidSpeed(speed));
        }
        self.lock()?.transport.set_speed(speed, Instant::now());
        debug!("Speed set to {}", speed);
        self.shared.wake.notify_all();
        Ok(())
    }

    pub fn is_loop(&self) -> bool {
        self.shared.state.lock().loop_enabled
    }

    /// Takes effect the next time the end of the sequence is reached.
    pub fn set_loop(&self, enabled: bool) -> Result<(), PlaybackError> {
        self.lock()?.loop_enabled = enabled;
        self.shared.wake.notify_all();
        Ok(())
    }

    pub fn note_stop_policy(&self) -> NoteStopPolicy {
        self.shared.state.lock().policy
    }

    pub fn set_note_stop_policy(&self, policy: NoteStopPolicy) -> Result<(), PlaybackError> {
        self.lock()?.policy = policy;
        Ok(())
    }

    /// Length of one pass through the sequence.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Take the device error that stopped background playback, if any.
    pub fn take_error(&self) -> Option<PlaybackError> {
        self.shared.state.lock().error.take().map(PlaybackError::from)
    }

    // --- Internals ---

    fn lock(&self) -> Result<MutexGuard<'_, State<D>>, PlaybackError> {
        let st = self.shared.state.lock();
        if st.disposed {
            return Err(DISPOSED);
        }
        Ok(st)
    }

    /// Spawn the dispatch thread on first use.
    fn ensure_worker(&self) -> Result<(), PlaybackError> {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(handle) = worker.take() {
                if handle.join().is_err() {
                    error!("Dispatch thread panicked, respawning");
                }
            }
        }
        if worker.is_some() || self.shared.state.lock().disposed {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("midiplay-dispatch".into())
            .spawn(move || dispatch_loop(&shared));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.state.lock().transport.stop(Instant::now());
                Err(PlaybackError::Spawn(e.to_string()))
            }
        }
    }
}

impl<D: OutputDevice + 'static> Drop for PlaybackEngine<D> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            warn!("Dispose on drop failed: {}", e);
        }
    }
}

/// Stops the transport if the dispatch thread unwinds, so `play()` callers
/// are released and the next `start()` spawns a fresh thread.
struct HaltOnPanic<'a, D>(&'a Shared<D>);

impl<D> Drop for HaltOnPanic<'_, D> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.state.lock().transport.stop(Instant::now());
            self.0.idle.notify_all();
        }
    }
}

fn dispatch_loop<D: OutputDevice>(shared: &Shared<D>) {
    let _halt = HaltOnPanic(shared);
    let mut st = shared.state.lock();
    loop {
        if st.disposed {
            break;
        }
        if !st.transport.is_running() {
            shared.wake.wait(&mut st);
            continue;
        }

        if st.queue.is_exhausted() {
            let pass = st.queue.duration();
            if st.loop_enabled && pass > Duration::ZERO {
                st.queue.reset_cursor();
                st.transport.wrap(pass);
                debug!("Loop wrap, offset now {:?}", st.transport.loop_offset());
                continue;
            }
            if st.loop_enabled {
                warn!("Sequence has zero length, not looping");
            }
            st.transport.stop(Instant::now());
            debug!("End of sequence");
            shared.idle.notify_all();
            continue;
        }

        let now = Instant::now();
        let State { output, queue, transport, notes, error: failure, .. } = &mut *st;
        let Some(record) = queue.peek() else {
            continue;
        };
        let due = record.time.saturating_add(transport.loop_offset());
        if let Some(wait) = transport.wait_until(due, now) {
            shared.wake.wait_for(&mut st, wait.min(CHECKPOINT_INTERVAL));
            continue;
        }

        trace!("Dispatch {} at {:?}", record.event, due);
        let sent = output.send(&record.event);
        // A failed send still counts as sent so it is never repeated.
        realtime(|| notes.track(&record.event));
        queue.advance();

        if let Err(e) = sent {
            error!("Output device failed, stopping playback: {}", e);
            *failure = Some(e);
            transport.stop(now);
            shared.idle.notify_all();
        }

        // Let waiting control calls in between back-to-back events.
        MutexGuard::bump(&mut st);
    }
    debug!("Dispatch thread exiting");
}

#[cfg(feature = "alloc_check")]
fn realtime<R>(f: impl FnOnce() -> R) -> R {
    assert_no_alloc::assert_no_alloc(f)
}

#[cfg(not(feature = "alloc_check"))]
fn realtime<R>(f: impl FnOnce() -> R) -> R {
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mp_device::{NullOutput, RecordingOutput};
    use mp_ir::{Channel, MidiEvent};

    fn note_pair(length: u64) -> Vec<TimedEvent> {
        let ch = Channel::default();
        vec![
            TimedEvent::new(MidiEvent::note_on(ch, 60, 100), 0),
            TimedEvent::new(MidiEvent::note_off(ch, 60, 0), length),
        ]
    }

    #[test]
    fn defaults() {
        let engine = PlaybackEngine::new(note_pair(96), &TempoMap::default(), NullOutput::new())
            .unwrap();
        assert!(!engine.is_running());
        assert!(!engine.is_loop());
        assert_eq!(engine.speed(), 1.0);
        assert_eq!(engine.note_stop_policy(), NoteStopPolicy::Interrupt);
        assert_eq!(engine.current_time(), Duration::ZERO);
        assert_eq!(engine.duration(), Duration::from_millis(500));
        assert_eq!(engine.event_count(), 2);
    }

    #[test]
    fn construction_fails_on_unconvertible_ticks() {
        let events = vec![TimedEvent::new(
            MidiEvent::note_on(Channel::default(), 60, 100),
            u64::MAX,
        )];
        // One tick per quarter at the slowest tempo: u64::MAX ticks overflow a Duration.
        let map = TempoMap::with_tempo_changes(
            mp_ir::TimeDivision::TicksPerQuarter(1),
            [mp_ir::TempoChange::new(0, mp_ir::Tempo::from_micros_per_quarter(u32::MAX))],
        )
        .unwrap();
        let result = PlaybackEngine::new(events, &map, NullOutput::new());
        assert!(matches!(result, Err(PlaybackError::Conversion(_))));
    }

    #[test]
    fn speed_is_validated() {
        let engine = PlaybackEngine::new(note_pair(96), &TempoMap::default(), NullOutput::new())
            .unwrap();
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(engine.set_speed(bad), Err(PlaybackError::InvalidSpeed(_))));
        }
        assert_eq!(engine.speed(), 1.0);
        engine.set_speed(1.5).unwrap();
        assert_eq!(engine.speed(), 1.5);
    }

    #[test]
    fn stop_and_seek_while_stopped_are_harmless() {
        let engine = PlaybackEngine::new(note_pair(96), &TempoMap::default(), NullOutput::new())
            .unwrap();
        engine.stop().unwrap();
        engine.move_to_start().unwrap();
        assert!(!engine.is_running());
        assert_eq!(engine.current_time(), Duration::ZERO);
    }

    #[test]
    fn disposed_engine_rejects_control_calls() {
        let engine = PlaybackEngine::new(note_pair(96), &TempoMap::default(), NullOutput::new())
            .unwrap();
        engine.dispose().unwrap();

        assert_eq!(engine.start(), Err(DISPOSED));
        assert_eq!(engine.play(), Err(DISPOSED));
        assert_eq!(engine.stop(), Err(DISPOSED));
        assert_eq!(engine.move_to_start(), Err(DISPOSED));
        assert_eq!(engine.set_speed(2.0), Err(DISPOSED));
        assert_eq!(engine.set_loop(true), Err(DISPOSED));
        assert_eq!(engine.set_note_stop_policy(NoteStopPolicy::Hold), Err(DISPOSED));
        // A second dispose is a no-op.
        assert_eq!(engine.dispose(), Ok(()));
    }

    #[test]
    fn into_output_returns_the_device() {
        let recorder = RecordingOutput::new();
        let engine = PlaybackEngine::new(note_pair(0), &TempoMap::default(), recorder.clone())
            .unwrap();
        engine.play().unwrap();

        let device = engine.into_output().unwrap();
        assert_eq!(device.name(), "recording");
        assert_eq!(recorder.len(), 2);
    }
}
