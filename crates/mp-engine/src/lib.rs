//! Real-time playback engine for midiplay.
//!
//! Converts a delta-timed event sequence into an absolute-time table and
//! dispatches it to an output device from a background thread, with
//! speed control, looping and configurable handling of notes that are
//! still sounding when playback stops.

mod active_notes;
mod error;
mod event_queue;
pub mod note_stop;
mod playback;
pub mod schedule;
mod transport;

pub use active_notes::{ActiveNote, ActiveNotes, MAX_ACTIVE_NOTES};
pub use error::{PlaybackError, UnknownPolicy};
pub use event_queue::EventQueue;
pub use note_stop::{NoteStopPolicy, PendingNotes};
pub use playback::{PlaybackEngine, CHECKPOINT_INTERVAL};
pub use schedule::{build_schedule, EventRecord};
