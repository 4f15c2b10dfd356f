//! MIDI output devices for midiplay.

mod midir_backend;
mod recording;
mod traits;

pub use midir_backend::MidirOutput;
pub use recording::{RecordingOutput, SentEvent};
pub use traits::{DeviceError, NullOutput, OutputDevice};
