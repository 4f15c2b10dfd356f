//! Headless controller for midiplay.
//!
//! Provides a unified API for loading MIDI files, choosing an output
//! port and controlling playback, so front ends only deal with one type.

use std::path::Path;
use std::time::Duration;

use log::info;
use mp_engine::PlaybackEngine;
use mp_ir::ConversionError;
use thiserror::Error;

// Re-export common types so callers don't need the lower crates directly.
pub use mp_device::{DeviceError, MidirOutput, OutputDevice};
pub use mp_engine::{NoteStopPolicy, PlaybackError, UnknownPolicy};
pub use mp_formats::{FormatError, Song};
pub use mp_ir::{TimeSpan, TimeUnit};

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// Playback call before any file was loaded
    #[error("No file loaded")]
    NothingLoaded,
}

/// Settings carried from one loaded file to the next.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Settings {
    speed: f64,
    looping: bool,
    policy: NoteStopPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            speed: 1.0,
            looping: false,
            policy: NoteStopPolicy::default(),
        }
    }
}

/// Owns the output device and the engine for the loaded file.
pub struct Controller<D: OutputDevice + 'static = Box<dyn OutputDevice>> {
    /// The device while no engine holds it.
    output: Option<D>,
    engine: Option<PlaybackEngine<D>>,
    settings: Settings,
}

impl Controller<MidirOutput> {
    /// Connect to the first output port whose name matches `port_query`.
    pub fn open(port_query: &str) -> Result<Self, ControllerError> {
        Ok(Self::with_output(MidirOutput::connect(port_query)?))
    }
}

impl<D: OutputDevice + 'static> Controller<D> {
    pub fn with_output(output: D) -> Self {
        Self {
            output: Some(output),
            engine: None,
            settings: Settings::default(),
        }
    }

    // --- File management ---

    /// Parse a Standard MIDI File and prepare it for playback, replacing
    /// (and disposing) any previously loaded file.
    pub fn load(&mut self, data: &[u8]) -> Result<(), ControllerError> {
        let song = mp_formats::load_smf(data)?;
        self.load_song(song)
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), ControllerError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| ControllerError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.load(&data)
    }

    /// Build an engine for an already parsed song.
    pub fn load_song(&mut self, song: Song) -> Result<(), ControllerError> {
        // The engine consumes the device, so reject unplayable songs first.
        let last_tick = song
            .events
            .iter()
            .try_fold(0u64, |tick, e| tick.checked_add(e.delta))
            .ok_or(ConversionError::TickOutOfRange { tick: u64::MAX })
            .map_err(PlaybackError::from)?;
        song.tempo_map
            .ticks_to_metric(last_tick)
            .map_err(PlaybackError::from)?;

        let output = self.take_output()?;
        let engine = PlaybackEngine::new(song.events, &song.tempo_map, output)?;
        engine.set_speed(self.settings.speed)?;
        engine.set_loop(self.settings.looping)?;
        engine.set_note_stop_policy(self.settings.policy)?;
        info!(
            "Loaded {} events over {} tracks ({:.1}s)",
            engine.event_count(),
            song.track_count,
            engine.duration().as_secs_f64()
        );
        self.engine = Some(engine);
        Ok(())
    }

    /// Dispose the current engine and get the device back.
    fn take_output(&mut self) -> Result<D, ControllerError> {
        if let Some(engine) = self.engine.take() {
            return Ok(engine.into_output()?);
        }
        self.output
            .take()
            .ok_or(ControllerError::Playback(PlaybackError::InvalidState(
                "output device was lost",
            )))
    }

    fn engine(&self) -> Result<&PlaybackEngine<D>, ControllerError> {
        self.engine.as_ref().ok_or(ControllerError::NothingLoaded)
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.is_some()
    }

    /// The engine for the loaded file, e.g. to share it with a control thread.
    pub fn playback(&self) -> Option<&PlaybackEngine<D>> {
        self.engine.as_ref()
    }

    // --- Transport ---

    /// Play from the current position, blocking until playback stops.
    pub fn play(&self) -> Result<(), ControllerError> {
        Ok(self.engine()?.play()?)
    }

    pub fn start(&self) -> Result<(), ControllerError> {
        Ok(self.engine()?.start()?)
    }

    pub fn stop(&self) -> Result<(), ControllerError> {
        Ok(self.engine()?.stop()?)
    }

    pub fn move_to_start(&self) -> Result<(), ControllerError> {
        Ok(self.engine()?.move_to_start()?)
    }

    pub fn is_running(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_running())
    }

    // --- Settings ---

    pub fn set_speed(&mut self, speed: f64) -> Result<(), ControllerError> {
        if let Some(engine) = &self.engine {
            engine.set_speed(speed)?;
        } else if !(speed.is_finite() && speed > 0.0) {
            return Err(PlaybackError::InvalidSpeed(speed).into());
        }
        self.settings.speed = speed;
        Ok(())
    }

    pub fn set_loop(&mut self, enabled: bool) -> Result<(), ControllerError> {
        if let Some(engine) = &self.engine {
            engine.set_loop(enabled)?;
        }
        self.settings.looping = enabled;
        Ok(())
    }

    pub fn set_note_stop_policy(&mut self, policy: NoteStopPolicy) -> Result<(), ControllerError> {
        if let Some(engine) = &self.engine {
            engine.set_note_stop_policy(policy)?;
        }
        self.settings.policy = policy;
        Ok(())
    }

    // --- Status ---

    /// Current position, `None` when nothing is loaded.
    pub fn position(&self) -> Option<Duration> {
        self.engine.as_ref().map(|e| e.current_time())
    }

    pub fn position_as(&self, unit: TimeUnit) -> Result<TimeSpan, ControllerError> {
        Ok(self.engine()?.current_time_as(unit)?)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.engine.as_ref().map(|e| e.duration())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mp_device::RecordingOutput;

    /// One-track file: note on at 0, off after `ticks`.
    fn smf(ticks: u8) -> Vec<u8> {
        let mut data = b"MThd".to_vec();
        data.extend_from_slice(&[0, 0, 0, 6, 0, 0, 0, 1, 0, 96]);
        let track = [0x00, 0x90, 60, 100, ticks, 0x80, 60, 0, 0x00, 0xFF, 0x2F, 0x00];
        data.extend_from_slice(b"MTrk");
        data.extend_from_slice(&(track.len() as u32).to_be_bytes());
        data.extend_from_slice(&track);
        data
    }

    #[test]
    fn calls_before_load_fail() {
        let controller = Controller::with_output(RecordingOutput::new());
        assert!(!controller.is_loaded());
        assert!(matches!(controller.play(), Err(ControllerError::NothingLoaded)));
        assert_eq!(controller.position(), None);
        assert!(!controller.is_running());
    }

    #[test]
    fn load_and_play() {
        let recorder = RecordingOutput::new();
        let mut controller = Controller::with_output(recorder.clone());
        controller.load(&smf(0)).unwrap();

        assert_eq!(controller.duration(), Some(Duration::ZERO));
        controller.play().unwrap();
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn settings_survive_reload() {
        let recorder = RecordingOutput::new();
        let mut controller = Controller::with_output(recorder.clone());
        controller.set_speed(2.0).unwrap();
        controller.set_loop(true).unwrap();
        controller.set_note_stop_policy(NoteStopPolicy::Split).unwrap();

        controller.load(&smf(10)).unwrap();
        controller.load(&smf(20)).unwrap();

        let engine = controller.playback().unwrap();
        assert_eq!(engine.speed(), 2.0);
        assert!(engine.is_loop());
        assert_eq!(engine.note_stop_policy(), NoteStopPolicy::Split);
    }

    #[test]
    fn reload_reuses_the_device() {
        let recorder = RecordingOutput::new();
        let mut controller = Controller::with_output(recorder.clone());
        controller.load(&smf(0)).unwrap();
        controller.play().unwrap();
        controller.load(&smf(0)).unwrap();
        controller.play().unwrap();
        assert_eq!(recorder.len(), 4);
    }

    #[test]
    fn bad_input_is_reported() {
        let mut controller = Controller::with_output(RecordingOutput::new());
        assert!(matches!(
            controller.load(b"not a midi file"),
            Err(ControllerError::Format(FormatError::InvalidHeader))
        ));
        assert!(matches!(
            controller.load_file("/nonexistent/song.mid"),
            Err(ControllerError::Io { .. })
        ));
        assert!(matches!(
            controller.set_speed(0.0),
            Err(ControllerError::Playback(PlaybackError::InvalidSpeed(_)))
        ));
    }
}
