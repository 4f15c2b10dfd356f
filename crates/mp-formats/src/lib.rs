//! File format readers for midiplay.
//!
//! Parses Standard MIDI Files into a single merged event stream plus the
//! tempo map needed to place it in time.

mod smf;

use mp_ir::{DecodeError, TempoMap, TimedEvent};
use thiserror::Error;

pub use smf::load_smf;

/// Error type for format parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Invalid file header or magic bytes
    #[error("Invalid MIDI file header")]
    InvalidHeader,
    /// Unexpected end of file
    #[error("Unexpected end of file")]
    UnexpectedEof,
    /// SMF format other than 0 or 1
    #[error("Unsupported MIDI file format {0}")]
    UnsupportedFormat(u16),
    /// A channel event could not be decoded
    #[error("Bad channel event: {0}")]
    Decode(#[from] DecodeError),
    /// Malformed chunk contents
    #[error("Malformed chunk: {0}")]
    Chunk(String),
}

/// A parsed MIDI file, ready for playback.
#[derive(Clone, Debug, PartialEq)]
pub struct Song {
    /// All tracks merged into one delta-timed stream.
    pub events: Vec<TimedEvent>,
    pub tempo_map: TempoMap,
    /// SMF format: 0 (single track) or 1 (parallel tracks).
    pub format: u16,
    pub track_count: u16,
}
