//! Core types for midiplay.
//!
//! Defines the decoded MIDI event model and the tempo map that converts
//! tick positions to metric time. Format readers emit these types and the
//! playback engine consumes them.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod event;
mod tempo_map;
mod time_span;

pub use event::{
    data_len, Channel, ChannelMessage, ChannelMessageKind, DecodeError, MessageBytes, MidiEvent,
    NoteKey, TimedEvent,
};
pub use tempo_map::{
    ConversionError, Tempo, TempoChange, TempoMap, TimeDivision, DEFAULT_TICKS_PER_QUARTER,
};
pub use time_span::{TimeSpan, TimeUnit};
