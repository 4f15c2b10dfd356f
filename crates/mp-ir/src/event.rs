//! MIDI events as seen by the playback engine.
//!
//! Only the categories playback needs to tell apart get their own variant:
//! note on, note off, and everything else kept opaque.

use alloc::vec::Vec;
use arrayvec::ArrayVec;
use core::fmt;

/// A MIDI channel (0-15).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel(u8);

impl Channel {
    /// Create a channel, rejecting values above 15.
    pub const fn new(value: u8) -> Option<Self> {
        if value < 16 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Take the channel from the low nibble of a status byte.
    pub const fn from_status(status: u8) -> Self {
        Self(status & 0x0F)
    }

    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a sounding note.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NoteKey {
    pub channel: Channel,
    pub key: u8,
}

impl NoteKey {
    pub const fn new(channel: Channel, key: u8) -> Self {
        Self { channel, key }
    }
}

/// Channel voice messages the engine passes through untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelMessageKind {
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
}

impl ChannelMessageKind {
    /// Resolve the high nibble of a status byte.
    fn from_head(head: u8) -> Option<Self> {
        match head {
            0xA => Some(Self::PolyPressure),
            0xB => Some(Self::ControlChange),
            0xC => Some(Self::ProgramChange),
            0xD => Some(Self::ChannelPressure),
            0xE => Some(Self::PitchBend),
            _ => None,
        }
    }

    const fn head(self) -> u8 {
        match self {
            Self::PolyPressure => 0xA,
            Self::ControlChange => 0xB,
            Self::ProgramChange => 0xC,
            Self::ChannelPressure => 0xD,
            Self::PitchBend => 0xE,
        }
    }

    /// Number of data bytes following the status byte.
    pub const fn data_len(self) -> usize {
        match self {
            Self::ProgramChange | Self::ChannelPressure => 1,
            _ => 2,
        }
    }
}

/// An opaque channel voice message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelMessage {
    pub kind: ChannelMessageKind,
    pub channel: Channel,
    /// Data bytes; the second is unused for one-byte messages.
    pub data: [u8; 2],
}

impl ChannelMessage {
    pub fn status(&self) -> u8 {
        (self.kind.head() << 4) | self.channel.index()
    }
}

/// A decoded MIDI event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: Channel, key: u8, velocity: u8 },
    NoteOff { channel: Channel, key: u8, velocity: u8 },
    Channel(ChannelMessage),
    /// Complete system exclusive message, including the leading 0xF0.
    SysEx(Vec<u8>),
}

impl MidiEvent {
    pub const fn note_on(channel: Channel, key: u8, velocity: u8) -> Self {
        Self::NoteOn { channel, key, velocity }
    }

    pub const fn note_off(channel: Channel, key: u8, velocity: u8) -> Self {
        Self::NoteOff { channel, key, velocity }
    }

    /// Decode a channel event from its status byte and data bytes.
    ///
    /// The high nibble selects the message type and the low nibble the
    /// channel. Data bytes are masked to 7 bits.
    pub fn decode(status: u8, data: &[u8]) -> Result<Self, DecodeError> {
        let head = status >> 4;
        let channel = Channel::from_status(status);
        let expected = data_len(status).ok_or(DecodeError::UnknownChannelEvent {
            status: head,
            channel,
        })?;
        if data.len() < expected {
            return Err(DecodeError::MissingData {
                status,
                expected,
                found: data.len(),
            });
        }

        let d0 = data[0] & 0x7F;
        let d1 = if expected > 1 { data[1] & 0x7F } else { 0 };

        let event = match head {
            0x8 => Self::NoteOff { channel, key: d0, velocity: d1 },
            0x9 => Self::NoteOn { channel, key: d0, velocity: d1 },
            other => match ChannelMessageKind::from_head(other) {
                Some(kind) => Self::Channel(ChannelMessage {
                    kind,
                    channel,
                    data: [d0, d1],
                }),
                None => return Err(DecodeError::UnknownChannelEvent { status: head, channel }),
            },
        };
        Ok(event)
    }

    /// Note identity for note on/off events.
    pub fn note_key(&self) -> Option<NoteKey> {
        match *self {
            Self::NoteOn { channel, key, .. } | Self::NoteOff { channel, key, .. } => {
                Some(NoteKey::new(channel, key))
            }
            _ => None,
        }
    }

    /// True for a note on that actually starts a note (velocity > 0).
    pub fn is_note_on(&self) -> bool {
        matches!(self, Self::NoteOn { velocity, .. } if *velocity > 0)
    }

    /// True for note off, including note on with velocity 0.
    pub fn is_note_off(&self) -> bool {
        matches!(
            self,
            Self::NoteOff { .. } | Self::NoteOn { velocity: 0, .. }
        )
    }

    /// Encode to wire bytes. Short messages do not allocate.
    pub fn to_bytes(&self) -> MessageBytes<'_> {
        let mut short = ArrayVec::new();
        match self {
            Self::NoteOn { channel, key, velocity } => {
                short.push(0x90 | channel.index());
                short.push(*key & 0x7F);
                short.push(*velocity & 0x7F);
            }
            Self::NoteOff { channel, key, velocity } => {
                short.push(0x80 | channel.index());
                short.push(*key & 0x7F);
                short.push(*velocity & 0x7F);
            }
            Self::Channel(msg) => {
                short.push(msg.status());
                short.push(msg.data[0]);
                if msg.kind.data_len() > 1 {
                    short.push(msg.data[1]);
                }
            }
            Self::SysEx(bytes) => return MessageBytes::Long(bytes),
        }
        MessageBytes::Short(short)
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoteOn { channel, key, velocity } => {
                write!(f, "Note On [{}] ({}, {})", channel, key, velocity)
            }
            Self::NoteOff { channel, key, velocity } => {
                write!(f, "Note Off [{}] ({}, {})", channel, key, velocity)
            }
            Self::Channel(msg) => write!(
                f,
                "{:?} [{}] ({}, {})",
                msg.kind, msg.channel, msg.data[0], msg.data[1]
            ),
            Self::SysEx(bytes) => write!(f, "SysEx ({} bytes)", bytes.len()),
        }
    }
}

/// Expected number of data bytes for a channel status byte, or `None`
/// if the byte is not a channel voice status.
pub fn data_len(status: u8) -> Option<usize> {
    match status >> 4 {
        0x8 | 0x9 => Some(2),
        head => ChannelMessageKind::from_head(head).map(ChannelMessageKind::data_len),
    }
}

/// Wire form of an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBytes<'a> {
    Short(ArrayVec<u8, 3>),
    Long(&'a [u8]),
}

impl AsRef<[u8]> for MessageBytes<'_> {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Short(bytes) => bytes,
            Self::Long(bytes) => bytes,
        }
    }
}

/// An event paired with the ticks elapsed since the previous event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedEvent {
    pub event: MidiEvent,
    pub delta: u64,
}

impl TimedEvent {
    pub fn new(event: MidiEvent, delta: u64) -> Self {
        Self { event, delta }
    }
}

/// Failure to decode a channel event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Status nibble does not name a channel voice message.
    UnknownChannelEvent { status: u8, channel: Channel },
    /// Fewer data bytes than the message type requires.
    MissingData { status: u8, expected: usize, found: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownChannelEvent { status, channel } => write!(
                f,
                "Unknown channel event (status {:#X}, channel {})",
                status, channel
            ),
            DecodeError::MissingData { status, expected, found } => write!(
                f,
                "Status {:#04X} needs {} data bytes, got {}",
                status, expected, found
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}
