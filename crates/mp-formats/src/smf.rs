//! Standard MIDI File parser.

use std::io::{Cursor, ErrorKind, Seek, SeekFrom};

use binrw::BinRead;
use log::debug;
use mp_ir::{data_len, MidiEvent, Tempo, TempoChange, TempoMap, TimeDivision, TimedEvent};

use crate::{FormatError, Song};

const META: u8 = 0xFF;
const SYSEX: u8 = 0xF0;
const SYSEX_ESCAPE: u8 = 0xF7;
const META_TEMPO: u8 = 0x51;
const META_END_OF_TRACK: u8 = 0x2F;

// ---------------------------------------------------------------------------
// Chunk framing
// ---------------------------------------------------------------------------

#[derive(BinRead, Debug)]
#[br(big, magic = b"MThd")]
struct HeaderChunk {
    length: u32,
    format: u16,
    track_count: u16,
    division: u16,
}

#[derive(BinRead, Debug)]
#[br(big)]
struct ChunkHeader {
    id: [u8; 4],
    length: u32,
}

fn map_binrw(err: binrw::Error) -> FormatError {
    match err.root_cause() {
        binrw::Error::BadMagic { .. } => FormatError::InvalidHeader,
        binrw::Error::Io(e) if e.kind() == ErrorKind::UnexpectedEof => FormatError::UnexpectedEof,
        other => FormatError::Chunk(other.to_string()),
    }
}

fn parse_division(raw: u16) -> Result<TimeDivision, FormatError> {
    let division = if raw & 0x8000 != 0 {
        // High byte is the negated frame rate.
        let [fps, ticks_per_frame] = raw.to_be_bytes();
        TimeDivision::Smpte {
            frames_per_second: (fps as i8).unsigned_abs(),
            ticks_per_frame,
        }
    } else {
        TimeDivision::TicksPerQuarter(raw)
    };
    match division {
        TimeDivision::TicksPerQuarter(0)
        | TimeDivision::Smpte { frames_per_second: 0, .. }
        | TimeDivision::Smpte { ticks_per_frame: 0, .. } => Err(FormatError::InvalidHeader),
        _ => Ok(division),
    }
}

// ---------------------------------------------------------------------------
// TrackReader: cursor over one MTrk payload
// ---------------------------------------------------------------------------

struct TrackReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TrackReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_u8(&mut self) -> Result<u8, FormatError> {
        let v = *self.data.get(self.pos).ok_or(FormatError::UnexpectedEof)?;
        self.pos += 1;
        Ok(v)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if self.pos + n > self.data.len() {
            return Err(FormatError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Variable-length quantity: 7 bits per byte, high bit set on all but
    /// the last, at most four bytes.
    fn read_vlq(&mut self) -> Result<u32, FormatError> {
        let mut value: u32 = 0;
        for _ in 0..4 {
            let byte = self.read_u8()?;
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(FormatError::Chunk("variable-length quantity longer than 4 bytes".into()))
    }
}

/// Events and tempo changes of one track, at absolute ticks.
#[derive(Default, Debug)]
struct Track {
    events: Vec<(u64, MidiEvent)>,
    tempo_changes: Vec<TempoChange>,
}

fn parse_track(data: &[u8]) -> Result<Track, FormatError> {
    let mut r = TrackReader::new(data);
    let mut track = Track::default();
    let mut tick: u64 = 0;
    let mut running_status: Option<u8> = None;

    while !r.is_empty() {
        tick += r.read_vlq()? as u64;
        let first = r.read_u8()?;

        match first {
            META => {
                running_status = None;
                let kind = r.read_u8()?;
                let len = r.read_vlq()? as usize;
                let payload = r.read_bytes(len)?;
                match kind {
                    META_TEMPO if len == 3 => {
                        let micros = u32::from_be_bytes([0, payload[0], payload[1], payload[2]]);
                        track
                            .tempo_changes
                            .push(TempoChange::new(tick, Tempo::from_micros_per_quarter(micros)));
                    }
                    META_END_OF_TRACK => break,
                    _ => {}
                }
            }
            SYSEX => {
                running_status = None;
                let len = r.read_vlq()? as usize;
                let payload = r.read_bytes(len)?;
                let mut bytes = Vec::with_capacity(len + 1);
                bytes.push(SYSEX);
                bytes.extend_from_slice(payload);
                track.events.push((tick, MidiEvent::SysEx(bytes)));
            }
            SYSEX_ESCAPE => {
                // Escaped bytes go to the device verbatim.
                running_status = None;
                let len = r.read_vlq()? as usize;
                let payload = r.read_bytes(len)?;
                track.events.push((tick, MidiEvent::SysEx(payload.to_vec())));
            }
            _ => {
                let (status, mut data) = if first & 0x80 != 0 {
                    running_status = Some(first);
                    (first, [0u8; 2])
                } else {
                    let status = running_status.ok_or_else(|| {
                        FormatError::Chunk(format!("data byte {:#04X} without running status", first))
                    })?;
                    (status, [first, 0])
                };
                let needed = data_len(status).unwrap_or(0);
                let have = usize::from(first & 0x80 == 0);
                for slot in data.iter_mut().take(needed).skip(have) {
                    *slot = r.read_u8()?;
                }
                let event = MidiEvent::decode(status, &data[..needed])?;
                track.events.push((tick, event));
            }
        }
    }

    Ok(track)
}

/// Merge tracks by absolute tick. Ties keep track order, then file order.
fn merge_tracks(tracks: Vec<Track>) -> (Vec<TimedEvent>, Vec<TempoChange>) {
    let mut merged: Vec<(u64, MidiEvent)> = Vec::new();
    let mut tempo_changes = Vec::new();
    for track in tracks {
        merged.extend(track.events);
        tempo_changes.extend(track.tempo_changes);
    }
    merged.sort_by_key(|(tick, _)| *tick);

    let mut last = 0;
    let events = merged
        .into_iter()
        .map(|(tick, event)| {
            let delta = tick - last;
            last = tick;
            TimedEvent::new(event, delta)
        })
        .collect();
    (events, tempo_changes)
}

/// Load a Standard MIDI File from bytes.
pub fn load_smf(data: &[u8]) -> Result<Song, FormatError> {
    let mut cursor = Cursor::new(data);
    let header = HeaderChunk::read(&mut cursor).map_err(map_binrw)?;
    if header.length < 6 {
        return Err(FormatError::InvalidHeader);
    }
    if header.format > 1 {
        return Err(FormatError::UnsupportedFormat(header.format));
    }
    let division = parse_division(header.division)?;

    // Skip any header bytes past the fields we know.
    cursor
        .seek(SeekFrom::Start(8 + header.length as u64))
        .map_err(|e| FormatError::Chunk(e.to_string()))?;

    let mut tracks = Vec::with_capacity(header.track_count as usize);
    while tracks.len() < header.track_count as usize {
        let chunk = ChunkHeader::read(&mut cursor).map_err(map_binrw)?;
        let start = cursor.position() as usize;
        let end = start
            .checked_add(chunk.length as usize)
            .filter(|&end| end <= data.len())
            .ok_or(FormatError::UnexpectedEof)?;
        cursor.set_position(end as u64);

        if &chunk.id != b"MTrk" {
            debug!(
                "Skipping unknown chunk '{}' ({} bytes)",
                String::from_utf8_lossy(&chunk.id),
                chunk.length
            );
            continue;
        }
        tracks.push(parse_track(&data[start..end])?);
    }

    let (events, tempo_changes) = merge_tracks(tracks);
    let tempo_map = TempoMap::with_tempo_changes(division, tempo_changes)
        .map_err(|_| FormatError::InvalidHeader)?;
    debug!(
        "Loaded format {} file: {} tracks, {} events, division {:?}",
        header.format,
        header.track_count,
        events.len(),
        division
    );

    Ok(Song {
        events,
        tempo_map,
        format: header.format,
        track_count: header.track_count,
    })
}
