//! Tracking of notes currently sounding on the output.

use log::warn;
use mp_ir::{MidiEvent, NoteKey};

/// One slot per possible (channel, key) pair, so the tracker never fills.
pub const MAX_ACTIVE_NOTES: usize = 16 * 128;

/// A sounding note.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveNote {
    pub key: NoteKey,
    /// Velocity of the most recent note on.
    pub velocity: u8,
    /// Note ons dispatched without a matching note off.
    pub count: u16,
}

/// Fixed-capacity set of sounding notes.
///
/// Updated only from dispatched events and never allocates.
#[derive(Clone, Debug, Default)]
pub struct ActiveNotes {
    notes: heapless::Vec<ActiveNote, MAX_ACTIVE_NOTES>,
}

impl ActiveNotes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from a dispatched event. Events other than note on/off are ignored.
    pub fn track(&mut self, event: &MidiEvent) {
        match (event, event.note_key()) {
            (MidiEvent::NoteOn { velocity, .. }, Some(key)) if event.is_note_on() => {
                self.note_on(key, *velocity)
            }
            (_, Some(key)) if event.is_note_off() => {
                self.note_off(key);
            }
            _ => {}
        }
    }

    /// Record a note on.
    pub fn note_on(&mut self, key: NoteKey, velocity: u8) {
        if let Some(note) = self.notes.iter_mut().find(|n| n.key == key) {
            note.count = note.count.saturating_add(1);
            note.velocity = velocity;
            return;
        }
        let note = ActiveNote { key, velocity, count: 1 };
        if self.notes.push(note).is_err() {
            warn!("Active note table full, dropping {:?}", key);
        }
    }

    /// Record a note off. Returns false if the note was not sounding.
    pub fn note_off(&mut self, key: NoteKey) -> bool {
        let Some(index) = self.notes.iter().position(|n| n.key == key) else {
            return false;
        };
        if self.notes[index].count > 1 {
            self.notes[index].count -= 1;
        } else {
            self.notes.swap_remove(index);
        }
        true
    }

    /// Put back a previously removed note with its original count.
    pub fn restore(&mut self, note: ActiveNote) {
        match self.notes.iter_mut().find(|n| n.key == note.key) {
            Some(existing) => {
                existing.count = existing.count.saturating_add(note.count);
                existing.velocity = note.velocity;
            }
            None => {
                if self.notes.push(note).is_err() {
                    warn!("Active note table full, dropping {:?}", note.key);
                }
            }
        }
    }

    pub fn is_active(&self, key: NoteKey) -> bool {
        self.notes.iter().any(|n| n.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveNote> {
        self.notes.iter()
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}
