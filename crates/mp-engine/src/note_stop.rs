//! What happens to sounding notes when playback stops and resumes.

use core::fmt;
use core::str::FromStr;

use log::{debug, warn};
use mp_device::{DeviceError, OutputDevice};
use mp_ir::MidiEvent;

use crate::active_notes::{ActiveNote, ActiveNotes, MAX_ACTIVE_NOTES};
use crate::error::UnknownPolicy;

/// Notes silenced by [`NoteStopPolicy::Split`], re-triggered on resume.
pub type PendingNotes = heapless::Vec<ActiveNote, MAX_ACTIVE_NOTES>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NoteStopPolicy {
    /// Release every sounding note on stop; resume starts clean.
    #[default]
    Interrupt,
    /// Leave notes sounding through the pause.
    Hold,
    /// Release on stop, strike the same notes again on resume.
    Split,
}

impl NoteStopPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "interrupt",
            Self::Hold => "hold",
            Self::Split => "split",
        }
    }
}

impl fmt::Display for NoteStopPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoteStopPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interrupt" => Ok(Self::Interrupt),
            "hold" => Ok(Self::Hold),
            "split" => Ok(Self::Split),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

/// Apply `policy` to the sounding notes at a stop.
///
/// Every note-off is attempted even if one fails; the first failure is
/// returned. The tracker is cleared for `Interrupt` and `Split` regardless.
pub fn on_stop<D: OutputDevice + ?Sized>(
    policy: NoteStopPolicy,
    notes: &mut ActiveNotes,
    pending: &mut PendingNotes,
    output: &mut D,
) -> Result<(), DeviceError> {
    if policy == NoteStopPolicy::Hold || notes.is_empty() {
        return Ok(());
    }
    debug!("Releasing {} sounding notes ({})", notes.len(), policy);

    let mut result = Ok(());
    for note in notes.iter() {
        let off = MidiEvent::note_off(note.key.channel, note.key.key, 0);
        if let Err(e) = output.send(&off) {
            if result.is_ok() {
                result = Err(e);
            }
        }
        if policy == NoteStopPolicy::Split && pending.iter().all(|p| p.key != note.key) {
            if pending.push(*note).is_err() {
                warn!("Split note table full, dropping {:?}", note.key);
            }
        }
    }
    notes.clear();
    result
}

/// Re-strike notes remembered by a split stop, before any scheduled event.
///
/// Re-struck notes go back into the tracker so a later stop sees them.
pub fn on_resume<D: OutputDevice + ?Sized>(
    pending: &mut PendingNotes,
    notes: &mut ActiveNotes,
    output: &mut D,
) -> Result<(), DeviceError> {
    if pending.is_empty() {
        return Ok(());
    }
    debug!("Re-triggering {} split notes", pending.len());

    let mut result = Ok(());
    for note in pending.iter() {
        let on = MidiEvent::note_on(note.key.channel, note.key.key, note.velocity);
        match output.send(&on) {
            Ok(()) => notes.restore(*note),
            Err(e) => {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
    }
    pending.clear();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use mp_device::RecordingOutput;
    use mp_ir::{Channel, NoteKey};

    fn key(k: u8) -> NoteKey {
        NoteKey::new(Channel::new(2).unwrap(), k)
    }

    fn sounding(keys: &[u8]) -> ActiveNotes {
        let mut notes = ActiveNotes::new();
        for &k in keys {
            notes.note_on(key(k), 90);
        }
        notes
    }

    fn sent(recorder: &RecordingOutput) -> Vec<MidiEvent> {
        recorder.events().into_iter().map(|e| e.event).collect()
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!("interrupt".parse(), Ok(NoteStopPolicy::Interrupt));
        assert_eq!(" Hold ".parse(), Ok(NoteStopPolicy::Hold));
        assert_eq!("SPLIT".parse(), Ok(NoteStopPolicy::Split));
        assert_eq!(
            "legato".parse::<NoteStopPolicy>(),
            Err(UnknownPolicy("legato".into()))
        );
        assert_eq!(NoteStopPolicy::default(), NoteStopPolicy::Interrupt);
    }

    #[test]
    fn interrupt_releases_and_forgets() {
        let recorder = RecordingOutput::new();
        let mut device = recorder.clone();
        let mut notes = sounding(&[60, 64]);
        let mut pending = PendingNotes::new();

        on_stop(NoteStopPolicy::Interrupt, &mut notes, &mut pending, &mut device).unwrap();

        let events = sent(&recorder);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.is_note_off()));
        assert!(notes.is_empty());
        assert!(pending.is_empty());
    }

    #[test]
    fn hold_sends_nothing() {
        let recorder = RecordingOutput::new();
        let mut device = recorder.clone();
        let mut notes = sounding(&[60]);
        let mut pending = PendingNotes::new();

        on_stop(NoteStopPolicy::Hold, &mut notes, &mut pending, &mut device).unwrap();
        on_resume(&mut pending, &mut notes, &mut device).unwrap();

        assert!(recorder.is_empty());
        assert!(notes.is_active(key(60)));
    }

    #[test]
    fn split_releases_then_restrikes() {
        let recorder = RecordingOutput::new();
        let mut device = recorder.clone();
        let mut notes = sounding(&[60]);
        let mut pending = PendingNotes::new();

        on_stop(NoteStopPolicy::Split, &mut notes, &mut pending, &mut device).unwrap();
        assert!(notes.is_empty());
        assert_eq!(pending.len(), 1);

        on_resume(&mut pending, &mut notes, &mut device).unwrap();
        assert!(pending.is_empty());
        assert!(notes.is_active(key(60)));

        let ch = Channel::new(2).unwrap();
        assert_eq!(
            sent(&recorder),
            vec![MidiEvent::note_off(ch, 60, 0), MidiEvent::note_on(ch, 60, 90)]
        );
    }

    #[test]
    fn failures_do_not_stop_the_release() {
        let recorder = RecordingOutput::new();
        let mut device = recorder.clone();
        let mut notes = sounding(&[60, 62, 64]);
        let mut pending = PendingNotes::new();
        recorder.fail_next(1);

        let err = on_stop(NoteStopPolicy::Interrupt, &mut notes, &mut pending, &mut device);
        assert!(matches!(err, Err(DeviceError::Send(_))));
        assert_eq!(recorder.len(), 2);
        assert!(notes.is_empty());
    }
}
