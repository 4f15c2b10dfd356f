//! End-to-end playback: SMF bytes through the controller to a recording device.

use std::time::{Duration, Instant};

use mp_device::RecordingOutput;
use mp_engine::NoteStopPolicy;
use mp_ir::{Channel, MidiEvent, TimeSpan, TimeUnit};
use mp_master::Controller;

const TOLERANCE: Duration = Duration::from_millis(40);

fn vlq(mut value: u32) -> Vec<u8> {
    let mut out = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        out.insert(0, (value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    out
}

/// Format 1 file, 96 ticks per quarter. Track 0 sets the tempo, track 1
/// holds `(tick, status, data1, data2)` channel events.
fn smf(micros_per_quarter: u32, notes: &[(u32, u8, u8, u8)]) -> Vec<u8> {
    let mut conductor = vec![0x00, 0xFF, 0x51, 0x03];
    conductor.extend_from_slice(&micros_per_quarter.to_be_bytes()[1..]);
    conductor.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);

    let mut track = Vec::new();
    let mut last = 0;
    for &(tick, status, d1, d2) in notes {
        track.extend(vlq(tick - last));
        track.extend_from_slice(&[status, d1, d2]);
        last = tick;
    }
    track.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);

    let mut data = b"MThd".to_vec();
    data.extend_from_slice(&[0, 0, 0, 6, 0, 1, 0, 2, 0, 96]);
    for body in [conductor, track] {
        data.extend_from_slice(b"MTrk");
        data.extend_from_slice(&(body.len() as u32).to_be_bytes());
        data.extend(body);
    }
    data
}

#[track_caller]
fn assert_near(actual: Duration, expected: Duration) {
    let diff = if actual > expected { actual - expected } else { expected - actual };
    assert!(diff <= TOLERANCE, "expected {:?}, got {:?}", expected, actual);
}

#[test]
fn file_plays_in_order_at_tempo() {
    // 96 000 us per quarter: one tick per millisecond.
    let data = smf(96_000, &[(0, 0x90, 60, 100), (100, 0x80, 60, 0), (150, 0x91, 64, 90), (250, 0x81, 64, 0)]);
    let recorder = RecordingOutput::new();
    let mut ctrl = Controller::with_output(recorder.clone());
    ctrl.load(&data).unwrap();
    assert_eq!(ctrl.duration(), Some(Duration::from_millis(250)));

    let begin = Instant::now();
    ctrl.play().unwrap();

    let events = recorder.events();
    let ch1 = Channel::new(1).unwrap();
    assert_eq!(events.len(), 4);
    assert_eq!(events[2].event, MidiEvent::note_on(ch1, 64, 90));
    for (event, expected) in events.iter().zip([0, 100, 150, 250]) {
        assert_near(event.at.duration_since(begin), Duration::from_millis(expected));
    }
}

#[test]
fn position_reports_ticks() {
    let data = smf(96_000, &[(0, 0x90, 60, 100), (2000, 0x80, 60, 0)]);
    let mut ctrl = Controller::with_output(RecordingOutput::new());
    ctrl.load(&data).unwrap();

    ctrl.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    ctrl.stop().unwrap();

    let millis = ctrl.position().unwrap();
    match ctrl.position_as(TimeUnit::Ticks).unwrap() {
        TimeSpan::Ticks(ticks) => assert_eq!(ticks, millis.as_millis() as u64),
        other => panic!("expected ticks, got {:?}", other),
    }
    assert_near(millis, Duration::from_millis(100));
}

#[test]
fn split_policy_through_the_controller() {
    let data = smf(96_000, &[(0, 0x90, 60, 100), (300, 0x80, 60, 0)]);
    let recorder = RecordingOutput::new();
    let mut ctrl = Controller::with_output(recorder.clone());
    ctrl.set_note_stop_policy(NoteStopPolicy::Split).unwrap();
    ctrl.load(&data).unwrap();

    ctrl.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    ctrl.stop().unwrap();
    ctrl.play().unwrap();

    let ch = Channel::default();
    let sent: Vec<MidiEvent> = recorder.events().into_iter().map(|e| e.event).collect();
    assert_eq!(
        sent,
        vec![
            MidiEvent::note_on(ch, 60, 100),
            MidiEvent::note_off(ch, 60, 0),
            MidiEvent::note_on(ch, 60, 100),
            MidiEvent::note_off(ch, 60, 0),
        ]
    );
}
