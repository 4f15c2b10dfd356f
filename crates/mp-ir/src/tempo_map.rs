//! Tick to wall-clock conversion.
//!
//! A `TempoMap` is a piecewise-linear mapping from tick position to metric
//! time. Each tempo change starts a new segment; the segment start offsets
//! are cached so conversions are a binary search plus one multiply.

use alloc::vec::Vec;
use core::fmt;
use core::time::Duration;

/// Ticks per quarter note used when a file does not say otherwise.
pub const DEFAULT_TICKS_PER_QUARTER: u16 = 96;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// How ticks relate to time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeDivision {
    /// Musical ticks; the real duration depends on tempo.
    TicksPerQuarter(u16),
    /// Absolute ticks; 29 frames per second means 29.97 drop-frame.
    Smpte { frames_per_second: u8, ticks_per_frame: u8 },
}

impl Default for TimeDivision {
    fn default() -> Self {
        Self::TicksPerQuarter(DEFAULT_TICKS_PER_QUARTER)
    }
}

/// Tempo as microseconds per quarter note.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tempo {
    micros_per_quarter: u32,
}

impl Tempo {
    /// 120 BPM.
    pub const DEFAULT: Self = Self { micros_per_quarter: 500_000 };

    pub const fn from_micros_per_quarter(micros: u32) -> Self {
        Self {
            micros_per_quarter: if micros == 0 { 1 } else { micros },
        }
    }

    /// Tempo from beats per minute, rounded to the nearest microsecond.
    pub fn from_bpm(bpm: f64) -> Self {
        let micros = libm::round(60_000_000.0 / bpm);
        Self::from_micros_per_quarter(micros.clamp(1.0, u32::MAX as f64) as u32)
    }

    pub const fn micros_per_quarter(self) -> u32 {
        self.micros_per_quarter
    }

    pub fn bpm(self) -> f64 {
        60_000_000.0 / self.micros_per_quarter as f64
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A tempo change at an absolute tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TempoChange {
    pub tick: u64,
    pub tempo: Tempo,
}

impl TempoChange {
    pub const fn new(tick: u64, tempo: Tempo) -> Self {
        Self { tick, tempo }
    }
}

/// Conversion failure between ticks and metric time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversionError {
    /// The tick position maps past the representable time range.
    TickOutOfRange { tick: u64 },
    /// The metric time maps past the representable tick range.
    TimeOutOfRange { time: Duration },
    /// Zero ticks per quarter note, frames or ticks per frame.
    InvalidDivision,
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::TickOutOfRange { tick } => {
                write!(f, "Tick {} is out of the representable time range", tick)
            }
            ConversionError::TimeOutOfRange { time } => {
                write!(f, "Time {:?} is out of the representable tick range", time)
            }
            ConversionError::InvalidDivision => write!(f, "Time division must be non-zero"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConversionError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Segment {
    tick: u64,
    tempo: Tempo,
    /// Metric offset of `tick`, in nanoseconds.
    start_nanos: u128,
}

/// Immutable tick <-> metric time mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TempoMap {
    division: TimeDivision,
    /// Sorted by tick; the first segment always starts at tick 0.
    segments: Vec<Segment>,
}

impl TempoMap {
    /// A map with a single default tempo.
    pub fn new(division: TimeDivision) -> Result<Self, ConversionError> {
        Self::with_tempo_changes(division, core::iter::empty())
    }

    /// A map with explicit tempo changes.
    ///
    /// Changes are ordered by tick; when two share a tick the later one wins.
    /// The default tempo applies before the first change.
    pub fn with_tempo_changes(
        division: TimeDivision,
        changes: impl IntoIterator<Item = TempoChange>,
    ) -> Result<Self, ConversionError> {
        validate_division(division)?;

        let mut changes: Vec<TempoChange> = changes.into_iter().collect();
        changes.sort_by_key(|c| c.tick);

        let mut map = Self {
            division,
            segments: Vec::with_capacity(changes.len() + 1),
        };
        map.segments.push(Segment {
            tick: 0,
            tempo: Tempo::DEFAULT,
            start_nanos: 0,
        });

        for change in changes {
            let last = map.segments[map.segments.len() - 1];
            if change.tick == last.tick {
                if let Some(seg) = map.segments.last_mut() {
                    seg.tempo = change.tempo;
                }
                continue;
            }
            let start_nanos = last.start_nanos + map.segment_nanos(&last, change.tick - last.tick);
            map.segments.push(Segment {
                tick: change.tick,
                tempo: change.tempo,
                start_nanos,
            });
        }

        Ok(map)
    }

    pub fn division(&self) -> TimeDivision {
        self.division
    }

    /// Tempo in effect at `tick`.
    pub fn tempo_at(&self, tick: u64) -> Tempo {
        self.segment_for_tick(tick).tempo
    }

    /// All tempo changes, starting with the tempo at tick 0.
    pub fn tempo_changes(&self) -> impl Iterator<Item = TempoChange> + '_ {
        self.segments.iter().map(|s| TempoChange::new(s.tick, s.tempo))
    }

    /// Metric time of an absolute tick position.
    pub fn ticks_to_metric(&self, tick: u64) -> Result<Duration, ConversionError> {
        let seg = self.segment_for_tick(tick);
        let nanos = seg.start_nanos + self.segment_nanos(seg, tick - seg.tick);
        nanos_to_duration(nanos).ok_or(ConversionError::TickOutOfRange { tick })
    }

    /// Absolute tick at a metric time, rounded down.
    pub fn metric_to_ticks(&self, time: Duration) -> Result<u64, ConversionError> {
        let nanos = time.as_nanos();
        let idx = self.segments.partition_point(|s| s.start_nanos <= nanos);
        let seg = &self.segments[idx.saturating_sub(1)];
        let elapsed = nanos - seg.start_nanos;

        let ticks = match self.division {
            TimeDivision::TicksPerQuarter(tpq) => {
                elapsed * tpq as u128
                    / (seg.tempo.micros_per_quarter() as u128 * NANOS_PER_MICRO)
            }
            TimeDivision::Smpte { .. } => {
                let (num, den) = smpte_ticks_per_second(self.division);
                elapsed * num / (NANOS_PER_SECOND * den)
            }
        };

        u64::try_from(ticks)
            .ok()
            .and_then(|t| t.checked_add(seg.tick))
            .ok_or(ConversionError::TimeOutOfRange { time })
    }

    fn segment_for_tick(&self, tick: u64) -> &Segment {
        let idx = self.segments.partition_point(|s| s.tick <= tick);
        &self.segments[idx.saturating_sub(1)]
    }

    /// Nanoseconds spanned by `ticks` ticks inside `seg`.
    fn segment_nanos(&self, seg: &Segment, ticks: u64) -> u128 {
        match self.division {
            TimeDivision::TicksPerQuarter(tpq) => {
                ticks as u128 * seg.tempo.micros_per_quarter() as u128 * NANOS_PER_MICRO
                    / tpq as u128
            }
            TimeDivision::Smpte { .. } => {
                let (num, den) = smpte_ticks_per_second(self.division);
                ticks as u128 * NANOS_PER_SECOND * den / num
            }
        }
    }
}

impl Default for TempoMap {
    fn default() -> Self {
        Self {
            division: TimeDivision::default(),
            segments: alloc::vec![Segment {
                tick: 0,
                tempo: Tempo::DEFAULT,
                start_nanos: 0,
            }],
        }
    }
}

fn validate_division(division: TimeDivision) -> Result<(), ConversionError> {
    let valid = match division {
        TimeDivision::TicksPerQuarter(tpq) => tpq > 0,
        TimeDivision::Smpte { frames_per_second, ticks_per_frame } => {
            frames_per_second > 0 && ticks_per_frame > 0
        }
    };
    if valid {
        Ok(())
    } else {
        Err(ConversionError::InvalidDivision)
    }
}

/// Ticks per second as a (numerator, denominator) pair.
fn smpte_ticks_per_second(division: TimeDivision) -> (u128, u128) {
    match division {
        TimeDivision::Smpte { frames_per_second: 29, ticks_per_frame } => {
            (30_000 * ticks_per_frame as u128, 1_001)
        }
        TimeDivision::Smpte { frames_per_second, ticks_per_frame } => {
            (frames_per_second as u128 * ticks_per_frame as u128, 1)
        }
        TimeDivision::TicksPerQuarter(_) => (1, 1),
    }
}

fn nanos_to_duration(nanos: u128) -> Option<Duration> {
    let secs = u64::try_from(nanos / NANOS_PER_SECOND).ok()?;
    Some(Duration::new(secs, (nanos % NANOS_PER_SECOND) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tpq(n: u16) -> TimeDivision {
        TimeDivision::TicksPerQuarter(n)
    }

    #[test]
    fn default_map_is_120_bpm_at_96_tpq() {
        let map = TempoMap::default();
        assert_eq!(map.division(), tpq(96));
        assert_eq!(map.ticks_to_metric(96).unwrap(), Duration::from_millis(500));
        assert_eq!(map.metric_to_ticks(Duration::from_secs(1)).unwrap(), 192);
    }

    #[test]
    fn zero_division_is_rejected() {
        assert_eq!(TempoMap::new(tpq(0)), Err(ConversionError::InvalidDivision));
        let smpte = TimeDivision::Smpte { frames_per_second: 25, ticks_per_frame: 0 };
        assert_eq!(TempoMap::new(smpte), Err(ConversionError::InvalidDivision));
    }

    #[test]
    fn tempo_change_splits_segments() {
        // 120 BPM for one quarter, then 60 BPM.
        let map = TempoMap::with_tempo_changes(
            tpq(100),
            [TempoChange::new(100, Tempo::from_bpm(60.0))],
        )
        .unwrap();

        assert_eq!(map.ticks_to_metric(100).unwrap(), Duration::from_millis(500));
        assert_eq!(map.ticks_to_metric(200).unwrap(), Duration::from_millis(1500));
        assert_eq!(map.metric_to_ticks(Duration::from_millis(1500)).unwrap(), 200);
        assert_eq!(map.tempo_at(150), Tempo::from_bpm(60.0));
        assert_eq!(map.tempo_at(50), Tempo::DEFAULT);
    }

    #[test]
    fn later_change_at_same_tick_wins() {
        let map = TempoMap::with_tempo_changes(
            tpq(96),
            [
                TempoChange::new(0, Tempo::from_bpm(60.0)),
                TempoChange::new(0, Tempo::from_bpm(240.0)),
            ],
        )
        .unwrap();
        assert_eq!(map.tempo_changes().count(), 1);
        assert_eq!(map.ticks_to_metric(96).unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn conversion_is_monotonic_across_changes() {
        let map = TempoMap::with_tempo_changes(
            tpq(7),
            [
                TempoChange::new(5, Tempo::from_micros_per_quarter(333_333)),
                TempoChange::new(11, Tempo::from_micros_per_quarter(1_234_567)),
            ],
        )
        .unwrap();

        let mut previous = Duration::ZERO;
        for tick in 0..40 {
            let time = map.ticks_to_metric(tick).unwrap();
            assert!(time >= previous, "tick {} went backwards", tick);
            assert!(map.metric_to_ticks(time).unwrap() <= tick);
            previous = time;
        }
    }

    #[test]
    fn smpte_is_tempo_independent() {
        let division = TimeDivision::Smpte { frames_per_second: 25, ticks_per_frame: 40 };
        let map = TempoMap::with_tempo_changes(
            division,
            [TempoChange::new(10, Tempo::from_bpm(30.0))],
        )
        .unwrap();
        assert_eq!(map.ticks_to_metric(1000).unwrap(), Duration::from_secs(1));
        assert_eq!(map.metric_to_ticks(Duration::from_secs(2)).unwrap(), 2000);
    }

    #[test]
    fn huge_tick_is_out_of_range() {
        let map = TempoMap::with_tempo_changes(
            tpq(1),
            [TempoChange::new(0, Tempo::from_micros_per_quarter(u32::MAX))],
        )
        .unwrap();
        assert_eq!(
            map.ticks_to_metric(u64::MAX),
            Err(ConversionError::TickOutOfRange { tick: u64::MAX })
        );
    }

    #[test]
    fn bpm_round_trip() {
        let tempo = Tempo::from_bpm(140.0);
        assert_eq!(tempo.micros_per_quarter(), 428_571);
        assert!((tempo.bpm() - 140.0).abs() < 0.001);
    }
}
