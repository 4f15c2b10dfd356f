//! Playback clock: maps wall-clock instants to musical position.
//!
//! While running, position is `elapsed + (now - origin) * speed`. Every
//! change (stop, speed, rewind) first folds the running span into
//! `elapsed` and re-anchors `origin`, so position stays continuous.
//!
//! Scaling saturates at `Duration::MAX` instead of panicking, so any finite
//! positive speed is safe.

use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub(crate) struct Transport {
    running: bool,
    speed: f64,
    /// Musical time accumulated before `origin`.
    elapsed: Duration,
    /// Wall-clock anchor of the current running span.
    origin: Option<Instant>,
    /// Added to table times on each loop wrap.
    loop_offset: Duration,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            running: false,
            speed: 1.0,
            elapsed: Duration::ZERO,
            origin: None,
            loop_offset: Duration::ZERO,
        }
    }
}

impl Transport {
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn loop_offset(&self) -> Duration {
        self.loop_offset
    }

    /// Musical position at `now`.
    pub fn position(&self, now: Instant) -> Duration {
        match self.origin {
            Some(origin) if self.running => {
                let span = now.saturating_duration_since(origin);
                self.elapsed.saturating_add(scale(span, self.speed))
            }
            _ => self.elapsed,
        }
    }

    pub fn start(&mut self, now: Instant) {
        if self.running {
            return;
        }
        self.running = true;
        self.origin = Some(now);
    }

    /// Freeze position at `now`.
    pub fn stop(&mut self, now: Instant) {
        self.elapsed = self.position(now);
        self.origin = None;
        self.running = false;
    }

    /// Change speed without moving the current position.
    pub fn set_speed(&mut self, speed: f64, now: Instant) {
        self.rebase(now);
        self.speed = speed;
    }

    /// Back to zero, keeping the run state.
    pub fn rewind(&mut self, now: Instant) {
        self.elapsed = Duration::ZERO;
        self.loop_offset = Duration::ZERO;
        self.origin = self.running.then_some(now);
    }

    /// Shift table times by one more pass.
    pub fn wrap(&mut self, pass: Duration) {
        self.loop_offset = self.loop_offset.saturating_add(pass);
    }

    /// Wall-clock time until musical position `due`, or `None` if already reached.
    pub fn wait_until(&self, due: Duration, now: Instant) -> Option<Duration> {
        let position = self.position(now);
        if position >= due {
            return None;
        }
        Some(scale(due - position, self.speed.recip()))
    }

    fn rebase(&mut self, now: Instant) {
        if self.running {
            self.elapsed = self.position(now);
            self.origin = Some(now);
        }
    }
}

fn scale(span: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(span.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}
