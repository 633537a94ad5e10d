use std::{cell::Cell, fmt, rc::Rc, time::Instant};

use serde::{Deserialize, Serialize};

use crate::{
    timing::{self, BeatInfo, TimeSignature},
    FollowError, Result,
};

/// Monotonic clock read in seconds.
pub trait TimeSource {
    fn now(&self) -> f64;
}

/// Wall clock backed by [`Instant`], zeroed when the source is created.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually driven clock. Clones share the same underlying time so a test (or
/// a simulation loop) can advance every component that reads it at once.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    seconds: Rc<Cell<f64>>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        self.seconds.set(seconds);
    }

    pub fn advance(&self, delta: f64) {
        self.seconds.set((self.seconds.get() + delta).max(0.0));
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> f64 {
        self.seconds.get()
    }
}

/// Snapshot of the clock's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockState {
    pub bpm: f64,
    pub time_signature: TimeSignature,
    pub start_reference: f64,
    pub paused_elapsed: f64,
    pub is_running: bool,
}

/// Tracks elapsed musical time under start/stop/reset.
///
/// Elapsed time is wall time since start minus any paused spans. Changing the
/// tempo only affects how future reads are decomposed into bars and beats;
/// bars already elapsed are not rescaled.
pub struct BeatClock {
    source: Rc<dyn TimeSource>,
    state: ClockState,
}

impl BeatClock {
    pub fn new(source: Rc<dyn TimeSource>, bpm: f64, time_signature: TimeSignature) -> Result<Self> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(FollowError::config(format!(
                "clock tempo must be a positive number of BPM (got {bpm})"
            )));
        }
        time_signature.validate()?;

        Ok(Self {
            source,
            state: ClockState {
                bpm,
                time_signature,
                start_reference: 0.0,
                paused_elapsed: 0.0,
                is_running: false,
            },
        })
    }

    /// Starts or resumes the clock. A no-op while already running.
    pub fn start(&mut self) {
        if self.state.is_running {
            return;
        }
        self.state.start_reference = self.source.now() - self.state.paused_elapsed;
        self.state.is_running = true;
    }

    /// Freezes elapsed time at its current value.
    pub fn stop(&mut self) {
        if !self.state.is_running {
            return;
        }
        self.state.paused_elapsed = self.elapsed();
        self.state.is_running = false;
    }

    /// Back to zero and stopped; tempo and metre are kept.
    pub fn reset(&mut self) {
        self.state.is_running = false;
        self.state.start_reference = 0.0;
        self.state.paused_elapsed = 0.0;
    }

    /// Elapsed musical time in seconds.
    pub fn elapsed(&self) -> f64 {
        if self.state.is_running {
            (self.source.now() - self.state.start_reference).max(0.0)
        } else {
            self.state.paused_elapsed
        }
    }

    pub fn beat_info(&self) -> BeatInfo {
        timing::beat_info(self.elapsed(), self.state.bpm, self.state.time_signature)
    }

    /// Caller validates `bpm > 0`.
    pub fn set_bpm(&mut self, bpm: f64) {
        self.state.bpm = bpm;
    }

    pub fn bpm(&self) -> f64 {
        self.state.bpm
    }

    pub fn set_time_signature(&mut self, time_signature: TimeSignature) {
        self.state.time_signature = time_signature;
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.state.time_signature
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running
    }

    /// Start of `bar_index` in seconds at the current tempo.
    pub fn bar_start_time(&self, bar_index: u32) -> f64 {
        bar_index as f64 * timing::bar_duration(self.state.bpm, self.state.time_signature)
    }

    pub fn state(&self) -> ClockState {
        self.state
    }
}

impl fmt::Debug for BeatClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeatClock")
            .field("state", &self.state)
            .field("elapsed", &self.elapsed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_time_starts_near_zero_and_moves_forward() {
        let time = SystemTimeSource::new();
        let first = time.now();
        let second = time.now();
        assert!(first >= 0.0 && first < 1.0);
        assert!(second >= first);

        let clock = BeatClock::new(Rc::new(time), 120.0, TimeSignature::COMMON).unwrap();
        assert_eq!(clock.elapsed(), 0.0);
    }

    fn clock(bpm: f64) -> (ManualTimeSource, BeatClock) {
        let time = ManualTimeSource::new();
        let clock = BeatClock::new(Rc::new(time.clone()), bpm, TimeSignature::COMMON).unwrap();
        (time, clock)
    }

    #[test]
    fn rejects_non_positive_tempo() {
        let time = Rc::new(ManualTimeSource::new());
        assert!(BeatClock::new(time.clone(), 0.0, TimeSignature::COMMON).is_err());
        assert!(BeatClock::new(time.clone(), -10.0, TimeSignature::COMMON).is_err());
        assert!(BeatClock::new(time.clone(), f64::NAN, TimeSignature::COMMON).is_err());
        assert!(BeatClock::new(time, 120.0, TimeSignature::new(4, 0)).is_err());
    }

    #[test]
    fn elapsed_is_frozen_while_stopped() {
        let (time, mut clock) = clock(120.0);
        time.set(3.0);
        assert_eq!(clock.elapsed(), 0.0);

        clock.start();
        time.advance(1.5);
        assert!((clock.elapsed() - 1.5).abs() < 1e-9);

        clock.stop();
        time.advance(10.0);
        assert!((clock.elapsed() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn resumes_where_it_paused() {
        let (time, mut clock) = clock(120.0);
        clock.start();
        time.advance(2.0);
        clock.stop();
        time.advance(5.0);
        clock.start();
        time.advance(0.25);
        assert!((clock.elapsed() - 2.25).abs() < 1e-9);
    }

    #[test]
    fn start_is_idempotent_while_running() {
        let (time, mut clock) = clock(120.0);
        clock.start();
        time.advance(1.0);
        clock.start();
        time.advance(1.0);
        assert!((clock.elapsed() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn elapsed_never_decreases_while_running() {
        let (time, mut clock) = clock(97.0);
        clock.start();
        let mut last = clock.elapsed();
        for _ in 0..100 {
            time.advance(0.013);
            let now = clock.elapsed();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn reset_keeps_tempo_and_metre() {
        let (time, mut clock) = clock(140.0);
        clock.set_time_signature(TimeSignature::new(3, 4));
        clock.start();
        time.advance(4.0);
        clock.reset();

        assert!(!clock.is_running());
        assert_eq!(clock.elapsed(), 0.0);
        assert_eq!(clock.bpm(), 140.0);
        assert_eq!(clock.time_signature(), TimeSignature::new(3, 4));
    }

    #[test]
    fn tempo_change_keeps_elapsed_continuous() {
        let (time, mut clock) = clock(120.0);
        clock.start();
        time.advance(3.0);
        let before = clock.elapsed();
        assert_eq!(clock.beat_info().total_beats, 6);

        clock.set_bpm(60.0);
        assert!((clock.elapsed() - before).abs() < 1e-12);
        // decomposition uses the new tempo for the whole elapsed span
        assert_eq!(clock.beat_info().total_beats, 3);
    }

    #[test]
    fn bar_start_follows_current_tempo() {
        let (_, mut clock) = clock(120.0);
        assert!((clock.bar_start_time(3) - 6.0).abs() < 1e-9);
        clock.set_bpm(60.0);
        assert!((clock.bar_start_time(3) - 12.0).abs() < 1e-9);
    }
}
