//! Playback-rate control: maps a target tempo onto a clamped, smoothed rate
//! and the pitch shift that cancels the rate's effect on pitch.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    audio::AudioOutput, config::FollowConfig, timeline::BeatClock, timing::lerp, FollowError,
    Result,
};

/// Semitones needed to cancel the pitch change caused by playing at `rate`.
/// Doubling the rate raises pitch an octave, so the shift is `-12 * log2(rate)`.
pub fn compensating_pitch_shift(rate: f64) -> f64 {
    -12.0 * rate.log2()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateState {
    pub current_rate: f64,
    pub base_bpm: f64,
    pub pitch_shift_semitones: f64,
}

/// Outcome of one [`PlaybackRateController::apply`] step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateChange {
    pub target_bpm: f64,
    /// Target rate after clamping to the configured range.
    pub target_rate: f64,
    pub rate: f64,
    /// Tempo heard at `rate`, pushed into the beat clock.
    pub bpm: f64,
    /// `None` when pitch compensation is off.
    pub pitch_shift_semitones: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PlaybackRateController {
    min_rate: f64,
    max_rate: f64,
    adapt_speed: f64,
    pitch_compensation: bool,
    state: RateState,
}

impl PlaybackRateController {
    pub fn new(base_bpm: f64, config: &FollowConfig) -> Result<Self> {
        if !(base_bpm.is_finite() && base_bpm > 0.0) {
            return Err(FollowError::config(format!(
                "base tempo must be positive (got {base_bpm})"
            )));
        }
        config.validate()?;

        Ok(Self {
            min_rate: config.min_rate(),
            max_rate: config.max_rate(),
            adapt_speed: config.effective_adapt_speed(),
            pitch_compensation: config.pitch_compensation,
            state: RateState {
                current_rate: 1.0,
                base_bpm,
                pitch_shift_semitones: 0.0,
            },
        })
    }

    /// Moves the rate one `adapt_speed` step towards `target_bpm / base_bpm`
    /// and applies it to `output` and `clock`.
    pub fn apply<D>(&mut self, target_bpm: f64, output: &mut D, clock: &mut BeatClock) -> RateChange
    where
        D: AudioOutput + ?Sized,
    {
        let target_rate = self.clamp_rate(target_bpm / self.state.base_bpm);
        let rate = self.clamp_rate(lerp(self.state.current_rate, target_rate, self.adapt_speed));
        let pitch_shift_semitones = self.push(rate, output, clock);
        let bpm = clock.bpm();

        debug!(target_bpm, rate, actual_bpm = bpm, "playback rate adjusted");

        RateChange {
            target_bpm,
            target_rate,
            rate,
            bpm,
            pitch_shift_semitones,
        }
    }

    /// Unity rate, no pitch shift, clock back on the base tempo.
    pub fn reset<D>(&mut self, output: &mut D, clock: &mut BeatClock)
    where
        D: AudioOutput + ?Sized,
    {
        self.push(1.0, output, clock);
    }

    /// Picks up new bounds and settings. The current rate is not touched
    /// until [`PlaybackRateController::resync`] or the next `apply`.
    pub fn reconfigure(&mut self, config: &FollowConfig) {
        self.min_rate = config.min_rate();
        self.max_rate = config.max_rate();
        self.adapt_speed = config.effective_adapt_speed();
        self.pitch_compensation = config.pitch_compensation;
    }

    /// Clamps the current rate into the configured bounds and pushes it, with
    /// its pitch shift, to `output` and `clock` again.
    pub fn resync<D>(&mut self, output: &mut D, clock: &mut BeatClock) -> RateState
    where
        D: AudioOutput + ?Sized,
    {
        let rate = self.clamp_rate(self.state.current_rate);
        self.push(rate, output, clock);
        self.state
    }
    pub fn state(&self) -> RateState {
        self.state
    }

    pub fn current_rate(&self) -> f64 {
        self.state.current_rate
    }

    pub fn rate_bounds(&self) -> (f64, f64) {
        (self.min_rate, self.max_rate)
    }

    /// Sets `rate` on the device and the clock. A shift left on the device
    /// from before compensation was turned off is cleared.
    fn push<D>(&mut self, rate: f64, output: &mut D, clock: &mut BeatClock) -> Option<f64>
    where
        D: AudioOutput + ?Sized,
    {
        self.state.current_rate = rate;
        output.set_playback_rate(rate);

        let shift = if self.pitch_compensation {
            // + 0.0 keeps unity at +0 rather than -0
            let shift = compensating_pitch_shift(rate) + 0.0;
            output.set_pitch_shift(shift);
            Some(shift)
        } else {
            if self.state.pitch_shift_semitones != 0.0 {
                output.set_pitch_shift(0.0);
            }
            None
        };
        self.state.pitch_shift_semitones = shift.unwrap_or(0.0);

        clock.set_bpm(self.state.base_bpm * rate);
        shift
    }

    fn clamp_rate(&self, rate: f64) -> f64 {
        if rate.is_nan() {
            return self.state.current_rate;
        }
        rate.clamp(self.min_rate, self.max_rate)
    }
}
