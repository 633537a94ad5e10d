//! Pure timing math: beat and bar durations, grid quantisation, deviation and
//! judgement classification. Nothing in here holds state.

use serde::{Deserialize, Serialize};

use crate::{FollowError, Result};

/// Musical metre as (beats per bar, beat unit), e.g. 4/4 or 6/8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub beats_per_bar: u32,
    pub beat_unit: u32,
}

impl TimeSignature {
    pub const COMMON: TimeSignature = TimeSignature::new(4, 4);

    pub const fn new(beats_per_bar: u32, beat_unit: u32) -> Self {
        Self {
            beats_per_bar,
            beat_unit,
        }
    }

    /// Both components must be non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.beats_per_bar == 0 || self.beat_unit == 0 {
            return Err(FollowError::config(format!(
                "time signature {}/{} is not valid",
                self.beats_per_bar, self.beat_unit
            )));
        }
        Ok(())
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::COMMON
    }
}

/// Classification of a tap relative to the nearest grid line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Judgement {
    Perfect,
    Good,
    Early,
    Late,
    Miss,
}

/// Millisecond thresholds used by [`judge`]. Each window is inclusive and the
/// three bounds are strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JudgementWindow {
    pub perfect_ms: f64,
    pub good_ms: f64,
    pub ok_ms: f64,
}

impl JudgementWindow {
    pub fn new(perfect_ms: f64, good_ms: f64, ok_ms: f64) -> Result<Self> {
        if !(perfect_ms > 0.0 && perfect_ms < good_ms && good_ms < ok_ms) {
            return Err(FollowError::config(format!(
                "judgement windows must be positive and strictly increasing \
                 (got {perfect_ms}/{good_ms}/{ok_ms} ms)"
            )));
        }
        Ok(Self {
            perfect_ms,
            good_ms,
            ok_ms,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Normal,
    Hard,
}

impl Difficulty {
    pub fn window(self) -> JudgementWindow {
        let (perfect_ms, good_ms, ok_ms) = match self {
            Difficulty::Easy => (100.0, 200.0, 300.0),
            Difficulty::Normal => (60.0, 120.0, 200.0),
            Difficulty::Hard => (40.0, 80.0, 120.0),
        };
        JudgementWindow {
            perfect_ms,
            good_ms,
            ok_ms,
        }
    }
}

/// Position of a point in time expressed in bars, beats and sub-beat phase.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BeatInfo {
    /// Zero-based bar index.
    pub bar: i64,
    /// Zero-based beat within the bar.
    pub beat: u32,
    /// Progress through the current beat in `[0, 1)`.
    pub phase: f64,
    pub total_beats: i64,
}

/// Length of one beat in seconds. The beat unit scales a quarter note, so
/// 6/8 at 120 BPM yields 0.25 s beats.
pub fn beat_duration(bpm: f64, time_signature: TimeSignature) -> f64 {
    (60.0 / bpm) * (4.0 / time_signature.beat_unit as f64)
}

pub fn bar_duration(bpm: f64, time_signature: TimeSignature) -> f64 {
    beat_duration(bpm, time_signature) * time_signature.beats_per_bar as f64
}

/// Rounds `time_sec` to the nearest multiple of `beat_duration * grid`.
///
/// Ties are broken with round-half-up (`floor(x + 0.5)`): a time exactly half
/// way between two grid lines snaps to the later one. Applying the function to
/// its own output returns the same value.
pub fn quantize_to_beat(time_sec: f64, bpm: f64, time_signature: TimeSignature, grid: f64) -> f64 {
    let grid_duration = beat_duration(bpm, time_signature) * grid;
    let index = (time_sec / grid_duration + 0.5).floor();
    index * grid_duration
}

/// Signed distance from the nearest grid line in milliseconds. Positive means
/// the tap landed after the beat (late), negative before it (early).
pub fn deviation_ms(tap_time_sec: f64, bpm: f64, time_signature: TimeSignature, grid: f64) -> f64 {
    let nearest = quantize_to_beat(tap_time_sec, bpm, time_signature, grid);
    (tap_time_sec - nearest) * 1000.0
}

/// Classifies a deviation. Exact threshold values fall into the tighter window.
pub fn judge(deviation_ms: f64, window: &JudgementWindow) -> Judgement {
    let magnitude = deviation_ms.abs();
    if magnitude <= window.perfect_ms {
        Judgement::Perfect
    } else if magnitude <= window.good_ms {
        Judgement::Good
    } else if magnitude <= window.ok_ms {
        if deviation_ms > 0.0 {
            Judgement::Late
        } else {
            Judgement::Early
        }
    } else {
        Judgement::Miss
    }
}

/// Deviation plus judgement in one call, using the preset window for `difficulty`.
pub fn evaluate_tap(
    tap_time_sec: f64,
    bpm: f64,
    time_signature: TimeSignature,
    difficulty: Difficulty,
    grid: f64,
) -> (Judgement, f64) {
    let deviation = deviation_ms(tap_time_sec, bpm, time_signature, grid);
    (judge(deviation, &difficulty.window()), deviation)
}

/// Splits `now_sec` into whole beats first and derives bar and beat from that
/// count, so `bar * beats_per_bar + beat == total_beats` always holds.
pub fn beat_info(now_sec: f64, bpm: f64, time_signature: TimeSignature) -> BeatInfo {
    let position = now_sec / beat_duration(bpm, time_signature);
    let whole = position.floor();
    let total_beats = whole as i64;
    let beats_per_bar = i64::from(time_signature.beats_per_bar.max(1));

    let phase = position - whole;

    BeatInfo {
        bar: total_beats.div_euclid(beats_per_bar),
        beat: total_beats.rem_euclid(beats_per_bar) as u32,
        phase: if (0.0..1.0).contains(&phase) { phase } else { 0.0 },
        total_beats,
    }
}

pub fn time_to_next_beat_ms(now_sec: f64, bpm: f64, time_signature: TimeSignature) -> f64 {
    let beat_len = beat_duration(bpm, time_signature);
    let position = now_sec / beat_len;
    (position.floor() + 1.0 - position) * beat_len * 1000.0
}

/// Linear interpolation from `a` towards `b` by `t`.
pub(crate) fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
