use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{timing::TimeSignature, FollowError, Result};

/// Top-level configuration structure for the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub transport: TransportConfig,
    pub follow: FollowConfig,
    pub gate: GateConfig,
    pub audio: AudioConfig,
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.transport.validate()?;
        self.follow.validate()
    }
}

/// Tempo and metre the clock starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub bpm: f64,
    pub time_signature: TimeSignature,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bpm: 130.0,
            time_signature: TimeSignature::COMMON,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(FollowError::config(format!(
                "transport tempo must be positive (got {})",
                self.bpm
            )));
        }
        self.time_signature.validate()
    }
}

/// Tuning of tap-tempo following.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowConfig {
    /// Accepted tempo band as `[min, max]` percent of the base tempo. Also the
    /// playback-rate clamp, divided by 100.
    pub tempo_range_pct: [f64; 2],
    /// Fraction of the remaining distance to the target rate covered per tap.
    pub adapt_speed: f64,
    pub tap_history_size: usize,
    /// Counter the pitch change caused by rate changes.
    pub pitch_compensation: bool,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            tempo_range_pct: [50.0, 200.0],
            adapt_speed: 0.3,
            tap_history_size: 4,
            pitch_compensation: true,
        }
    }
}

impl FollowConfig {
    /// Rejects values that would hide a programming error and clamps the rest.
    pub fn validate(&self) -> Result<()> {
        let [min, max] = self.tempo_range_pct;
        if !(min.is_finite() && max.is_finite() && min > 0.0 && max >= min) {
            return Err(FollowError::config(format!(
                "tempo range must be positive and ordered (got [{min}, {max}])"
            )));
        }
        if self.tap_history_size == 0 {
            return Err(FollowError::config("tap history size must be at least 1"));
        }
        Ok(())
    }

    pub fn min_rate(&self) -> f64 {
        self.tempo_range_pct[0] / 100.0
    }

    pub fn max_rate(&self) -> f64 {
        self.tempo_range_pct[1] / 100.0
    }

    /// `adapt_speed` clamped into `(0, 1]`.
    pub fn effective_adapt_speed(&self) -> f64 {
        if self.adapt_speed.is_nan() {
            return 1.0;
        }
        self.adapt_speed.clamp(f64::EPSILON, 1.0)
    }

    /// Returns a copy with `update` applied, validated.
    pub fn merged(&self, update: &FollowConfigUpdate) -> Result<Self> {
        let mut next = self.clone();
        if let Some(range) = update.tempo_range_pct {
            next.tempo_range_pct = range;
        }
        if let Some(speed) = update.adapt_speed {
            next.adapt_speed = speed;
        }
        if let Some(size) = update.tap_history_size {
            next.tap_history_size = size;
        }
        if let Some(pitch) = update.pitch_compensation {
            next.pitch_compensation = pitch;
        }
        next.validate()?;
        next.adapt_speed = next.effective_adapt_speed();
        Ok(next)
    }
}

/// Partial update for [`FollowConfig`]; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowConfigUpdate {
    pub tempo_range_pct: Option<[f64; 2]>,
    pub adapt_speed: Option<f64>,
    pub tap_history_size: Option<usize>,
    pub pitch_compensation: Option<bool>,
}

/// Fade times for the audio gate, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub activate_transition_ms: f64,
    pub tap_open_ms: f64,
    /// Silence after the last tap before the gate closes.
    pub inactivity_ms: f64,
    pub inactivity_close_ms: f64,
    pub deactivate_close_ms: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            activate_transition_ms: 10.0,
            tap_open_ms: 10.0,
            inactivity_ms: 1500.0,
            inactivity_close_ms: 300.0,
            deactivate_close_ms: 50.0,
        }
    }
}

/// Configuration specific to the audio output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub master_gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { master_gain: 0.8 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_live_setup() {
        let config = EngineConfig::default();
        assert_eq!(config.transport.bpm, 130.0);
        assert_eq!(config.follow.tempo_range_pct, [50.0, 200.0]);
        assert_eq!(config.follow.tap_history_size, 4);
        assert_eq!(config.gate.inactivity_ms, 1500.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "follow": { "adapt_speed": 1.0 }, "transport": { "bpm": 98 } }"#,
        )
        .unwrap();
        assert_eq!(config.follow.adapt_speed, 1.0);
        assert_eq!(config.follow.tap_history_size, 4);
        assert_eq!(config.transport.bpm, 98.0);
        assert_eq!(config.gate, GateConfig::default());
    }

    #[test]
    fn rejects_invalid_tempo_range() {
        let raw = r#"{ "follow": { "tempo_range_pct": [0, 200] } }"#;
        assert!(matches!(
            EngineConfig::from_json_str(raw),
            Err(FollowError::Config(_))
        ));

        let raw = r#"{ "follow": { "tempo_range_pct": [150, 90] } }"#;
        assert!(EngineConfig::from_json_str(raw).is_err());
    }

    #[test]
    fn rejects_degenerate_time_signature() {
        let raw = r#"{ "transport": { "time_signature": { "beats_per_bar": 0, "beat_unit": 4 } } }"#;
        assert!(matches!(
            EngineConfig::from_json_str(raw),
            Err(FollowError::Config(_))
        ));

        let transport = TransportConfig {
            time_signature: TimeSignature::new(3, 0),
            ..Default::default()
        };
        assert!(transport.validate().is_err());
        assert!(TransportConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            EngineConfig::from_json_str("{ not json"),
            Err(FollowError::Json(_))
        ));
    }

    #[test]
    fn merge_clamps_adapt_speed_and_validates() {
        let base = FollowConfig::default();
        let merged = base
            .merged(&FollowConfigUpdate {
                adapt_speed: Some(4.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(merged.adapt_speed, 1.0);
        assert_eq!(merged.tempo_range_pct, base.tempo_range_pct);

        let err = base.merged(&FollowConfigUpdate {
            tap_history_size: Some(0),
            ..Default::default()
        });
        assert!(err.is_err());
    }

    #[test]
    fn rate_bounds_derive_from_range() {
        let config = FollowConfig {
            tempo_range_pct: [90.0, 110.0],
            ..Default::default()
        };
        assert!((config.min_rate() - 0.9).abs() < 1e-12);
        assert!((config.max_rate() - 1.1).abs() < 1e-12);
    }
}
