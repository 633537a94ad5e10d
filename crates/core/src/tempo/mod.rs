//! Tap-tempo estimation over a bounded history of tap timestamps.

use std::collections::VecDeque;

use tracing::debug;

use crate::{config::FollowConfig, timing::lerp, FollowError, Result};

/// Relaxation towards the base tempo applied per out-of-band tap. Independent
/// of `adapt_speed`.
pub const OUT_OF_BAND_RELAXATION: f64 = 0.1;

/// Turns tap timestamps (milliseconds) into a BPM estimate.
///
/// The estimate is the mean interval over every consecutive pair still in the
/// history. Estimates outside `[base * min%, base * max%]` are never adopted;
/// instead the previous estimate drifts towards the base tempo.
#[derive(Debug, Clone)]
pub struct TapTempoEstimator {
    base_bpm: f64,
    tempo_range_pct: [f64; 2],
    capacity: usize,
    taps: VecDeque<f64>,
    estimate: Option<f64>,
}

impl TapTempoEstimator {
    pub fn new(base_bpm: f64, config: &FollowConfig) -> Result<Self> {
        if !(base_bpm.is_finite() && base_bpm > 0.0) {
            return Err(FollowError::config(format!(
                "base tempo must be positive (got {base_bpm})"
            )));
        }
        config.validate()?;

        Ok(Self {
            base_bpm,
            tempo_range_pct: config.tempo_range_pct,
            capacity: config.tap_history_size,
            taps: VecDeque::with_capacity(config.tap_history_size),
            estimate: None,
        })
    }

    /// Registers a tap and returns the current estimate, or `None` until two
    /// taps are in the history.
    pub fn on_tap(&mut self, timestamp_ms: f64) -> Option<f64> {
        self.taps.push_back(timestamp_ms);
        self.trim();

        if self.taps.len() < 2 {
            self.estimate = None;
            return None;
        }

        let first = self.taps.front().copied().unwrap_or(timestamp_ms);
        let last = self.taps.back().copied().unwrap_or(timestamp_ms);
        // sum of consecutive intervals telescopes to last - first
        let mean_interval = (last - first) / (self.taps.len() - 1) as f64;
        let raw_bpm = 60_000.0 / mean_interval;

        let (min_bpm, max_bpm) = self.band();
        let next = if raw_bpm.is_finite() && (min_bpm..=max_bpm).contains(&raw_bpm) {
            raw_bpm
        } else {
            let relaxed = lerp(
                self.estimate.unwrap_or(self.base_bpm),
                self.base_bpm,
                OUT_OF_BAND_RELAXATION,
            );
            debug!(
                raw_bpm,
                min_bpm, max_bpm, relaxed, "tap tempo outside accepted band"
            );
            relaxed
        };

        self.estimate = Some(next);
        self.estimate
    }

    pub fn estimate(&self) -> Option<f64> {
        self.estimate
    }

    /// Accepted tempo band in BPM.
    pub fn band(&self) -> (f64, f64) {
        let [min, max] = self.tempo_range_pct;
        (self.base_bpm * min / 100.0, self.base_bpm * max / 100.0)
    }

    pub fn base_bpm(&self) -> f64 {
        self.base_bpm
    }

    pub fn taps(&self) -> impl Iterator<Item = f64> + '_ {
        self.taps.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Picks up new range and history size. A smaller history drops the
    /// oldest taps straight away.
    pub fn reconfigure(&mut self, config: &FollowConfig) {
        self.tempo_range_pct = config.tempo_range_pct;
        self.capacity = config.tap_history_size.max(1);
        self.trim();
    }

    /// Forgets every tap and the estimate.
    pub fn clear(&mut self) {
        self.taps.clear();
        self.estimate = None;
    }

    fn trim(&mut self) {
        while self.taps.len() > self.capacity {
            self.taps.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator(base_bpm: f64, history: usize) -> TapTempoEstimator {
        let config = FollowConfig {
            tap_history_size: history,
            ..Default::default()
        };
        TapTempoEstimator::new(base_bpm, &config).unwrap()
    }

    #[test]
    fn computes_expected_bpm() {
        let mut tapper = estimator(120.0, 4);

        let mut bpm = None;
        for &t in &[0.0, 500.0, 1000.0, 1500.0] {
            bpm = tapper.on_tap(t);
        }

        assert_eq!(bpm, Some(120.0));
    }

    #[test]
    fn single_tap_has_no_estimate() {
        let mut tapper = estimator(130.0, 4);
        assert!(tapper.on_tap(0.0).is_none());
        assert!(tapper.estimate().is_none());
    }

    #[test]
    fn history_is_bounded_fifo() {
        let mut tapper = estimator(120.0, 3);
        for i in 0..10 {
            tapper.on_tap(i as f64 * 500.0);
            assert!(tapper.len() <= 3);
        }
        let kept: Vec<f64> = tapper.taps().collect();
        assert_eq!(kept, vec![3500.0, 4000.0, 4500.0]);
    }

    #[test]
    fn averages_over_window_only() {
        let mut tapper = estimator(120.0, 3);
        // slow start then steady 120 BPM; the slow interval falls out of the window
        for &t in &[0.0, 800.0, 1300.0, 1800.0] {
            tapper.on_tap(t);
        }
        assert!((tapper.estimate().unwrap() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_band_relaxes_towards_base() {
        let mut tapper = estimator(130.0, 4);
        // 150 ms intervals = 400 BPM, above the 260 BPM ceiling
        assert!(tapper.on_tap(0.0).is_none());
        assert_eq!(tapper.on_tap(150.0), Some(130.0));

        let mut tapper = estimator(130.0, 2);
        tapper.on_tap(0.0);
        assert!((tapper.on_tap(600.0).unwrap() - 100.0).abs() < 1e-9);
        let relaxed = tapper.on_tap(750.0).unwrap();
        assert!((relaxed - (100.0 + (130.0 - 100.0) * 0.1)).abs() < 1e-9);
        let relaxed_again = tapper.on_tap(900.0).unwrap();
        assert!((relaxed_again - (relaxed + (130.0 - relaxed) * 0.1)).abs() < 1e-9);
    }

    #[test]
    fn duplicate_timestamps_are_rejected_as_noise() {
        let mut tapper = estimator(120.0, 4);
        tapper.on_tap(1000.0);
        assert_eq!(tapper.on_tap(1000.0), Some(120.0));
    }

    #[test]
    fn band_edges_are_accepted() {
        let mut tapper = estimator(120.0, 2);
        tapper.on_tap(0.0);
        // 1000 ms = 60 BPM, exactly the 50 % floor
        assert_eq!(tapper.on_tap(1000.0), Some(60.0));
    }

    #[test]
    fn shrinking_history_trims_oldest() {
        let mut tapper = estimator(120.0, 4);
        for &t in &[0.0, 500.0, 1000.0, 1500.0] {
            tapper.on_tap(t);
        }
        tapper.reconfigure(&FollowConfig {
            tap_history_size: 2,
            ..Default::default()
        });
        assert_eq!(tapper.taps().collect::<Vec<_>>(), vec![1000.0, 1500.0]);
    }

    #[test]
    fn single_slot_history_drops_the_estimate() {
        let mut tapper = estimator(120.0, 4);
        tapper.on_tap(0.0);
        assert_eq!(tapper.on_tap(500.0), Some(120.0));

        tapper.reconfigure(&FollowConfig {
            tap_history_size: 1,
            ..Default::default()
        });
        assert!(tapper.on_tap(1000.0).is_none());
        assert!(tapper.estimate().is_none());
    }

    #[test]
    fn clear_forgets_everything() {
        let mut tapper = estimator(120.0, 4);
        tapper.on_tap(0.0);
        tapper.on_tap(500.0);
        tapper.clear();
        assert!(tapper.is_empty());
        assert!(tapper.estimate().is_none());
        assert!(tapper.on_tap(1000.0).is_none());
    }

    #[test]
    fn rejects_invalid_construction() {
        assert!(TapTempoEstimator::new(0.0, &FollowConfig::default()).is_err());
        let zero_history = FollowConfig {
            tap_history_size: 0,
            ..Default::default()
        };
        assert!(TapTempoEstimator::new(120.0, &zero_history).is_err());
    }
}
