//! Follow mode: taps drive the tempo of a looping source and gate it audible
//! while the listener keeps tapping.

mod gate;

pub use gate::{DeferredClose, GateState};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    audio::AudioOutput,
    config::{FollowConfig, FollowConfigUpdate, GateConfig},
    rate::{PlaybackRateController, RateChange, RateState},
    tempo::TapTempoEstimator,
    timeline::BeatClock,
    timing::{BeatInfo, Judgement},
    Result,
};

/// Record handed back for every accepted tap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TapEvent {
    pub timestamp_ms: f64,
    /// Device clock reading when the tap was processed, in seconds.
    pub audio_clock_time: f64,
    /// Follow mode does not grade taps; this is always [`Judgement::Good`].
    pub judgement: Judgement,
    pub deviation_ms: f64,
    pub estimated_bpm: Option<f64>,
    pub rate_change: Option<RateChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum FollowState {
    #[default]
    Inactive,
    Active(GateState),
}

/// Owns the beat clock, estimator, rate controller and the audio output, and
/// sequences them on every tap.
///
/// The inactivity close is a deadline, not a thread: the host calls
/// [`FollowMode::poll`] from its loop with the same millisecond clock it uses
/// for tap timestamps.
#[derive(Debug)]
pub struct FollowMode<D: AudioOutput> {
    output: D,
    clock: BeatClock,
    estimator: TapTempoEstimator,
    rate: PlaybackRateController,
    config: FollowConfig,
    gate_config: GateConfig,
    state: FollowState,
}

impl<D: AudioOutput> FollowMode<D> {
    /// The clock's tempo at construction becomes the base tempo.
    pub fn new(
        output: D,
        clock: BeatClock,
        config: FollowConfig,
        gate_config: GateConfig,
    ) -> Result<Self> {
        let base_bpm = clock.bpm();
        let estimator = TapTempoEstimator::new(base_bpm, &config)?;
        let rate = PlaybackRateController::new(base_bpm, &config)?;
        let config = FollowConfig {
            adapt_speed: config.effective_adapt_speed(),
            ..config
        };

        Ok(Self {
            output,
            clock,
            estimator,
            rate,
            config,
            gate_config,
            state: FollowState::Inactive,
        })
    }

    pub fn activate(&mut self) {
        self.estimator.clear();
        self.state = FollowState::Active(GateState::Closed);
        self.output
            .set_gate(false, self.gate_config.activate_transition_ms);
        info!(
            base_bpm = self.estimator.base_bpm(),
            tempo_range_pct = ?self.config.tempo_range_pct,
            adapt_speed = self.config.adapt_speed,
            tap_history_size = self.config.tap_history_size,
            "follow mode activated"
        );
    }

    /// Back to unity rate with the gate closed and no timer pending.
    pub fn deactivate(&mut self) {
        self.estimator.clear();
        self.rate.reset(&mut self.output, &mut self.clock);
        self.state = FollowState::Inactive;
        self.output
            .set_gate(false, self.gate_config.deactivate_close_ms);
        info!("follow mode deactivated");
    }

    /// Handles a tap at `timestamp_ms` (host milliseconds). Returns `None`
    /// while inactive.
    pub fn on_tap(&mut self, timestamp_ms: f64) -> Option<TapEvent> {
        let FollowState::Active(gate) = &mut self.state else {
            return None;
        };

        self.output.set_gate(true, self.gate_config.tap_open_ms);
        gate.arm(DeferredClose {
            deadline_ms: timestamp_ms + self.gate_config.inactivity_ms,
            fade_ms: self.gate_config.inactivity_close_ms,
        });

        let estimated_bpm = self.estimator.on_tap(timestamp_ms);
        let rate_change =
            estimated_bpm.map(|bpm| self.rate.apply(bpm, &mut self.output, &mut self.clock));

        debug!(estimated_bpm, tap_count = self.estimator.len(), "tap");

        Some(TapEvent {
            timestamp_ms,
            audio_clock_time: self.output.clock_time(),
            judgement: Judgement::Good,
            deviation_ms: 0.0,
            estimated_bpm,
            rate_change,
        })
    }

    /// Fires the inactivity close if it is due. Returns whether it fired.
    pub fn poll(&mut self, now_ms: f64) -> bool {
        let FollowState::Active(gate) = &mut self.state else {
            return false;
        };
        match gate.take_due(now_ms) {
            Some(timer) => {
                self.output.set_gate(false, timer.fade_ms);
                info!(fade_ms = timer.fade_ms, "no tap detected, fading out");
                true
            }
            None => false,
        }
    }

    /// Restarts tempo tracking without leaving the active state. The gate is
    /// left as it is but loses its pending close.
    pub fn clear_history(&mut self) {
        self.estimator.clear();
        self.rate.reset(&mut self.output, &mut self.clock);
        if let FollowState::Active(gate) = &mut self.state {
            gate.cancel();
        }
    }

    /// Clock back to zero, output rewound and muted, tempo tracking cleared.
    pub fn reset(&mut self) {
        self.clock.reset();
        self.output.reset();
        self.clear_history();
        if let FollowState::Active(gate) = &mut self.state {
            *gate = GateState::Closed;
        }
    }

    pub fn estimated_bpm(&self) -> Option<f64> {
        self.estimator.estimate()
    }

    pub fn config(&self) -> FollowConfig {
        self.config.clone()
    }

    pub fn update_config(&mut self, update: &FollowConfigUpdate) -> Result<()> {
        let next = self.config.merged(update)?;
        self.estimator.reconfigure(&next);
        self.rate.reconfigure(&next);
        // a narrower range or a pitch compensation change applies right away
        let rate = self.rate.resync(&mut self.output, &mut self.clock);
        self.config = next;
        debug!(config = ?self.config, rate = rate.current_rate, "follow config updated");
        Ok(())
    }

    pub fn gate_config(&self) -> &GateConfig {
        &self.gate_config
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, FollowState::Active(_))
    }

    pub fn state(&self) -> FollowState {
        self.state
    }

    /// Gate as seen by the listener; always closed while inactive.
    pub fn gate(&self) -> GateState {
        match self.state {
            FollowState::Active(gate) => gate,
            FollowState::Inactive => GateState::Closed,
        }
    }

    pub fn pending_close(&self) -> Option<DeferredClose> {
        self.gate().close_timer()
    }

    pub fn tap_count(&self) -> usize {
        self.estimator.len()
    }

    pub fn base_bpm(&self) -> f64 {
        self.estimator.base_bpm()
    }

    pub fn rate_state(&self) -> RateState {
        self.rate.state()
    }

    pub fn bpm(&self) -> f64 {
        self.clock.bpm()
    }

    pub fn beat_info(&self) -> BeatInfo {
        self.clock.beat_info()
    }

    pub fn elapsed(&self) -> f64 {
        self.clock.elapsed()
    }

    pub fn clock(&self) -> &BeatClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut BeatClock {
        &mut self.clock
    }

    pub fn output(&self) -> &D {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut D {
        &mut self.output
    }
}
