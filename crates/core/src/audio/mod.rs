use std::{collections::HashMap, fmt, rc::Rc};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{timeline::TimeSource, FollowError, Result};

/// Capabilities the engine needs from whatever actually produces sound.
///
/// `initialize` and `load` must succeed before `play`. Gain, gate, rate and
/// pitch commands sent to an uninitialised device are ignored.
pub trait AudioOutput {
    fn initialize(&mut self) -> Result<()>;

    /// Prepares a loopable buffer for `source`.
    fn load(&mut self, source: &str) -> Result<()>;

    fn play(&mut self) -> Result<()>;

    fn stop(&mut self);

    /// Stops playback, rewinds to the start and closes the gate at once.
    fn reset(&mut self);

    /// Ramps the gate gain to open (1) or closed (0) over `transition_ms`
    /// without touching the underlying source.
    fn set_gate(&mut self, open: bool, transition_ms: f64);

    fn set_playback_rate(&mut self, rate: f64);

    /// Pitch compensation is optional; devices without it ignore the call.
    fn set_pitch_shift(&mut self, _semitones: f64) {}

    fn set_master_gain(&mut self, value: f32);

    /// Length of the loaded buffer in seconds, 0 when nothing is loaded.
    fn duration(&self) -> f64;

    /// Position of the playhead inside the loop, in seconds.
    fn current_time(&self) -> f64;

    /// Raw device clock in seconds.
    fn clock_time(&self) -> f64;

    fn is_initialized(&self) -> bool;

    fn is_loaded(&self) -> bool;

    fn is_playing(&self) -> bool;
}

/// Command issued to a [`SimulatedOutput`], kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceCommand {
    Play,
    Stop,
    Reset,
    Gate { open: bool, transition_ms: f64 },
    PlaybackRate(f64),
    PitchShift(f64),
    MasterGain(f32),
}

/// In-memory audio output driven by a shared [`TimeSource`].
///
/// The playhead advances by elapsed time times playback rate while playing,
/// whether or not the gate is open: a closed gate only mutes the source, it
/// keeps running underneath. [`AudioOutput::current_time`] wraps the playhead
/// modulo the loop length.
pub struct SimulatedOutput {
    time: Rc<dyn TimeSource>,
    sources: HashMap<String, f64>,
    init_failure: Option<String>,
    initialized: bool,
    loaded: Option<(String, f64)>,
    playing: bool,
    rate: f64,
    pitch_shift: f64,
    master_gain: f32,
    gate_open: bool,
    /// Playhead position at `anchor_time`, unwrapped.
    anchor_position: f64,
    anchor_time: f64,
    commands: Vec<DeviceCommand>,
}

impl SimulatedOutput {
    pub fn new(time: Rc<dyn TimeSource>) -> Self {
        Self {
            time,
            sources: HashMap::new(),
            init_failure: None,
            initialized: false,
            loaded: None,
            playing: false,
            rate: 1.0,
            pitch_shift: 0.0,
            master_gain: 0.8,
            gate_open: false,
            anchor_position: 0.0,
            anchor_time: 0.0,
            commands: Vec::new(),
        }
    }

    /// Registers a source the device can load, with its loop length.
    pub fn with_source(mut self, path: impl Into<String>, duration_seconds: f64) -> Self {
        self.register_source(path, duration_seconds);
        self
    }

    pub fn register_source(&mut self, path: impl Into<String>, duration_seconds: f64) {
        self.sources.insert(path.into(), duration_seconds.max(0.0));
    }

    /// Makes every `initialize` call fail with `reason`.
    pub fn failing_with(mut self, reason: impl Into<String>) -> Self {
        self.init_failure = Some(reason.into());
        self
    }

    /// Clears an injected initialisation failure.
    pub fn recover(&mut self) {
        self.init_failure = None;
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Gate commands issued so far, as `(open, transition_ms)`.
    pub fn gate_transitions(&self) -> Vec<(bool, f64)> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                DeviceCommand::Gate {
                    open,
                    transition_ms,
                } => Some((*open, *transition_ms)),
                _ => None,
            })
            .collect()
    }

    pub fn is_gate_open(&self) -> bool {
        self.gate_open
    }

    pub fn playback_rate(&self) -> f64 {
        self.rate
    }

    pub fn pitch_shift(&self) -> f64 {
        self.pitch_shift
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    /// Audible gain once the current gate ramp has settled.
    pub fn output_gain(&self) -> f32 {
        if self.gate_open {
            self.master_gain
        } else {
            0.0
        }
    }

    pub fn loaded_source(&self) -> Option<&str> {
        self.loaded.as_ref().map(|(path, _)| path.as_str())
    }

    fn playhead(&self) -> f64 {
        if self.playing {
            self.anchor_position + (self.time.now() - self.anchor_time).max(0.0) * self.rate
        } else {
            self.anchor_position
        }
    }

    fn reanchor(&mut self) {
        self.anchor_position = self.playhead();
        self.anchor_time = self.time.now();
    }
}

impl AudioOutput for SimulatedOutput {
    fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        if let Some(reason) = &self.init_failure {
            warn!(%reason, "simulated output failed to initialise");
            return Err(FollowError::Initialization(reason.clone()));
        }
        self.initialized = true;
        info!(master_gain = self.master_gain, "simulated output initialised");
        Ok(())
    }

    fn load(&mut self, source: &str) -> Result<()> {
        if !self.initialized {
            return Err(FollowError::NotReady("audio output not initialised"));
        }
        let Some(&duration) = self.sources.get(source) else {
            warn!(source, "unknown audio source");
            return Err(FollowError::Load(format!("no such source `{source}`")));
        };

        self.stop();
        self.loaded = Some((source.to_string(), duration));
        self.anchor_position = 0.0;
        self.anchor_time = self.time.now();
        info!(source, duration, "audio loaded");
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        if self.loaded.is_none() {
            return Err(FollowError::NotReady("audio source not loaded"));
        }
        if self.playing {
            return Ok(());
        }
        self.anchor_time = self.time.now();
        self.playing = true;
        self.commands.push(DeviceCommand::Play);
        info!("audio playing");
        Ok(())
    }

    fn stop(&mut self) {
        if !self.playing {
            return;
        }
        self.reanchor();
        self.playing = false;
        self.commands.push(DeviceCommand::Stop);
        info!("audio stopped");
    }

    fn reset(&mut self) {
        self.stop();
        self.anchor_position = 0.0;
        self.anchor_time = self.time.now();
        self.gate_open = false;
        self.commands.push(DeviceCommand::Reset);
    }

    fn set_gate(&mut self, open: bool, transition_ms: f64) {
        if !self.initialized {
            return;
        }
        self.gate_open = open;
        self.commands.push(DeviceCommand::Gate {
            open,
            transition_ms: transition_ms.max(0.0),
        });
    }

    fn set_playback_rate(&mut self, rate: f64) {
        if !self.initialized || !(rate.is_finite() && rate > 0.0) {
            return;
        }
        self.reanchor();
        self.rate = rate;
        self.commands.push(DeviceCommand::PlaybackRate(rate));
    }

    fn set_pitch_shift(&mut self, semitones: f64) {
        if !self.initialized {
            return;
        }
        self.pitch_shift = semitones;
        self.commands.push(DeviceCommand::PitchShift(semitones));
    }

    fn set_master_gain(&mut self, value: f32) {
        if !self.initialized {
            return;
        }
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        self.master_gain = value;
        self.commands.push(DeviceCommand::MasterGain(value));
        debug!(value, "master gain set");
    }

    fn duration(&self) -> f64 {
        self.loaded.as_ref().map(|(_, d)| *d).unwrap_or(0.0)
    }

    fn current_time(&self) -> f64 {
        let duration = self.duration();
        if duration <= 0.0 {
            return 0.0;
        }
        self.playhead().rem_euclid(duration)
    }

    fn clock_time(&self) -> f64 {
        self.time.now()
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

impl fmt::Debug for SimulatedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedOutput")
            .field("initialized", &self.initialized)
            .field("loaded", &self.loaded)
            .field("playing", &self.playing)
            .field("rate", &self.rate)
            .field("pitch_shift", &self.pitch_shift)
            .field("gate_open", &self.gate_open)
            .field("commands", &self.commands.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::ManualTimeSource;

    fn ready_output(time: &ManualTimeSource) -> SimulatedOutput {
        let mut output = SimulatedOutput::new(Rc::new(time.clone())).with_source("loop.wav", 8.0);
        output.initialize().unwrap();
        output.load("loop.wav").unwrap();
        output
    }

    #[test]
    fn enforces_initialise_load_play_order() {
        let time = ManualTimeSource::new();
        let mut output = SimulatedOutput::new(Rc::new(time)).with_source("loop.wav", 8.0);

        assert!(matches!(output.play(), Err(FollowError::NotReady(_))));
        assert!(matches!(
            output.load("loop.wav"),
            Err(FollowError::NotReady(_))
        ));
        output.initialize().unwrap();
        assert!(matches!(output.load("nope.wav"), Err(FollowError::Load(_))));
        output.load("loop.wav").unwrap();
        output.play().unwrap();
        assert!(output.is_playing());
    }

    #[test]
    fn initialisation_failure_is_retryable() {
        let time = ManualTimeSource::new();
        let mut output = SimulatedOutput::new(Rc::new(time)).failing_with("device blocked");
        assert!(matches!(
            output.initialize(),
            Err(FollowError::Initialization(_))
        ));
        output.recover();
        assert!(output.initialize().is_ok());
    }

    #[test]
    fn commands_before_initialise_are_ignored() {
        let time = ManualTimeSource::new();
        let mut output = SimulatedOutput::new(Rc::new(time));
        output.set_gate(true, 10.0);
        output.set_playback_rate(1.5);
        output.set_master_gain(0.2);
        assert!(output.commands().is_empty());
        assert!(!output.is_gate_open());
        assert_eq!(output.playback_rate(), 1.0);
    }

    #[test]
    fn playhead_runs_under_closed_gate_and_loops() {
        let time = ManualTimeSource::new();
        let mut output = ready_output(&time);
        output.play().unwrap();
        assert!(!output.is_gate_open());

        time.advance(3.0);
        assert!((output.current_time() - 3.0).abs() < 1e-9);

        output.set_gate(true, 10.0);
        time.advance(6.0);
        // 9 s into an 8 s loop
        assert!((output.current_time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn playhead_scales_with_rate_and_pauses() {
        let time = ManualTimeSource::new();
        let mut output = ready_output(&time);
        output.play().unwrap();
        time.advance(1.0);
        output.set_playback_rate(2.0);
        time.advance(1.0);
        assert!((output.current_time() - 3.0).abs() < 1e-9);

        output.stop();
        time.advance(5.0);
        assert!((output.current_time() - 3.0).abs() < 1e-9);
        assert!((output.clock_time() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn clamps_master_gain() {
        let time = ManualTimeSource::new();
        let mut output = ready_output(&time);
        output.set_master_gain(1.7);
        assert_eq!(output.master_gain(), 1.0);
        output.set_master_gain(-0.3);
        assert_eq!(output.master_gain(), 0.0);
    }

    #[test]
    fn reset_rewinds_and_mutes() {
        let time = ManualTimeSource::new();
        let mut output = ready_output(&time);
        output.play().unwrap();
        output.set_gate(true, 10.0);
        time.advance(2.5);
        output.reset();
        assert!(!output.is_playing());
        assert!(!output.is_gate_open());
        assert_eq!(output.current_time(), 0.0);
        assert_eq!(output.output_gain(), 0.0);
    }
}
