//! Core library for tap-driven tempo following.
//!
//! A listener taps along to a looping source; the engine estimates their
//! tempo from the tap intervals, retargets the playback rate to match (with
//! optional pitch compensation) and gates the audio open while tapping
//! continues. Each module owns one piece of that loop: timing math, the beat
//! clock, tempo estimation, rate control, and the follow-mode orchestrator
//! that ties them to an [`AudioOutput`].

pub mod assets;
pub mod audio;
pub mod config;
pub mod error;
pub mod follow;
pub mod rate;
pub mod session;
pub mod tempo;
pub mod timeline;
pub mod timing;

pub use assets::{AudioSource, Instrument, SongMeta, SourceCatalog};
pub use audio::{AudioOutput, DeviceCommand, SimulatedOutput};
pub use config::{
    AudioConfig, EngineConfig, FollowConfig, FollowConfigUpdate, GateConfig, TransportConfig,
};
pub use error::{FollowError, Result};
pub use follow::{DeferredClose, FollowMode, FollowState, GateState, TapEvent};
pub use rate::{compensating_pitch_shift, PlaybackRateController, RateChange, RateState};
pub use session::{Session, TapOutcome};
pub use tempo::TapTempoEstimator;
pub use timeline::{BeatClock, ClockState, ManualTimeSource, SystemTimeSource, TimeSource};
pub use timing::{BeatInfo, Difficulty, Judgement, JudgementWindow, TimeSignature};
