//! Startup and transport sequencing around [`FollowMode`].
//!
//! Mirrors the play screen: the first tap brings the output up and loads the
//! chosen stem, the next one starts the loop and the clock, and every tap
//! after that is handed to follow mode.

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    assets::{Instrument, SourceCatalog},
    audio::AudioOutput,
    config::EngineConfig,
    follow::{FollowMode, TapEvent},
    timeline::{BeatClock, TimeSource},
    FollowError, Result,
};

/// What a call to [`Session::tap`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TapOutcome {
    /// The tap brought the engine up; nothing is playing yet.
    Prepared,
    /// The tap started playback.
    Started,
    Tapped(TapEvent),
}

pub struct Session<D: AudioOutput> {
    config: EngineConfig,
    catalog: SourceCatalog,
    time: Rc<dyn TimeSource>,
    source_id: String,
    instrument: Instrument,
    idle: Option<D>,
    follow: Option<FollowMode<D>>,
    playing: bool,
}

impl<D: AudioOutput> Session<D> {
    pub fn new(
        output: D,
        time: Rc<dyn TimeSource>,
        config: EngineConfig,
        catalog: SourceCatalog,
    ) -> Result<Self> {
        config.validate()?;
        let source_id = catalog.default_id().to_string();
        Ok(Self {
            config,
            catalog,
            time,
            source_id,
            instrument: Instrument::Full,
            idle: Some(output),
            follow: None,
            playing: false,
        })
    }

    /// Chooses what [`Session::prepare`] will load. Has no effect once prepared.
    pub fn select(&mut self, source_id: impl Into<String>, instrument: Instrument) {
        if self.is_prepared() {
            warn!("source selection ignored, session already prepared");
            return;
        }
        self.source_id = source_id.into();
        self.instrument = instrument;
    }

    /// Initialises the output, loads the selected stem and activates follow
    /// mode on the source's tempo. On failure the session stays unprepared
    /// and the whole sequence can be retried.
    pub fn prepare(&mut self) -> Result<()> {
        if self.follow.is_some() {
            return Ok(());
        }
        let Some(mut output) = self.idle.take() else {
            return Err(FollowError::NotReady("session has no audio output"));
        };

        let source = self.catalog.source(&self.source_id).clone();
        let Some(path) = source.path(self.instrument).map(str::to_string) else {
            self.idle = Some(output);
            return Err(FollowError::Load(format!(
                "source `{}` has no {} stem",
                source.id,
                self.instrument.display_name()
            )));
        };

        if let Err(err) = output.initialize().and_then(|_| output.load(&path)) {
            warn!(%err, source = %source.id, "session preparation failed");
            self.idle = Some(output);
            return Err(err);
        }
        output.set_master_gain(self.config.audio.master_gain);

        let clock = match BeatClock::new(
            self.time.clone(),
            source.meta.bpm,
            source.meta.time_signature,
        ) {
            Ok(clock) => clock,
            Err(err) => {
                self.idle = Some(output);
                return Err(err);
            }
        };

        // follow config was validated in `new`, so this cannot fail
        let mut follow = FollowMode::new(
            output,
            clock,
            self.config.follow.clone(),
            self.config.gate.clone(),
        )?;
        follow.activate();

        info!(
            source = %source.id,
            instrument = self.instrument.display_name(),
            bpm = source.meta.bpm,
            "session prepared"
        );
        self.follow = Some(follow);
        Ok(())
    }

    pub fn tap(&mut self, timestamp_ms: f64) -> Result<TapOutcome> {
        if !self.is_prepared() {
            self.prepare()?;
            return Ok(TapOutcome::Prepared);
        }
        if !self.playing {
            self.start()?;
            return Ok(TapOutcome::Started);
        }

        let follow = self.follow_mut()?;
        match follow.on_tap(timestamp_ms) {
            Some(event) => Ok(TapOutcome::Tapped(event)),
            None => Err(FollowError::NotReady("follow mode is not active")),
        }
    }

    /// Play/pause. Before the session is prepared this only prepares it.
    pub fn toggle_playback(&mut self) -> Result<bool> {
        if !self.is_prepared() {
            self.prepare()?;
            return Ok(false);
        }
        if self.playing {
            let follow = self.follow_mut()?;
            follow.clock_mut().stop();
            follow.output_mut().stop();
            self.playing = false;
            info!("session paused");
        } else {
            self.start()?;
        }
        Ok(self.playing)
    }

    /// Back to the top: clock zeroed, output rewound, tempo tracking cleared.
    pub fn reset(&mut self) {
        if let Some(follow) = self.follow.as_mut() {
            follow.reset();
        }
        self.playing = false;
    }

    pub fn poll(&mut self, now_ms: f64) -> bool {
        self.follow
            .as_mut()
            .map(|follow| follow.poll(now_ms))
            .unwrap_or(false)
    }

    pub fn set_volume(&mut self, value: f32) {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        self.config.audio.master_gain = value;
        if let Some(follow) = self.follow.as_mut() {
            follow.output_mut().set_master_gain(value);
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.follow.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn follow(&self) -> Option<&FollowMode<D>> {
        self.follow.as_ref()
    }

    pub fn follow_mode(&mut self) -> Option<&mut FollowMode<D>> {
        self.follow.as_mut()
    }

    /// Output before preparation, e.g. to inspect why it failed.
    pub fn idle_output_mut(&mut self) -> Option<&mut D> {
        self.idle.as_mut()
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    fn start(&mut self) -> Result<()> {
        let follow = self.follow_mut()?;
        follow.output_mut().play()?;
        follow.clock_mut().start();
        self.playing = true;
        info!("session playing");
        Ok(())
    }

    fn follow_mut(&mut self) -> Result<&mut FollowMode<D>> {
        self.follow
            .as_mut()
            .ok_or(FollowError::NotReady("session not prepared"))
    }
}
