use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    timing::{self, Difficulty, Judgement, TimeSignature},
    FollowError, Result,
};

/// Separated stem (or the full mix) of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    #[default]
    Full,
    Vocals,
    Bass,
    Drums,
    Other,
}

impl Instrument {
    pub const ALL: [Instrument; 5] = [
        Instrument::Full,
        Instrument::Vocals,
        Instrument::Bass,
        Instrument::Drums,
        Instrument::Other,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            Instrument::Full => "Full Mix",
            Instrument::Vocals => "Vocals",
            Instrument::Bass => "Bass",
            Instrument::Drums => "Drums",
            Instrument::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongMeta {
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    pub bpm: f64,
    #[serde(default)]
    pub time_signature: TimeSignature,
    /// Quantisation grid in beats, if the song prefers one.
    #[serde(default)]
    pub grid: Option<f64>,
}

impl SongMeta {
    /// The song's preferred grid, or whole beats.
    pub fn grid_or_beat(&self) -> f64 {
        self.grid.unwrap_or(1.0)
    }

    /// Grades a tap at `tap_time_sec` on this song's tempo, metre and grid.
    pub fn evaluate_tap(&self, tap_time_sec: f64, difficulty: Difficulty) -> (Judgement, f64) {
        timing::evaluate_tap(
            tap_time_sec,
            self.bpm,
            self.time_signature,
            difficulty,
            self.grid_or_beat(),
        )
    }
}

/// A loopable source together with its per-instrument stems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSource {
    pub id: String,
    pub meta: SongMeta,
    pub paths: HashMap<Instrument, String>,
}

impl AudioSource {
    /// Path for `instrument`, falling back to the full mix.
    pub fn path(&self, instrument: Instrument) -> Option<&str> {
        self.paths
            .get(&instrument)
            .or_else(|| self.paths.get(&Instrument::Full))
            .map(String::as_str)
    }
}

/// Registry of the sources the application can play.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCatalog {
    default: AudioSource,
    #[serde(default)]
    sources: HashMap<String, AudioSource>,
}

impl SourceCatalog {
    /// Catalog that only knows `default`, which unknown ids resolve to.
    pub fn new(default: AudioSource) -> Result<Self> {
        validate(&default)?;
        Ok(Self {
            default,
            sources: HashMap::new(),
        })
    }

    /// The bundled `demo` source: a 130 BPM cover in 4/4 with separated stems.
    pub fn with_defaults() -> Self {
        let paths = HashMap::from([
            (Instrument::Full, "/audio/demo.mp3".to_string()),
            (Instrument::Vocals, "/audio/separated/vocals.wav".to_string()),
            (Instrument::Bass, "/audio/separated/bass.wav".to_string()),
            (Instrument::Drums, "/audio/separated/drums.wav".to_string()),
            (Instrument::Other, "/audio/separated/other.wav".to_string()),
        ]);
        let demo = AudioSource {
            id: "demo".to_string(),
            meta: SongMeta {
                title: "Cherry (Cover)".to_string(),
                artist: Some("Unknown".to_string()),
                bpm: 130.0,
                time_signature: TimeSignature::COMMON,
                grid: None,
            },
            paths,
        };
        Self {
            default: demo,
            sources: HashMap::new(),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let catalog: SourceCatalog = serde_json::from_str(raw)?;
        for source in catalog.sources() {
            validate(source)?;
        }
        Ok(catalog)
    }

    pub fn register(&mut self, source: AudioSource) -> Result<()> {
        validate(&source)?;
        if source.id == self.default.id {
            self.default = source;
        } else {
            self.sources.insert(source.id.clone(), source);
        }
        Ok(())
    }

    /// Source for `id`, or the default source when `id` is unknown.
    pub fn source(&self, id: &str) -> &AudioSource {
        if id == self.default.id {
            return &self.default;
        }
        self.sources.get(id).unwrap_or(&self.default)
    }

    pub fn contains(&self, id: &str) -> bool {
        id == self.default.id || self.sources.contains_key(id)
    }

    pub fn path(&self, id: &str, instrument: Instrument) -> Option<&str> {
        self.source(id).path(instrument)
    }

    pub fn bpm(&self, id: &str) -> f64 {
        self.source(id).meta.bpm
    }

    pub fn default_id(&self) -> &str {
        &self.default.id
    }

    pub fn sources(&self) -> impl Iterator<Item = &AudioSource> {
        std::iter::once(&self.default).chain(self.sources.values())
    }
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn validate(source: &AudioSource) -> Result<()> {
    if !(source.meta.bpm.is_finite() && source.meta.bpm > 0.0) {
        return Err(FollowError::config(format!(
            "source `{}` has a non-positive tempo ({})",
            source.id, source.meta.bpm
        )));
    }
    if let Some(grid) = source.meta.grid {
        if !(grid.is_finite() && grid > 0.0) {
            return Err(FollowError::config(format!(
                "source `{}` has a non-positive grid ({grid})",
                source.id
            )));
        }
    }
    source.meta.time_signature.validate()
}
