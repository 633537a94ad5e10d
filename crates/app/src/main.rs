use std::{
    fs,
    io::{self, BufRead},
    path::PathBuf,
    rc::Rc,
};

use clap::{Parser, Subcommand, ValueEnum};
use tap_follow_core::{
    timing, Difficulty, EngineConfig, FollowError, Instrument, ManualTimeSource, Session,
    SimulatedOutput, SongMeta, SourceCatalog, SystemTimeSource, TapOutcome, TimeSource,
};
use tracing_subscriber::EnvFilter;

/// Length given to every simulated stem; long enough that the loop point is
/// rarely hit in a short run.
const SIMULATED_LOOP_SECONDS: f64 = 180.0;
const POLL_STEP_MS: f64 = 10.0;

fn main() -> tap_follow_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            taps,
            source,
            until,
        } => run_simulate(&taps, &source, until),
        Commands::Live { source } => run_live(&source),
        Commands::Judge {
            time,
            bpm,
            difficulty,
            grid,
            source,
            catalog,
            config,
        } => run_judge(
            time,
            bpm,
            difficulty.into(),
            grid,
            source.as_deref(),
            catalog.as_ref(),
            config.as_ref(),
        ),
        Commands::Config { config } => run_config(config.as_ref()),
    }
}

fn load_config(path: Option<&PathBuf>) -> tap_follow_core::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

fn load_catalog(path: Option<&PathBuf>) -> tap_follow_core::Result<SourceCatalog> {
    match path {
        Some(path) => SourceCatalog::from_json_str(&fs::read_to_string(path)?),
        None => Ok(SourceCatalog::with_defaults()),
    }
}

/// Session over a simulated output that knows every stem in the catalog.
fn build_session(
    args: &SourceArgs,
    time: Rc<dyn TimeSource>,
) -> tap_follow_core::Result<Session<SimulatedOutput>> {
    let config = load_config(args.config.as_ref())?;
    let catalog = load_catalog(args.catalog.as_ref())?;

    let mut output = SimulatedOutput::new(time.clone());
    for entry in catalog.sources() {
        for path in Instrument::ALL.iter().filter_map(|&i| entry.path(i)) {
            output.register_source(path, SIMULATED_LOOP_SECONDS);
        }
    }

    let source_id = args
        .source
        .clone()
        .unwrap_or_else(|| catalog.default_id().to_string());
    tracing::info!(source = %source_id, "building session");

    let mut session = Session::new(output, time, config, catalog)?;
    session.select(source_id, args.instrument.into());
    Ok(session)
}

fn report(at_ms: f64, outcome: TapOutcome) {
    match outcome {
        TapOutcome::Prepared => println!("{at_ms:>9.1} ms  prepared"),
        TapOutcome::Started => println!("{at_ms:>9.1} ms  playback started"),
        TapOutcome::Tapped(event) => {
            let estimate = event
                .estimated_bpm
                .map(|bpm| format!("{bpm:.2} bpm"))
                .unwrap_or_else(|| "-".to_string());
            let rate = event
                .rate_change
                .map(|change| format!("rate {:.4}", change.rate))
                .unwrap_or_else(|| "rate unchanged".to_string());
            println!("{at_ms:>9.1} ms  tap  estimate {estimate}  {rate}");
        }
    }
}

fn report_final(session: &Session<SimulatedOutput>) {
    if let Some(follow) = session.follow() {
        let info = follow.beat_info();
        println!(
            "final: {:.2} bpm (base {:.2}), rate {:.4}, gate {}, bar {} beat {}",
            follow.bpm(),
            follow.base_bpm(),
            follow.rate_state().current_rate,
            if follow.gate().is_open() { "open" } else { "closed" },
            info.bar + 1,
            info.beat + 1,
        );
    }
}

fn run_simulate(taps: &[f64], args: &SourceArgs, until: Option<f64>) -> tap_follow_core::Result<()> {
    let time = ManualTimeSource::new();
    let mut session = build_session(args, Rc::new(time.clone()))?;
    tracing::info!(taps = taps.len(), "starting simulation");

    let mut taps = taps.to_vec();
    taps.sort_by(f64::total_cmp);
    let end_ms = until.unwrap_or_else(|| taps.last().copied().unwrap_or(0.0));

    let mut now_ms = 0.0;
    let mut advance_to = |session: &mut Session<SimulatedOutput>, target_ms: f64| {
        while now_ms < target_ms {
            now_ms = (now_ms + POLL_STEP_MS).min(target_ms);
            time.set(now_ms / 1000.0);
            if session.poll(now_ms) {
                println!("{now_ms:>9.1} ms  gate closed after inactivity");
            }
        }
    };

    for &tap in &taps {
        advance_to(&mut session, tap);
        report(tap, session.tap(tap)?);
    }
    advance_to(&mut session, end_ms);

    report_final(&session);
    Ok(())
}

/// Every line read from stdin is a tap timed on the wall clock. The
/// inactivity close is checked whenever a line arrives.
fn run_live(args: &SourceArgs) -> tap_follow_core::Result<()> {
    let time: Rc<dyn TimeSource> = Rc::new(SystemTimeSource::new());
    let mut session = build_session(args, time.clone())?;
    println!("press Enter to tap, q then Enter to quit");

    for line in io::stdin().lock().lines() {
        let line = line?;
        let now_ms = time.now() * 1000.0;
        if session.poll(now_ms) {
            println!("{now_ms:>9.1} ms  gate closed after inactivity");
        }
        if line.trim() == "q" {
            break;
        }
        report(now_ms, session.tap(now_ms)?);
    }

    report_final(&session);
    Ok(())
}

fn run_judge(
    time: f64,
    bpm: Option<f64>,
    difficulty: Difficulty,
    grid: Option<f64>,
    source: Option<&str>,
    catalog: Option<&PathBuf>,
    config: Option<&PathBuf>,
) -> tap_follow_core::Result<()> {
    let config = load_config(config)?;
    let mut meta = match source {
        Some(id) => load_catalog(catalog)?.source(id).meta.clone(),
        None => SongMeta {
            title: "transport".to_string(),
            artist: None,
            bpm: config.transport.bpm,
            time_signature: config.transport.time_signature,
            grid: None,
        },
    };
    if let Some(bpm) = bpm {
        meta.bpm = bpm;
    }
    if grid.is_some() {
        meta.grid = grid;
    }

    if !(meta.bpm.is_finite() && meta.bpm > 0.0) {
        return Err(FollowError::config(format!(
            "bpm must be positive (got {})",
            meta.bpm
        )));
    }
    let grid = meta.grid_or_beat();
    if !(grid.is_finite() && grid > 0.0) {
        return Err(FollowError::config(format!(
            "grid must be positive (got {grid})"
        )));
    }
    meta.time_signature.validate()?;

    tracing::debug!(time, bpm = meta.bpm, ?difficulty, grid, song = %meta.title, "judging tap");
    let (judgement, deviation) = meta.evaluate_tap(time, difficulty);
    let target = timing::quantize_to_beat(time, meta.bpm, meta.time_signature, grid);
    let info = timing::beat_info(time, meta.bpm, meta.time_signature);

    println!("judgement: {judgement:?}");
    println!("deviation: {deviation:+.1} ms (nearest grid line at {target:.3} s)");
    println!(
        "position:  bar {} beat {} phase {:.2}, next beat in {:.1} ms",
        info.bar + 1,
        info.beat + 1,
        info.phase,
        timing::time_to_next_beat_ms(time, meta.bpm, meta.time_signature)
    );
    Ok(())
}

fn run_config(config: Option<&PathBuf>) -> tap_follow_core::Result<()> {
    let config = load_config(config)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Tap-driven tempo follower", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// What to play and how the engine is configured.
#[derive(clap::Args, Debug)]
struct SourceArgs {
    /// Engine configuration JSON file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Source catalog JSON file; defaults to the bundled demo source.
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Source id to load.
    #[arg(short, long)]
    source: Option<String>,
    #[arg(short, long, value_enum, default_value_t = InstrumentArg::Full)]
    instrument: InstrumentArg,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a tap sequence against a simulated output and report what follow
    /// mode does with it.
    Simulate {
        /// Tap timestamps in milliseconds, comma separated.
        #[arg(short, long, value_delimiter = ',', required = true)]
        taps: Vec<f64>,
        #[command(flatten)]
        source: SourceArgs,
        /// Keep polling until this time in ms; defaults to the last tap.
        #[arg(short, long)]
        until: Option<f64>,
    },
    /// Tap along in real time by pressing Enter.
    Live {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Judge a single tap against the beat grid.
    Judge {
        /// Tap time in seconds.
        #[arg(short, long, allow_negative_numbers = true)]
        time: f64,
        /// Tempo; defaults to the source's or the configured transport tempo.
        #[arg(short, long)]
        bpm: Option<f64>,
        #[arg(short, long, value_enum, default_value_t = DifficultyArg::Normal)]
        difficulty: DifficultyArg,
        /// Grid spacing in beats; defaults to the source's grid or whole beats.
        #[arg(short, long)]
        grid: Option<f64>,
        /// Judge on this catalog source's tempo, metre and grid.
        #[arg(short, long)]
        source: Option<String>,
        #[arg(long)]
        catalog: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration as JSON.
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum InstrumentArg {
    Full,
    Vocals,
    Bass,
    Drums,
    Other,
}

impl From<InstrumentArg> for Instrument {
    fn from(arg: InstrumentArg) -> Self {
        match arg {
            InstrumentArg::Full => Instrument::Full,
            InstrumentArg::Vocals => Instrument::Vocals,
            InstrumentArg::Bass => Instrument::Bass,
            InstrumentArg::Drums => Instrument::Drums,
            InstrumentArg::Other => Instrument::Other,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DifficultyArg {
    Easy,
    Normal,
    Hard,
}

impl From<DifficultyArg> for Difficulty {
    fn from(arg: DifficultyArg) -> Self {
        match arg {
            DifficultyArg::Easy => Difficulty::Easy,
            DifficultyArg::Normal => Difficulty::Normal,
            DifficultyArg::Hard => Difficulty::Hard,
        }
    }
}
