use std::{
    cell::Cell,
    path::{Path, PathBuf},
    rc::Rc,
};

use clap::{Args, Parser, Subcommand};
use recap_pulse_core::{
    AppConfig, AudioBackend, AudioEngine, FixedStepScheduler, FrameScheduler, PacedScheduler,
    PcmBackend, PlaylistEntry, RecapError, Result, TickControl,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rehearse(args) => run_rehearse(&args),
        Commands::Tempo { input, fps } => run_tempo(&input, fps),
    }
}

fn run_rehearse(args: &RehearseArgs) -> Result<()> {
    let config = AppConfig::load(&args.config)?;
    if config.playlist.is_empty() {
        return Err(RecapError::InvalidConfig("playlist is empty".into()));
    }
    tracing::info!(config = ?args.config, tracks = config.playlist.len(), "starting rehearsal");

    let mut engine = AudioEngine::new(PcmBackend::new(), config)?;

    let beats = Rc::new(Cell::new(0u64));
    let counter = beats.clone();
    engine.on_beat(move |_| counter.set(counter.get() + 1));
    engine.on_tempo(|estimate| {
        tracing::info!(
            bpm = estimate.bpm,
            confidence = estimate.confidence,
            "rotation locked to tempo"
        )
    });

    // Headless runs have no user to click, so unlock straight away.
    engine.on_user_gesture();
    engine.select(args.track, true)?;

    let frames = (args.seconds * args.fps).round().max(1.0) as u64;
    let ran = if args.realtime {
        drive(&mut engine, PacedScheduler::new(args.fps).with_max_frames(frames))
    } else {
        drive(&mut engine, FixedStepScheduler::new(args.fps).with_max_frames(frames))
    };

    tracing::info!(
        frames = ran,
        beats = beats.get(),
        bpm = ?engine.tempo().map(|estimate| estimate.bpm),
        track = engine.player().index(),
        backdrop = ?engine.backdrop(),
        "rehearsal finished"
    );
    engine.shutdown();
    Ok(())
}

fn drive<B: AudioBackend>(engine: &mut AudioEngine<B>, mut scheduler: impl FrameScheduler) -> u64 {
    scheduler.run(|time| {
        engine.tick(time.now_ms);
        TickControl::Continue
    })
}

fn run_tempo(input: &Path, fps: f64) -> Result<()> {
    let locator = input.display().to_string();
    let title = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| locator.clone());

    let config = AppConfig {
        playlist: vec![PlaylistEntry::new(title, locator.clone())],
        ..AppConfig::default()
    };
    // One full estimation window plus a second of slack.
    let limit = ((config.tempo.window_ms / 1_000.0 + 1.0) * fps).ceil() as u64;

    let mut engine = AudioEngine::new(PcmBackend::running(), config)?;
    engine.play()?;

    let mut estimate = None;
    FixedStepScheduler::new(fps)
        .with_max_frames(limit)
        .run(|time| match engine.tick(time.now_ms).tempo {
            Some(found) => {
                estimate = Some(found);
                TickControl::Stop
            }
            None => TickControl::Continue,
        });
    engine.shutdown();

    let estimate = estimate.ok_or_else(|| {
        RecapError::msg(format!("tempo pass for {locator} did not complete"))
    })?;
    if estimate.is_fallback() {
        tracing::warn!(locator, "not enough peaks, reporting the fallback tempo");
    }
    println!(
        "{locator}: {} bpm ({} peaks, confidence {:.2})",
        estimate.bpm, estimate.samples, estimate.confidence
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Beat-synchronised audio core for the recap presentation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play the configured playlist through the engine without a screen.
    Rehearse(RehearseArgs),
    /// Estimate the tempo of a single WAV file.
    Tempo {
        /// Path to the WAV file to analyse.
        input: PathBuf,
        #[arg(long, default_value_t = 60.0)]
        fps: f64,
    },
}

#[derive(Args, Debug)]
struct RehearseArgs {
    /// JSON configuration with the playlist and tuning sections.
    #[arg(short, long)]
    config: PathBuf,
    /// Playlist index to start from.
    #[arg(short, long, default_value_t = 0)]
    track: isize,
    #[arg(long, default_value_t = 60.0)]
    fps: f64,
    /// How long to run, in seconds of playback.
    #[arg(short, long, default_value_t = 30.0)]
    seconds: f64,
    /// Pace frames against the wall clock instead of simulating time.
    #[arg(long)]
    realtime: bool,
}
