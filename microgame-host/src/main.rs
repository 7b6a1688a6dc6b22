//! Dev runner binary
//!
//! Main entry point for playing microgames headlessly.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rand::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use microgame_core::session::SessionConfig;
use microgame_host::config::{load_session_config, parse_id, Cli, Command, FrameArgs, RunArgs, SessionArgs};
use microgame_host::headless::{play, run_session, InputRecording, PlayOptions};
use microgame_host::policy::{IdlePolicy, InputPolicy, RandomPolicy};
use microgame_host::registry_init::build_catalog;
use microgame_mods::scaffold::scaffold;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let result = match &cli.command {
        Command::Run(args) => run(&cli, args).await,
        Command::Session(args) => session(&cli, args).await,
        Command::List => list(&cli).await,
        Command::New { id } => new_bundle(&cli, id).await,
    };

    if let Err(e) = &result {
        error!("microgame-dev failed: {:#}", e);
    }
    result
}

fn policy(frame: &FrameArgs, seed: u64) -> Box<dyn InputPolicy> {
    if frame.bot_rate == 0.0 {
        Box::new(IdlePolicy)
    } else {
        Box::new(RandomPolicy::with_seed(frame.bot_rate, seed))
    }
}

async fn run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let (catalog, _) = build_catalog(&cli.mods_root).await?;
    let seed = args.seed.unwrap_or_else(|| thread_rng().gen());

    let id = match args.game_id()? {
        Some(id) => id,
        None => catalog
            .ids()
            .choose(&mut thread_rng())
            .cloned()
            .ok_or_else(|| anyhow!("No microgames registered"))?,
    };

    let options = PlayOptions {
        modifiers: args.modifiers()?,
        undecided_finish: args.undecided_finish.into(),
        seed,
        fps: args.frame.fps,
    };
    info!(
        "Playing {} (difficulty {}, speed {}, seed {})",
        id,
        options.modifiers.difficulty().level(),
        options.modifiers.speed(),
        seed
    );

    let mut bot = policy(&args.frame, seed);
    let mut recording = args.record.then(|| InputRecording::new(&id, &options));
    let report = play(&catalog, &id, &options, bot.as_mut(), recording.as_mut())?;

    if let Some(recording) = &recording {
        recording.save(&args.recordings_dir).await?;
    }
    if let Some(failure) = &report.failure {
        warn!("{} failed in {}: {}", id, failure.stage, failure.error);
    }

    println!(
        "{} {:?} in {:.2}s{}",
        id,
        report.outcome,
        report.elapsed,
        if report.timed_out { " (timed out)" } else { "" }
    );
    Ok(())
}

async fn session(cli: &Cli, args: &SessionArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => load_session_config(path).await?,
        None => SessionConfig::default(),
    };
    let (catalog, _) = build_catalog(&cli.mods_root).await?;
    let seed = args.seed.unwrap_or_else(|| thread_rng().gen());

    info!("Starting session (seed {})", seed);
    let mut bot = policy(&args.frame, seed);
    let summary = run_session(&catalog, config, seed, args.frame.fps, bot.as_mut())?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn list(cli: &Cli) -> Result<()> {
    let (catalog, report) = build_catalog(&cli.mods_root).await?;

    for entry in catalog.entries() {
        let descriptor = entry.descriptor();
        println!(
            "{:<32} {:<16} {:>5.1}s  {:?}",
            descriptor.id(),
            descriptor.prompt,
            descriptor.duration,
            descriptor.input
        );
    }
    for failure in &report.failures {
        println!("skipped {}: {}", failure.path().display(), failure);
    }
    Ok(())
}

async fn new_bundle(cli: &Cli, raw: &str) -> Result<()> {
    let id = parse_id(raw)?;
    let dir = scaffold(&cli.mods_root, &id)
        .await
        .with_context(|| format!("Cannot scaffold {}", id))?;
    println!("{}", dir.display());
    Ok(())
}
