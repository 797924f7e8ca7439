use std::path::PathBuf;
use std::process;

use bot_world::{RunReport, Scenario, Simulation, SimulationConfig, SpawnOutcome};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Runs a bot scenario headless and prints the final world snapshot as JSON.
#[derive(Parser)]
#[command(name = "bot_world_run", version)]
struct Cli {
    /// Scenario TOML listing rocks, buildings and bots
    scenario: PathBuf,

    /// Simulation config file (default: ./bot_world.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of ticks to run (default: the scenario's `ticks`)
    #[arg(short, long)]
    ticks: Option<u64>,

    /// Stream events as JSON lines after every tick, before the snapshot
    #[arg(long)]
    events: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(message) = run(cli) {
        eprintln!("error: {message}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let mut config = match &cli.config {
        Some(path) => SimulationConfig::from_config_file(path),
        None => SimulationConfig::from_default_sources(),
    }
    .map_err(|err| err.to_string())?;
    if !cli.events {
        config.max_journal_events = 0;
    }
    let scenario = Scenario::from_file(&cli.scenario).map_err(|err| err.to_string())?;

    let (mut simulation, outcomes) = scenario.build(config).map_err(|err| err.to_string())?;
    let spawned = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, SpawnOutcome::Spawned { .. }))
        .count();
    tracing::info!(
        spawned,
        rejected = outcomes.len() - spawned,
        "scenario loaded"
    );

    let ticks = cli.ticks.unwrap_or(scenario.ticks);
    let summary = if cli.events {
        run_streaming(&mut simulation, ticks)?
    } else {
        simulation.run(ticks)
    };
    tracing::info!(
        ticks = summary.steps,
        moved = summary.moved,
        blocked = summary.blocked,
        collided = summary.collided,
        faulted = summary.faulted,
        "run finished"
    );

    let snapshot = serde_json::to_string_pretty(&simulation.snapshot())
        .map_err(|err| err.to_string())?;
    println!("{snapshot}");
    Ok(())
}

/// Steps one tick at a time, printing that tick's events as they are drained.
fn run_streaming(simulation: &mut Simulation, ticks: u64) -> Result<RunReport, String> {
    let mut summary = RunReport {
        last_tick: simulation.tick(),
        ..RunReport::default()
    };
    print_events(simulation)?;
    for _ in 0..ticks {
        let step = simulation.step();
        summary.record(&step);
        print_events(simulation)?;
    }
    if simulation.dropped_events() > 0 {
        tracing::warn!(
            dropped = simulation.dropped_events(),
            "event journal overflowed between drains"
        );
    }
    Ok(summary)
}

fn print_events(simulation: &mut Simulation) -> Result<(), String> {
    for event in simulation.drain_events() {
        let line = serde_json::to_string(&event).map_err(|err| err.to_string())?;
        println!("{line}");
    }
    Ok(())
}
