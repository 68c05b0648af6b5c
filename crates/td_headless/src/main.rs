//! Headless tower defense runner.
//!
//! # Usage
//!
//! ```bash
//! # Run a single scenario and print metrics as JSON
//! cargo run -p td_headless -- run --scenario lane_defense
//!
//! # Stream every tick's events as JSON lines
//! cargo run -p td_headless -- run --scenario scenarios/crossroads.ron --events
//!
//! # Batch of seeds for tuning
//! cargo run -p td_headless -- batch --scenario fortress --count 500 --output results/
//!
//! # Verify determinism
//! cargo run -p td_headless -- verify --scenario lane_defense --seed 42
//!
//! # Check a scenario file
//! cargo run -p td_headless -- validate --scenario scenarios/siege.ron
//! ```
//!
//! Output (stdout): JSON. Logs (stderr): human-readable.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use td_headless::{run_batch, verify_determinism, BatchConfig, Scenario, ScenarioRunner};

#[derive(Parser)]
#[command(name = "td_headless")]
#[command(about = "Headless tower defense runner for tuning and CI")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scenario
    Run {
        /// Built-in scenario name or RON file
        #[arg(short, long, default_value = "lane_defense")]
        scenario: String,

        /// Seed override
        #[arg(long)]
        seed: Option<u64>,

        /// Print each tick's events as a JSON line before the metrics
        #[arg(long)]
        events: bool,
    },

    /// Run a scenario across many seeds
    Batch {
        /// Built-in scenario name or RON file
        #[arg(short, long, default_value = "lane_defense")]
        scenario: String,

        /// Number of runs
        #[arg(short, long, default_value = "100")]
        count: u32,

        /// Maximum parallel runs (0 = auto)
        #[arg(short, long, default_value = "0")]
        parallel: u32,

        /// Output directory for results
        #[arg(short, long, default_value = "results")]
        output: PathBuf,

        /// Starting seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Verify determinism by running the same seed several times
    Verify {
        /// Built-in scenario name or RON file
        #[arg(short, long, default_value = "lane_defense")]
        scenario: String,

        /// Seed to verify
        #[arg(long, default_value = "12345")]
        seed: u64,

        /// Number of verification runs
        #[arg(short, long, default_value = "5")]
        runs: u32,
    },

    /// Load a scenario and check its configuration
    Validate {
        /// Built-in scenario name or RON file
        #[arg(short, long)]
        scenario: String,
    },

    /// List built-in scenarios
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout is for JSON
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();

    let result = match cli.command {
        Commands::Run {
            scenario,
            seed,
            events,
        } => cmd_run(&scenario, seed, events),
        Commands::Batch {
            scenario,
            count,
            parallel,
            output,
            seed,
        } => cmd_batch(scenario, count, parallel, output, seed),
        Commands::Verify {
            scenario,
            seed,
            runs,
        } => cmd_verify(&scenario, seed, runs),
        Commands::Validate { scenario } => cmd_validate(&scenario),
        Commands::List => {
            for name in Scenario::builtin_names() {
                println!("{name}");
            }
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            tracing::error!("{message}");
            ExitCode::FAILURE
        }
    }
}

/// Run one scenario
fn cmd_run(scenario: &str, seed: Option<u64>, events: bool) -> Result<(), String> {
    let scenario = Scenario::resolve(scenario).map_err(|e| e.to_string())?;
    tracing::info!("Running scenario: {}", scenario.name);

    let mut runner = ScenarioRunner::new(scenario);
    if let Some(seed) = seed {
        runner = runner.with_seed(seed);
    }

    let stdout = std::io::stdout();
    let started = Instant::now();
    let metrics = runner
        .run_with(|tick| {
            if events && tick.skipped.is_none() {
                if let Ok(line) = serde_json::to_string(tick) {
                    let _ = writeln!(stdout.lock(), "{line}");
                }
            }
        })
        .map_err(|e| e.to_string())?;

    tracing::info!(
        "Finished in {:.2}s wall time ({} ticks)",
        started.elapsed().as_secs_f64(),
        metrics.ticks
    );
    let json = serde_json::to_string_pretty(&metrics).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

/// Run a batch of seeds
fn cmd_batch(
    scenario: String,
    count: u32,
    parallel: u32,
    output: PathBuf,
    seed: u64,
) -> Result<(), String> {
    let config = BatchConfig {
        parallel_runs: parallel,
        ..BatchConfig::new(&scenario, count)
            .with_output(output.clone())
            .with_seed(seed)
    };

    let results = run_batch(config);
    let path = output.join("batch.json");
    results.save(&path).map_err(|e| e.to_string())?;
    tracing::info!("Results written to {}", path.display());

    let summary = &results.summary;
    eprintln!();
    eprintln!("Runs:              {}", summary.total_runs);
    eprintln!("Survival rate:     {:.1}%", summary.survival_rate * 100.0);
    eprintln!("Base lost:         {:.1}%", summary.loss_rate * 100.0);
    eprintln!("Mean waves:        {:.2}", summary.mean_waves_cleared);
    eprintln!("Mean leaks:        {:.2}", summary.mean_reached_base);
    eprintln!("Agent pool reuse:  {:.1}%", summary.mean_agent_reuse * 100.0);

    if !results.errors.is_empty() {
        return Err(format!("{} runs failed", results.errors.len()));
    }
    if summary.runs_with_violations > 0 {
        return Err(format!(
            "{} runs hit invariant violations",
            summary.runs_with_violations
        ));
    }
    Ok(())
}

/// Verify determinism
fn cmd_verify(scenario: &str, seed: u64, runs: u32) -> Result<(), String> {
    tracing::info!(
        "Verifying determinism: {} with seed {} ({} runs)",
        scenario,
        seed,
        runs
    );
    let scenario = Scenario::resolve(scenario).map_err(|e| e.to_string())?;

    if verify_determinism(&scenario, seed, runs) {
        eprintln!("PASS: All {runs} runs produced identical results");
        Ok(())
    } else {
        Err("FAIL: Non-determinism detected!".to_string())
    }
}

/// Check a scenario loads and validates
fn cmd_validate(scenario: &str) -> Result<(), String> {
    let scenario = Scenario::resolve(scenario).map_err(|e| e.to_string())?;
    eprintln!(
        "OK: '{}' - {} structures, {} waves, base: {}",
        scenario.name,
        scenario.structures.len(),
        scenario.waves,
        if scenario.base.is_some() { "yes" } else { "no" }
    );
    Ok(())
}
