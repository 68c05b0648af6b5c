//! Batch runner for tuning.
//!
//! Runs one scenario across many seeds in parallel using rayon. Every run
//! builds its own `Simulation` inside its task; nothing is shared.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::metrics::{BatchSummary, RunMetrics};
use crate::runner::ScenarioRunner;
use crate::scenario::Scenario;

/// Configuration for a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Scenario name or RON path
    pub scenario: String,
    /// Number of runs
    pub run_count: u32,
    /// Maximum parallel runs (0 = use rayon default)
    pub parallel_runs: u32,
    /// Output directory for results
    pub output_dir: PathBuf,
    /// Seed of the first run; run `i` uses `seed_start + i`
    pub seed_start: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            scenario: "lane_defense".to_string(),
            run_count: 100,
            parallel_runs: 0,
            output_dir: PathBuf::from("results"),
            seed_start: 0,
        }
    }
}

impl BatchConfig {
    /// Create config for a specific scenario
    pub fn new(scenario: &str, run_count: u32) -> Self {
        Self {
            scenario: scenario.to_string(),
            run_count,
            ..Default::default()
        }
    }

    /// Set output directory
    pub fn with_output(mut self, dir: PathBuf) -> Self {
        self.output_dir = dir;
        self
    }

    /// Set seed start
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed_start = seed;
        self
    }
}

/// Error during batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchError {
    /// Run index
    pub run_index: u32,
    /// Seed used
    pub seed: u64,
    /// Error message
    pub message: String,
}

/// Results from a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResults {
    /// Configuration used
    pub config: BatchConfig,
    /// Individual run metrics
    pub runs: Vec<RunMetrics>,
    /// Aggregate summary
    pub summary: BatchSummary,
    /// Total runtime
    pub duration_seconds: f64,
    /// Errors encountered
    pub errors: Vec<BatchError>,
}

impl BatchResults {
    /// Save results to JSON file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Load results from JSON file
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(std::io::Error::other)
    }
}

/// Run a batch. A scenario that fails to load is reported as one error per
/// run rather than aborting.
pub fn run_batch(config: BatchConfig) -> BatchResults {
    let start = Instant::now();
    info!(
        "Starting batch run: {} runs of '{}'",
        config.run_count, config.scenario
    );

    if config.parallel_runs > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallel_runs as usize)
            .build_global()
            .ok(); // Ignore if already set
    }

    let scenario = Scenario::resolve(&config.scenario);
    let results: Vec<Result<RunMetrics, BatchError>> = (0..config.run_count)
        .into_par_iter()
        .map(|i| {
            let seed = config.seed_start.wrapping_add(u64::from(i));
            let outcome = match &scenario {
                Ok(scenario) => ScenarioRunner::new(scenario.clone())
                    .with_seed(seed)
                    .run()
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            outcome.map_err(|message| {
                warn!("Run {} failed: {}", i, message);
                BatchError {
                    run_index: i,
                    seed,
                    message,
                }
            })
        })
        .collect();

    let (runs, errors): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    let runs: Vec<RunMetrics> = runs.into_iter().filter_map(Result::ok).collect();
    let errors: Vec<BatchError> = errors.into_iter().filter_map(Result::err).collect();

    let summary = BatchSummary::from_runs(&runs);
    let duration_seconds = start.elapsed().as_secs_f64();

    info!(
        "Batch complete: {} runs in {:.1}s ({:.1} runs/sec)",
        runs.len(),
        duration_seconds,
        runs.len() as f64 / duration_seconds.max(f64::EPSILON)
    );

    BatchResults {
        config,
        runs,
        summary,
        duration_seconds,
        errors,
    }
}

/// Run the same seed `runs` times and check every final hash matches.
pub fn verify_determinism(scenario: &Scenario, seed: u64, runs: u32) -> bool {
    let hashes: Vec<Option<u64>> = (0..runs)
        .map(|_| {
            ScenarioRunner::new(scenario.clone())
                .with_seed(seed)
                .run()
                .ok()
                .map(|metrics| metrics.final_state_hash)
        })
        .collect();
    hashes.first().is_some_and(Option::is_some) && hashes.windows(2).all(|w| w[0] == w[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_config_default() {
        let config = BatchConfig::default();
        assert_eq!(config.run_count, 100);
        assert_eq!(config.scenario, "lane_defense");
    }

    #[test]
    fn test_batch_config_builder() {
        let config = BatchConfig::new("fortress", 500)
            .with_output(PathBuf::from("/tmp/results"))
            .with_seed(12345);

        assert_eq!(config.scenario, "fortress");
        assert_eq!(config.run_count, 500);
        assert_eq!(config.seed_start, 12345);
    }

    #[test]
    fn test_unknown_scenario_reports_errors() {
        let results = run_batch(BatchConfig::new("nowhere", 3));
        assert!(results.runs.is_empty());
        assert_eq!(results.errors.len(), 3);
        assert_eq!(results.summary.total_runs, 0);
    }

    #[test]
    fn test_verify_determinism() {
        let mut scenario = Scenario::open_field();
        scenario.max_ticks = 300;
        assert!(verify_determinism(&scenario, 12345, 3));
    }
}
