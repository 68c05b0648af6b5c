//! Headless scenario runner for tuning and CI verification.
//!
//! This crate plays tower defense scenarios without graphics. It stands in
//! for the host game: it owns the tower slots and the base, makes towers
//! shoot, and drives `td_core::simulation::Simulation` at a fixed step.
//!
//! - **Single runs**: play a scenario, print metrics as JSON
//! - **Batch runs**: many seeds in parallel, summary for tuning
//! - **Determinism checks**: the same seed must give the same final hash
//!
//! # Example
//!
//! ```bash
//! # Run a built-in scenario
//! cargo run -p td_headless -- run --scenario lane_defense
//!
//! # Run a scenario file and stream tick events
//! cargo run -p td_headless -- run --scenario scenarios/crossroads.ron --events
//!
//! # Batch of 200 seeds
//! cargo run -p td_headless -- batch --scenario fortress --count 200
//! ```

pub mod batch;
pub mod metrics;
pub mod runner;
pub mod scenario;

pub use batch::{run_batch, verify_determinism, BatchConfig, BatchResults};
pub use metrics::{BatchSummary, Outcome, RunMetrics};
pub use runner::ScenarioRunner;
pub use scenario::{Scenario, ScenarioError, TowerFire};
