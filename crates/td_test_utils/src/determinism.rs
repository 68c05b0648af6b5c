//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the simulation produces identical
//! results given identical inputs.
//!
//! # Sources of non-determinism
//!
//! - **System randomness**: trajectory jitter, phase offsets and roster
//!   picks all come from generators seeded by [`td_core::config::SimConfig::seed`].
//! - **HashMap iteration order**: the simulation walks agents in pool slot
//!   order and sorts anything collected from hash maps.
//!
//! Floating-point math is not bit-reproducible across CPUs, so hashes are
//! only compared within one process.

use td_core::simulation::Simulation;
use td_core::world::{Battlefield, Terrain};
use tracing::debug;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for deterministic simulation).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that all runs matched.
    ///
    /// # Panics
    ///
    /// Panics if runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            panic!(
                "Simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                self.unique_hashes().len(),
                self.hashes
            );
        }
    }
}

/// Run a state machine multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run
/// * `ticks` - Number of steps per run
/// * `setup` - Creates the initial state
/// * `step` - Advances the state by one tick
/// * `hash` - Computes the state hash
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();
        for _ in 0..ticks {
            step(&mut state);
        }
        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);
    debug!(runs, ticks, is_deterministic, "Determinism check finished");

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Run a simulation and its battlefield twice with identical setup and
/// compare final [`Simulation::state_hash`] values.
pub fn verify_simulation_determinism<B, T, F>(setup_fn: F, num_ticks: u64, delta_ms: u64) -> bool
where
    B: Battlefield,
    T: Terrain,
    F: Fn() -> (Simulation, B, T),
{
    verify_determinism(
        2,
        num_ticks,
        &setup_fn,
        |(sim, board, terrain)| {
            sim.tick(delta_ms, board, terrain);
        },
        |(sim, _, _)| sim.state_hash(),
    )
    .is_deterministic
}
