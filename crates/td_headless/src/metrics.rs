//! Run metrics for tuning analysis.

use serde::{Deserialize, Serialize};

use td_core::components::RemovalCause;
use td_core::pool::PoolStats;
use td_core::simulation::TickEvents;
use td_core::wave::WaveEvent;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Outcome {
    /// Every wave cleared.
    Survived,
    /// The base fell.
    BaseDestroyed,
    /// Hit the tick limit first.
    #[default]
    TimedOut,
}

/// Removal counts by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalCounts {
    /// Shot down.
    pub killed: u32,
    /// Crashed into a structure.
    pub crashed: u32,
    /// Reached the base.
    pub reached_base: u32,
    /// Reclaimed by pool auto-return.
    pub auto_returned: u32,
    /// Force-removed after an invariant violation.
    pub invariant_violations: u32,
    /// Everything else.
    pub other: u32,
}

impl RemovalCounts {
    /// Count one removal.
    pub fn record(&mut self, cause: RemovalCause) {
        match cause {
            RemovalCause::Killed => self.killed += 1,
            RemovalCause::Crashed => self.crashed += 1,
            RemovalCause::ReachedBase => self.reached_base += 1,
            RemovalCause::AutoReturned => self.auto_returned += 1,
            RemovalCause::InvariantViolation => self.invariant_violations += 1,
            RemovalCause::External | RemovalCause::WaveReset => self.other += 1,
        }
    }

    /// All removals.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.killed
            + self.crashed
            + self.reached_base
            + self.auto_returned
            + self.invariant_violations
            + self.other
    }
}

/// Complete metrics for a single run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Scenario name.
    pub scenario: String,
    /// Random seed used.
    pub seed: u64,
    /// Ticks simulated.
    pub ticks: u64,
    /// Simulation time at the end.
    pub sim_time_ms: u64,
    /// How the run ended.
    pub outcome: Outcome,
    /// Waves completed.
    pub waves_cleared: u32,
    /// Agents spawned by the schedule.
    pub spawned: u32,
    /// Removals by cause.
    pub removals: RemovalCounts,
    /// Shots fired by towers.
    pub shots_fired: u32,
    /// Direct projectile hits.
    pub projectile_hits: u32,
    /// Behavior mode changes.
    pub behavior_transitions: u32,
    /// Gold granted to the player.
    pub gold: u64,
    /// Base health left (0 without a base).
    pub base_health: f32,
    /// Structures at or below zero health.
    pub structures_destroyed: u32,
    /// Agent pool report at the end.
    pub agent_pool: PoolStats,
    /// Projectile pool report at the end.
    pub projectile_pool: PoolStats,
    /// Final simulation state hash (for determinism validation).
    pub final_state_hash: u64,
}

impl RunMetrics {
    /// Create a new metrics instance.
    #[must_use]
    pub fn new(scenario: impl Into<String>, seed: u64) -> Self {
        Self {
            scenario: scenario.into(),
            seed,
            ..Default::default()
        }
    }

    /// Fold one tick's events in.
    pub fn absorb(&mut self, events: &TickEvents) {
        self.ticks += 1;
        self.sim_time_ms = events.now_ms;
        self.spawned += events.spawned.len() as u32;
        for &(_, cause) in &events.removed {
            self.removals.record(cause);
        }
        self.projectile_hits += events.projectile_hits;
        self.behavior_transitions += events.behavior_transitions;
        self.waves_cleared += events
            .wave_events
            .iter()
            .filter(|event| matches!(event, WaveEvent::Completed { .. }))
            .count() as u32;
    }
}

/// Aggregate statistics across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Runs included.
    pub total_runs: u32,
    /// Fraction of runs that cleared every wave.
    pub survival_rate: f64,
    /// Fraction of runs that lost the base.
    pub loss_rate: f64,
    /// Mean waves cleared.
    pub mean_waves_cleared: f64,
    /// Mean ticks per run.
    pub mean_ticks: f64,
    /// Mean agents leaked into the base per run.
    pub mean_reached_base: f64,
    /// Mean agent pool reuse rate.
    pub mean_agent_reuse: f64,
    /// Runs with any invariant violation.
    pub runs_with_violations: u32,
}

impl BatchSummary {
    /// Summarize a set of runs.
    #[must_use]
    pub fn from_runs(runs: &[RunMetrics]) -> Self {
        if runs.is_empty() {
            return Self::default();
        }
        let n = runs.len() as f64;
        let mean = |f: &dyn Fn(&RunMetrics) -> f64| runs.iter().map(f).sum::<f64>() / n;

        Self {
            total_runs: runs.len() as u32,
            survival_rate: mean(&|r| f64::from(u8::from(r.outcome == Outcome::Survived))),
            loss_rate: mean(&|r| f64::from(u8::from(r.outcome == Outcome::BaseDestroyed))),
            mean_waves_cleared: mean(&|r| f64::from(r.waves_cleared)),
            mean_ticks: mean(&|r| r.ticks as f64),
            mean_reached_base: mean(&|r| f64::from(r.removals.reached_base)),
            mean_agent_reuse: mean(&|r| r.agent_pool.reuse_rate),
            runs_with_violations: runs
                .iter()
                .filter(|r| r.removals.invariant_violations > 0)
                .count() as u32,
        }
    }
}
