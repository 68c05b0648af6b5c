//! Scenario runner.
//!
//! Plays a [`Scenario`] to completion: the runner acts as the host game,
//! owning the tower slots and base through a [`SlotBoard`], making towers
//! shoot at agents in range and starting waves as they finish.

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, info, warn};

use td_core::components::{AgentId, ProjectileParams};
use td_core::math::Vec2;
use td_core::simulation::{Simulation, TickEvents};
use td_core::wave::WavePhase;
use td_core::world::SlotBoard;

use crate::metrics::{Outcome, RunMetrics};
use crate::scenario::{Scenario, ScenarioError, TowerFire};

/// Runs one scenario with one seed.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    scenario: Scenario,
    seed: u64,
}

impl ScenarioRunner {
    /// Runner using the scenario's configured seed.
    #[must_use]
    pub fn new(scenario: Scenario) -> Self {
        let seed = scenario.config.seed;
        Self { scenario, seed }
    }

    /// Override the seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Scenario being run.
    #[must_use]
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Run to completion.
    pub fn run(&self) -> Result<RunMetrics, ScenarioError> {
        self.run_with(|_| {})
    }

    /// Run to completion, handing every tick's events to `on_tick`.
    pub fn run_with<F>(&self, mut on_tick: F) -> Result<RunMetrics, ScenarioError>
    where
        F: FnMut(&TickEvents),
    {
        let scenario = &self.scenario;
        let mut config = scenario.config.clone();
        config.seed = self.seed;

        let mut sim = Simulation::new(config)?;
        let mut board = SlotBoard::new(scenario.structures.clone());
        board.base.clone_from(&scenario.base);
        let terrain = scenario.terrain();

        let cleared = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&cleared);
        sim.on_wave_complete(move |wave| {
            counter.set(counter.get() + 1);
            debug!(wave, "Wave cleared");
        });

        let mut metrics = RunMetrics::new(scenario.name.clone(), self.seed);
        let mut next_shot_ms = vec![0u64; board.structures.len()];
        sim.start_wave(1);

        for _ in 0..scenario.max_ticks {
            if let Some(fire) = &scenario.tower_fire {
                metrics.shots_fired += fire_towers(&mut sim, &board, fire, &mut next_shot_ms);
            }

            let events = sim.tick(scenario.tick_ms, &mut board, &terrain);
            on_tick(&events);
            metrics.absorb(&events);

            if board.flags.game_over {
                metrics.outcome = Outcome::BaseDestroyed;
                break;
            }
            if cleared.get() >= scenario.waves {
                metrics.outcome = Outcome::Survived;
                break;
            }
            let waves = sim.waves();
            if waves.phase() == WavePhase::Idle && waves.auto_start_at().is_none() {
                sim.start_wave(sim.wave() + 1);
            }
        }

        metrics.gold = board.gold;
        metrics.base_health = board.base.as_ref().map_or(0.0, |base| base.health.max(0.0));
        metrics.structures_destroyed =
            board.structures.iter().filter(|s| s.health <= 0.0).count() as u32;
        metrics.agent_pool = sim.agent_pool_stats();
        metrics.projectile_pool = sim.projectile_pool_stats();
        metrics.final_state_hash = sim.state_hash();

        info!(
            scenario = %scenario.name,
            seed = self.seed,
            outcome = ?metrics.outcome,
            waves = metrics.waves_cleared,
            ticks = metrics.ticks,
            "Run finished"
        );
        Ok(metrics)
    }
}

/// Let every ready tower shoot at the nearest agent in range. Returns shots
/// fired.
fn fire_towers(
    sim: &mut Simulation,
    board: &SlotBoard,
    fire: &TowerFire,
    next_shot_ms: &mut [u64],
) -> u32 {
    let now = sim.now_ms();
    let mut shots = 0;

    for (index, tower) in board.structures.iter().enumerate() {
        if !tower.is_targetable() || now < next_shot_ms[index] {
            continue;
        }
        let Some(aim) = nearest_agent(sim, tower.position, fire.range) else {
            continue;
        };
        let params = ProjectileParams {
            origin: tower.position,
            direction: aim - tower.position,
            ..fire.projectile.clone()
        };
        match sim.fire_projectile(&params) {
            Ok(_) => {
                shots += 1;
                next_shot_ms[index] = now + fire.interval_ms;
            }
            Err(err) => {
                warn!(tower = index, error = %err, "Tower could not fire");
                break;
            }
        }
    }
    shots
}

fn nearest_agent(sim: &Simulation, from: Vec2, range: f32) -> Option<Vec2> {
    sim.agents_in_radius(from, range)
        .into_iter()
        .filter_map(|id: AgentId| sim.agent(id).map(|agent| (id, agent.position)))
        .min_by(|a, b| {
            a.1.distance_squared(from)
                .total_cmp(&b.1.distance_squared(from))
                .then(a.0.cmp(&b.0))
        })
        .map(|(_, position)| position)
}
