//! Simulation orchestrator.
//!
//! [`Simulation`] owns the pools, grids and controllers and wires them
//! together once per [`Simulation::tick`]:
//!
//! 1. Game over forces the wave controller idle and skips the tick; pause
//!    skips it without advancing time.
//! 2. The clock advances and the wave controller updates.
//! 3. Pool auto-return queues are drained; maintenance runs when due.
//! 4. While a wave is active, scheduled agents spawn.
//! 5. Grids are rebuilt from the current snapshot.
//! 6. While a wave is active, behavior is evaluated and agents move.
//!    Agents destroyed on contact are released immediately.
//! 7. Projectiles advance and hit; killed agents and spent projectiles are
//!    released.
//! 8. An invariant sweep removes any agent left with health ≤ 0.
//!
//! Every agent removal counts as a kill toward the active wave.
//!
//! # Example
//!
//! ```
//! use td_core::prelude::*;
//!
//! let mut sim = Simulation::new(SimConfig::default()).unwrap();
//! let mut board = SlotBoard::new(vec![Structure::tower(Vec2::new(500.0, 500.0), 100.0)]);
//!
//! sim.start_wave(1);
//! let events = sim.tick(16, &mut board, &OpenTerrain);
//! assert_eq!(events.spawned.len(), 1);
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::behavior::BehaviorController;
use crate::cache::CacheStats;
use crate::collision::{CollisionResolver, CollisionStats};
use crate::components::{
    Agent, AgentId, AgentTemplate, BaseTarget, Projectile, ProjectileId, ProjectileParams,
    RemovalCause, Structure,
};
use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::math::{Rect, Vec2};
use crate::movement::{MoveServices, MovementEngine};
use crate::pool::{ObjectPool, PoolHandle, PoolStats};
use crate::spatial::{GridOccupancy, SpatialGrid};
use crate::targeting::{TargetContext, TargetResolver};
use crate::wave::{WaveController, WaveEvent, WavePhase};
use crate::world::{Battlefield, Terrain};

/// Why a tick did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The game is paused; time did not advance.
    Paused,
    /// The game is over.
    GameOver,
}

/// Maintenance pass summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Idle agents dropped.
    pub agents_dropped: usize,
    /// Idle projectiles dropped.
    pub projectiles_dropped: usize,
    /// Stale target cache entries purged.
    pub cache_swept: usize,
    /// Empty groups dropped.
    pub groups_pruned: usize,
}

/// What happened during one tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickEvents {
    /// Simulation time after the tick.
    pub now_ms: u64,
    /// Set when the tick was skipped.
    pub skipped: Option<SkipReason>,
    /// Agents spawned by the wave schedule.
    pub spawned: Vec<AgentId>,
    /// Agents removed, with the reason.
    pub removed: Vec<(AgentId, RemovalCause)>,
    /// Wave transitions.
    pub wave_events: Vec<WaveEvent>,
    /// Behavior mode changes.
    pub behavior_transitions: u32,
    /// Direct projectile hits.
    pub projectile_hits: u32,
    /// Projectiles released.
    pub projectiles_spent: u32,
    /// Maintenance summary, when maintenance ran.
    pub maintenance: Option<MaintenanceReport>,
}

impl TickEvents {
    /// Removals with the given cause.
    #[must_use]
    pub fn count_removed(&self, cause: RemovalCause) -> usize {
        self.removed.iter().filter(|(_, c)| *c == cause).count()
    }
}

/// Observability snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimStats {
    /// Simulation time.
    pub now_ms: u64,
    /// Current wave number.
    pub wave: u32,
    /// Wave phase.
    pub wave_phase: WavePhase,
    /// Kills in the current wave.
    pub kills: u32,
    /// Agent pool report.
    pub agent_pool: PoolStats,
    /// Projectile pool report.
    pub projectile_pool: PoolStats,
    /// Target cache counters.
    pub target_cache: CacheStats,
    /// Collision counters.
    pub collision: CollisionStats,
    /// Agent grid occupancy.
    pub agent_grid: GridOccupancy,
}

/// The simulation core.
#[derive(Debug)]
pub struct Simulation {
    config: SimConfig,
    now_ms: u64,
    last_maintenance_ms: u64,
    next_agent_id: u64,
    next_projectile_id: u64,

    agents: ObjectPool<Agent>,
    projectiles: ObjectPool<Projectile>,
    agent_index: HashMap<AgentId, PoolHandle<Agent>>,

    agent_grid: SpatialGrid<AgentId>,
    structure_grid: SpatialGrid<usize>,
    structure_snapshot: Vec<Structure>,
    base_snapshot: Option<BaseTarget>,

    resolver: TargetResolver,
    behavior: BehaviorController,
    movement: MovementEngine,
    collision: CollisionResolver,
    waves: WaveController,
}

impl Simulation {
    /// Build a simulation from validated configuration.
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let sim = Self {
            now_ms: 0,
            last_maintenance_ms: 0,
            next_agent_id: 1,
            next_projectile_id: 1,
            agents: ObjectPool::new(config.agent_pool.clone())?,
            projectiles: ObjectPool::new(config.projectile_pool.clone())?,
            agent_index: HashMap::new(),
            agent_grid: SpatialGrid::new(config.grid.clone())?,
            structure_grid: SpatialGrid::new(config.grid.clone())?,
            structure_snapshot: Vec::new(),
            base_snapshot: None,
            resolver: TargetResolver::new(config.targeting.clone()),
            behavior: BehaviorController::new(config.behavior.clone()),
            movement: MovementEngine::new(config.movement.clone(), config.seed),
            collision: CollisionResolver::new(config.collision.clone()),
            waves: WaveController::new(config.wave.clone(), config.seed.rotate_left(17)),
            config,
        };
        debug!(
            grid_cols = sim.agent_grid.cols(),
            grid_rows = sim.agent_grid.rows(),
            seed = sim.config.seed,
            "Simulation created"
        );
        Ok(sim)
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Simulation time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    // ------------------------------------------------------------------
    // Waves
    // ------------------------------------------------------------------

    /// Start wave `wave`, cancelling any pending auto-start.
    pub fn start_wave(&mut self, wave: u32) -> bool {
        self.waves.start_wave(wave, self.now_ms)
    }

    /// Whether a wave is running.
    #[must_use]
    pub fn is_wave_active(&self) -> bool {
        self.waves.is_active()
    }

    /// Kills required for the current wave.
    #[must_use]
    pub fn required_kills(&self) -> u32 {
        self.waves.required_kills()
    }

    /// Current wave number.
    #[must_use]
    pub fn wave(&self) -> u32 {
        self.waves.wave()
    }

    /// Wave controller, read-only.
    #[must_use]
    pub fn waves(&self) -> &WaveController {
        &self.waves
    }

    /// Register a callback fired once per completed wave.
    pub fn on_wave_complete<F>(&mut self, callback: F)
    where
        F: FnMut(u32) + 'static,
    {
        self.waves.on_wave_complete(callback);
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    /// Check out an agent with the default template and a fresh id,
    /// indexed at the origin.
    pub fn acquire_agent(&mut self) -> Result<PoolHandle<Agent>> {
        let handle = self.agents.acquire(self.now_ms)?;
        let id = AgentId(self.next_agent_id);
        self.next_agent_id += 1;
        let phase = self.movement.random_phase();
        if let Some(agent) = self.agents.get_mut(handle) {
            agent.apply_template(&AgentTemplate::default());
            agent.id = id;
            agent.spawned_at_ms = self.now_ms;
            agent.phase_offset = phase;
            self.agent_grid.insert(id, agent.position, agent.radius);
        }
        self.agent_index.insert(id, handle);
        Ok(handle)
    }

    /// Return an agent to its pool. Counts as a kill toward the active wave.
    /// Stale handles are ignored.
    pub fn release_agent(&mut self, handle: PoolHandle<Agent>) -> bool {
        let Some(id) = self.agents.get(handle).map(|agent| agent.id) else {
            return false;
        };
        self.detach(handle, id)
    }

    /// Spawn an agent from a template.
    pub fn spawn_agent(&mut self, template: &AgentTemplate, position: Vec2) -> Result<AgentId> {
        let wave = if self.waves.is_active() {
            self.waves.wave()
        } else {
            0
        };
        let handle = self.acquire_agent()?;
        let mut spawned = None;
        if let Some(agent) = self.agents.get_mut(handle) {
            agent.apply_template(template);
            agent.position = position;
            agent.wave = wave;
            self.agent_grid.insert(agent.id, position, agent.radius);
            spawned = Some(agent.id);
        }
        spawned.ok_or(SimError::AgentNotFound(AgentId(self.next_agent_id - 1)))
    }

    /// Remove an agent by id. Counts as a kill toward the active wave.
    pub fn remove_agent(&mut self, id: AgentId) -> Result<()> {
        let handle = *self.agent_index.get(&id).ok_or(SimError::AgentNotFound(id))?;
        self.detach(handle, id);
        Ok(())
    }

    /// Live agent by id.
    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(*self.agent_index.get(&id)?)
    }

    /// Live agent by id, mutable. Position changes are picked up by the
    /// next tick's grid rebuild.
    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(*self.agent_index.get(&id)?)
    }

    /// Live agent by handle.
    #[must_use]
    pub fn agent_by_handle(&self, handle: PoolHandle<Agent>) -> Option<&Agent> {
        self.agents.get(handle)
    }

    /// Live agent by handle, mutable.
    pub fn agent_by_handle_mut(&mut self, handle: PoolHandle<Agent>) -> Option<&mut Agent> {
        self.agents.get_mut(handle)
    }

    /// All live agents.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter_active().map(|(_, agent)| agent)
    }

    /// Number of live agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.active_count()
    }

    // ------------------------------------------------------------------
    // Projectiles
    // ------------------------------------------------------------------

    /// Check out a blank projectile.
    pub fn acquire_projectile(&mut self) -> Result<PoolHandle<Projectile>> {
        self.projectiles.acquire(self.now_ms)
    }

    /// Return a projectile to its pool. Stale handles are ignored.
    pub fn release_projectile(&mut self, handle: PoolHandle<Projectile>) -> bool {
        self.projectiles.release(handle, self.now_ms)
    }

    /// Fire a projectile.
    pub fn fire_projectile(&mut self, params: &ProjectileParams) -> Result<PoolHandle<Projectile>> {
        let handle = self.projectiles.acquire(self.now_ms)?;
        let id = ProjectileId(self.next_projectile_id);
        self.next_projectile_id += 1;
        if let Some(projectile) = self.projectiles.get_mut(handle) {
            projectile.launch(id, params);
        }
        Ok(handle)
    }

    /// Live projectile by handle.
    #[must_use]
    pub fn projectile(&self, handle: PoolHandle<Projectile>) -> Option<&Projectile> {
        self.projectiles.get(handle)
    }

    /// Mutable live projectile by handle.
    pub fn projectile_mut(&mut self, handle: PoolHandle<Projectile>) -> Option<&mut Projectile> {
        self.projectiles.get_mut(handle)
    }

    /// Number of projectiles in flight.
    #[must_use]
    pub fn projectile_count(&self) -> usize {
        self.projectiles.active_count()
    }

    // ------------------------------------------------------------------
    // Queries and stats
    // ------------------------------------------------------------------

    /// Agents whose center lies within `radius` of `point`.
    #[must_use]
    pub fn agents_in_radius(&self, point: Vec2, radius: f32) -> Vec<AgentId> {
        self.agent_grid.query_radius(point, radius)
    }

    /// Agents whose circle touches the circle around `point`.
    #[must_use]
    pub fn agents_touching(&self, point: Vec2, radius: f32) -> Vec<AgentId> {
        self.agent_grid.query_overlapping(point, radius)
    }

    /// Agents whose circle intersects `bounds`.
    #[must_use]
    pub fn agents_in_bounds(&self, bounds: Rect) -> Vec<AgentId> {
        self.agent_grid.query_bounds(bounds)
    }

    /// Agent pool report.
    #[must_use]
    pub fn agent_pool_stats(&self) -> PoolStats {
        self.agents.stats()
    }

    /// Projectile pool report.
    #[must_use]
    pub fn projectile_pool_stats(&self) -> PoolStats {
        self.projectiles.stats()
    }

    /// Full observability snapshot.
    #[must_use]
    pub fn stats(&self) -> SimStats {
        SimStats {
            now_ms: self.now_ms,
            wave: self.waves.wave(),
            wave_phase: self.waves.phase(),
            kills: self.waves.kills(),
            agent_pool: self.agents.stats(),
            projectile_pool: self.projectiles.stats(),
            target_cache: self.resolver.cache_stats(),
            collision: self.collision.stats(),
            agent_grid: self.agent_grid.occupancy(),
        }
    }

    /// Hash of the observable state: clock, wave progress and every live
    /// agent's id, position and health in id order. Equal seeds and inputs
    /// give equal hashes.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.now_ms.hash(&mut hasher);
        self.waves.wave().hash(&mut hasher);
        self.waves.kills().hash(&mut hasher);

        let mut agents: Vec<&Agent> = self.agents().collect();
        agents.sort_unstable_by_key(|agent| agent.id);
        for agent in agents {
            agent.id.hash(&mut hasher);
            agent.position.x.to_bits().hash(&mut hasher);
            agent.position.y.to_bits().hash(&mut hasher);
            agent.health.to_bits().hash(&mut hasher);
            agent.behavior.mode.hash(&mut hasher);
        }
        self.projectiles.active_count().hash(&mut hasher);
        hasher.finish()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Release everything and return to time zero. Callbacks survive.
    pub fn reset(&mut self) {
        let agents = self.agents.reset(self.now_ms);
        let projectiles = self.projectiles.reset(self.now_ms);
        self.agent_index.clear();
        self.agent_grid.clear();
        self.structure_grid.clear();
        self.structure_snapshot.clear();
        self.base_snapshot = None;
        self.resolver.clear();
        self.behavior.reset();
        self.collision.reset();
        self.waves.reset();
        self.movement.reseed(self.config.seed);
        self.now_ms = 0;
        self.last_maintenance_ms = 0;
        debug!(agents, projectiles, "Simulation reset");
    }

    /// Advance the simulation by `delta_ms`.
    pub fn tick(
        &mut self,
        delta_ms: u64,
        battlefield: &mut dyn Battlefield,
        terrain: &dyn Terrain,
    ) -> TickEvents {
        let flags = battlefield.flags();
        if flags.game_over {
            return TickEvents {
                now_ms: self.now_ms,
                skipped: Some(SkipReason::GameOver),
                wave_events: self.waves.update(self.now_ms, true),
                ..TickEvents::default()
            };
        }
        if flags.paused {
            return TickEvents {
                now_ms: self.now_ms,
                skipped: Some(SkipReason::Paused),
                ..TickEvents::default()
            };
        }

        self.now_ms += delta_ms;
        let now = self.now_ms;
        let dt = delta_ms as f32;
        let mut events = TickEvents {
            now_ms: now,
            wave_events: self.waves.update(now, false),
            ..TickEvents::default()
        };

        self.reclaim_expired(battlefield, &mut events);
        if now.saturating_sub(self.last_maintenance_ms) >= self.config.maintenance_interval_ms {
            events.maintenance = Some(self.maintain());
        }

        if self.waves.is_active() {
            self.spawn_scheduled(&mut events);
        }

        self.rebuild_grids(battlefield);

        if self.waves.is_active() {
            let removed = {
                let ctx = TargetContext {
                    structures: &self.structure_snapshot,
                    base: self.base_snapshot.as_ref(),
                    structure_grid: &self.structure_grid,
                    agent_grid: &self.agent_grid,
                };

                self.behavior.begin_tick(now);
                for handle in self.agents.active_handles() {
                    let Some(agent) = self.agents.get_mut(handle) else {
                        continue;
                    };
                    if agent.is_alive() && self.behavior.evaluate(agent, &ctx, now).is_some() {
                        events.behavior_transitions += 1;
                    }
                }
                self.behavior.finish_tick(&ctx);

                self.collision.begin_tick();
                let mut services = MoveServices {
                    resolver: &mut self.resolver,
                    behavior: &self.behavior,
                    collision: &mut self.collision,
                    targets: &ctx,
                    terrain,
                    battlefield: &mut *battlefield,
                };
                let report = self.movement.advance(&mut self.agents, &mut services, dt, now);

                for &(id, position, radius) in &report.moved {
                    if self.agent_index.contains_key(&id) {
                        self.agent_grid.update(id, position, radius);
                    }
                }
                report.removed
            };

            for (handle, id, cause) in removed {
                self.retire(handle, id, cause, battlefield, &mut events);
            }
        }

        let report = self.collision.advance_projectiles(
            &mut self.projectiles,
            &mut self.agents,
            &self.agent_index,
            &self.agent_grid,
            battlefield,
            dt,
        );
        events.projectile_hits = report.hits;
        for id in report.killed {
            if let Some(&handle) = self.agent_index.get(&id) {
                self.retire(handle, id, RemovalCause::Killed, battlefield, &mut events);
            }
        }
        for handle in report.spent {
            if self.projectiles.release(handle, now) {
                events.projectiles_spent += 1;
            }
        }

        self.sweep_invariants(battlefield, &mut events);
        events.wave_events.extend(self.waves.drain_events());
        events
    }

    // ------------------------------------------------------------------
    // Tick steps
    // ------------------------------------------------------------------

    fn reclaim_expired(&mut self, battlefield: &mut dyn Battlefield, events: &mut TickEvents) {
        let reclaimed = self.agents.drain_expired(self.now_ms);
        if !reclaimed.is_empty() {
            let mut ids: Vec<AgentId> = self
                .agent_index
                .iter()
                .filter(|(_, handle)| reclaimed.contains(handle))
                .map(|(&id, _)| id)
                .collect();
            ids.sort_unstable();
            for id in ids {
                self.forget(id);
                battlefield.remove_agent(id, RemovalCause::AutoReturned);
                events.removed.push((id, RemovalCause::AutoReturned));
                self.waves.record_kill();
            }
        }
        self.projectiles.drain_expired(self.now_ms);
    }

    fn maintain(&mut self) -> MaintenanceReport {
        self.last_maintenance_ms = self.now_ms;
        let report = MaintenanceReport {
            agents_dropped: self.agents.shrink(self.now_ms),
            projectiles_dropped: self.projectiles.shrink(self.now_ms),
            cache_swept: self.resolver.sweep(self.now_ms),
            groups_pruned: self.behavior.maintain(),
        };
        debug!(
            agents_dropped = report.agents_dropped,
            projectiles_dropped = report.projectiles_dropped,
            cache_swept = report.cache_swept,
            groups_pruned = report.groups_pruned,
            "Maintenance"
        );
        report
    }

    fn spawn_scheduled(&mut self, events: &mut TickEvents) {
        let due = self.waves.due_spawns(self.now_ms);
        let total = due.len();
        for (placed, request) in due.into_iter().enumerate() {
            match self.spawn_agent(&request.template, request.position) {
                Ok(id) => events.spawned.push(id),
                Err(err) => {
                    warn!(wave = request.wave, deferred = total - placed, error = %err, "Spawn deferred");
                    for _ in placed..total {
                        self.waves.defer_spawn(self.now_ms);
                    }
                    break;
                }
            }
        }
    }

    fn rebuild_grids(&mut self, battlefield: &dyn Battlefield) {
        self.structure_snapshot.clear();
        self.structure_snapshot
            .extend_from_slice(battlefield.structures());
        self.base_snapshot = battlefield.base().cloned();

        self.structure_grid.clear();
        for (index, structure) in self.structure_snapshot.iter().enumerate() {
            if structure.is_targetable() {
                self.structure_grid
                    .insert(index, structure.position, structure.radius);
            }
        }

        self.agent_grid.clear();
        for (_, agent) in self.agents.iter_active() {
            if agent.is_alive() {
                self.agent_grid.insert(agent.id, agent.position, agent.radius);
            }
        }
    }

    fn sweep_invariants(&mut self, battlefield: &mut dyn Battlefield, events: &mut TickEvents) {
        let violations: Vec<(PoolHandle<Agent>, AgentId, f32)> = self
            .agents
            .iter_active()
            .filter(|(_, agent)| !agent.is_alive() || !agent.position.is_finite())
            .map(|(handle, agent)| (handle, agent.id, agent.health))
            .collect();

        for (handle, id, health) in violations {
            error!(agent = %id, health, "Active agent violates invariants, removing");
            if cfg!(feature = "debug-validation") {
                panic!("agent {id} left active with health {health}");
            }
            self.retire(handle, id, RemovalCause::InvariantViolation, battlefield, events);
        }
    }

    /// Release an agent and notify everyone who tracks it.
    fn retire(
        &mut self,
        handle: PoolHandle<Agent>,
        id: AgentId,
        cause: RemovalCause,
        battlefield: &mut dyn Battlefield,
        events: &mut TickEvents,
    ) {
        if !self.detach(handle, id) {
            return;
        }
        battlefield.remove_agent(id, cause);
        events.removed.push((id, cause));
    }

    /// Release to the pool, drop index/grid/group state and count the kill.
    fn detach(&mut self, handle: PoolHandle<Agent>, id: AgentId) -> bool {
        if !self.agents.release(handle, self.now_ms) {
            return false;
        }
        self.forget(id);
        self.waves.record_kill();
        true
    }

    fn forget(&mut self, id: AgentId) {
        self.agent_index.remove(&id);
        self.agent_grid.remove(id);
        self.behavior.forget(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::BehaviorTag;
    use crate::wave::WaveConfig;
    use crate::world::{OpenTerrain, SlotBoard};

    fn quiet_config() -> SimConfig {
        SimConfig {
            wave: WaveConfig {
                base_required_kills: 3,
                scheduled_spawns: false,
                ..WaveConfig::default()
            },
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_paused_tick_does_not_advance_time() {
        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        let mut board = SlotBoard::default();
        board.flags.paused = true;
        let events = sim.tick(16, &mut board, &OpenTerrain);
        assert_eq!(events.skipped, Some(SkipReason::Paused));
        assert_eq!(sim.now_ms(), 0);
    }

    #[test]
    fn test_game_over_forces_wave_idle() {
        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        let mut board = SlotBoard::default();
        sim.start_wave(1);
        board.flags.game_over = true;
        let events = sim.tick(16, &mut board, &OpenTerrain);
        assert_eq!(events.skipped, Some(SkipReason::GameOver));
        assert!(events.spawned.is_empty());
        assert!(!sim.is_wave_active());
        assert!(!sim.start_wave(2));
    }

    #[test]
    fn test_wave_spawns_on_schedule() {
        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        let mut board = SlotBoard::new(vec![Structure::tower(Vec2::new(500.0, 500.0), 100.0)]);
        sim.start_wave(1);
        let first = sim.tick(16, &mut board, &OpenTerrain);
        assert_eq!(first.spawned.len(), 1);
        let second = sim.tick(16, &mut board, &OpenTerrain);
        assert!(second.spawned.is_empty());
        assert_eq!(sim.agent(first.spawned[0]).unwrap().wave, 1);
    }

    #[test]
    fn test_remove_agent_counts_kill_and_unindexes() {
        let mut sim = Simulation::new(quiet_config()).unwrap();
        sim.start_wave(1);
        let id = sim
            .spawn_agent(&AgentTemplate::default(), Vec2::new(100.0, 100.0))
            .unwrap();
        assert_eq!(sim.agents_in_radius(Vec2::new(100.0, 100.0), 1.0), vec![id]);

        sim.remove_agent(id).unwrap();
        assert!(sim.agent(id).is_none());
        assert!(sim.agents_in_radius(Vec2::new(100.0, 100.0), 1.0).is_empty());
        assert_eq!(sim.waves().kills(), 1);
        assert!(matches!(sim.remove_agent(id), Err(SimError::AgentNotFound(_))));
    }

    #[test]
    fn test_release_agent_is_idempotent() {
        let mut sim = Simulation::new(quiet_config()).unwrap();
        let handle = sim.acquire_agent().unwrap();
        assert!(sim.release_agent(handle));
        assert!(!sim.release_agent(handle));
        assert_eq!(sim.agent_count(), 0);
    }

    #[test]
    fn test_projectile_kill_releases_agent_and_projectile() {
        let mut sim = Simulation::new(quiet_config()).unwrap();
        let mut board = SlotBoard::default();
        let id = sim
            .spawn_agent(
                &AgentTemplate {
                    health: 10.0,
                    gold: 7,
                    ..Default::default()
                },
                Vec2::new(100.0, 100.0),
            )
            .unwrap();
        sim.fire_projectile(&ProjectileParams {
            origin: Vec2::new(95.0, 100.0),
            direction: Vec2::new(1.0, 0.0),
            ..Default::default()
        })
        .unwrap();

        let events = sim.tick(10, &mut board, &OpenTerrain);
        assert_eq!(events.removed, vec![(id, RemovalCause::Killed)]);
        assert_eq!(events.projectiles_spent, 1);
        assert_eq!(sim.agent_count(), 0);
        assert_eq!(sim.projectile_count(), 0);
        assert_eq!(board.gold, 7);
        assert_eq!(board.removals(RemovalCause::Killed), 1);
    }

    #[test]
    fn test_invariant_sweep_removes_dead_agents() {
        let mut sim = Simulation::new(quiet_config()).unwrap();
        let mut board = SlotBoard::default();
        let id = sim
            .spawn_agent(&AgentTemplate::default(), Vec2::new(100.0, 100.0))
            .unwrap();
        sim.agent_mut(id).unwrap().health = 0.0;

        let events = sim.tick(16, &mut board, &OpenTerrain);
        assert_eq!(events.count_removed(RemovalCause::InvariantViolation), 1);
        assert_eq!(sim.agent_count(), 0);
    }

    #[test]
    fn test_agents_hold_still_while_wave_idle() {
        let mut sim = Simulation::new(quiet_config()).unwrap();
        let mut board = SlotBoard::new(vec![Structure::tower(Vec2::new(500.0, 500.0), 100.0)]);
        let id = sim
            .spawn_agent(&AgentTemplate::default(), Vec2::new(100.0, 100.0))
            .unwrap();
        sim.tick(100, &mut board, &OpenTerrain);
        assert_eq!(sim.agent(id).unwrap().position, Vec2::new(100.0, 100.0));

        sim.start_wave(1);
        sim.tick(100, &mut board, &OpenTerrain);
        assert_ne!(sim.agent(id).unwrap().position, Vec2::new(100.0, 100.0));
    }

    #[test]
    fn test_maintenance_runs_on_interval() {
        let mut sim = Simulation::new(quiet_config()).unwrap();
        let mut board = SlotBoard::default();
        let interval = sim.config().maintenance_interval_ms;
        assert!(sim.tick(interval - 1, &mut board, &OpenTerrain).maintenance.is_none());
        assert!(sim.tick(1, &mut board, &OpenTerrain).maintenance.is_some());
        assert!(sim.tick(1, &mut board, &OpenTerrain).maintenance.is_none());
    }

    #[test]
    fn test_reset_releases_everything() {
        let mut sim = Simulation::new(quiet_config()).unwrap();
        let mut board = SlotBoard::default();
        sim.start_wave(1);
        for i in 0..4 {
            sim.spawn_agent(
                &AgentTemplate {
                    tag: BehaviorTag::Rage,
                    ..Default::default()
                },
                Vec2::new(100.0 + i as f32, 100.0),
            )
            .unwrap();
        }
        sim.fire_projectile(&ProjectileParams::default()).unwrap();
        sim.tick(16, &mut board, &OpenTerrain);

        sim.reset();
        assert_eq!(sim.agent_count(), 0);
        assert_eq!(sim.projectile_count(), 0);
        assert_eq!(sim.now_ms(), 0);
        assert_eq!(sim.waves().phase(), WavePhase::Idle);
        assert!(sim.agents_in_radius(Vec2::new(100.0, 100.0), 50.0).is_empty());
    }

    #[test]
    fn test_far_out_of_world_spawn_clamps() {
        let mut sim = Simulation::new(quiet_config()).unwrap();
        let mut board = SlotBoard::default();
        let far = sim
            .spawn_agent(&AgentTemplate::default(), Vec2::new(-1.0e21, 500.0))
            .unwrap();
        let near = sim
            .spawn_agent(&AgentTemplate::default(), Vec2::new(500.0, 500.0))
            .unwrap();

        let mut found = sim.agents_in_radius(Vec2::new(500.0, 500.0), 1.0e21);
        found.sort_unstable();
        assert_eq!(found, vec![far, near]);
        assert_eq!(sim.agents_in_radius(Vec2::new(-1.0e21, 500.0), 1.0), vec![far]);

        sim.tick(16, &mut board, &OpenTerrain);
        assert_eq!(sim.agent_count(), 2);
    }

    #[test]
    fn test_stats_report_pools() {
        let mut sim = Simulation::new(quiet_config()).unwrap();
        sim.spawn_agent(&AgentTemplate::default(), Vec2::ZERO).unwrap();
        let stats = sim.stats();
        assert_eq!(stats.agent_pool.active_count, 1);
        assert_eq!(stats.agent_pool.name, "agents");
        assert_eq!(stats.projectile_pool.active_count, 0);
    }
}
