//! Agent movement.
//!
//! Each tick every unfrozen agent:
//!
//! 1. resolves a target (its group's shared target, else the resolver's),
//! 2. takes the unit direction toward it (a random unit vector when it sits
//!    exactly on the target),
//! 3. adds repulsion from nearby structures and a trajectory perturbation,
//! 4. renormalizes and steps `speed × behavior × terrain × dt`, stopping at
//!    contact distance rather than passing through the target,
//! 5. hands contact to the [`CollisionResolver`].
//!
//! Agents without any target hold position.

use std::f32::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::behavior::BehaviorController;
use crate::collision::{CollisionResolver, ContactOutcome};
use crate::components::{Agent, AgentId, BehaviorMode, BehaviorTag, RemovalCause, TargetRef};
use crate::error::{Result, SimError};
use crate::math::Vec2;
use crate::pool::{ObjectPool, PoolHandle};
use crate::targeting::{TargetContext, TargetResolver};
use crate::world::{Battlefield, Terrain};

/// Avoidance and trajectory tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Structures closer than this push agents away.
    pub avoidance_radius: f32,
    /// Repulsion at the edge of the avoidance radius.
    pub avoidance_weight: f32,
    /// Cap on the summed repulsion, kept below 1 so agents still advance.
    pub max_avoidance: f32,
    /// Lateral amplitude of the gentle curve.
    pub curve_amplitude: f32,
    /// Angular frequency of the curve, radians per millisecond.
    pub curve_frequency: f32,
    /// Lateral amplitude of the zigzag.
    pub zigzag_amplitude: f32,
    /// Angular frequency of the zigzag.
    pub zigzag_frequency: f32,
    /// Forward amplification while rushing.
    pub rush_bias: f32,
    /// Lateral amplitude of the low drift.
    pub drift_amplitude: f32,
    /// Angular frequency of the low drift.
    pub drift_frequency: f32,
    /// Amplitude of the second drift component.
    pub secondary_drift_amplitude: f32,
    /// Angular frequency of the second drift component.
    pub secondary_drift_frequency: f32,
    /// Bound of the random lateral jitter while fleeing.
    pub erratic_amplitude: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            avoidance_radius: 60.0,
            avoidance_weight: 0.4,
            max_avoidance: 0.8,
            curve_amplitude: 0.35,
            curve_frequency: 0.002,
            zigzag_amplitude: 0.8,
            zigzag_frequency: 0.008,
            rush_bias: 1.6,
            drift_amplitude: 0.25,
            drift_frequency: 0.003,
            secondary_drift_amplitude: 0.15,
            secondary_drift_frequency: 0.011,
            erratic_amplitude: 0.9,
        }
    }
}

impl MovementConfig {
    /// Check values are in range.
    pub fn validate(&self) -> Result<()> {
        if self.avoidance_radius < 0.0 || self.avoidance_weight < 0.0 {
            return Err(SimError::InvalidConfig(
                "movement: avoidance radius and weight must not be negative".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.max_avoidance) {
            return Err(SimError::InvalidConfig(format!(
                "movement: max_avoidance must be within 0..1, got {}",
                self.max_avoidance
            )));
        }
        if self.rush_bias < 1.0 {
            return Err(SimError::InvalidConfig(format!(
                "movement: rush_bias must be at least 1, got {}",
                self.rush_bias
            )));
        }
        Ok(())
    }
}

/// Trajectory shape applied on top of the direction to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trajectory {
    /// Straight at the target.
    Direct,
    /// Slow sinusoidal bend.
    Curve,
    /// Fast sinusoidal lateral offset.
    Zigzag,
    /// Amplified forward bias.
    Rush,
    /// Low-amplitude sinusoidal drift.
    Drift,
    /// Two superimposed drifts.
    DualDrift,
    /// High-amplitude random jitter.
    Erratic,
}

impl Trajectory {
    /// Shape for a tag in a mode. Fleeing is always erratic and group
    /// attacks always rush.
    #[must_use]
    pub const fn select(tag: BehaviorTag, mode: BehaviorMode) -> Self {
        match mode {
            BehaviorMode::Flee => Self::Erratic,
            BehaviorMode::GroupAttack => Self::Rush,
            BehaviorMode::Normal => match tag {
                BehaviorTag::Normal => Self::Direct,
                BehaviorTag::Group => Self::Curve,
                BehaviorTag::Avoid => Self::Zigzag,
                BehaviorTag::Tank | BehaviorTag::Rage | BehaviorTag::Boss => Self::Rush,
                BehaviorTag::Stealth => Self::Drift,
                BehaviorTag::Ghost => Self::DualDrift,
                BehaviorTag::Flee => Self::Erratic,
            },
        }
    }
}

/// Movement pass output.
#[derive(Debug, Clone, Default)]
pub struct MovementReport {
    /// Agents whose position changed, with their new circle.
    pub moved: Vec<(AgentId, Vec2, f32)>,
    /// Agents destroyed on contact; must be released this tick.
    pub removed: Vec<(PoolHandle<Agent>, AgentId, RemovalCause)>,
    /// Agents that held position for lack of a target.
    pub holding: u32,
    /// Agents skipped while frozen.
    pub frozen: u32,
}

/// Collaborators for one movement pass.
pub struct MoveServices<'s, 'a> {
    /// Target selection.
    pub resolver: &'s mut TargetResolver,
    /// Group targets.
    pub behavior: &'s BehaviorController,
    /// Contact handling.
    pub collision: &'s mut CollisionResolver,
    /// Snapshot of the battlefield for this tick.
    pub targets: &'s TargetContext<'a>,
    /// Speed modifiers.
    pub terrain: &'s dyn Terrain,
    /// Outcome sink for contacts.
    pub battlefield: &'s mut dyn Battlefield,
}

/// Moves agents toward their targets.
#[derive(Debug, Clone)]
pub struct MovementEngine {
    config: MovementConfig,
    rng: StdRng,
}

impl MovementEngine {
    /// Create an engine with a seeded random source.
    #[must_use]
    pub fn new(config: MovementConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    /// Reseed the random source.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Uniformly random unit vector.
    pub fn random_unit(&mut self) -> Vec2 {
        Vec2::from_angle(self.rng.random_range(0.0..TAU))
    }

    /// Random trajectory phase for a new agent.
    pub fn random_phase(&mut self) -> f32 {
        self.rng.random_range(0.0..TAU)
    }

    /// Move every active agent once.
    pub fn advance(
        &mut self,
        agents: &mut ObjectPool<Agent>,
        services: &mut MoveServices<'_, '_>,
        dt_ms: f32,
        now_ms: u64,
    ) -> MovementReport {
        let mut report = MovementReport::default();

        for handle in agents.active_handles() {
            let Some(agent) = agents.get_mut(handle) else {
                continue;
            };
            if !agent.is_alive() {
                continue;
            }
            if agent.is_frozen(now_ms) {
                report.frozen += 1;
                continue;
            }

            let target = services
                .behavior
                .group_target(agent)
                .filter(|&t| services.targets.is_valid(t))
                .or_else(|| services.resolver.resolve(agent, services.targets, now_ms));
            let Some((target, target_pos, target_radius)) = target.and_then(|t| {
                services
                    .targets
                    .locate(t)
                    .map(|(pos, radius)| (t, pos, radius))
            }) else {
                report.holding += 1;
                continue;
            };

            let start = agent.position;
            let (approach, contact) =
                self.step(agent, target_pos, target_radius, services, dt_ms, now_ms);

            if contact {
                match services.collision.resolve_contact(
                    agent,
                    target,
                    approach,
                    services.battlefield,
                    now_ms,
                ) {
                    ContactOutcome::Destroyed(cause) => {
                        report.removed.push((handle, agent.id, cause));
                        continue;
                    }
                    ContactOutcome::Repelled | ContactOutcome::Ignored => {}
                }
            }

            if agent.position != start {
                report.moved.push((agent.id, agent.position, agent.radius));
            }
        }
        report
    }

    /// Move one agent toward a target circle. Returns the direction moved
    /// and whether the agent ended in contact.
    fn step(
        &mut self,
        agent: &mut Agent,
        target_pos: Vec2,
        target_radius: f32,
        services: &MoveServices<'_, '_>,
        dt_ms: f32,
        now_ms: u64,
    ) -> (Vec2, bool) {
        let contact_reach = agent.radius + target_radius;
        let to_target = target_pos - agent.position;
        let distance = to_target.length();
        let base = match to_target.try_normalize() {
            Some(dir) => dir,
            None => self.random_unit(),
        };

        if services
            .collision
            .in_contact(agent.position, agent.radius, target_pos, target_radius)
        {
            return (base, true);
        }

        let direction = self.direction(agent, base, target_pos, services, now_ms);
        let speed = agent.speed
            * agent.behavior.speed_multiplier
            * services.terrain.speed_multiplier(agent.position).max(0.0);
        let step = (speed * dt_ms).max(0.0);

        let remaining = distance - contact_reach;
        if agent.behavior.forward_bias > 0.0 && step >= remaining {
            // Final approach: land exactly at contact distance.
            agent.position = target_pos - base * contact_reach;
            return (base, true);
        }

        agent.position += direction * step;
        let contact = services
            .collision
            .in_contact(agent.position, agent.radius, target_pos, target_radius);
        (direction, contact)
    }

    /// Final unit direction from the base direction, avoidance and trajectory.
    fn direction(
        &mut self,
        agent: &Agent,
        base: Vec2,
        target_pos: Vec2,
        services: &MoveServices<'_, '_>,
        now_ms: u64,
    ) -> Vec2 {
        let trajectory = Trajectory::select(agent.tag, agent.behavior.mode);
        let c = &self.config;
        let bias = agent.behavior.forward_bias;

        let forward = match trajectory {
            Trajectory::Rush => base * (bias * c.rush_bias),
            _ => base * bias,
        };
        let elapsed = now_ms.saturating_sub(agent.spawned_at_ms) as f32;
        let phase = agent.phase_offset;
        let lateral_amount = match trajectory {
            Trajectory::Direct | Trajectory::Rush => 0.0,
            Trajectory::Curve => c.curve_amplitude * (elapsed * c.curve_frequency + phase).sin(),
            Trajectory::Zigzag => c.zigzag_amplitude * (elapsed * c.zigzag_frequency + phase).sin(),
            Trajectory::Drift => c.drift_amplitude * (elapsed * c.drift_frequency + phase).sin(),
            Trajectory::DualDrift => {
                c.drift_amplitude * (elapsed * c.drift_frequency + phase).sin()
                    + c.secondary_drift_amplitude
                        * (elapsed * c.secondary_drift_frequency + 2.0 * phase).sin()
            }
            Trajectory::Erratic => {
                let bound = c.erratic_amplitude;
                self.rng.random_range(-bound..=bound)
            }
        };
        let lateral = base.perp() * lateral_amount;
        let avoidance = self.avoidance(agent.position, target_pos, services);

        match (forward + lateral + avoidance).try_normalize() {
            Some(dir) => dir,
            None => self.random_unit(),
        }
    }

    /// Repulsion from occupied structures within the avoidance radius, each
    /// weighted by `radius / distance`. The target itself does not repel.
    fn avoidance(&self, position: Vec2, target_pos: Vec2, services: &MoveServices<'_, '_>) -> Vec2 {
        let c = &self.config;
        if c.avoidance_weight <= 0.0 || c.avoidance_radius <= 0.0 {
            return Vec2::ZERO;
        }
        let mut push = Vec2::ZERO;
        for index in services
            .targets
            .structure_grid
            .query_radius(position, c.avoidance_radius)
        {
            let Some(structure) = services.targets.structures.get(index) else {
                continue;
            };
            if !structure.occupied || structure.position == target_pos {
                continue;
            }
            let away = position - structure.position;
            let distance = away.length().max(1.0);
            if let Some(unit) = away.try_normalize() {
                push += unit * (c.avoidance_weight * c.avoidance_radius / distance);
            }
        }
        let magnitude = push.length();
        if magnitude > c.max_avoidance {
            push = push * (c.max_avoidance / magnitude);
        }
        push
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorConfig;
    use crate::collision::CollisionConfig;
    use crate::components::{AgentTemplate, Structure};
    use crate::pool::PoolConfig;
    use crate::spatial::{GridConfig, SpatialGrid};
    use crate::targeting::TargetingConfig;
    use crate::world::{OpenTerrain, SlotBoard, TrenchTerrain};
    use crate::math::Rect;

    struct Rig {
        agents: ObjectPool<Agent>,
        board: SlotBoard,
        structure_grid: SpatialGrid<usize>,
        agent_grid: SpatialGrid<AgentId>,
        resolver: TargetResolver,
        behavior: BehaviorController,
        collision: CollisionResolver,
        engine: MovementEngine,
    }

    impl Rig {
        fn new(structures: Vec<Structure>) -> Self {
            let mut structure_grid = SpatialGrid::new(GridConfig::default()).unwrap();
            for (index, s) in structures.iter().enumerate() {
                structure_grid.insert(index, s.position, s.radius);
            }
            Self {
                agents: ObjectPool::new(PoolConfig::named("agents")).unwrap(),
                board: SlotBoard::new(structures),
                structure_grid,
                agent_grid: SpatialGrid::new(GridConfig::default()).unwrap(),
                resolver: TargetResolver::new(TargetingConfig::default()),
                behavior: BehaviorController::new(BehaviorConfig::default()),
                collision: CollisionResolver::new(CollisionConfig::default()),
                engine: MovementEngine::new(MovementConfig::default(), 7),
            }
        }

        fn spawn(&mut self, template: &AgentTemplate, at: Vec2) -> PoolHandle<Agent> {
            let handle = self.agents.acquire(0).unwrap();
            let agent = self.agents.get_mut(handle).unwrap();
            agent.apply_template(template);
            agent.id = AgentId(u64::from(handle.index()) + 1);
            agent.position = at;
            handle
        }

        fn tick(&mut self, terrain: &dyn Terrain, dt: f32, now: u64) -> MovementReport {
            self.collision.begin_tick();
            let snapshot = self.board.structures.clone();
            let targets = TargetContext {
                structures: &snapshot,
                base: None,
                structure_grid: &self.structure_grid,
                agent_grid: &self.agent_grid,
            };
            let mut services = MoveServices {
                resolver: &mut self.resolver,
                behavior: &self.behavior,
                collision: &mut self.collision,
                targets: &targets,
                terrain,
                battlefield: &mut self.board,
            };
            self.engine.advance(&mut self.agents, &mut services, dt, now)
        }

        fn position(&self, handle: PoolHandle<Agent>) -> Vec2 {
            self.agents.get(handle).unwrap().position
        }
    }

    fn walker(speed: f32) -> AgentTemplate {
        AgentTemplate {
            speed,
            ..Default::default()
        }
    }

    #[test]
    fn test_direct_step_toward_target() {
        let mut rig = Rig::new(vec![Structure::tower(Vec2::new(500.0, 0.0), 100.0)]);
        let handle = rig.spawn(&walker(0.1), Vec2::ZERO);
        let report = rig.tick(&OpenTerrain, 100.0, 100);
        let pos = rig.position(handle);
        assert!((pos.x - 10.0).abs() < 1e-4);
        assert!(pos.y.abs() < 1e-4);
        assert_eq!(report.moved.len(), 1);
    }

    #[test]
    fn test_final_step_stops_at_contact_distance() {
        let mut tower = Structure::tower(Vec2::new(100.0, 0.0), 100.0);
        tower.wall_strength = 1_000.0;
        let mut rig = Rig::new(vec![tower]);
        let handle = rig.spawn(&walker(1.0), Vec2::ZERO);
        rig.tick(&OpenTerrain, 1_000.0, 1_000);
        // Landed at 100 - 24 = 76, then bounced off the wall.
        let pos = rig.position(handle);
        assert!(pos.x < 76.0);
        assert!(rig.agents.get(handle).unwrap().is_frozen(1_000));
    }

    #[test]
    fn test_frozen_agents_do_not_move() {
        let mut rig = Rig::new(vec![Structure::tower(Vec2::new(500.0, 0.0), 100.0)]);
        let handle = rig.spawn(&walker(0.1), Vec2::ZERO);
        rig.agents.get_mut(handle).unwrap().freeze_until_ms = Some(200);
        let report = rig.tick(&OpenTerrain, 100.0, 100);
        assert_eq!(report.frozen, 1);
        assert_eq!(rig.position(handle), Vec2::ZERO);
    }

    #[test]
    fn test_hold_position_without_target() {
        let mut rig = Rig::new(Vec::new());
        let handle = rig.spawn(&walker(0.1), Vec2::new(10.0, 10.0));
        let report = rig.tick(&OpenTerrain, 100.0, 100);
        assert_eq!(report.holding, 1);
        assert_eq!(rig.position(handle), Vec2::new(10.0, 10.0));
    }

    #[test]
    fn test_trench_slows_movement() {
        let mut rig = Rig::new(vec![Structure::tower(Vec2::new(500.0, 0.0), 100.0)]);
        let handle = rig.spawn(&walker(0.1), Vec2::ZERO);
        let trench = TrenchTerrain {
            zones: vec![Rect::from_corners(Vec2::new(-50.0, -50.0), Vec2::new(50.0, 50.0))],
            multiplier: 0.5,
        };
        rig.tick(&trench, 100.0, 100);
        assert!((rig.position(handle).x - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_fleeing_agent_moves_away() {
        let mut rig = Rig::new(vec![Structure::tower(Vec2::new(500.0, 500.0), 100.0)]);
        let handle = rig.spawn(&walker(0.1), Vec2::new(300.0, 300.0));
        {
            let agent = rig.agents.get_mut(handle).unwrap();
            agent.behavior.mode = BehaviorMode::Flee;
            agent.behavior.forward_bias = -1.0;
        }
        let before = rig.position(handle).distance(Vec2::new(500.0, 500.0));
        rig.tick(&OpenTerrain, 100.0, 100);
        let after = rig.position(handle).distance(Vec2::new(500.0, 500.0));
        assert!(after > before);
    }

    #[test]
    fn test_crash_reports_removal() {
        let mut rig = Rig::new(vec![Structure::tower(Vec2::new(30.0, 0.0), 50.0)]);
        let handle = rig.spawn(&walker(0.1), Vec2::ZERO);
        let report = rig.tick(&OpenTerrain, 100.0, 100);
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].0, handle);
        assert_eq!(report.removed[0].2, RemovalCause::Crashed);
        assert!(report.moved.is_empty());
    }

    #[test]
    fn test_avoidance_bends_path_around_structures() {
        // A weakened tower lures a stealth agent past a healthy one.
        let mut target = Structure::tower(Vec2::new(600.0, 100.0), 100.0);
        target.health = 1.0;
        let obstacle = Structure::tower(Vec2::new(130.0, 130.0), 100.0);
        let mut rig = Rig::new(vec![target, obstacle]);
        let stealth = AgentTemplate {
            tag: BehaviorTag::Stealth,
            ..walker(0.1)
        };
        let handle = rig.spawn(&stealth, Vec2::new(100.0, 100.0));
        rig.tick(&OpenTerrain, 100.0, 100);
        // Straight line would keep y at 100; the obstacle above pushes down.
        assert!(rig.position(handle).y < 100.0);
    }

    #[test]
    fn test_trajectory_selection() {
        assert_eq!(
            Trajectory::select(BehaviorTag::Avoid, BehaviorMode::Normal),
            Trajectory::Zigzag
        );
        assert_eq!(
            Trajectory::select(BehaviorTag::Ghost, BehaviorMode::Normal),
            Trajectory::DualDrift
        );
        assert_eq!(
            Trajectory::select(BehaviorTag::Normal, BehaviorMode::Flee),
            Trajectory::Erratic
        );
        assert_eq!(
            Trajectory::select(BehaviorTag::Tank, BehaviorMode::GroupAttack),
            Trajectory::Rush
        );
    }

    #[test]
    fn test_random_unit_is_unit() {
        let mut engine = MovementEngine::new(MovementConfig::default(), 1);
        for _ in 0..32 {
            assert!((engine.random_unit().length() - 1.0).abs() < 1e-4);
        }
    }
}
