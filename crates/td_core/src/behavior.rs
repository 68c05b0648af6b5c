//! Per-agent behavior modes.
//!
//! Agents switch between [`BehaviorMode::Normal`], [`BehaviorMode::Flee`]
//! and [`BehaviorMode::GroupAttack`] based on neighbor counts and health.
//! Evaluation is throttled to one full pass per `evaluation_window_ms`,
//! except that an expired flee always ends on the next call.
//!
//! # Transitions
//!
//! | From | To | Trigger |
//! |------|----|---------|
//! | normal | flee | boss at or below its flee threshold; avoid with crowded structures and few allies; ghost below `ghost_flee_ratio` |
//! | normal | group | tank with `tank_group_min` neighbors; rage healthy with a neighbor; minion-spawning boss with `boss_minion_group_min` neighbors; group-tagged with `pack_min` neighbors |
//! | group | normal | trigger no longer holds |
//! | flee | normal | `max_flee_ms` elapsed, regardless of conditions |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::components::{Agent, AgentId, BehaviorMode, BehaviorTag, GroupId, TargetRef};
use crate::error::{Result, SimError};
use crate::math::Vec2;
use crate::targeting::TargetContext;

/// Mode transition thresholds and movement parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Minimum time between full evaluations of one agent.
    pub evaluation_window_ms: u64,
    /// Radius for counting neighboring agents.
    pub neighbor_radius: f32,
    /// Radius for counting nearby structures.
    pub structure_radius: f32,
    /// Longest time an agent may flee.
    pub max_flee_ms: u64,
    /// Flee cannot be re-entered for this long after it ends.
    pub flee_cooldown_ms: u64,
    /// Avoid-tagged agents flee when nearby structures exceed this.
    pub avoid_structure_threshold: usize,
    /// ...and nearby agents do not exceed this.
    pub avoid_agent_ceiling: usize,
    /// Ghost-tagged agents flee below this health ratio.
    pub ghost_flee_ratio: f32,
    /// Neighbors needed for a tank to group up.
    pub tank_group_min: usize,
    /// Health ratio at or above which rage agents group up.
    pub rage_health_ratio: f32,
    /// Neighbors needed for rage agents to group up.
    pub rage_group_min: usize,
    /// Neighbors needed for a minion-spawning boss to group up.
    pub boss_minion_group_min: usize,
    /// Neighbors needed for group-tagged agents to form a pack.
    pub pack_min: usize,
    /// Agents join an existing group whose centroid is this close.
    pub group_join_radius: f32,
    /// Group membership is rebuilt at this interval.
    pub group_refresh_ms: u64,
    /// Speed multiplier while fleeing.
    pub flee_speed_multiplier: f32,
    /// Speed multiplier while attacking in a group.
    pub group_speed_multiplier: f32,
    /// Additional speed fraction per boss phase.
    pub boss_phase_speed_bonus: f32,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            evaluation_window_ms: 50,
            neighbor_radius: 100.0,
            structure_radius: 150.0,
            max_flee_ms: 3_000,
            flee_cooldown_ms: 1_000,
            avoid_structure_threshold: 2,
            avoid_agent_ceiling: 1,
            ghost_flee_ratio: 0.3,
            tank_group_min: 3,
            rage_health_ratio: 0.7,
            rage_group_min: 1,
            boss_minion_group_min: 5,
            pack_min: 2,
            group_join_radius: 120.0,
            group_refresh_ms: 500,
            flee_speed_multiplier: 1.4,
            group_speed_multiplier: 1.15,
            boss_phase_speed_bonus: 0.15,
        }
    }
}

impl BehaviorConfig {
    /// Check values are in range.
    pub fn validate(&self) -> Result<()> {
        if self.max_flee_ms == 0 {
            return Err(SimError::InvalidConfig(
                "behavior: max_flee_ms must be positive".to_string(),
            ));
        }
        if self.group_refresh_ms == 0 {
            return Err(SimError::InvalidConfig(
                "behavior: group_refresh_ms must be positive".to_string(),
            ));
        }
        if self.flee_speed_multiplier < 0.0 || self.group_speed_multiplier < 0.0 {
            return Err(SimError::InvalidConfig(
                "behavior: speed multipliers must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Group {
    id: GroupId,
    members: Vec<(AgentId, Vec2)>,
    position_sum: Vec2,
    target: Option<TargetRef>,
}

impl Group {
    fn centroid(&self) -> Vec2 {
        if self.members.is_empty() {
            return self.position_sum;
        }
        self.position_sum * (1.0 / self.members.len() as f32)
    }
}

/// Attack groups and their shared targets.
#[derive(Debug, Clone, Default)]
pub struct GroupTracker {
    groups: Vec<Group>,
    membership: HashMap<AgentId, GroupId>,
    next_id: u32,
    refreshed_at_ms: Option<u64>,
}

impl GroupTracker {
    /// Start a tick; dissolves all groups once the refresh window passed.
    pub fn begin_tick(&mut self, now_ms: u64, refresh_ms: u64) {
        let due = self
            .refreshed_at_ms
            .map_or(true, |at| now_ms.saturating_sub(at) >= refresh_ms);
        if due {
            self.groups.clear();
            self.membership.clear();
            self.refreshed_at_ms = Some(now_ms);
        }
    }

    /// Group of `id`, joining or founding one when needed.
    pub fn join(&mut self, id: AgentId, position: Vec2, join_radius: f32) -> GroupId {
        if let Some(&group) = self.membership.get(&id) {
            return group;
        }
        let join_sq = join_radius * join_radius;
        let nearest = self
            .groups
            .iter_mut()
            .map(|g| {
                let d = g.centroid().distance_squared(position);
                (g, d)
            })
            .filter(|(_, d)| *d <= join_sq)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(g, _)| g);

        let group_id = if let Some(group) = nearest {
            group.members.push((id, position));
            group.position_sum += position;
            group.id
        } else {
            let group_id = GroupId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            self.groups.push(Group {
                id: group_id,
                members: vec![(id, position)],
                position_sum: position,
                target: None,
            });
            group_id
        };
        self.membership.insert(id, group_id);
        group_id
    }

    /// Remove `id` from its group, if any.
    pub fn leave(&mut self, id: AgentId) {
        let Some(group_id) = self.membership.remove(&id) else {
            return;
        };
        if let Some(group) = self.groups.iter_mut().find(|g| g.id == group_id) {
            if let Some(slot) = group.members.iter().position(|&(m, _)| m == id) {
                let (_, joined_at) = group.members.swap_remove(slot);
                group.position_sum = group.position_sum - joined_at;
            }
        }
    }

    /// Drop groups without members, returning how many were dropped.
    pub fn prune(&mut self) -> usize {
        let before = self.groups.len();
        self.groups.retain(|g| !g.members.is_empty());
        before - self.groups.len()
    }

    /// Give every group the target nearest its centroid.
    pub fn assign_targets(&mut self, ctx: &TargetContext<'_>) {
        for group in &mut self.groups {
            let keep = group.target.filter(|&t| ctx.is_valid(t));
            group.target = match keep {
                Some(t) => Some(t),
                None => ctx.nearest(group.centroid()),
            };
        }
    }

    /// Shared target of a group.
    #[must_use]
    pub fn target_of(&self, group: GroupId) -> Option<TargetRef> {
        self.groups
            .iter()
            .find(|g| g.id == group)
            .and_then(|g| g.target)
    }

    /// Members of a group, in join order until someone leaves.
    #[must_use]
    pub fn members(&self, group: GroupId) -> Vec<AgentId> {
        self.groups
            .iter()
            .find(|g| g.id == group)
            .map(|g| g.members.iter().map(|&(id, _)| id).collect())
            .unwrap_or_default()
    }

    /// Group of an agent.
    #[must_use]
    pub fn group_of(&self, id: AgentId) -> Option<GroupId> {
        self.membership.get(&id).copied()
    }

    /// Number of groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// True when no group exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Forget every group.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.membership.clear();
        self.refreshed_at_ms = None;
    }
}

/// Assigns behavior modes and the movement parameters that go with them.
#[derive(Debug, Clone)]
pub struct BehaviorController {
    config: BehaviorConfig,
    groups: GroupTracker,
}

impl BehaviorController {
    /// Create a controller with no groups.
    #[must_use]
    pub fn new(config: BehaviorConfig) -> Self {
        Self {
            config,
            groups: GroupTracker::default(),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &BehaviorConfig {
        &self.config
    }

    /// Group tracker.
    #[must_use]
    pub fn groups(&self) -> &GroupTracker {
        &self.groups
    }

    /// Start of the behavior pass for a tick.
    pub fn begin_tick(&mut self, now_ms: u64) {
        self.groups.begin_tick(now_ms, self.config.group_refresh_ms);
    }

    /// End of the behavior pass: share targets within groups.
    pub fn finish_tick(&mut self, ctx: &TargetContext<'_>) {
        self.groups.prune();
        self.groups.assign_targets(ctx);
    }

    /// Shared target for an agent in group-attack mode.
    #[must_use]
    pub fn group_target(&self, agent: &Agent) -> Option<TargetRef> {
        match (agent.behavior.mode, agent.behavior.group) {
            (BehaviorMode::GroupAttack, Some(group)) => self.groups.target_of(group),
            _ => None,
        }
    }

    /// An agent left the simulation.
    pub fn forget(&mut self, id: AgentId) {
        self.groups.leave(id);
    }

    /// Drop expired group state.
    pub fn maintain(&mut self) -> usize {
        self.groups.prune()
    }

    /// Forget every group.
    pub fn reset(&mut self) {
        self.groups.clear();
    }

    /// Evaluate one agent, returning the new mode when it changed.
    pub fn evaluate(
        &mut self,
        agent: &mut Agent,
        ctx: &TargetContext<'_>,
        now_ms: u64,
    ) -> Option<BehaviorMode> {
        Self::advance_boss_phase(agent);

        let state = &agent.behavior;
        let fled_too_long = state.mode == BehaviorMode::Flee
            && now_ms.saturating_sub(state.mode_since_ms) >= self.config.max_flee_ms;
        let within_window = state
            .evaluated_at_ms
            .is_some_and(|at| now_ms.saturating_sub(at) < self.config.evaluation_window_ms);

        let next = if fled_too_long {
            agent.behavior.flee_cooldown_until_ms = now_ms + self.config.flee_cooldown_ms;
            BehaviorMode::Normal
        } else if within_window {
            self.refresh_group(agent);
            self.apply_parameters(agent);
            return None;
        } else {
            self.desired_mode(agent, ctx, now_ms)
        };
        agent.behavior.evaluated_at_ms = Some(now_ms);

        let previous = agent.behavior.mode;
        if next != previous {
            trace!(agent = %agent.id, from = ?previous, to = ?next, "Behavior transition");
            agent.behavior.mode = next;
            agent.behavior.mode_since_ms = now_ms;
            if previous == BehaviorMode::GroupAttack {
                self.groups.leave(agent.id);
                agent.behavior.group = None;
            }
        }
        self.refresh_group(agent);
        self.apply_parameters(agent);
        (next != previous).then_some(next)
    }

    fn advance_boss_phase(agent: &mut Agent) {
        let ratio = agent.health_ratio();
        if let Some(boss) = agent.boss.as_mut() {
            let phase = boss.phase_for(ratio);
            if phase > boss.phase {
                tracing::debug!(agent = %agent.id, phase, "Boss phase advanced");
                boss.phase = phase;
            }
        }
    }

    fn desired_mode(&self, agent: &Agent, ctx: &TargetContext<'_>, now_ms: u64) -> BehaviorMode {
        let c = &self.config;
        if agent.behavior.mode == BehaviorMode::Flee {
            return BehaviorMode::Flee;
        }

        let ratio = agent.health_ratio();
        let allies = ctx
            .agent_grid
            .count_within(agent.position, c.neighbor_radius, Some(agent.id));

        let may_flee = now_ms >= agent.behavior.flee_cooldown_until_ms;
        let flee = may_flee
            && match agent.tag {
                BehaviorTag::Boss => agent
                    .boss
                    .as_ref()
                    .is_some_and(|boss| ratio <= boss.flee_threshold),
                BehaviorTag::Avoid => {
                    let structures =
                        ctx.structure_grid
                            .count_within(agent.position, c.structure_radius, None);
                    structures > c.avoid_structure_threshold && allies <= c.avoid_agent_ceiling
                }
                BehaviorTag::Ghost => ratio < c.ghost_flee_ratio,
                _ => false,
            };
        if flee {
            return BehaviorMode::Flee;
        }

        let group = match agent.tag {
            BehaviorTag::Tank => allies >= c.tank_group_min,
            BehaviorTag::Rage => ratio >= c.rage_health_ratio && allies >= c.rage_group_min,
            BehaviorTag::Boss => agent
                .boss
                .as_ref()
                .is_some_and(|boss| boss.spawns_minions && allies >= c.boss_minion_group_min),
            BehaviorTag::Group => allies >= c.pack_min,
            _ => false,
        };
        if group {
            BehaviorMode::GroupAttack
        } else {
            BehaviorMode::Normal
        }
    }

    fn refresh_group(&mut self, agent: &mut Agent) {
        agent.behavior.group = if agent.behavior.mode == BehaviorMode::GroupAttack {
            Some(
                self.groups
                    .join(agent.id, agent.position, self.config.group_join_radius),
            )
        } else {
            None
        };
    }

    fn apply_parameters(&self, agent: &mut Agent) {
        let c = &self.config;
        let (speed, bias) = match agent.behavior.mode {
            BehaviorMode::Normal => (1.0, 1.0),
            BehaviorMode::Flee => (c.flee_speed_multiplier, -1.0),
            BehaviorMode::GroupAttack => (c.group_speed_multiplier, 1.0),
        };
        let phase = agent.boss.as_ref().map_or(0, |boss| boss.phase);
        agent.behavior.speed_multiplier = speed * (1.0 + phase as f32 * c.boss_phase_speed_bonus);
        agent.behavior.forward_bias = bias;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BossProfile, Structure};
    use crate::spatial::{GridConfig, SpatialGrid};
    use proptest::prelude::*;

    struct Fixture {
        structures: Vec<Structure>,
        structure_grid: SpatialGrid<usize>,
        agent_grid: SpatialGrid<AgentId>,
    }

    impl Fixture {
        fn new(structures: Vec<Structure>, allies: &[Vec2]) -> Self {
            let mut structure_grid = SpatialGrid::new(GridConfig::default()).unwrap();
            for (index, s) in structures.iter().enumerate() {
                structure_grid.insert(index, s.position, s.radius);
            }
            let mut agent_grid = SpatialGrid::new(GridConfig::default()).unwrap();
            for (i, &pos) in allies.iter().enumerate() {
                agent_grid.insert(AgentId(1_000 + i as u64), pos, 8.0);
            }
            Self {
                structures,
                structure_grid,
                agent_grid,
            }
        }

        fn ctx(&self) -> TargetContext<'_> {
            TargetContext {
                structures: &self.structures,
                base: None,
                structure_grid: &self.structure_grid,
                agent_grid: &self.agent_grid,
            }
        }
    }

    fn agent(tag: BehaviorTag, health: f32) -> Agent {
        Agent {
            id: AgentId(1),
            position: Vec2::new(500.0, 500.0),
            health,
            max_health: 100.0,
            speed: 0.1,
            tag,
            ..Default::default()
        }
    }

    #[test]
    fn test_ghost_flees_when_hurt() {
        let fixture = Fixture::new(Vec::new(), &[]);
        let mut controller = BehaviorController::new(BehaviorConfig::default());
        let mut ghost = agent(BehaviorTag::Ghost, 20.0);
        assert_eq!(
            controller.evaluate(&mut ghost, &fixture.ctx(), 0),
            Some(BehaviorMode::Flee)
        );
        assert_eq!(ghost.behavior.forward_bias, -1.0);
        assert_eq!(ghost.behavior.speed_multiplier, 1.4);
    }

    #[test]
    fn test_avoid_flees_crowded_structures_when_alone() {
        let towers = (0..3)
            .map(|i| Structure::tower(Vec2::new(520.0 + i as f32 * 20.0, 500.0), 100.0))
            .collect();
        let fixture = Fixture::new(towers, &[]);
        let mut controller = BehaviorController::new(BehaviorConfig::default());
        let mut avoider = agent(BehaviorTag::Avoid, 100.0);
        controller.evaluate(&mut avoider, &fixture.ctx(), 0);
        assert_eq!(avoider.behavior.mode, BehaviorMode::Flee);

        let towers = (0..3)
            .map(|i| Structure::tower(Vec2::new(520.0 + i as f32 * 20.0, 500.0), 100.0))
            .collect();
        let escorted = Fixture::new(
            towers,
            &[Vec2::new(510.0, 500.0), Vec2::new(490.0, 500.0)],
        );
        let mut avoider = agent(BehaviorTag::Avoid, 100.0);
        controller.evaluate(&mut avoider, &escorted.ctx(), 0);
        assert_eq!(avoider.behavior.mode, BehaviorMode::Normal);
    }

    #[test]
    fn test_boss_flees_at_threshold_and_advances_phase() {
        let fixture = Fixture::new(Vec::new(), &[]);
        let mut controller = BehaviorController::new(BehaviorConfig::default());
        let mut boss = agent(BehaviorTag::Boss, 50.0);
        boss.boss = Some(BossProfile::default());
        controller.evaluate(&mut boss, &fixture.ctx(), 0);
        assert_eq!(boss.behavior.mode, BehaviorMode::Normal);
        assert_eq!(boss.boss.as_ref().unwrap().phase, 1);
        assert!((boss.behavior.speed_multiplier - 1.15).abs() < 1e-6);

        boss.health = 10.0;
        controller.evaluate(&mut boss, &fixture.ctx(), 100);
        assert_eq!(boss.behavior.mode, BehaviorMode::Flee);
        assert_eq!(boss.boss.as_ref().unwrap().phase, 2);
    }

    #[test]
    fn test_tank_groups_with_enough_neighbors() {
        let allies = [
            Vec2::new(510.0, 500.0),
            Vec2::new(490.0, 500.0),
            Vec2::new(500.0, 520.0),
        ];
        let fixture = Fixture::new(vec![Structure::tower(Vec2::new(700.0, 500.0), 100.0)], &allies);
        let mut controller = BehaviorController::new(BehaviorConfig::default());
        controller.begin_tick(0);
        let mut tank = agent(BehaviorTag::Tank, 100.0);
        controller.evaluate(&mut tank, &fixture.ctx(), 0);
        controller.finish_tick(&fixture.ctx());

        assert_eq!(tank.behavior.mode, BehaviorMode::GroupAttack);
        let group = tank.behavior.group.unwrap();
        assert_eq!(controller.groups().members(group), vec![tank.id]);
        assert_eq!(
            controller.group_target(&tank),
            Some(TargetRef::Structure(0))
        );
    }

    #[test]
    fn test_rage_needs_health_and_company() {
        let fixture = Fixture::new(Vec::new(), &[Vec2::new(510.0, 500.0)]);
        let mut controller = BehaviorController::new(BehaviorConfig::default());
        let mut healthy = agent(BehaviorTag::Rage, 90.0);
        controller.evaluate(&mut healthy, &fixture.ctx(), 0);
        assert_eq!(healthy.behavior.mode, BehaviorMode::GroupAttack);

        let mut hurt = agent(BehaviorTag::Rage, 40.0);
        controller.evaluate(&mut hurt, &fixture.ctx(), 0);
        assert_eq!(hurt.behavior.mode, BehaviorMode::Normal);
    }

    #[test]
    fn test_group_exit_when_condition_lapses() {
        let crowded = Fixture::new(Vec::new(), &[Vec2::new(510.0, 500.0)]);
        let alone = Fixture::new(Vec::new(), &[]);
        let mut controller = BehaviorController::new(BehaviorConfig::default());
        let mut rage = agent(BehaviorTag::Rage, 90.0);
        controller.evaluate(&mut rage, &crowded.ctx(), 0);
        assert!(rage.behavior.group.is_some());

        assert_eq!(
            controller.evaluate(&mut rage, &alone.ctx(), 100),
            Some(BehaviorMode::Normal)
        );
        assert_eq!(rage.behavior.group, None);
    }

    #[test]
    fn test_flee_times_out_and_cools_down() {
        let fixture = Fixture::new(Vec::new(), &[]);
        let config = BehaviorConfig::default();
        let mut controller = BehaviorController::new(config.clone());
        let mut ghost = agent(BehaviorTag::Ghost, 10.0);
        controller.evaluate(&mut ghost, &fixture.ctx(), 0);
        assert_eq!(ghost.behavior.mode, BehaviorMode::Flee);

        controller.evaluate(&mut ghost, &fixture.ctx(), config.max_flee_ms - 1);
        assert_eq!(ghost.behavior.mode, BehaviorMode::Flee);

        assert_eq!(
            controller.evaluate(&mut ghost, &fixture.ctx(), config.max_flee_ms),
            Some(BehaviorMode::Normal)
        );
        assert_eq!(ghost.behavior.forward_bias, 1.0);

        // Still hurt, but cooling down.
        let t = config.max_flee_ms + config.evaluation_window_ms;
        controller.evaluate(&mut ghost, &fixture.ctx(), t);
        assert_eq!(ghost.behavior.mode, BehaviorMode::Normal);

        let t = config.max_flee_ms + config.flee_cooldown_ms;
        controller.evaluate(&mut ghost, &fixture.ctx(), t);
        assert_eq!(ghost.behavior.mode, BehaviorMode::Flee);
    }

    #[test]
    fn test_evaluation_throttled_by_window() {
        let fixture = Fixture::new(Vec::new(), &[]);
        let mut controller = BehaviorController::new(BehaviorConfig::default());
        let mut ghost = agent(BehaviorTag::Ghost, 100.0);
        controller.evaluate(&mut ghost, &fixture.ctx(), 0);

        ghost.health = 5.0;
        assert_eq!(controller.evaluate(&mut ghost, &fixture.ctx(), 10), None);
        assert_eq!(ghost.behavior.mode, BehaviorMode::Normal);
        assert_eq!(
            controller.evaluate(&mut ghost, &fixture.ctx(), 50),
            Some(BehaviorMode::Flee)
        );
    }

    #[test]
    fn test_group_tracker_joins_nearby_centroid() {
        let mut tracker = GroupTracker::default();
        tracker.begin_tick(0, 500);
        let a = tracker.join(AgentId(1), Vec2::new(0.0, 0.0), 50.0);
        let b = tracker.join(AgentId(2), Vec2::new(30.0, 0.0), 50.0);
        let c = tracker.join(AgentId(3), Vec2::new(400.0, 0.0), 50.0);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(tracker.len(), 2);

        tracker.leave(AgentId(3));
        assert_eq!(tracker.prune(), 1);

        tracker.begin_tick(499, 500);
        assert_eq!(tracker.group_of(AgentId(1)), Some(a));
        tracker.begin_tick(500, 500);
        assert!(tracker.is_empty());
        assert_eq!(tracker.group_of(AgentId(1)), None);
    }

    proptest! {
        #[test]
        fn prop_flee_bounded(
            steps in prop::collection::vec(1u64..200, 1..200),
            health in 1.0f32..25.0,
        ) {
            let fixture = Fixture::new(Vec::new(), &[]);
            let config = BehaviorConfig::default();
            let mut controller = BehaviorController::new(config.clone());
            let mut ghost = agent(BehaviorTag::Ghost, health);
            let mut now = 0;
            for step in steps {
                controller.evaluate(&mut ghost, &fixture.ctx(), now);
                if ghost.behavior.mode == BehaviorMode::Flee {
                    prop_assert!(now - ghost.behavior.mode_since_ms < config.max_flee_ms);
                }
                now += step;
            }
        }
    }
}
