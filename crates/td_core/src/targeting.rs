//! Target selection for agents.
//!
//! Each behavior tag scores candidate structures differently. Scores
//! combine a strategy-specific term with a proximity term
//! `1 / (1 + d / proximity_scale)`, so nearer structures always help.
//! When no structure is targetable the virtual base is returned; `None`
//! only when the base is gone as well, which callers treat as "hold
//! position".
//!
//! Results are cached per (grid cell, behavior tag) for a short window.

use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, TimedCache};
use crate::components::{Agent, AgentId, BaseTarget, BehaviorTag, Structure, TargetRef};
use crate::error::{Result, SimError};
use crate::math::Vec2;
use crate::spatial::{CellCoord, SpatialGrid};

/// Scoring weights, radii and cache window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetingConfig {
    /// How long a resolved target stays cached.
    pub cache_window_ms: u64,
    /// Distance at which the proximity term halves.
    pub proximity_scale: f32,
    /// Weight of the proximity term in composite scores.
    pub proximity_weight: f32,
    /// Radius for counting neighboring structures (avoid).
    pub isolation_radius: f32,
    /// Weight of isolation (avoid).
    pub isolation_weight: f32,
    /// Weight of missing health (stealth).
    pub weakness_weight: f32,
    /// Weight of closeness to the world center (tank).
    pub center_weight: f32,
    /// Radius for counting agents around a structure (ghost).
    pub congestion_radius: f32,
    /// Weight of low agent density (ghost).
    pub openness_weight: f32,
    /// Strength at which the strength term reaches one half (boss).
    pub strength_scale: f32,
    /// Weight of structure strength (boss).
    pub strength_weight: f32,
}

impl Default for TargetingConfig {
    fn default() -> Self {
        Self {
            cache_window_ms: 50,
            proximity_scale: 250.0,
            proximity_weight: 1.0,
            isolation_radius: 150.0,
            isolation_weight: 1.0,
            weakness_weight: 1.0,
            center_weight: 1.0,
            congestion_radius: 100.0,
            openness_weight: 1.0,
            strength_scale: 50.0,
            strength_weight: 1.0,
        }
    }
}

impl TargetingConfig {
    /// Check values are in range.
    pub fn validate(&self) -> Result<()> {
        if !(self.proximity_scale > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "targeting: proximity_scale must be positive, got {}",
                self.proximity_scale
            )));
        }
        if !(self.strength_scale > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "targeting: strength_scale must be positive, got {}",
                self.strength_scale
            )));
        }
        Ok(())
    }
}

/// Read-only view of the battlefield for one tick.
#[derive(Debug, Clone, Copy)]
pub struct TargetContext<'a> {
    /// Every structure slot; indices match [`TargetRef::Structure`].
    pub structures: &'a [Structure],
    /// The virtual base.
    pub base: Option<&'a BaseTarget>,
    /// Targetable structures, keyed by index.
    pub structure_grid: &'a SpatialGrid<usize>,
    /// Agents as of the start of the tick.
    pub agent_grid: &'a SpatialGrid<AgentId>,
}

impl<'a> TargetContext<'a> {
    /// Whether `target` can still be moved toward.
    #[must_use]
    pub fn is_valid(&self, target: TargetRef) -> bool {
        match target {
            TargetRef::Structure(index) => self
                .structures
                .get(index)
                .is_some_and(Structure::is_targetable),
            TargetRef::Base => self.base.is_some_and(BaseTarget::is_targetable),
        }
    }

    /// Position and radius of a valid target.
    #[must_use]
    pub fn locate(&self, target: TargetRef) -> Option<(Vec2, f32)> {
        if !self.is_valid(target) {
            return None;
        }
        match target {
            TargetRef::Structure(index) => self
                .structures
                .get(index)
                .map(|s| (s.position, s.radius)),
            TargetRef::Base => self.base.map(|b| (b.position, b.radius)),
        }
    }

    /// Targetable structures with their indices.
    pub fn candidates(&self) -> impl Iterator<Item = (usize, &'a Structure)> + 'a {
        self.structures
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_targetable())
    }

    /// The base, if it can be targeted.
    #[must_use]
    pub fn base_fallback(&self) -> Option<TargetRef> {
        self.base
            .filter(|b| b.is_targetable())
            .map(|_| TargetRef::Base)
    }

    /// Nearest targetable structure to `point`, falling back to the base.
    #[must_use]
    pub fn nearest(&self, point: Vec2) -> Option<TargetRef> {
        let mut best: Option<(usize, f32)> = None;
        for (index, structure) in self.candidates() {
            let d = structure.position.distance_squared(point);
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((index, d));
            }
        }
        best.map(|(index, _)| TargetRef::Structure(index))
            .or_else(|| self.base_fallback())
    }
}

/// Per-tag target selection with a short-lived cache.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    config: TargetingConfig,
    cache: TimedCache<u64, TargetRef>,
}

/// Pack a cell and tag into a cache key. Supports up to 2^24 columns/rows.
fn cache_key(cell: CellCoord, tag: BehaviorTag) -> u64 {
    (u64::from(cell.col) << 40) | (u64::from(cell.row) << 8) | u64::from(tag.index())
}

impl TargetResolver {
    /// Create a resolver with an empty cache.
    #[must_use]
    pub fn new(config: TargetingConfig) -> Self {
        let cache = TimedCache::new(config.cache_window_ms);
        Self { config, cache }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &TargetingConfig {
        &self.config
    }

    /// Choose where `agent` should head.
    ///
    /// Cached targets that have since become invalid are recomputed.
    /// Absence of a target is never cached.
    pub fn resolve(
        &mut self,
        agent: &Agent,
        ctx: &TargetContext<'_>,
        now_ms: u64,
    ) -> Option<TargetRef> {
        let key = cache_key(ctx.structure_grid.cell_of(agent.position), agent.tag);
        if let Some(cached) = self.cache.get(&key, now_ms) {
            if ctx.is_valid(cached) {
                return Some(cached);
            }
            self.cache.invalidate(&key);
        }

        let target = self.compute(agent.position, agent.tag, ctx)?;
        self.cache.insert(key, target, now_ms);
        Some(target)
    }

    /// Uncached strategy evaluation.
    #[must_use]
    pub fn compute(
        &self,
        position: Vec2,
        tag: BehaviorTag,
        ctx: &TargetContext<'_>,
    ) -> Option<TargetRef> {
        let c = &self.config;
        let structure_target = match tag {
            BehaviorTag::Normal | BehaviorTag::Rage | BehaviorTag::Group | BehaviorTag::Flee => {
                return ctx.nearest(position);
            }
            BehaviorTag::Avoid => self.best_by(position, ctx, |index, structure| {
                let neighbors =
                    ctx.structure_grid
                        .count_within(structure.position, c.isolation_radius, Some(index));
                c.isolation_weight / (1.0 + neighbors as f32)
            }),
            BehaviorTag::Stealth => self.best_by(position, ctx, |_, structure| {
                c.weakness_weight * (1.0 - structure.health_ratio())
            }),
            BehaviorTag::Tank => {
                let center = ctx.structure_grid.config().center();
                self.best_by(position, ctx, |_, structure| {
                    c.center_weight * self.proximity(structure.position.distance(center))
                })
            }
            BehaviorTag::Ghost => self.best_by(position, ctx, |_, structure| {
                let crowd = ctx
                    .agent_grid
                    .count_within(structure.position, c.congestion_radius, None);
                c.openness_weight / (1.0 + crowd as f32)
            }),
            BehaviorTag::Boss => self.best_by(position, ctx, |_, structure| {
                let strength = structure.strength().max(0.0);
                c.strength_weight * strength / (strength + c.strength_scale)
            }),
        };
        structure_target
            .map(TargetRef::Structure)
            .or_else(|| ctx.base_fallback())
    }

    fn proximity(&self, distance: f32) -> f32 {
        1.0 / (1.0 + distance / self.config.proximity_scale)
    }

    /// Highest `term + proximity` among candidates; ties go to the lower index.
    fn best_by<F>(&self, position: Vec2, ctx: &TargetContext<'_>, term: F) -> Option<usize>
    where
        F: Fn(usize, &Structure) -> f32,
    {
        let mut best: Option<(usize, f32)> = None;
        for (index, structure) in ctx.candidates() {
            let score = term(index, structure)
                + self.config.proximity_weight
                    * self.proximity(structure.position.distance(position));
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((index, score));
            }
        }
        best.map(|(index, _)| index)
    }

    /// Drop stale cache entries.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        self.cache.sweep(now_ms)
    }

    /// Drop every cache entry.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::GridConfig;
    use proptest::prelude::*;

    struct Fixture {
        structures: Vec<Structure>,
        base: Option<BaseTarget>,
        structure_grid: SpatialGrid<usize>,
        agent_grid: SpatialGrid<AgentId>,
    }

    impl Fixture {
        fn new(structures: Vec<Structure>, base: Option<BaseTarget>) -> Self {
            let mut structure_grid = SpatialGrid::new(GridConfig::default()).unwrap();
            for (index, s) in structures.iter().enumerate() {
                if s.is_targetable() {
                    structure_grid.insert(index, s.position, s.radius);
                }
            }
            Self {
                structures,
                base,
                structure_grid,
                agent_grid: SpatialGrid::new(GridConfig::default()).unwrap(),
            }
        }

        fn ctx(&self) -> TargetContext<'_> {
            TargetContext {
                structures: &self.structures,
                base: self.base.as_ref(),
                structure_grid: &self.structure_grid,
                agent_grid: &self.agent_grid,
            }
        }
    }

    fn agent_at(x: f32, y: f32, tag: BehaviorTag) -> Agent {
        Agent {
            position: Vec2::new(x, y),
            tag,
            ..Default::default()
        }
    }

    fn base() -> BaseTarget {
        BaseTarget {
            position: Vec2::new(900.0, 900.0),
            radius: 20.0,
            health: 100.0,
            vulnerable: true,
        }
    }

    #[test]
    fn test_normal_picks_nearest() {
        let fixture = Fixture::new(
            vec![
                Structure::tower(Vec2::new(400.0, 400.0), 100.0),
                Structure::tower(Vec2::new(100.0, 100.0), 100.0),
            ],
            None,
        );
        let mut resolver = TargetResolver::new(TargetingConfig::default());
        let agent = agent_at(0.0, 0.0, BehaviorTag::Normal);
        assert_eq!(
            resolver.resolve(&agent, &fixture.ctx(), 0),
            Some(TargetRef::Structure(1))
        );
    }

    #[test]
    fn test_base_fallback_and_hold_position() {
        let fixture = Fixture::new(Vec::new(), Some(base()));
        let mut resolver = TargetResolver::new(TargetingConfig::default());
        let agent = agent_at(0.0, 0.0, BehaviorTag::Boss);
        assert_eq!(resolver.resolve(&agent, &fixture.ctx(), 0), Some(TargetRef::Base));

        let mut down = base();
        down.vulnerable = false;
        let fixture = Fixture::new(Vec::new(), Some(down));
        assert_eq!(resolver.resolve(&agent, &fixture.ctx(), 100), None);
    }

    #[test]
    fn test_avoid_prefers_isolated_structure() {
        // Cluster of three near the agent, one lone tower slightly farther.
        let fixture = Fixture::new(
            vec![
                Structure::tower(Vec2::new(200.0, 200.0), 100.0),
                Structure::tower(Vec2::new(240.0, 200.0), 100.0),
                Structure::tower(Vec2::new(200.0, 240.0), 100.0),
                Structure::tower(Vec2::new(200.0, 500.0), 100.0),
            ],
            None,
        );
        let resolver = TargetResolver::new(TargetingConfig::default());
        let target = resolver.compute(Vec2::new(150.0, 300.0), BehaviorTag::Avoid, &fixture.ctx());
        assert_eq!(target, Some(TargetRef::Structure(3)));
    }

    #[test]
    fn test_stealth_prefers_weakened_structure() {
        let mut weak = Structure::tower(Vec2::new(300.0, 0.0), 100.0);
        weak.health = 5.0;
        let fixture = Fixture::new(
            vec![Structure::tower(Vec2::new(200.0, 0.0), 100.0), weak],
            None,
        );
        let resolver = TargetResolver::new(TargetingConfig::default());
        let target = resolver.compute(Vec2::ZERO, BehaviorTag::Stealth, &fixture.ctx());
        assert_eq!(target, Some(TargetRef::Structure(1)));
    }

    #[test]
    fn test_tank_heads_for_center() {
        let fixture = Fixture::new(
            vec![
                Structure::tower(Vec2::new(100.0, 50.0), 100.0),
                Structure::tower(Vec2::new(500.0, 500.0), 100.0),
            ],
            None,
        );
        let resolver = TargetResolver::new(TargetingConfig::default());
        let target = resolver.compute(Vec2::new(50.0, 50.0), BehaviorTag::Tank, &fixture.ctx());
        assert_eq!(target, Some(TargetRef::Structure(1)));
    }

    #[test]
    fn test_ghost_avoids_congested_structure() {
        let mut fixture = Fixture::new(
            vec![
                Structure::tower(Vec2::new(200.0, 0.0), 100.0),
                Structure::tower(Vec2::new(0.0, 220.0), 100.0),
            ],
            None,
        );
        for i in 0..6 {
            fixture
                .agent_grid
                .insert(AgentId(i), Vec2::new(200.0 + i as f32, 10.0), 8.0);
        }
        let resolver = TargetResolver::new(TargetingConfig::default());
        let target = resolver.compute(Vec2::ZERO, BehaviorTag::Ghost, &fixture.ctx());
        assert_eq!(target, Some(TargetRef::Structure(1)));
    }

    #[test]
    fn test_boss_targets_strongest() {
        let mut strong = Structure::tower(Vec2::new(400.0, 0.0), 100.0);
        strong.level = 4;
        strong.damage = 40.0;
        let fixture = Fixture::new(
            vec![Structure::tower(Vec2::new(100.0, 0.0), 100.0), strong],
            None,
        );
        let resolver = TargetResolver::new(TargetingConfig::default());
        let target = resolver.compute(Vec2::ZERO, BehaviorTag::Boss, &fixture.ctx());
        assert_eq!(target, Some(TargetRef::Structure(1)));
    }

    #[test]
    fn test_cache_hit_within_window() {
        let fixture = Fixture::new(vec![Structure::tower(Vec2::new(100.0, 100.0), 100.0)], None);
        let mut resolver = TargetResolver::new(TargetingConfig::default());
        let agent = agent_at(10.0, 10.0, BehaviorTag::Normal);
        resolver.resolve(&agent, &fixture.ctx(), 0);
        resolver.resolve(&agent, &fixture.ctx(), 20);
        assert_eq!(resolver.cache_stats().hits, 1);

        resolver.resolve(&agent, &fixture.ctx(), 60);
        assert_eq!(resolver.cache_stats().misses, 2);
    }

    #[test]
    fn test_cached_target_revalidated() {
        let mut fixture = Fixture::new(
            vec![
                Structure::tower(Vec2::new(100.0, 100.0), 100.0),
                Structure::tower(Vec2::new(600.0, 600.0), 100.0),
            ],
            None,
        );
        let mut resolver = TargetResolver::new(TargetingConfig::default());
        let agent = agent_at(10.0, 10.0, BehaviorTag::Normal);
        assert_eq!(
            resolver.resolve(&agent, &fixture.ctx(), 0),
            Some(TargetRef::Structure(0))
        );

        fixture.structures[0].health = 0.0;
        assert_eq!(
            resolver.resolve(&agent, &fixture.ctx(), 10),
            Some(TargetRef::Structure(1))
        );
    }

    #[test]
    fn test_cache_key_separates_tags_and_cells() {
        let a = cache_key(CellCoord::new(1, 2), BehaviorTag::Normal);
        let b = cache_key(CellCoord::new(1, 2), BehaviorTag::Boss);
        let c = cache_key(CellCoord::new(2, 1), BehaviorTag::Normal);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    proptest! {
        #[test]
        fn prop_resolve_never_stalls_with_live_target(
            positions in prop::collection::vec((0.0f32..1000.0, 0.0f32..1000.0), 0..8),
            agent_pos in (-100.0f32..1100.0, -100.0f32..1100.0),
            tag_index in 0usize..9,
            with_base in any::<bool>(),
        ) {
            let structures: Vec<Structure> = positions
                .iter()
                .map(|&(x, y)| Structure::tower(Vec2::new(x, y), 50.0))
                .collect();
            let has_target = !structures.is_empty() || with_base;
            let fixture = Fixture::new(structures, with_base.then(base));
            let mut resolver = TargetResolver::new(TargetingConfig::default());
            let agent = agent_at(agent_pos.0, agent_pos.1, BehaviorTag::ALL[tag_index]);
            let target = resolver.resolve(&agent, &fixture.ctx(), 0);
            prop_assert_eq!(target.is_some(), has_target);
            if let Some(target) = target {
                prop_assert!(fixture.ctx().is_valid(target));
            }
        }
    }
}
