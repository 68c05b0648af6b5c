//! Contact and projectile resolution.
//!
//! Two kinds of overlap are resolved here:
//!
//! - **Agent ↔ target**: reported by the movement engine when an agent
//!   reaches its target. A shielded structure absorbs the hit and stuns the
//!   agent; an unshielded one takes the damage and the agent is destroyed
//!   and converted to its gold reward. Reaching the base damages it and
//!   removes the agent without reward.
//! - **Projectile ↔ agent**: projectiles advance, then damage every agent
//!   their circle touches, up to their pierce budget, never the same agent
//!   twice.
//!
//! The resolver never releases pooled objects itself; it reports what must
//! be released and the simulation returns them to their pools within the
//! same tick.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::components::{Agent, AgentId, Projectile, RemovalCause, TargetRef};
use crate::error::{Result, SimError};
use crate::math::Vec2;
use crate::pool::{ObjectPool, PoolHandle};
use crate::spatial::SpatialGrid;
use crate::world::Battlefield;

/// Contact tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    /// How long an agent stays frozen after bouncing off a wall.
    pub stun_ms: u64,
    /// Gap left between a repelled agent and the structure.
    pub repel_distance: f32,
    /// Slack added to the sum of radii when testing contact.
    pub contact_tolerance: f32,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            stun_ms: 500,
            repel_distance: 12.0,
            contact_tolerance: 0.01,
        }
    }
}

impl CollisionConfig {
    /// Check values are in range.
    pub fn validate(&self) -> Result<()> {
        if self.repel_distance < 0.0 || self.contact_tolerance < 0.0 {
            return Err(SimError::InvalidConfig(
                "collision: repel_distance and contact_tolerance must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of an agent reaching its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactOutcome {
    /// Bounced off a wall; the agent survives, stunned.
    Repelled,
    /// The agent is gone and must be released.
    Destroyed(RemovalCause),
    /// Already resolved this tick, or the target vanished.
    Ignored,
}

/// Projectile pass output.
#[derive(Debug, Clone, Default)]
pub struct ProjectileReport {
    /// Projectiles that expired or used up their pierce budget.
    pub spent: Vec<PoolHandle<Projectile>>,
    /// Agents whose health reached zero.
    pub killed: Vec<AgentId>,
    /// Direct hits applied.
    pub hits: u32,
}

/// Running counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollisionStats {
    /// Direct projectile hits.
    pub projectile_hits: u64,
    /// Agents caught by splash damage.
    pub splash_hits: u64,
    /// Agents bounced off walls.
    pub repels: u64,
    /// Agents destroyed on unshielded structures.
    pub crashes: u64,
    /// Agents that reached the base.
    pub base_hits: u64,
}

/// Resolves overlaps and applies damage.
#[derive(Debug, Clone)]
pub struct CollisionResolver {
    config: CollisionConfig,
    resolved: HashSet<(AgentId, usize)>,
    stats: CollisionStats,
}

impl CollisionResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(config: CollisionConfig) -> Self {
        Self {
            config,
            resolved: HashSet::new(),
            stats: CollisionStats::default(),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &CollisionConfig {
        &self.config
    }

    /// Counters since creation or the last reset.
    #[must_use]
    pub fn stats(&self) -> CollisionStats {
        self.stats
    }

    /// Forget the previous tick's resolved contacts.
    pub fn begin_tick(&mut self) {
        self.resolved.clear();
    }

    /// Clear per-tick state and counters.
    pub fn reset(&mut self) {
        self.resolved.clear();
        self.stats = CollisionStats::default();
    }

    /// Whether two circles are in contact.
    #[must_use]
    pub fn in_contact(&self, a: Vec2, a_radius: f32, b: Vec2, b_radius: f32) -> bool {
        let reach = a_radius + b_radius + self.config.contact_tolerance;
        a.distance_squared(b) <= reach * reach
    }

    /// Resolve `agent` touching `target`. `approach` is the direction the
    /// agent was moving, used to repel an agent sitting exactly on a wall's
    /// center.
    pub fn resolve_contact(
        &mut self,
        agent: &mut Agent,
        target: TargetRef,
        approach: Vec2,
        battlefield: &mut dyn Battlefield,
        now_ms: u64,
    ) -> ContactOutcome {
        match target {
            TargetRef::Structure(index) => {
                if !self.resolved.insert((agent.id, index)) {
                    return ContactOutcome::Ignored;
                }
                let Some(structure) = battlefield.structures().get(index) else {
                    return ContactOutcome::Ignored;
                };
                if !structure.is_targetable() {
                    return ContactOutcome::Ignored;
                }
                let (center, radius, wall) =
                    (structure.position, structure.radius, structure.wall_strength);

                if wall > 0.0 {
                    battlefield.absorb_with_wall(index, agent.contact_damage);
                    let away = (agent.position - center)
                        .try_normalize()
                        .unwrap_or_else(|| -approach.normalize_or_zero());
                    agent.position =
                        center + away * (radius + agent.radius + self.config.repel_distance);
                    agent.freeze_until_ms = Some(now_ms + self.config.stun_ms);
                    self.stats.repels += 1;
                    tracing::trace!(agent = %agent.id, index, "Agent repelled by wall");
                    ContactOutcome::Repelled
                } else {
                    battlefield.damage_structure(index, agent.contact_damage);
                    battlefield.add_reward(agent.gold);
                    self.stats.crashes += 1;
                    tracing::trace!(agent = %agent.id, index, "Agent crashed into structure");
                    ContactOutcome::Destroyed(RemovalCause::Crashed)
                }
            }
            TargetRef::Base => {
                if !battlefield.base().is_some_and(|base| base.is_targetable()) {
                    return ContactOutcome::Ignored;
                }
                battlefield.damage_base(agent.contact_damage);
                self.stats.base_hits += 1;
                ContactOutcome::Destroyed(RemovalCause::ReachedBase)
            }
        }
    }

    /// Advance every projectile by `dt_ms` and apply hits.
    ///
    /// `agent_grid` must reflect agent positions after movement.
    pub fn advance_projectiles(
        &mut self,
        projectiles: &mut ObjectPool<Projectile>,
        agents: &mut ObjectPool<Agent>,
        agent_index: &HashMap<AgentId, PoolHandle<Agent>>,
        agent_grid: &SpatialGrid<AgentId>,
        battlefield: &mut dyn Battlefield,
        dt_ms: f32,
    ) -> ProjectileReport {
        let mut report = ProjectileReport::default();

        for handle in projectiles.active_handles() {
            let Some(projectile) = projectiles.get_mut(handle) else {
                continue;
            };
            projectile.position += projectile.direction * (projectile.speed * dt_ms);

            let mut candidates: Vec<(f32, AgentId)> = agent_grid
                .query_overlapping(projectile.position, projectile.radius)
                .into_iter()
                .filter(|id| !projectile.hits.contains(id))
                .filter_map(|id| {
                    let agent = agents.get(*agent_index.get(&id)?)?;
                    agent
                        .is_alive()
                        .then(|| (agent.position.distance_squared(projectile.position), id))
                })
                .collect();
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            for (_, id) in candidates {
                if projectile.remaining_pierce() == 0 {
                    break;
                }
                let Some(hit_at) =
                    strike(agents, agent_index, id, projectile.damage, battlefield, &mut report)
                else {
                    continue;
                };
                projectile.hits.push(id);
                report.hits += 1;
                self.stats.projectile_hits += 1;

                if projectile.splash_radius > 0.0 {
                    let splash_damage = projectile.damage * projectile.splash_factor;
                    for other in agent_grid.query_radius(hit_at, projectile.splash_radius) {
                        if other == id {
                            continue;
                        }
                        if strike(agents, agent_index, other, splash_damage, battlefield, &mut report)
                            .is_some()
                        {
                            self.stats.splash_hits += 1;
                        }
                    }
                }
            }

            projectile.ttl_ms -= dt_ms;
            if projectile.is_spent() {
                report.spent.push(handle);
            }
        }
        report
    }
}

/// Damage a live agent, recording the kill and reward if it dies.
/// Returns the agent's position when the hit landed.
fn strike(
    agents: &mut ObjectPool<Agent>,
    agent_index: &HashMap<AgentId, PoolHandle<Agent>>,
    id: AgentId,
    damage: f32,
    battlefield: &mut dyn Battlefield,
    report: &mut ProjectileReport,
) -> Option<Vec2> {
    let agent = agents.get_mut(*agent_index.get(&id)?)?;
    if !agent.is_alive() {
        return None;
    }
    agent.apply_damage(damage);
    if !agent.is_alive() {
        battlefield.add_reward(agent.gold);
        report.killed.push(id);
    }
    Some(agent.position)
}
