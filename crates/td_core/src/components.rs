//! Entity records for the simulation.
//!
//! Entities are plain mutable records, not component bags. Agents and
//! projectiles live inside their [`ObjectPool`](crate::pool::ObjectPool)
//! and are reset in place when released.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::math::Vec2;
use crate::pool::Poolable;

/// Unique identifier for agents, stable for the agent's whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

/// Unique identifier for projectiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ProjectileId(pub u64);

/// Identifier of an attack group formed by the behavior controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

// ============================================================================
// Behavior classification
// ============================================================================

/// Closed classification driving an agent's targeting and movement strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum BehaviorTag {
    /// Heads for the nearest structure.
    #[default]
    Normal,
    /// Prefers lightly defended structures, zigzags on approach.
    Avoid,
    /// Picks off weakened structures with a low drift.
    Stealth,
    /// Drives toward the defended core.
    Tank,
    /// Avoids congested lanes.
    Ghost,
    /// Charges, and gangs up while healthy.
    Rage,
    /// Travels in packs.
    Group,
    /// Skittish, erratic movement.
    Flee,
    /// Multi-phase boss targeting the biggest threat.
    Boss,
}

impl BehaviorTag {
    /// All tags, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Normal,
        Self::Avoid,
        Self::Stealth,
        Self::Tank,
        Self::Ghost,
        Self::Rage,
        Self::Group,
        Self::Flee,
        Self::Boss,
    ];

    /// Small integer index, used when packing cache keys.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Avoid => 1,
            Self::Stealth => 2,
            Self::Tank => 3,
            Self::Ghost => 4,
            Self::Rage => 5,
            Self::Group => 6,
            Self::Flee => 7,
            Self::Boss => 8,
        }
    }
}

/// Per-tick behavior mode assigned by the behavior controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BehaviorMode {
    /// Move toward the resolved target.
    #[default]
    Normal,
    /// Move away from the target for a bounded time.
    Flee,
    /// Move with a group toward the group's shared target.
    GroupAttack,
}

/// Boss metadata carried by boss-tagged agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossProfile {
    /// Current phase, 0-based. Advances as health drops.
    #[serde(default)]
    pub phase: usize,
    /// Health ratios at which the next phase begins, descending.
    pub phase_thresholds: Vec<f32>,
    /// Health ratio at or below which the boss flees.
    pub flee_threshold: f32,
    /// Whether the boss rallies minions into group attacks.
    #[serde(default)]
    pub spawns_minions: bool,
}

impl Default for BossProfile {
    fn default() -> Self {
        Self {
            phase: 0,
            phase_thresholds: vec![0.66, 0.33],
            flee_threshold: 0.15,
            spawns_minions: false,
        }
    }
}

impl BossProfile {
    /// Phase implied by a health ratio: one phase per threshold crossed.
    #[must_use]
    pub fn phase_for(&self, health_ratio: f32) -> usize {
        self.phase_thresholds
            .iter()
            .filter(|&&threshold| health_ratio <= threshold)
            .count()
    }
}

/// Movement-relevant state written by the behavior controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorState {
    /// Current mode.
    pub mode: BehaviorMode,
    /// Time the current mode was entered.
    pub mode_since_ms: u64,
    /// Time of the last full evaluation, `None` before the first.
    pub evaluated_at_ms: Option<u64>,
    /// Flee may not be re-entered before this time.
    pub flee_cooldown_until_ms: u64,
    /// Multiplier applied to base speed.
    pub speed_multiplier: f32,
    /// Scale of the forward component; negative moves away from the target.
    pub forward_bias: f32,
    /// Attack group membership while in group-attack mode.
    pub group: Option<GroupId>,
}

impl Default for BehaviorState {
    fn default() -> Self {
        Self {
            mode: BehaviorMode::Normal,
            mode_since_ms: 0,
            evaluated_at_ms: None,
            flee_cooldown_until_ms: 0,
            speed_multiplier: 1.0,
            forward_bias: 1.0,
            group: None,
        }
    }
}

// ============================================================================
// Agents
// ============================================================================

/// Spawn template for an agent. Loaded from configuration for wave rosters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentTemplate {
    /// Collision radius.
    pub radius: f32,
    /// Starting and maximum health.
    pub health: f32,
    /// Base speed in units per millisecond.
    pub speed: f32,
    /// Behavior classification.
    pub tag: BehaviorTag,
    /// Boss metadata, for boss-tagged agents.
    pub boss: Option<BossProfile>,
    /// Gold awarded when the agent is converted to its reward.
    pub gold: u32,
    /// Damage dealt on contact with a structure or the base.
    pub contact_damage: f32,
}

impl Default for AgentTemplate {
    fn default() -> Self {
        Self {
            radius: 8.0,
            health: 100.0,
            speed: 0.05,
            tag: BehaviorTag::Normal,
            boss: None,
            gold: 10,
            contact_damage: 10.0,
        }
    }
}

/// A mobile agent (enemy) advancing toward a structure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Agent {
    /// Unique id, assigned at spawn.
    pub id: AgentId,
    /// World position.
    pub position: Vec2,
    /// Collision radius.
    pub radius: f32,
    /// Current health.
    pub health: f32,
    /// Maximum health.
    pub max_health: f32,
    /// Base speed in units per millisecond.
    pub speed: f32,
    /// Movement is suspended while `now < freeze_until_ms`.
    pub freeze_until_ms: Option<u64>,
    /// Behavior classification.
    pub tag: BehaviorTag,
    /// Boss metadata.
    pub boss: Option<BossProfile>,
    /// Reward on conversion.
    pub gold: u32,
    /// Damage dealt on contact.
    pub contact_damage: f32,
    /// Behavior controller output.
    pub behavior: BehaviorState,
    /// Spawn timestamp, drives trajectory phase.
    pub spawned_at_ms: u64,
    /// Wave that spawned this agent (0 for external spawns).
    pub wave: u32,
    /// Per-agent phase offset for trajectory shaping.
    pub phase_offset: f32,
}

impl Agent {
    /// Fill this (freshly reset) agent from a template.
    pub fn apply_template(&mut self, template: &AgentTemplate) {
        self.radius = template.radius;
        self.health = template.health;
        self.max_health = template.health;
        self.speed = template.speed;
        self.tag = template.tag;
        self.boss = template.boss.clone();
        self.gold = template.gold;
        self.contact_damage = template.contact_damage;
    }

    /// Health as a fraction of maximum, `0.0` for agents without max health.
    #[must_use]
    pub fn health_ratio(&self) -> f32 {
        if self.max_health <= 0.0 {
            return 0.0;
        }
        (self.health / self.max_health).clamp(0.0, 1.0)
    }

    /// True while health is positive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }

    /// True while movement is suspended.
    #[must_use]
    pub fn is_frozen(&self, now_ms: u64) -> bool {
        self.freeze_until_ms.is_some_and(|until| now_ms < until)
    }

    /// Apply damage, returning the amount actually removed.
    pub fn apply_damage(&mut self, amount: f32) -> f32 {
        let actual = amount.max(0.0).min(self.health.max(0.0));
        self.health -= amount.max(0.0);
        actual
    }
}

impl Poolable for Agent {}

// ============================================================================
// Structures
// ============================================================================

/// A tower slot or other defendable target, as reported by the battlefield.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    /// World position.
    pub position: Vec2,
    /// Collision radius.
    #[serde(default = "default_structure_radius")]
    pub radius: f32,
    /// Whether a tower currently stands in this slot.
    pub occupied: bool,
    /// Structural integrity.
    pub health: f32,
    /// Maximum integrity.
    pub max_health: f32,
    /// Shield/wall strength absorbing contact damage.
    #[serde(default)]
    pub wall_strength: f32,
    /// Tower level.
    #[serde(default = "default_level")]
    pub level: u32,
    /// Tower damage output.
    #[serde(default)]
    pub damage: f32,
}

fn default_structure_radius() -> f32 {
    16.0
}

fn default_level() -> u32 {
    1
}

impl Structure {
    /// An occupied structure at `position` with full health and no wall.
    #[must_use]
    pub fn tower(position: Vec2, health: f32) -> Self {
        Self {
            position,
            radius: default_structure_radius(),
            occupied: true,
            health,
            max_health: health,
            wall_strength: 0.0,
            level: 1,
            damage: 10.0,
        }
    }

    /// True when agents may target this structure.
    #[must_use]
    pub fn is_targetable(&self) -> bool {
        self.occupied && self.health > 0.0
    }

    /// Health as a fraction of maximum.
    #[must_use]
    pub fn health_ratio(&self) -> f32 {
        if self.max_health <= 0.0 {
            return 0.0;
        }
        (self.health / self.max_health).clamp(0.0, 1.0)
    }

    /// Threat estimate: level × damage.
    #[must_use]
    pub fn strength(&self) -> f32 {
        self.level as f32 * self.damage
    }
}

/// The virtual base standing in when no real structures exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseTarget {
    /// World position.
    pub position: Vec2,
    /// Collision radius.
    pub radius: f32,
    /// Remaining integrity.
    pub health: f32,
    /// Whether the base can currently be damaged.
    pub vulnerable: bool,
}

impl BaseTarget {
    /// True when agents may target the base.
    #[must_use]
    pub fn is_targetable(&self) -> bool {
        self.vulnerable && self.health > 0.0
    }
}

/// Destination chosen by the target resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetRef {
    /// Index into the battlefield's structure list.
    Structure(usize),
    /// The virtual base.
    Base,
}

// ============================================================================
// Projectiles
// ============================================================================

/// Parameters for firing a projectile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectileParams {
    /// Launch position.
    pub origin: Vec2,
    /// Travel direction; normalized on fire.
    pub direction: Vec2,
    /// Speed in units per millisecond.
    pub speed: f32,
    /// Damage per hit.
    pub damage: f32,
    /// Collision radius.
    pub radius: f32,
    /// Lifetime in milliseconds.
    pub ttl_ms: f32,
    /// Maximum number of agents hit before retiring (1 = non-piercing).
    pub pierce: u32,
    /// Splash radius around each direct hit (0 = none).
    pub splash_radius: f32,
    /// Fraction of damage applied to splashed agents.
    pub splash_factor: f32,
}

impl Default for ProjectileParams {
    fn default() -> Self {
        Self {
            origin: Vec2::ZERO,
            direction: Vec2::new(1.0, 0.0),
            speed: 0.4,
            damage: 25.0,
            radius: 3.0,
            ttl_ms: 2_000.0,
            pierce: 1,
            splash_radius: 0.0,
            splash_factor: 0.5,
        }
    }
}

/// A pooled bullet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Projectile {
    /// Unique id, assigned on fire.
    pub id: ProjectileId,
    /// World position.
    pub position: Vec2,
    /// Unit travel direction.
    pub direction: Vec2,
    /// Speed in units per millisecond.
    pub speed: f32,
    /// Damage per hit.
    pub damage: f32,
    /// Collision radius.
    pub radius: f32,
    /// Remaining lifetime.
    pub ttl_ms: f32,
    /// Maximum number of agents this projectile may hit.
    pub pierce: u32,
    /// Agents already hit, never hit twice.
    pub hits: Vec<AgentId>,
    /// Splash radius.
    pub splash_radius: f32,
    /// Splash damage fraction.
    pub splash_factor: f32,
}

impl Projectile {
    /// Configure a freshly acquired projectile.
    pub fn launch(&mut self, id: ProjectileId, params: &ProjectileParams) {
        self.id = id;
        self.position = params.origin;
        self.direction = params
            .direction
            .try_normalize()
            .unwrap_or(Vec2::new(1.0, 0.0));
        self.speed = params.speed;
        self.damage = params.damage;
        self.radius = params.radius;
        self.ttl_ms = params.ttl_ms;
        self.pierce = params.pierce.max(1);
        self.splash_radius = params.splash_radius.max(0.0);
        self.splash_factor = params.splash_factor;
    }

    /// Targets this projectile may still hit.
    #[must_use]
    pub fn remaining_pierce(&self) -> u32 {
        self.pierce.saturating_sub(self.hits.len() as u32)
    }

    /// True once lifetime or pierce budget is spent.
    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.ttl_ms <= 0.0 || self.remaining_pierce() == 0
    }
}

impl Poolable for Projectile {
    fn reset(&mut self) {
        // Keep the hit list allocation around for the next launch.
        let mut hits = std::mem::take(&mut self.hits);
        hits.clear();
        *self = Self {
            hits,
            ..Self::default()
        };
    }
}

/// Why an agent left the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemovalCause {
    /// Health reached zero from projectile damage.
    Killed,
    /// Destroyed on contact with an unshielded structure.
    Crashed,
    /// Reached and damaged the base.
    ReachedBase,
    /// Removed by an external request.
    External,
    /// Released by a simulation reset.
    WaveReset,
    /// Reclaimed by the pool's auto-return safety net.
    AutoReturned,
    /// Forcibly removed after an invariant violation.
    InvariantViolation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_ratio_clamps() {
        let mut agent = Agent::default();
        agent.apply_template(&AgentTemplate::default());
        assert_eq!(agent.health_ratio(), 1.0);

        agent.apply_damage(150.0);
        assert!(!agent.is_alive());
        assert_eq!(agent.health_ratio(), 0.0);
    }

    #[test]
    fn test_apply_damage_reports_actual() {
        let mut agent = Agent {
            health: 30.0,
            max_health: 100.0,
            ..Default::default()
        };
        assert_eq!(agent.apply_damage(50.0), 30.0);
        assert_eq!(agent.health, -20.0);
    }

    #[test]
    fn test_freeze_window() {
        let agent = Agent {
            freeze_until_ms: Some(500),
            ..Default::default()
        };
        assert!(agent.is_frozen(499));
        assert!(!agent.is_frozen(500));
        assert!(!Agent::default().is_frozen(0));
    }

    #[test]
    fn test_boss_phase_for_ratio() {
        let boss = BossProfile::default();
        assert_eq!(boss.phase_for(1.0), 0);
        assert_eq!(boss.phase_for(0.5), 1);
        assert_eq!(boss.phase_for(0.2), 2);
    }

    #[test]
    fn test_agent_reset_clears_state() {
        let mut agent = Agent {
            id: AgentId(7),
            health: 3.0,
            tag: BehaviorTag::Boss,
            ..Default::default()
        };
        agent.reset();
        assert_eq!(agent, Agent::default());
    }

    #[test]
    fn test_projectile_pierce_budget() {
        let mut projectile = Projectile::default();
        projectile.launch(
            ProjectileId(1),
            &ProjectileParams {
                pierce: 2,
                ..Default::default()
            },
        );
        assert_eq!(projectile.remaining_pierce(), 2);
        projectile.hits.push(AgentId(1));
        assert!(!projectile.is_spent());
        projectile.hits.push(AgentId(2));
        assert!(projectile.is_spent());

        projectile.reset();
        assert!(projectile.hits.is_empty());
        assert_eq!(projectile.pierce, 0);
    }

    #[test]
    fn test_structure_targetable() {
        let mut structure = Structure::tower(Vec2::ZERO, 50.0);
        assert!(structure.is_targetable());
        structure.health = 0.0;
        assert!(!structure.is_targetable());
        assert_eq!(structure.strength(), 10.0);
    }

    #[test]
    fn test_tag_indices_unique() {
        let mut seen: Vec<u8> = BehaviorTag::ALL.iter().map(|t| t.index()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), BehaviorTag::ALL.len());
    }
}
