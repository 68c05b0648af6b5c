//! Interfaces to the collaborators outside the simulation core.
//!
//! The core never owns towers, gold or terrain. It reads them through
//! [`Battlefield`] and [`Terrain`] and reports outcomes back through the
//! battlefield's mutation entry points. [`SlotBoard`] is a plain in-memory
//! battlefield for tests and headless runs.

use serde::{Deserialize, Serialize};

use crate::components::{AgentId, BaseTarget, RemovalCause, Structure};
use crate::math::{Rect, Vec2};

/// Global flags checked at the top of every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameFlags {
    /// Time does not advance while paused.
    pub paused: bool,
    /// Nothing runs once the game has ended.
    pub game_over: bool,
}

/// Structure provider and outcome sink.
pub trait Battlefield {
    /// Pause and game-over flags.
    fn flags(&self) -> GameFlags;

    /// Every tower slot, indexed consistently between calls within a tick.
    fn structures(&self) -> &[Structure];

    /// The virtual base, if the game has one.
    fn base(&self) -> Option<&BaseTarget>;

    /// Apply contact damage to a structure's integrity.
    fn damage_structure(&mut self, index: usize, amount: f32);

    /// Absorb contact damage with a structure's wall/shield.
    fn absorb_with_wall(&mut self, index: usize, amount: f32);

    /// Apply damage to the base.
    fn damage_base(&mut self, amount: f32);

    /// An agent left the simulation.
    fn remove_agent(&mut self, id: AgentId, cause: RemovalCause);

    /// Grant gold.
    fn add_reward(&mut self, amount: u32);
}

/// Terrain modifier lookup.
pub trait Terrain {
    /// Movement speed multiplier at `position` (1.0 = unmodified).
    fn speed_multiplier(&self, position: Vec2) -> f32;
}

/// Terrain with no modifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenTerrain;

impl Terrain for OpenTerrain {
    fn speed_multiplier(&self, _position: Vec2) -> f32 {
        1.0
    }
}

/// Terrain with rectangular trench zones that slow agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrenchTerrain {
    /// Trench areas.
    pub zones: Vec<Rect>,
    /// Speed multiplier inside a trench.
    pub multiplier: f32,
}

impl Default for TrenchTerrain {
    fn default() -> Self {
        Self {
            zones: Vec::new(),
            multiplier: 0.5,
        }
    }
}

impl Terrain for TrenchTerrain {
    fn speed_multiplier(&self, position: Vec2) -> f32 {
        if self.zones.iter().any(|zone| zone.contains(position)) {
            self.multiplier
        } else {
            1.0
        }
    }
}

/// In-memory battlefield.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotBoard {
    /// Tower slots.
    pub structures: Vec<Structure>,
    /// Optional base.
    pub base: Option<BaseTarget>,
    /// Flags; `game_over` is raised when the base falls.
    pub flags: GameFlags,
    /// Gold accumulated from rewards.
    pub gold: u64,
    /// Number of reward grants.
    pub reward_grants: u32,
    /// Removal log, in order.
    pub removed: Vec<(AgentId, RemovalCause)>,
}

impl SlotBoard {
    /// Board with the given structures and no base.
    #[must_use]
    pub fn new(structures: Vec<Structure>) -> Self {
        Self {
            structures,
            ..Self::default()
        }
    }

    /// Builder method to set the base.
    #[must_use]
    pub fn with_base(mut self, base: BaseTarget) -> Self {
        self.base = Some(base);
        self
    }

    /// Number of removals with the given cause.
    #[must_use]
    pub fn removals(&self, cause: RemovalCause) -> usize {
        self.removed.iter().filter(|(_, c)| *c == cause).count()
    }
}

impl Battlefield for SlotBoard {
    fn flags(&self) -> GameFlags {
        self.flags
    }

    fn structures(&self) -> &[Structure] {
        &self.structures
    }

    fn base(&self) -> Option<&BaseTarget> {
        self.base.as_ref()
    }

    fn damage_structure(&mut self, index: usize, amount: f32) {
        if let Some(structure) = self.structures.get_mut(index) {
            structure.health -= amount;
            if structure.health <= 0.0 {
                tracing::debug!(index, "Structure destroyed");
            }
        }
    }

    fn absorb_with_wall(&mut self, index: usize, amount: f32) {
        if let Some(structure) = self.structures.get_mut(index) {
            structure.wall_strength = (structure.wall_strength - amount).max(0.0);
        }
    }

    fn damage_base(&mut self, amount: f32) {
        if let Some(base) = self.base.as_mut() {
            base.health -= amount;
            if base.health <= 0.0 {
                tracing::debug!("Base destroyed, game over");
                self.flags.game_over = true;
            }
        }
    }

    fn remove_agent(&mut self, id: AgentId, cause: RemovalCause) {
        self.removed.push((id, cause));
    }

    fn add_reward(&mut self, amount: u32) {
        self.gold += u64::from(amount);
        self.reward_grants += 1;
    }
}
