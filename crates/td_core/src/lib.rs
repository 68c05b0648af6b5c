//! # TD Core
//!
//! Simulation core for a tower defense game.
//!
//! This crate contains **only** simulation logic:
//! - No rendering
//! - No IO beyond loading configuration files
//! - No system randomness (all jitter comes from seeded generators)
//!
//! The host game owns structures, the base and the player's purse. It
//! exposes them to the core through the [`world::Battlefield`] trait and
//! drives everything with [`simulation::Simulation::tick`].
//!
//! ## Crate Structure
//!
//! - [`pool`] - Generational object pools with auto-return and shrinking
//! - [`spatial`] - Uniform grid for radius and bounds queries
//! - [`targeting`] - Per-behavior target selection with a short-lived cache
//! - [`behavior`] - Behavior mode evaluation and attack groups
//! - [`movement`] - Trajectory styles, avoidance and contact detection
//! - [`collision`] - Contact outcomes and projectile hits
//! - [`wave`] - Wave lifecycle, spawn schedule and kill accounting
//! - [`simulation`] - Per-tick orchestration
//! - [`world`] - Host-side interfaces
//! - [`config`] - RON-loadable configuration

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod behavior;
pub mod cache;
pub mod collision;
pub mod components;
pub mod config;
pub mod error;
pub mod math;
pub mod movement;
pub mod pool;
pub mod simulation;
pub mod spatial;
pub mod targeting;
pub mod wave;
pub mod world;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::behavior::{BehaviorConfig, BehaviorController};
    pub use crate::collision::{CollisionConfig, CollisionResolver, ContactOutcome};
    pub use crate::components::*;
    pub use crate::config::SimConfig;
    pub use crate::error::{Result, SimError};
    pub use crate::math::{Rect, Vec2};
    pub use crate::movement::{MovementConfig, MovementEngine, Trajectory};
    pub use crate::pool::{ObjectPool, PoolConfig, PoolHandle, PoolStats, Poolable};
    pub use crate::simulation::{SimStats, Simulation, SkipReason, TickEvents};
    pub use crate::spatial::{GridConfig, SpatialGrid};
    pub use crate::targeting::{TargetContext, TargetResolver, TargetingConfig};
    pub use crate::wave::{WaveConfig, WaveController, WaveEvent, WavePhase};
    pub use crate::world::{Battlefield, GameFlags, OpenTerrain, SlotBoard, Terrain, TrenchTerrain};
}
