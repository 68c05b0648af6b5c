//! Simulation configuration.
//!
//! Every tuned constant of the simulation lives in one of the sections
//! below. All sections default to the tuned values, so a RON file only
//! needs to name what it overrides:
//!
//! ```
//! use td_core::config::SimConfig;
//!
//! let config = SimConfig::from_ron_str("(seed: 7, wave: (base_required_kills: 3))").unwrap();
//! assert_eq!(config.seed, 7);
//! assert_eq!(config.wave.base_required_kills, 3);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::behavior::BehaviorConfig;
use crate::collision::CollisionConfig;
use crate::error::{Result, SimError};
use crate::movement::MovementConfig;
use crate::pool::PoolConfig;
use crate::spatial::GridConfig;
use crate::targeting::TargetingConfig;
use crate::wave::WaveConfig;

/// Aggregate configuration for a [`Simulation`](crate::simulation::Simulation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Agent pool policy.
    pub agent_pool: PoolConfig,
    /// Projectile pool policy.
    pub projectile_pool: PoolConfig,
    /// World extent and grid cell size.
    pub grid: GridConfig,
    /// Target scoring and cache window.
    pub targeting: TargetingConfig,
    /// Mode transition thresholds.
    pub behavior: BehaviorConfig,
    /// Avoidance and trajectory shaping.
    pub movement: MovementConfig,
    /// Contact resolution.
    pub collision: CollisionConfig,
    /// Wave sizing, spawning and auto-start.
    pub wave: WaveConfig,
    /// Interval between maintenance passes (pool shrink, cache sweeps).
    pub maintenance_interval_ms: u64,
    /// Seed for the simulation's random source.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            agent_pool: PoolConfig {
                target_capacity: 512,
                ..PoolConfig::named("agents")
            },
            projectile_pool: PoolConfig {
                target_capacity: 1024,
                max_size: 4096,
                auto_return_ms: Some(10_000),
                ..PoolConfig::named("projectiles")
            },
            grid: GridConfig::default(),
            targeting: TargetingConfig::default(),
            behavior: BehaviorConfig::default(),
            movement: MovementConfig::default(),
            collision: CollisionConfig::default(),
            wave: WaveConfig::default(),
            maintenance_interval_ms: 5_000,
            seed: 0x5EED,
        }
    }
}

impl SimConfig {
    /// Parse from a RON string.
    pub fn from_ron_str(ron: &str) -> Result<Self> {
        let config: Self = ron::from_str(ron)?;
        Ok(config)
    }

    /// Load from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron_str(&contents)
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.agent_pool.validate()?;
        self.projectile_pool.validate()?;
        self.grid.validate()?;
        self.targeting.validate()?;
        self.behavior.validate()?;
        self.movement.validate()?;
        self.collision.validate()?;
        self.wave.validate()?;
        if self.maintenance_interval_ms == 0 {
            return Err(SimError::InvalidConfig(
                "maintenance_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
