//! Scenario loading and configuration.
//!
//! A scenario is the host side of a game: the tower layout, the base, trench
//! zones, how towers shoot and how many waves to play. It embeds the
//! [`SimConfig`] the core runs with.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use td_core::components::{BaseTarget, ProjectileParams, Structure};
use td_core::config::SimConfig;
use td_core::error::SimError;
use td_core::math::{Rect, Vec2};
use td_core::world::TrenchTerrain;

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read scenario file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse scenario: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// Unknown built-in scenario name.
    #[error("Unknown scenario: {0}")]
    Unknown(String),
    /// The embedded simulation config is invalid.
    #[error("Invalid scenario: {0}")]
    Invalid(#[from] SimError),
}

/// How towers shoot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TowerFire {
    /// Targeting range from the tower center.
    pub range: f32,
    /// Time between shots per tower.
    pub interval_ms: u64,
    /// Projectile template; origin and direction are filled per shot.
    pub projectile: ProjectileParams,
}

impl Default for TowerFire {
    fn default() -> Self {
        Self {
            range: 180.0,
            interval_ms: 600,
            projectile: ProjectileParams::default(),
        }
    }
}

/// A complete scenario configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Simulation configuration.
    pub config: SimConfig,
    /// Tower slots.
    pub structures: Vec<Structure>,
    /// The base agents fall back to.
    pub base: Option<BaseTarget>,
    /// Slow zones.
    pub trenches: Vec<Rect>,
    /// Speed multiplier inside trenches.
    pub trench_multiplier: f32,
    /// Tower shooting; `None` for towers that never fire.
    pub tower_fire: Option<TowerFire>,
    /// Waves to play before the run counts as survived.
    pub waves: u32,
    /// Simulation step.
    pub tick_ms: u64,
    /// Hard stop.
    pub max_ticks: u64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self::lane_defense()
    }
}

impl Scenario {
    /// Load a scenario from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron_str(&contents)
    }

    /// Load from a RON string (useful for embedded scenarios).
    pub fn from_ron_str(ron: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = ron::from_str(ron)?;
        scenario.config.validate()?;
        Ok(scenario)
    }

    /// A built-in scenario by name, or a RON file when `name` ends in `.ron`.
    pub fn resolve(name: &str) -> Result<Self, ScenarioError> {
        if Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("ron"))
        {
            return Self::load(name);
        }
        match name {
            "lane_defense" => Ok(Self::lane_defense()),
            "fortress" => Ok(Self::fortress()),
            "open_field" => Ok(Self::open_field()),
            _ => Err(ScenarioError::Unknown(name.to_string())),
        }
    }

    /// Names accepted by [`Scenario::resolve`].
    #[must_use]
    pub fn builtin_names() -> &'static [&'static str] {
        &["lane_defense", "fortress", "open_field"]
    }

    /// Five towers along a lane, a trench in front of the base.
    #[must_use]
    pub fn lane_defense() -> Self {
        let mut config = SimConfig::default();
        config.wave.spawn_points = vec![Vec2::new(40.0, 500.0)];
        config.wave.auto_start_delay_ms = Some(2_000);

        Self {
            name: "Lane Defense".to_string(),
            description: "Towers along a single lane, trench before the base".to_string(),
            config,
            structures: (0..5)
                .map(|i| {
                    let x = 200.0 + 130.0 * i as f32;
                    let y = if i % 2 == 0 { 420.0 } else { 580.0 };
                    Structure::tower(Vec2::new(x, y), 120.0)
                })
                .collect(),
            base: Some(BaseTarget {
                position: Vec2::new(950.0, 500.0),
                radius: 40.0,
                health: 300.0,
                vulnerable: true,
            }),
            trenches: vec![Rect::from_corners(
                Vec2::new(820.0, 380.0),
                Vec2::new(880.0, 620.0),
            )],
            trench_multiplier: 0.5,
            tower_fire: Some(TowerFire::default()),
            waves: 5,
            tick_ms: 16,
            max_ticks: 60 * 60 * 10,
        }
    }

    /// Walled towers ring the base; agents must wear the walls down.
    #[must_use]
    pub fn fortress() -> Self {
        let mut config = SimConfig::default();
        config.wave.spawn_points = vec![
            Vec2::new(30.0, 30.0),
            Vec2::new(970.0, 30.0),
            Vec2::new(30.0, 970.0),
            Vec2::new(970.0, 970.0),
        ];
        config.wave.auto_start_delay_ms = Some(1_500);

        let center = Vec2::new(500.0, 500.0);
        Self {
            name: "Fortress".to_string(),
            description: "Walled ring around a central base".to_string(),
            config,
            structures: (0..8)
                .map(|i| {
                    let angle = i as f32 * std::f32::consts::TAU / 8.0;
                    Structure {
                        wall_strength: 60.0,
                        level: 2,
                        ..Structure::tower(center + Vec2::from_angle(angle) * 160.0, 150.0)
                    }
                })
                .collect(),
            base: Some(BaseTarget {
                position: center,
                radius: 50.0,
                health: 500.0,
                vulnerable: true,
            }),
            trenches: Vec::new(),
            trench_multiplier: 1.0,
            tower_fire: Some(TowerFire {
                range: 220.0,
                ..TowerFire::default()
            }),
            waves: 5,
            tick_ms: 16,
            max_ticks: 60 * 60 * 10,
        }
    }

    /// No towers at all; every agent heads for the base.
    #[must_use]
    pub fn open_field() -> Self {
        let mut config = SimConfig::default();
        config.wave.spawn_points = vec![Vec2::new(50.0, 50.0)];
        Self {
            name: "Open Field".to_string(),
            description: "Undefended base, measures raw agent throughput".to_string(),
            config,
            structures: Vec::new(),
            base: Some(BaseTarget {
                position: Vec2::new(900.0, 900.0),
                radius: 40.0,
                health: 10_000.0,
                vulnerable: true,
            }),
            trenches: Vec::new(),
            trench_multiplier: 1.0,
            tower_fire: None,
            waves: 3,
            tick_ms: 16,
            max_ticks: 60 * 60 * 5,
        }
    }

    /// Terrain built from the trench zones.
    #[must_use]
    pub fn terrain(&self) -> TrenchTerrain {
        TrenchTerrain {
            zones: self.trenches.clone(),
            multiplier: self.trench_multiplier,
        }
    }
}
