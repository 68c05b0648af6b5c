//! Test fixtures and helpers.
//!
//! Pre-built battlefields and configurations for consistent testing.

use td_core::components::{AgentTemplate, BaseTarget, BehaviorTag, Structure};
use td_core::config::SimConfig;
use td_core::math::Vec2;
use td_core::simulation::Simulation;
use td_core::wave::WaveConfig;
use td_core::world::SlotBoard;

/// A tower at `position` with the given health and contact damage and no wall.
#[must_use]
pub fn tower(x: f32, y: f32, health: f32, damage: f32) -> Structure {
    Structure {
        damage,
        ..Structure::tower(Vec2::new(x, y), health)
    }
}

/// A walled tower that repels agents until the wall is worn down.
#[must_use]
pub fn walled_tower(x: f32, y: f32, wall_strength: f32) -> Structure {
    Structure {
        wall_strength,
        ..Structure::tower(Vec2::new(x, y), 100.0)
    }
}

/// A vulnerable base at `position`.
#[must_use]
pub fn base(x: f32, y: f32, health: f32) -> BaseTarget {
    BaseTarget {
        position: Vec2::new(x, y),
        radius: 40.0,
        health,
        vulnerable: true,
    }
}

/// Template with the given tag and speed; everything else default.
#[must_use]
pub fn template(tag: BehaviorTag, speed: f32) -> AgentTemplate {
    AgentTemplate {
        tag,
        speed,
        ..AgentTemplate::default()
    }
}

/// Config whose waves need `required_kills` removals, spawn every
/// `spawn_interval_ms` from `spawn_point` and never grow.
#[must_use]
pub fn wave_config(required_kills: u32, spawn_interval_ms: u64, spawn_point: Vec2) -> SimConfig {
    SimConfig {
        wave: WaveConfig {
            base_required_kills: required_kills,
            kills_per_wave: 0,
            spawn_interval_ms,
            spawn_points: vec![spawn_point],
            boss_every: None,
            health_growth: 0.0,
            ..WaveConfig::default()
        },
        ..SimConfig::default()
    }
}

/// Config without scheduled spawns; agents are placed by hand.
#[must_use]
pub fn manual_config(required_kills: u32) -> SimConfig {
    let mut config = wave_config(required_kills, 1_000, Vec2::ZERO);
    config.wave.scheduled_spawns = false;
    config
}

/// Simulation built from `config`.
///
/// # Panics
///
/// Panics if the config does not validate.
#[must_use]
pub fn simulation(config: SimConfig) -> Simulation {
    Simulation::new(config).expect("fixture config must validate")
}

/// Four towers in a row across the middle of the default world plus a base
/// in the far corner.
#[must_use]
pub fn lane_board() -> SlotBoard {
    SlotBoard::new(vec![
        tower(200.0, 500.0, 100.0, 10.0),
        tower(400.0, 500.0, 100.0, 10.0),
        tower(600.0, 500.0, 100.0, 10.0),
        walled_tower(800.0, 500.0, 40.0),
    ])
    .with_base(base(950.0, 950.0, 500.0))
}

/// Run `ticks` ticks of `delta_ms` on open terrain.
pub fn run_ticks(sim: &mut Simulation, board: &mut SlotBoard, ticks: u32, delta_ms: u64) {
    for _ in 0..ticks {
        sim.tick(delta_ms, board, &td_core::world::OpenTerrain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_configs_validate() {
        assert!(wave_config(3, 100, Vec2::ZERO).validate().is_ok());
        assert!(manual_config(1).validate().is_ok());
    }

    #[test]
    fn test_lane_board_layout() {
        let board = lane_board();
        assert_eq!(board.structures.len(), 4);
        assert!(board.structures[3].wall_strength > 0.0);
        assert!(board.base.is_some());
    }
}
