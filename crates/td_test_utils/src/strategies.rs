//! Proptest strategies for simulation inputs.

use proptest::prelude::*;
use td_core::components::{AgentTemplate, BehaviorTag, ProjectileParams, Structure};
use td_core::math::Vec2;

/// Position inside the default 1000×1000 world.
pub fn arb_position() -> impl Strategy<Value = Vec2> {
    (0.0f32..1_000.0, 0.0f32..1_000.0).prop_map(|(x, y)| Vec2::new(x, y))
}

/// Any behavior tag.
pub fn arb_tag() -> impl Strategy<Value = BehaviorTag> {
    proptest::sample::select(BehaviorTag::ALL.to_vec())
}

/// Agent speed in pixels per millisecond.
pub fn arb_speed() -> impl Strategy<Value = f32> {
    0.01f32..0.3
}

/// Agent template with a random tag, speed and health.
pub fn arb_template() -> impl Strategy<Value = AgentTemplate> {
    (arb_tag(), arb_speed(), 1.0f32..500.0, 4.0f32..20.0).prop_map(
        |(tag, speed, health, radius)| AgentTemplate {
            tag,
            speed,
            health,
            radius,
            ..AgentTemplate::default()
        },
    )
}

/// Occupied tower with optional wall.
pub fn arb_structure() -> impl Strategy<Value = Structure> {
    (arb_position(), 1.0f32..300.0, prop_oneof![Just(0.0f32), 1.0f32..100.0]).prop_map(
        |(position, health, wall_strength)| Structure {
            wall_strength,
            ..Structure::tower(position, health)
        },
    )
}

/// Between one and `max` structures.
pub fn arb_structures(max: usize) -> impl Strategy<Value = Vec<Structure>> {
    proptest::collection::vec(arb_structure(), 1..max)
}

/// Agents to place: template and position pairs.
pub fn arb_agent_list(max: usize) -> impl Strategy<Value = Vec<(AgentTemplate, Vec2)>> {
    proptest::collection::vec((arb_template(), arb_position()), 1..max)
}

/// Projectile fired from a random point in a random direction.
pub fn arb_projectile() -> impl Strategy<Value = ProjectileParams> {
    (
        arb_position(),
        0.0f32..std::f32::consts::TAU,
        1.0f32..60.0,
        1u32..4,
        prop_oneof![Just(0.0f32), 10.0f32..60.0],
    )
        .prop_map(|(origin, angle, damage, pierce, splash_radius)| ProjectileParams {
            origin,
            direction: Vec2::from_angle(angle),
            damage,
            pierce,
            splash_radius,
            ..ProjectileParams::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn prop_positions_inside_world(pos in arb_position()) {
            prop_assert!(pos.x >= 0.0 && pos.x < 1_000.0);
            prop_assert!(pos.y >= 0.0 && pos.y < 1_000.0);
        }

        #[test]
        fn prop_structures_are_targetable(structure in arb_structure()) {
            prop_assert!(structure.is_targetable());
        }
    }
}
