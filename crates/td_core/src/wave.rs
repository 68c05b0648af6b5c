//! Wave progression.
//!
//! ```text
//!            start_wave              kills >= required
//!   Idle ─────────────────▶ Active ─────────────────────▶ Complete
//!    ▲                                                        │
//!    └────────────── update (arms optional auto-start) ───────┘
//! ```
//!
//! Game over, observed on every [`WaveController::update`], forces the
//! controller back to idle and keeps it there until [`WaveController::reset`].
//! Kill counts never decrease within a wave and reset only on start.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::components::{AgentTemplate, BehaviorTag, BossProfile};
use crate::error::{Result, SimError};
use crate::math::Vec2;

/// Phase of the wave state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WavePhase {
    /// Nothing spawns; an auto-start may be pending.
    #[default]
    Idle,
    /// Spawning and movement run.
    Active,
    /// Required kills reached; becomes idle on the next update.
    Complete,
}

/// Roster entry: a template eligible from a given wave on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// First wave this entry may spawn in.
    pub from_wave: u32,
    /// Relative spawn weight.
    pub weight: u32,
    /// Agent template.
    pub template: AgentTemplate,
}

impl RosterEntry {
    fn new(from_wave: u32, weight: u32, tag: BehaviorTag) -> Self {
        Self {
            from_wave,
            weight,
            template: AgentTemplate {
                tag,
                ..AgentTemplate::default()
            },
        }
    }
}

/// Wave sizing, spawning and auto-start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    /// Kills required to clear wave 1.
    pub base_required_kills: u32,
    /// Additional kills required per later wave.
    pub kills_per_wave: u32,
    /// Whether the controller schedules spawns. When off, the host places
    /// every agent through `Simulation::spawn_agent`.
    pub scheduled_spawns: bool,
    /// Time between spawns while a wave is active.
    pub spawn_interval_ms: u64,
    /// Delay before the next wave starts on its own; `None` disables.
    pub auto_start_delay_ms: Option<u64>,
    /// Health growth per wave past the first, as a fraction.
    pub health_growth: f32,
    /// Spawn locations, used in rotation.
    pub spawn_points: Vec<Vec2>,
    /// Templates to draw from.
    pub roster: Vec<RosterEntry>,
    /// Every n-th wave ends with a boss.
    pub boss_every: Option<u32>,
    /// Template for boss spawns.
    pub boss: AgentTemplate,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            base_required_kills: 10,
            kills_per_wave: 5,
            scheduled_spawns: true,
            spawn_interval_ms: 800,
            auto_start_delay_ms: None,
            health_growth: 0.1,
            spawn_points: vec![Vec2::ZERO],
            roster: vec![
                RosterEntry::new(1, 6, BehaviorTag::Normal),
                RosterEntry::new(2, 2, BehaviorTag::Avoid),
                RosterEntry::new(2, 2, BehaviorTag::Rage),
                RosterEntry::new(3, 2, BehaviorTag::Stealth),
                RosterEntry::new(3, 2, BehaviorTag::Group),
                RosterEntry::new(4, 1, BehaviorTag::Tank),
                RosterEntry::new(4, 1, BehaviorTag::Ghost),
                RosterEntry::new(5, 1, BehaviorTag::Flee),
            ],
            boss_every: Some(5),
            boss: AgentTemplate {
                radius: 20.0,
                health: 1_000.0,
                speed: 0.03,
                tag: BehaviorTag::Boss,
                boss: Some(BossProfile {
                    spawns_minions: true,
                    ..BossProfile::default()
                }),
                gold: 100,
                contact_damage: 50.0,
            },
        }
    }
}

impl WaveConfig {
    /// Kills required to clear wave `wave` (1-based).
    #[must_use]
    pub fn required_kills_for(&self, wave: u32) -> u32 {
        self.base_required_kills
            .saturating_add(self.kills_per_wave.saturating_mul(wave.saturating_sub(1)))
    }

    /// Check values are in range.
    pub fn validate(&self) -> Result<()> {
        if self.base_required_kills == 0 {
            return Err(SimError::InvalidConfig(
                "wave: base_required_kills must be positive".to_string(),
            ));
        }
        if self.spawn_points.is_empty() {
            return Err(SimError::InvalidConfig(
                "wave: at least one spawn point is required".to_string(),
            ));
        }
        if self.roster.iter().all(|entry| entry.from_wave > 1 || entry.weight == 0) {
            return Err(SimError::InvalidConfig(
                "wave: roster needs a weighted entry available from wave 1".to_string(),
            ));
        }
        if self.boss_every == Some(0) {
            return Err(SimError::InvalidConfig(
                "wave: boss_every must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Notable wave transitions, returned from the simulation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveEvent {
    /// A wave began.
    Started {
        /// Wave number.
        wave: u32,
        /// Kills needed to clear it.
        required_kills: u32,
    },
    /// A wave was cleared.
    Completed {
        /// Wave number.
        wave: u32,
    },
    /// The next wave will start on its own.
    AutoStartScheduled {
        /// Wave that will start.
        wave: u32,
        /// Simulation time of the start.
        at_ms: u64,
    },
    /// A pending auto-start was cancelled by an explicit start.
    AutoStartCancelled,
    /// Game over stopped the controller.
    ForcedIdle,
}

/// An agent the schedule wants spawned now.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    /// Template, already scaled for the wave.
    pub template: AgentTemplate,
    /// Spawn location.
    pub position: Vec2,
    /// Wave number.
    pub wave: u32,
}

/// Callback invoked once per completed wave with the wave number.
pub type WaveCallback = Box<dyn FnMut(u32)>;

/// Finite-state wave progression with a spawn schedule.
pub struct WaveController {
    config: WaveConfig,
    phase: WavePhase,
    wave: u32,
    kills: u32,
    required_kills: u32,
    spawned: u32,
    next_spawn_at_ms: u64,
    auto_start_at_ms: Option<u64>,
    game_over: bool,
    callbacks: Vec<WaveCallback>,
    events: Vec<WaveEvent>,
    rng: StdRng,
}

impl fmt::Debug for WaveController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaveController")
            .field("phase", &self.phase)
            .field("wave", &self.wave)
            .field("kills", &self.kills)
            .field("required_kills", &self.required_kills)
            .field("spawned", &self.spawned)
            .field("auto_start_at_ms", &self.auto_start_at_ms)
            .field("game_over", &self.game_over)
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

impl WaveController {
    /// Create an idle controller before wave 1.
    #[must_use]
    pub fn new(config: WaveConfig, seed: u64) -> Self {
        Self {
            config,
            phase: WavePhase::Idle,
            wave: 0,
            kills: 0,
            required_kills: 0,
            spawned: 0,
            next_spawn_at_ms: 0,
            auto_start_at_ms: None,
            game_over: false,
            callbacks: Vec::new(),
            events: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &WaveConfig {
        &self.config
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> WavePhase {
        self.phase
    }

    /// Whether spawning and movement are permitted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase == WavePhase::Active
    }

    /// Current (or last) wave number; 0 before the first start.
    #[must_use]
    pub fn wave(&self) -> u32 {
        self.wave
    }

    /// Kills recorded in the current wave.
    #[must_use]
    pub fn kills(&self) -> u32 {
        self.kills
    }

    /// Kills required for the current wave.
    #[must_use]
    pub fn required_kills(&self) -> u32 {
        self.required_kills
    }

    /// Agents the schedule has yet to spawn this wave.
    #[must_use]
    pub fn remaining_spawns(&self) -> u32 {
        if self.is_active() {
            self.required_kills.saturating_sub(self.spawned)
        } else {
            0
        }
    }

    /// Pending auto-start time.
    #[must_use]
    pub fn auto_start_at(&self) -> Option<u64> {
        self.auto_start_at_ms
    }

    /// Whether game over has been observed.
    #[must_use]
    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    /// Register a callback fired once per completed wave.
    pub fn on_wave_complete<F>(&mut self, callback: F)
    where
        F: FnMut(u32) + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Start wave `wave` (1-based), cancelling any pending auto-start.
    ///
    /// Ignored while a wave is active or after game over.
    pub fn start_wave(&mut self, wave: u32, now_ms: u64) -> bool {
        if self.game_over || self.phase == WavePhase::Active {
            debug!(wave, phase = ?self.phase, game_over = self.game_over, "Wave start ignored");
            return false;
        }
        if self.auto_start_at_ms.take().is_some() {
            self.events.push(WaveEvent::AutoStartCancelled);
        }
        let wave = wave.max(1);
        self.phase = WavePhase::Active;
        self.wave = wave;
        self.kills = 0;
        self.required_kills = self.config.required_kills_for(wave);
        self.spawned = 0;
        self.next_spawn_at_ms = now_ms;
        self.events.push(WaveEvent::Started {
            wave,
            required_kills: self.required_kills,
        });
        debug!(wave, required_kills = self.required_kills, "Wave started");
        true
    }

    /// Count one agent removal. Returns `true` on the kill that completes
    /// the wave; kills outside an active wave are ignored.
    pub fn record_kill(&mut self) -> bool {
        if self.phase != WavePhase::Active {
            return false;
        }
        self.kills += 1;
        if self.kills < self.required_kills {
            return false;
        }
        self.phase = WavePhase::Complete;
        self.events.push(WaveEvent::Completed { wave: self.wave });
        debug!(wave = self.wave, kills = self.kills, "Wave complete");
        for callback in &mut self.callbacks {
            callback(self.wave);
        }
        true
    }

    /// Per-tick update: game over, complete → idle, auto-start.
    /// Returns events accumulated since the previous call.
    pub fn update(&mut self, now_ms: u64, game_over: bool) -> Vec<WaveEvent> {
        if game_over {
            if !self.game_over {
                debug!(wave = self.wave, "Game over, wave controller idle");
                self.events.push(WaveEvent::ForcedIdle);
            }
            self.game_over = true;
            self.phase = WavePhase::Idle;
            self.auto_start_at_ms = None;
            return std::mem::take(&mut self.events);
        }

        match self.phase {
            WavePhase::Complete => {
                self.phase = WavePhase::Idle;
                if let Some(delay) = self.config.auto_start_delay_ms {
                    let at_ms = now_ms + delay;
                    self.auto_start_at_ms = Some(at_ms);
                    self.events.push(WaveEvent::AutoStartScheduled {
                        wave: self.wave + 1,
                        at_ms,
                    });
                }
            }
            WavePhase::Idle => {
                if self.auto_start_at_ms.is_some_and(|at| now_ms >= at) {
                    self.auto_start_at_ms = None;
                    self.start_wave(self.wave + 1, now_ms);
                }
            }
            WavePhase::Active => {}
        }
        std::mem::take(&mut self.events)
    }

    /// Spawns due by `now_ms`. One spawn per elapsed interval, up to the
    /// wave's required kills; the final spawn of a boss wave is the boss.
    pub fn due_spawns(&mut self, now_ms: u64) -> Vec<SpawnRequest> {
        let mut due = Vec::new();
        while self.config.scheduled_spawns
            && self.is_active()
            && self.spawned < self.required_kills
            && now_ms >= self.next_spawn_at_ms
        {
            let last = self.spawned + 1 == self.required_kills;
            let boss_wave = self
                .config
                .boss_every
                .is_some_and(|every| every > 0 && self.wave % every == 0);
            let mut template = if last && boss_wave {
                self.config.boss.clone()
            } else {
                self.pick_template()
            };
            template.health *= 1.0 + self.config.health_growth * (self.wave - 1) as f32;

            let points = &self.config.spawn_points;
            let position = if points.is_empty() {
                Vec2::ZERO
            } else {
                points[self.spawned as usize % points.len()]
            };
            due.push(SpawnRequest {
                template,
                position,
                wave: self.wave,
            });
            self.spawned += 1;
            self.next_spawn_at_ms += self.config.spawn_interval_ms.max(1);
        }
        due
    }

    /// Put back a spawn that could not be placed; it is retried one
    /// interval from now.
    pub fn defer_spawn(&mut self, now_ms: u64) {
        if self.is_active() && self.spawned > 0 {
            self.spawned -= 1;
            self.next_spawn_at_ms = now_ms + self.config.spawn_interval_ms.max(1);
        }
    }

    /// Events accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<WaveEvent> {
        std::mem::take(&mut self.events)
    }

    fn pick_template(&mut self) -> AgentTemplate {
        let wave = self.wave;
        let total: u32 = self
            .config
            .roster
            .iter()
            .filter(|e| e.from_wave <= wave)
            .map(|e| e.weight)
            .sum();
        if total == 0 {
            return AgentTemplate::default();
        }
        let mut roll = self.rng.random_range(0..total);
        for entry in self.config.roster.iter().filter(|e| e.from_wave <= wave) {
            if roll < entry.weight {
                return entry.template.clone();
            }
            roll -= entry.weight;
        }
        AgentTemplate::default()
    }

    /// Return to the initial state, keeping callbacks.
    pub fn reset(&mut self) {
        self.phase = WavePhase::Idle;
        self.wave = 0;
        self.kills = 0;
        self.required_kills = 0;
        self.spawned = 0;
        self.next_spawn_at_ms = 0;
        self.auto_start_at_ms = None;
        self.game_over = false;
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn controller(required: u32) -> WaveController {
        WaveController::new(
            WaveConfig {
                base_required_kills: required,
                ..WaveConfig::default()
            },
            1,
        )
    }

    #[test]
    fn test_required_kills_scale_with_wave() {
        let config = WaveConfig::default();
        assert_eq!(config.required_kills_for(1), 10);
        assert_eq!(config.required_kills_for(3), 20);
    }

    #[test]
    fn test_tenth_kill_completes_exactly_once() {
        let mut waves = controller(10);
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        waves.on_wave_complete(move |_| counter.set(counter.get() + 1));

        assert!(waves.start_wave(1, 0));
        for _ in 0..9 {
            assert!(!waves.record_kill());
        }
        assert!(waves.is_active());
        assert!(waves.record_kill());
        assert_eq!(waves.phase(), WavePhase::Complete);
        assert!(!waves.record_kill());
        assert!(!waves.record_kill());
        assert_eq!(fired.get(), 1);
        assert_eq!(waves.kills(), 10);
    }

    #[test]
    fn test_complete_becomes_idle_on_update() {
        let mut waves = controller(1);
        waves.start_wave(1, 0);
        waves.record_kill();
        let events = waves.update(16, false);
        assert_eq!(
            events,
            vec![
                WaveEvent::Started {
                    wave: 1,
                    required_kills: 1
                },
                WaveEvent::Completed { wave: 1 },
            ]
        );
        assert_eq!(waves.phase(), WavePhase::Idle);
    }

    #[test]
    fn test_auto_start_and_cancellation() {
        let mut waves = WaveController::new(
            WaveConfig {
                base_required_kills: 1,
                kills_per_wave: 0,
                auto_start_delay_ms: Some(1_000),
                ..WaveConfig::default()
            },
            1,
        );
        waves.start_wave(1, 0);
        waves.record_kill();
        waves.update(100, false);
        assert_eq!(waves.auto_start_at(), Some(1_100));

        waves.update(1_099, false);
        assert!(!waves.is_active());
        waves.update(1_100, false);
        assert!(waves.is_active());
        assert_eq!(waves.wave(), 2);

        // Explicit start cancels a pending auto-start.
        assert!(waves.record_kill());
        waves.update(2_000, false);
        assert!(waves.auto_start_at().is_some());
        waves.start_wave(3, 2_100);
        assert_eq!(waves.auto_start_at(), None);
        assert!(waves
            .update(2_200, false)
            .contains(&WaveEvent::AutoStartCancelled));
    }

    #[test]
    fn test_game_over_forces_idle() {
        let mut waves = controller(5);
        waves.start_wave(1, 0);
        let events = waves.update(10, true);
        assert!(events.contains(&WaveEvent::ForcedIdle));
        assert_eq!(waves.phase(), WavePhase::Idle);
        assert!(!waves.start_wave(2, 20));
        assert!(!waves.record_kill());

        waves.reset();
        assert!(waves.start_wave(1, 30));
    }

    #[test]
    fn test_start_ignored_while_active() {
        let mut waves = controller(5);
        assert!(waves.start_wave(1, 0));
        waves.record_kill();
        assert!(!waves.start_wave(2, 10));
        assert_eq!(waves.kills(), 1);
    }

    #[test]
    fn test_spawn_schedule_paces_and_caps() {
        let mut waves = controller(3);
        waves.start_wave(1, 0);
        assert_eq!(waves.due_spawns(0).len(), 1);
        assert_eq!(waves.due_spawns(799).len(), 0);
        assert_eq!(waves.due_spawns(5_000).len(), 2);
        assert!(waves.due_spawns(10_000).is_empty());
        assert_eq!(waves.remaining_spawns(), 0);
    }

    #[test]
    fn test_unscheduled_waves_never_spawn() {
        let mut waves = WaveController::new(
            WaveConfig {
                scheduled_spawns: false,
                ..WaveConfig::default()
            },
            1,
        );
        waves.start_wave(1, 0);
        assert!(waves.due_spawns(60_000).is_empty());
        assert!(waves.is_active());
    }

    #[test]
    fn test_deferred_spawn_is_retried() {
        let mut waves = controller(2);
        waves.start_wave(1, 0);
        assert_eq!(waves.due_spawns(0).len(), 1);
        waves.defer_spawn(0);
        assert_eq!(waves.remaining_spawns(), 2);
        assert!(waves.due_spawns(799).is_empty());
        assert_eq!(waves.due_spawns(800).len(), 1);
    }

    #[test]
    fn test_boss_wave_ends_with_boss() {
        let mut waves = WaveController::new(
            WaveConfig {
                base_required_kills: 2,
                kills_per_wave: 0,
                boss_every: Some(1),
                ..WaveConfig::default()
            },
            1,
        );
        waves.start_wave(1, 0);
        let spawns = waves.due_spawns(10_000);
        assert_eq!(spawns.len(), 2);
        assert_eq!(spawns[1].template.tag, BehaviorTag::Boss);
        assert_ne!(spawns[0].template.tag, BehaviorTag::Boss);
    }

    #[test]
    fn test_health_scales_with_wave() {
        let mut waves = WaveController::new(
            WaveConfig {
                roster: vec![RosterEntry::new(1, 1, BehaviorTag::Normal)],
                boss_every: None,
                ..WaveConfig::default()
            },
            1,
        );
        waves.start_wave(3, 0);
        let spawn = &waves.due_spawns(0)[0];
        assert!((spawn.template.health - 120.0).abs() < 1e-3);
        assert_eq!(spawn.wave, 3);
    }

    proptest! {
        #[test]
        fn prop_kills_monotonic_and_complete_iff_reached(
            required in 1u32..30,
            kills in 0u32..60,
        ) {
            let mut waves = controller(required);
            waves.start_wave(1, 0);
            let mut previous = 0;
            for _ in 0..kills {
                waves.record_kill();
                prop_assert!(waves.kills() >= previous);
                previous = waves.kills();
                prop_assert_eq!(
                    waves.phase() == WavePhase::Complete,
                    waves.kills() >= waves.required_kills()
                );
            }
        }
    }
}
