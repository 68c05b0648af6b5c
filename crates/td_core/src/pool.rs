//! Generic object pooling for transient entities.
//!
//! The pool owns every object it ever constructed. Callers address
//! checked-out objects through generational [`PoolHandle`]s; once an object
//! is released its slot generation advances, so stale handles can neither
//! read nor mutate the idle object.
//!
//! # Policy
//!
//! - **Pre-warm**: `target_capacity × pre_warm_fraction` objects are built
//!   eagerly in [`ObjectPool::new`].
//! - **Max size**: idle objects beyond `max_size` are discarded on release.
//! - **Max idle time**: [`ObjectPool::shrink`] drops objects idle longer
//!   than `max_idle_ms`.
//! - **Auto-return**: objects not released within `auto_return_ms` are
//!   force-released by [`ObjectPool::drain_expired`]. This is a leak safety
//!   net drained once per tick, not a lifecycle mechanism.
//!
//! # Example
//!
//! ```
//! use td_core::pool::{ObjectPool, PoolConfig, Poolable};
//!
//! #[derive(Default)]
//! struct Spark {
//!     ttl: u32,
//! }
//!
//! impl Poolable for Spark {}
//!
//! let mut pool: ObjectPool<Spark> = ObjectPool::new(PoolConfig::named("sparks")).unwrap();
//! let handle = pool.acquire(0).unwrap();
//! pool.get_mut(handle).unwrap().ttl = 30;
//!
//! assert!(pool.release(handle, 16));
//! // Double release is tolerated.
//! assert!(!pool.release(handle, 16));
//! ```

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// An object that can live in an [`ObjectPool`].
///
/// `reset` must return the object to the state of a freshly constructed
/// one; the default implementation replaces it with `Default::default()`.
pub trait Poolable: Default {
    /// Return the object to its default state.
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Generational handle to a checked-out pool object.
pub struct PoolHandle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PoolHandle<T> {
    const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index inside the pool.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation this handle was issued for.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl<T> Clone for PoolHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PoolHandle<T> {}

impl<T> PartialEq for PoolHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for PoolHandle<T> {}

impl<T> Hash for PoolHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> PartialOrd for PoolHandle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PoolHandle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl<T> fmt::Debug for PoolHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolHandle({}v{})", self.index, self.generation)
    }
}

/// Pool policy knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Name used in logs and errors.
    pub name: String,
    /// Expected steady-state number of live objects.
    pub target_capacity: usize,
    /// Fraction of `target_capacity` constructed eagerly.
    pub pre_warm_fraction: f32,
    /// Maximum number of idle objects retained.
    pub max_size: usize,
    /// Idle objects older than this are dropped by [`ObjectPool::shrink`].
    pub max_idle_ms: Option<u64>,
    /// Objects held longer than this are force-released.
    pub auto_return_ms: Option<u64>,
    /// Construct new objects when no idle object is available.
    pub create_on_demand: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            target_capacity: 256,
            pre_warm_fraction: 0.5,
            max_size: 1024,
            max_idle_ms: Some(30_000),
            auto_return_ms: None,
            create_on_demand: true,
        }
    }
}

impl PoolConfig {
    /// Default policy with a custom name.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Number of objects constructed by pre-warming.
    #[must_use]
    pub fn pre_warm_count(&self) -> usize {
        let count = (self.target_capacity as f64 * f64::from(self.pre_warm_fraction)).floor();
        (count as usize).min(self.max_size)
    }

    /// Check values are in range.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.pre_warm_fraction) {
            return Err(SimError::InvalidConfig(format!(
                "pool '{}': pre_warm_fraction must be within 0..=1, got {}",
                self.name, self.pre_warm_fraction
            )));
        }
        if self.max_size == 0 {
            return Err(SimError::InvalidConfig(format!(
                "pool '{}': max_size must be positive",
                self.name
            )));
        }
        if self.auto_return_ms == Some(0) {
            return Err(SimError::InvalidConfig(format!(
                "pool '{}': auto_return_ms must be positive when set",
                self.name
            )));
        }
        Ok(())
    }
}

/// Efficiency and occupancy report for a pool.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Pool name.
    pub name: String,
    /// Idle objects ready for reuse.
    pub pool_size: usize,
    /// Objects currently checked out.
    pub active_count: usize,
    /// Objects ever constructed, including pre-warm.
    pub created: u64,
    /// Acquisitions served by a recycled object.
    pub reused: u64,
    /// Idle objects dropped because the pool was full.
    pub discarded: u64,
    /// Idle objects dropped by the idle-time limit.
    pub expired: u64,
    /// Objects force-released by the auto-return queue.
    pub auto_returned: u64,
    /// `reused / total acquisitions`, 0 before the first acquisition.
    pub reuse_rate: f64,
}

#[derive(Debug)]
enum SlotState<T> {
    Active { value: T, acquired_at_ms: u64 },
    Idle { value: T, since_ms: u64 },
    Vacant,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    state: SlotState<T>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    created: u64,
    created_on_acquire: u64,
    reused: u64,
    discarded: u64,
    expired: u64,
    auto_returned: u64,
}

/// Reuse pool for one entity type.
#[derive(Debug)]
pub struct ObjectPool<T: Poolable> {
    config: PoolConfig,
    slots: Vec<Slot<T>>,
    /// Idle slot indices, most recently released last.
    idle: Vec<u32>,
    vacant: Vec<u32>,
    active_count: usize,
    counters: Counters,
    /// Auto-return deadlines: (deadline, slot index, generation).
    expiry: BinaryHeap<Reverse<(u64, u32, u32)>>,
}

impl<T: Poolable> ObjectPool<T> {
    /// Create a pool and pre-warm it.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let warm = config.pre_warm_count();
        let mut slots = Vec::with_capacity(config.target_capacity.max(warm));
        let mut idle = Vec::with_capacity(warm);
        for index in 0..warm {
            slots.push(Slot {
                generation: 0,
                state: SlotState::Idle {
                    value: T::default(),
                    since_ms: 0,
                },
            });
            idle.push(index as u32);
        }

        tracing::debug!(pool = %config.name, pre_warmed = warm, "Object pool created");

        Ok(Self {
            config,
            slots,
            idle,
            vacant: Vec::new(),
            active_count: 0,
            counters: Counters {
                created: warm as u64,
                ..Counters::default()
            },
            expiry: BinaryHeap::new(),
        })
    }

    /// Pool policy.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Objects currently checked out.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Idle objects ready for reuse.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Objects ever constructed.
    #[must_use]
    pub fn created_count(&self) -> u64 {
        self.counters.created
    }

    /// Check out an object: a recycled one if available, else a new one.
    ///
    /// Fails with [`SimError::PoolExhausted`] when nothing is idle and
    /// creation on demand is disabled. Never hands out an active object.
    pub fn acquire(&mut self, now_ms: u64) -> Result<PoolHandle<T>> {
        let index = if let Some(index) = self.idle.pop() {
            let slot = &mut self.slots[index as usize];
            let value = match std::mem::replace(&mut slot.state, SlotState::Vacant) {
                SlotState::Idle { value, .. } => value,
                other => {
                    // Idle list and slot states disagree; restore and fall back.
                    slot.state = other;
                    return self.acquire_fresh(now_ms);
                }
            };
            slot.state = SlotState::Active {
                value,
                acquired_at_ms: now_ms,
            };
            self.counters.reused += 1;
            index
        } else {
            return self.acquire_fresh(now_ms);
        };

        Ok(self.activate(index, now_ms))
    }

    fn acquire_fresh(&mut self, now_ms: u64) -> Result<PoolHandle<T>> {
        if !self.config.create_on_demand {
            tracing::warn!(
                pool = %self.config.name,
                active = self.active_count,
                "Pool exhausted"
            );
            return Err(SimError::PoolExhausted {
                pool: self.config.name.clone(),
                active: self.active_count,
            });
        }

        let state = SlotState::Active {
            value: T::default(),
            acquired_at_ms: now_ms,
        };
        let index = if let Some(index) = self.vacant.pop() {
            self.slots[index as usize].state = state;
            index
        } else {
            self.slots.push(Slot {
                generation: 0,
                state,
            });
            (self.slots.len() - 1) as u32
        };

        self.counters.created += 1;
        self.counters.created_on_acquire += 1;
        tracing::trace!(
            pool = %self.config.name,
            created = self.counters.created,
            "Pool constructed a new object"
        );

        Ok(self.activate(index, now_ms))
    }

    fn activate(&mut self, index: u32, now_ms: u64) -> PoolHandle<T> {
        self.active_count += 1;
        let generation = self.slots[index as usize].generation;
        if let Some(delay) = self.config.auto_return_ms {
            self.expiry
                .push(Reverse((now_ms.saturating_add(delay), index, generation)));
        }
        PoolHandle::new(index, generation)
    }

    /// Reset an object and return it to the idle set.
    ///
    /// Returns `false` without touching anything when the handle is stale
    /// or the object is not active, so overlapping cleanup paths may
    /// release the same object twice.
    pub fn release(&mut self, handle: PoolHandle<T>, now_ms: u64) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return false;
        };
        if slot.generation != handle.generation || !matches!(slot.state, SlotState::Active { .. })
        {
            tracing::trace!(pool = %self.config.name, ?handle, "Ignoring stale release");
            return false;
        }

        let SlotState::Active { mut value, .. } =
            std::mem::replace(&mut slot.state, SlotState::Vacant)
        else {
            return false;
        };
        value.reset();
        slot.generation = slot.generation.wrapping_add(1);
        self.active_count -= 1;

        if self.idle.len() >= self.config.max_size {
            // Slot stays vacant; the object is dropped here.
            self.vacant.push(handle.index);
            self.counters.discarded += 1;
        } else {
            slot.state = SlotState::Idle {
                value,
                since_ms: now_ms,
            };
            self.idle.push(handle.index);
        }
        true
    }

    /// True while `handle` refers to a checked-out object.
    #[must_use]
    pub fn contains(&self, handle: PoolHandle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Borrow a checked-out object.
    #[must_use]
    pub fn get(&self, handle: PoolHandle<T>) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        match &slot.state {
            SlotState::Active { value, .. } if slot.generation == handle.generation => Some(value),
            _ => None,
        }
    }

    /// Mutably borrow a checked-out object.
    pub fn get_mut(&mut self, handle: PoolHandle<T>) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        match &mut slot.state {
            SlotState::Active { value, .. } if slot.generation == handle.generation => Some(value),
            _ => None,
        }
    }

    /// Time at which a checked-out object was acquired.
    #[must_use]
    pub fn acquired_at(&self, handle: PoolHandle<T>) -> Option<u64> {
        let slot = self.slots.get(handle.index as usize)?;
        match slot.state {
            SlotState::Active { acquired_at_ms, .. } if slot.generation == handle.generation => {
                Some(acquired_at_ms)
            }
            _ => None,
        }
    }

    /// Iterate checked-out objects in ascending slot order.
    pub fn iter_active(&self) -> impl Iterator<Item = (PoolHandle<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match &slot.state {
                SlotState::Active { value, .. } => {
                    Some((PoolHandle::new(index as u32, slot.generation), value))
                }
                _ => None,
            })
    }

    /// Handles of all checked-out objects in ascending slot order.
    #[must_use]
    pub fn active_handles(&self) -> Vec<PoolHandle<T>> {
        self.iter_active().map(|(handle, _)| handle).collect()
    }

    /// Force-release objects whose auto-return deadline has passed.
    ///
    /// Each queued entry is re-checked against the slot, so objects that
    /// were released normally in the meantime are skipped. Returns the
    /// handles that were reclaimed.
    pub fn drain_expired(&mut self, now_ms: u64) -> Vec<PoolHandle<T>> {
        let mut reclaimed = Vec::new();
        while let Some(Reverse((deadline, index, generation))) = self.expiry.peek().copied() {
            if deadline > now_ms {
                break;
            }
            self.expiry.pop();

            let handle = PoolHandle::new(index, generation);
            if self.release(handle, now_ms) {
                self.counters.auto_returned += 1;
                reclaimed.push(handle);
            }
        }

        if !reclaimed.is_empty() {
            tracing::warn!(
                pool = %self.config.name,
                count = reclaimed.len(),
                "Auto-returned objects that were never released"
            );
        }
        reclaimed
    }

    /// Drop idle objects that have been idle longer than `max_idle_ms`.
    ///
    /// Returns the number of objects dropped.
    pub fn shrink(&mut self, now_ms: u64) -> usize {
        let Some(limit) = self.config.max_idle_ms else {
            return 0;
        };

        let mut dropped = Vec::new();
        let slots = &self.slots;
        self.idle.retain(|&index| {
            let keep = match slots[index as usize].state {
                SlotState::Idle { since_ms, .. } => now_ms.saturating_sub(since_ms) <= limit,
                _ => false,
            };
            if !keep {
                dropped.push(index);
            }
            keep
        });

        for &index in &dropped {
            self.slots[index as usize].state = SlotState::Vacant;
            self.vacant.push(index);
        }
        self.counters.expired += dropped.len() as u64;

        if !dropped.is_empty() {
            tracing::debug!(
                pool = %self.config.name,
                dropped = dropped.len(),
                idle = self.idle.len(),
                "Pool shrunk"
            );
        }
        dropped.len()
    }

    /// Release every checked-out object and clear the auto-return queue.
    ///
    /// Returns the number of objects released.
    pub fn reset(&mut self, now_ms: u64) -> usize {
        let handles = self.active_handles();
        let released = handles
            .into_iter()
            .filter(|&handle| self.release(handle, now_ms))
            .count();
        self.expiry.clear();
        released
    }

    /// Efficiency and occupancy report.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let acquisitions = self.counters.reused + self.counters.created_on_acquire;
        let reuse_rate = if acquisitions == 0 {
            0.0
        } else {
            self.counters.reused as f64 / acquisitions as f64
        };
        PoolStats {
            name: self.config.name.clone(),
            pool_size: self.idle.len(),
            active_count: self.active_count,
            created: self.counters.created,
            reused: self.counters.reused,
            discarded: self.counters.discarded,
            expired: self.counters.expired,
            auto_returned: self.counters.auto_returned,
            reuse_rate,
        }
    }
}
