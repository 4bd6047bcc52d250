//! Sharded counter storage for the transmit fast path.
//!
//! Multiple workers feed the same hardware queue, so the hot counters
//! (packets, bytes, drops) would bounce a cache line between cores if they
//! shared a single atomic. [`CounterGroup`] gives each worker its own shard;
//! a [`Counter`] references one slot across all shards and implements
//! [`metriken::Metric`] so it can be registered with `#[metric]`.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

const CACHE_LINE: usize = 128;
const SLOTS: usize = CACHE_LINE / 8;
const NUM_SHARDS: usize = 64;

thread_local! {
    /// Worker shard ID, set by `set_worker_shard()`. Falls back to a hash
    /// of a TLS address when unset.
    static SHARD_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Pin the current thread to a counter shard.
///
/// Call once at worker startup with the worker index so each transmit
/// worker writes its own shard.
pub fn set_worker_shard(id: usize) {
    SHARD_ID.set(Some(id % NUM_SHARDS));
}

#[repr(C, align(128))]
struct Shard {
    slots: [AtomicU64; SLOTS],
}

/// Sharded storage for up to 16 counters.
pub struct CounterGroup {
    shards: [Shard; NUM_SHARDS],
}

impl CounterGroup {
    /// Create a group with all slots zeroed.
    #[allow(clippy::declare_interior_mutable_const)]
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        const SHARD: Shard = Shard {
            slots: [ZERO; SLOTS],
        };
        Self {
            shards: [SHARD; NUM_SHARDS],
        }
    }

    #[inline]
    fn add(&self, slot: usize, value: u64) {
        debug_assert!(slot < SLOTS, "slot index out of bounds");
        self.shards[shard_index()].slots[slot].fetch_add(value, Ordering::Relaxed);
    }

    fn value(&self, slot: usize) -> u64 {
        debug_assert!(slot < SLOTS, "slot index out of bounds");
        self.shards
            .iter()
            .map(|s| s.slots[slot].load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for CounterGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// A counter occupying one slot of a [`CounterGroup`].
pub struct Counter {
    group: &'static CounterGroup,
    slot: usize,
}

impl Counter {
    /// Create a counter backed by `slot` of `group`.
    pub const fn new(group: &'static CounterGroup, slot: usize) -> Self {
        Self { group, slot }
    }

    /// Increment by 1.
    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    /// Add `value`.
    #[inline]
    pub fn add(&self, value: u64) {
        self.group.add(self.slot, value);
    }

    /// Current value, aggregated across all shards.
    pub fn value(&self) -> u64 {
        self.group.value(self.slot)
    }
}

impl metriken::Metric for Counter {
    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn value(&self) -> Option<metriken::Value<'_>> {
        Some(metriken::Value::Counter(Counter::value(self)))
    }
}

#[inline]
fn shard_index() -> usize {
    SHARD_ID.get().unwrap_or_else(|| {
        // Fallback: TLS address as a cheap thread identifier.
        thread_local! {
            static ID: u8 = const { 0 };
        }
        ID.with(|x| x as *const u8 as usize) % NUM_SHARDS
    })
}
