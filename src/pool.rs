//! Slab packet pool with allocation-domain (aura) accounting.
//!
//! The fast path never allocates pool policy; it resolves aura handles for
//! the descriptors it builds, counts consumed segments for background
//! refill, and returns dropped buffers in one batched free per burst.

use std::cell::UnsafeCell;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use bytes::Bytes;

use crate::buffer::{BufIndex, F_NEXT_PRESENT, PktBuf};
use crate::error::Error;

/// Configuration for one allocation domain.
#[derive(Clone)]
pub struct AuraConfig {
    /// Opaque hardware handle for this domain. The low 20 bits are placed
    /// in send headers.
    pub handle: u64,
}

struct Aura {
    handle: u64,
    /// Segments consumed from this domain, pending background refill.
    deplete: AtomicI64,
}

/// Slab of packet buffers addressed by [`BufIndex`].
///
/// Shared between transmit workers. Alloc/free go through an internal free
/// list; counter updates are atomic. Buffer contents are only touched by
/// the burst that owns the index, which is what makes the shared slab safe.
pub struct PktPool {
    slots: Box<[UnsafeCell<Option<PktBuf>>]>,
    free: Mutex<Vec<u32>>,
    auras: Box<[Aura]>,
    freed_total: AtomicU64,
}

// Safety: slot bodies are only accessed by the single burst that owns the
// index; the free list is mutex-guarded and all counters are atomics.
unsafe impl Send for PktPool {}
unsafe impl Sync for PktPool {}

impl PktPool {
    /// Create a pool with `capacity` slots and the given allocation domains.
    pub fn new(capacity: usize, auras: &[AuraConfig]) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::Config("pool capacity must be > 0".into()));
        }
        if auras.is_empty() || auras.len() > 255 {
            return Err(Error::Config(
                "aura count must be in 1..=255".into(),
            ));
        }
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let free = (0..capacity as u32).rev().collect();
        let auras = auras
            .iter()
            .map(|a| Aura {
                handle: a.handle,
                deplete: AtomicI64::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            slots,
            free: Mutex::new(free),
            auras,
            freed_total: AtomicU64::new(0),
        })
    }

    /// Allocate one segment holding `data`, drawn from domain `pool`.
    pub fn alloc(&self, data: Bytes, pool: u8) -> Result<BufIndex, Error> {
        if pool as usize >= self.auras.len() {
            return Err(Error::InvalidAura(pool));
        }
        let idx = {
            let mut free = self.free.lock().unwrap();
            free.pop().ok_or(Error::PoolExhausted)?
        };
        // Safety: the index just came off the free list, nobody else holds it.
        unsafe {
            *self.slots[idx as usize].get() = Some(PktBuf::new(data, pool));
        }
        Ok(BufIndex(idx))
    }

    /// Link `next` as the successor segment of `head`.
    pub fn chain(&self, head: BufIndex, next: BufIndex) {
        // Safety: setup-time helper; the caller owns both indices.
        let b = unsafe { self.get_mut(head) };
        b.next = Some(next);
        b.flags |= F_NEXT_PRESENT;
    }

    /// Shared view of a live buffer.
    pub fn get(&self, idx: BufIndex) -> &PktBuf {
        // Safety: live indices are exclusively owned by their burst; the
        // slot stays populated for the duration of the borrow.
        unsafe {
            (*self.slots[idx.0 as usize].get())
                .as_ref()
                .expect("stale buffer index")
        }
    }

    /// Exclusive view of a live buffer.
    ///
    /// # Safety
    ///
    /// The caller must hold exclusive ownership of `idx` (a burst owns its
    /// buffers until they are handed to hardware or freed).
    pub(crate) unsafe fn get_mut(&self, idx: BufIndex) -> &mut PktBuf {
        unsafe {
            (*self.slots[idx.0 as usize].get())
                .as_mut()
                .expect("stale buffer index")
        }
    }

    /// Run `f` with exclusive access to a live buffer, for packet setup
    /// (offload flags, header offsets, crypto metadata).
    ///
    /// The caller must own `idx` exclusively and must not hold a view from
    /// [`get`](Self::get) across the call.
    pub fn with_mut<R>(&self, idx: BufIndex, f: impl FnOnce(&mut PktBuf) -> R) -> R {
        // Safety: ownership contract above.
        f(unsafe { self.get_mut(idx) })
    }

    /// Segment count of the chain headed by `idx`, honoring the burst's
    /// multi-segment flag: without it every packet is treated as linear.
    pub fn chain_segs(&self, idx: BufIndex, mseg: bool) -> u64 {
        if !mseg {
            return 1;
        }
        let mut n = 1;
        let mut b = self.get(idx);
        while b.flags & F_NEXT_PRESENT != 0 {
            let next = b.next.expect("chained buffer without next link");
            b = self.get(next);
            n += 1;
        }
        n
    }

    /// Total payload length of the chain headed by `idx`.
    pub fn chain_len(&self, idx: BufIndex) -> u32 {
        let mut total = 0;
        let mut b = self.get(idx);
        loop {
            total += b.current_len();
            if b.flags & F_NEXT_PRESENT == 0 {
                return total;
            }
            b = self.get(b.next.expect("chained buffer without next link"));
        }
    }

    /// Aura handle for domain `pool`.
    pub fn aura_handle(&self, pool: u8) -> u64 {
        self.auras[pool as usize].handle
    }

    /// Resolve the aura handle for `buf`, amortized through `cache`, and
    /// account `n_segs` consumed segments for refill.
    pub fn resolve_aura(&self, buf: &PktBuf, n_segs: u64, cache: &mut AuraCache) -> u64 {
        if cache.pool != buf.pool {
            cache.pool = buf.pool;
            cache.aura = self.auras[buf.pool as usize].handle;
        }
        cache.refill += n_segs as u32;
        cache.aura
    }

    /// Flush a burst's consumption accounting into the pool so background
    /// refill can react.
    // TODO: split the deplete count per domain when a burst crosses pools;
    // it is currently charged to the last cached one.
    pub fn flush_accounting(&self, cache: &AuraCache) {
        if cache.pool == u8::MAX || cache.refill == 0 {
            return;
        }
        self.auras[cache.pool as usize]
            .deplete
            .fetch_add(cache.refill as i64, Ordering::Relaxed);
    }

    /// Pending deplete count for domain `pool`.
    pub fn deplete_count(&self, pool: u8) -> i64 {
        self.auras[pool as usize].deplete.load(Ordering::Relaxed)
    }

    /// Return a batch of dropped buffers (and their chains) to the pool.
    ///
    /// Each segment's reference count is dropped once; slots are reclaimed
    /// when the last reference goes.
    pub fn free_batch(&self, list: &[BufIndex]) {
        let mut reclaimed = Vec::with_capacity(list.len());
        for &head in list {
            let mut cursor = Some(head);
            while let Some(idx) = cursor {
                let b = self.get(idx);
                cursor = if b.flags & F_NEXT_PRESENT != 0 {
                    b.next
                } else {
                    None
                };
                if b.release() {
                    // Safety: last reference just dropped; nobody else can
                    // reach this slot anymore.
                    unsafe {
                        *self.slots[idx.0 as usize].get() = None;
                    }
                    reclaimed.push(idx.0);
                }
            }
        }
        if !reclaimed.is_empty() {
            self.freed_total
                .fetch_add(reclaimed.len() as u64, Ordering::Relaxed);
            self.free.lock().unwrap().extend(reclaimed);
        }
    }

    /// Total segments ever reclaimed by [`free_batch`](Self::free_batch).
    pub fn freed(&self) -> u64 {
        self.freed_total.load(Ordering::Relaxed)
    }

    /// Free slots remaining.
    pub fn free_count(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

/// Per-burst aura resolution cache.
///
/// Consecutive buffers from the same allocation domain skip the table
/// lookup; the segment consumption count accumulates here until the burst
/// flushes it.
pub struct AuraCache {
    aura: u64,
    pool: u8,
    /// Segments consumed so far in this burst.
    pub refill: u32,
}

impl AuraCache {
    pub fn new() -> Self {
        Self {
            aura: u64::MAX,
            pool: u8::MAX,
            refill: 0,
        }
    }
}

impl Default for AuraCache {
    fn default() -> Self {
        Self::new()
    }
}
