//! Lock-free transmit credit accounting.
//!
//! Each hardware queue keeps a cached credit count that workers draw from
//! with a single atomic subtract on the happy path. When the cache runs
//! dry, the authoritative hardware depth counter is consulted and the cache
//! is corrected with a compare-and-swap. The probe-and-correct sequence is
//! bounded: after [`FC_RETRY_LIMIT`] failed swaps the reservation degrades
//! to a deterministic zero grant instead of livelocking.

use std::sync::atomic::{AtomicI64, Ordering};

/// CAS attempts before a reservation gives up and grants nothing.
pub const FC_RETRY_LIMIT: u32 = 32;

/// Cached credit for one hardware queue, in descriptor units.
///
/// The cache may transiently go negative by the size of the probe in
/// flight; zero grants restore their subtraction, so a settled cache is
/// never negative by more than the most recent unsuccessful probe.
pub struct FlowCredit {
    cache: AtomicI64,
}

impl FlowCredit {
    /// Start with `initial` descriptor units of credit.
    pub fn new(initial: i64) -> Self {
        Self {
            cache: AtomicI64::new(initial),
        }
    }

    /// Current cached value. Diagnostic only; it may be stale immediately.
    pub fn value(&self) -> i64 {
        self.cache.load(Ordering::Relaxed)
    }

    /// All-or-nothing reservation of `pkts` descriptor units.
    ///
    /// `depth_units` reads the authoritative hardware counter and returns
    /// the real remaining depth in descriptor units (zero or negative when
    /// the queue is full). Grants `pkts` or `0`, never a partial count.
    pub fn reserve(&self, pkts: u16, depth_units: impl Fn() -> i64) -> u16 {
        let want = pkts as i64;
        let mut retry = FC_RETRY_LIMIT;
        loop {
            // Draw from the cache first.
            let val = self.cache.fetch_sub(want, Ordering::Relaxed) - want;
            if val >= 0 {
                return pkts;
            }

            let depth = depth_units();
            if depth <= 0 {
                return self.refuse(want);
            }

            let new_val = depth - want;
            if new_val < 0 {
                return self.refuse(want);
            }

            // Install the refreshed value unless another worker got there
            // first.
            if self
                .cache
                .compare_exchange(val, new_val, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return pkts;
            }

            // Another worker raced the swap; undo this iteration's
            // subtraction before going around again.
            self.cache.fetch_add(want, Ordering::Relaxed);
            retry -= 1;
            if retry == 0 {
                return 0;
            }
        }
    }

    /// Partial reservation used by whole-burst admission: grants as many of
    /// `pkts` as the queue can hold, shedding the remainder.
    ///
    /// Same bounded probe-and-correct loop as [`reserve`](Self::reserve),
    /// but when real depth covers only part of the request, the grant is
    /// truncated instead of refused.
    pub fn reserve_partial(&self, pkts: u16, depth_units: impl Fn() -> i64) -> u16 {
        let want = pkts as i64;
        let mut retry = FC_RETRY_LIMIT;
        loop {
            let val = self.cache.fetch_sub(want, Ordering::Relaxed) - want;
            if val >= 0 {
                return pkts;
            }

            let depth = depth_units();
            if depth <= 0 {
                return self.refuse(want);
            }

            let (grant, new_val) = if depth >= want {
                (pkts, depth - want)
            } else {
                (depth as u16, 0)
            };

            if self
                .cache
                .compare_exchange(val, new_val, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return grant;
            }

            self.cache.fetch_add(want, Ordering::Relaxed);
            retry -= 1;
            if retry == 0 {
                return 0;
            }
        }
    }

    /// Undo this probe's subtraction and grant nothing, so a refused
    /// request leaves no lasting debt in the cache.
    #[inline]
    fn refuse(&self, want: i64) -> u16 {
        self.cache.fetch_add(want, Ordering::Relaxed);
        0
    }
}
