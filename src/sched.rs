//! Advisory doorbell serialization.
//!
//! When scheduler-ordered transmit is enabled, workers take turns at the
//! doorbell so the device observes batches in dispatch order. The lock is
//! advisory: a worker that spins past the configured bound proceeds anyway
//! rather than stalling the fast path, trading strict ordering for
//! progress.

use std::sync::atomic::{AtomicBool, Ordering};

/// Advisory spin lock over doorbell issue order.
pub struct SchedLock {
    busy: AtomicBool,
    spin_limit: u32,
}

impl SchedLock {
    pub fn new(spin_limit: u32) -> Self {
        Self {
            busy: AtomicBool::new(false),
            spin_limit,
        }
    }

    /// Wait for the doorbell to be free, bounded by the spin limit.
    /// Returns whether the lock was actually acquired.
    pub fn wait(&self) -> bool {
        let mut spins = self.spin_limit;
        loop {
            if self
                .busy
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
            if spins == 0 {
                return false;
            }
            spins -= 1;
            std::hint::spin_loop();
        }
    }

    /// Release the doorbell for the next worker.
    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn uncontended_acquire() {
        let lock = SchedLock::new(16);
        assert!(lock.wait());
        lock.release();
        assert!(lock.wait());
    }

    #[test]
    fn bounded_spin_gives_up() {
        let lock = SchedLock::new(8);
        assert!(lock.wait());
        // Second acquire on the same (held) lock must not hang.
        assert!(!lock.wait());
    }

    #[test]
    fn contended_handoff() {
        let lock = Arc::new(SchedLock::new(1_000_000));
        assert!(lock.wait());

        let l = Arc::clone(&lock);
        let h = thread::spawn(move || {
            let got = l.wait();
            l.release();
            got
        });

        lock.release();
        assert!(h.join().unwrap());
    }
}
