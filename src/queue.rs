//! Hardware queue state: network send queues and the inline-crypto queue.
//!
//! Both wrap a [`FlowCredit`] cache over an authoritative hardware depth
//! counter. The hardware side of the counter is written by the device (via
//! DMA on real silicon); completion handling outside this crate updates it
//! through [`SendQueue::set_hw_used`] / [`CryptoQueue::set_hw_used`].

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{CryptoConfig, QueueConfig};
use crate::credit::FlowCredit;
use crate::error::Error;

/// One network send queue.
pub struct SendQueue {
    /// Queue id placed in send headers.
    pub sq_id: u64,
    /// Doorbell register address.
    pub io_addr: u64,
    depth_adj: i64,
    sqes_per_sqb_log2: u32,
    /// Hardware-owned count of consumed depth units.
    fc: AtomicU64,
    credit: FlowCredit,
}

impl SendQueue {
    pub fn new(config: &QueueConfig) -> Result<Self, Error> {
        config.validate()?;
        let depth_adj = config.depth as i64;
        Ok(Self {
            sq_id: config.sq_id,
            io_addr: config.io_addr,
            depth_adj,
            sqes_per_sqb_log2: config.sqes_per_sqb_log2,
            fc: AtomicU64::new(0),
            credit: FlowCredit::new(depth_adj << config.sqes_per_sqb_log2),
        })
    }

    /// Real remaining depth in descriptor units, from the hardware counter.
    fn depth_units(&self) -> i64 {
        let depth = self.depth_adj - self.fc.load(Ordering::Relaxed) as i64;
        if depth <= 0 {
            return depth;
        }
        depth << self.sqes_per_sqb_log2
    }

    /// All-or-nothing reservation of `pkts` descriptor units.
    pub fn reserve(&self, pkts: u16) -> u16 {
        self.credit.reserve(pkts, || self.depth_units())
    }

    /// Burst admission: grants up to `pkts`, shedding the remainder.
    pub fn reserve_burst(&self, pkts: u16) -> u16 {
        self.credit.reserve_partial(pkts, || self.depth_units())
    }

    /// Update the hardware-consumed counter. Called from completion
    /// handling (or tests standing in for the device).
    pub fn set_hw_used(&self, units: u64) {
        self.fc.store(units, Ordering::Relaxed);
    }

    /// Cached credit value, for diagnostics.
    pub fn credit_value(&self) -> i64 {
        self.credit.value()
    }
}

/// The inline-crypto queue. Same shape as [`SendQueue`] but addresses a
/// separate hardware resource; its depth counter is unsigned and there is
/// no descriptor-unit scaling.
pub struct CryptoQueue {
    /// Doorbell register address.
    pub io_addr: u64,
    nb_desc: i64,
    fc: AtomicU64,
    credit: FlowCredit,
}

impl CryptoQueue {
    pub fn new(config: &CryptoConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            io_addr: config.io_addr,
            nb_desc: config.nb_desc as i64,
            fc: AtomicU64::new(0),
            credit: FlowCredit::new(config.nb_desc as i64),
        })
    }

    fn depth_units(&self) -> i64 {
        self.nb_desc - self.fc.load(Ordering::Relaxed) as i64
    }

    /// All-or-nothing reservation of `pkts` crypto descriptors.
    pub fn reserve(&self, pkts: u16) -> u16 {
        self.credit.reserve(pkts, || self.depth_units())
    }

    /// Burst admission against the crypto queue.
    pub fn reserve_burst(&self, pkts: u16) -> u16 {
        self.credit.reserve_partial(pkts, || self.depth_units())
    }

    /// Update the hardware-consumed counter.
    pub fn set_hw_used(&self, descs: u64) {
        self.fc.store(descs, Ordering::Relaxed);
    }

    /// Cached credit value, for diagnostics.
    pub fn credit_value(&self) -> i64 {
        self.credit.value()
    }
}
