//! The transmit fast path.
//!
//! A burst of packet indices comes in; as many as the queue has credit for
//! are turned into descriptors, staged into write-combine lines, and
//! committed with one doorbell per batch. Batches step down through sizes
//! 16, 8, 4 and finally singles, so a full burst costs a handful of
//! doorbells. The remainder of the burst is dropped and freed in one
//! batched call.
//!
//! Burst entry points never fail: they return the number of packets the
//! hardware accepted and account the rest as drops.

use std::sync::Arc;

use crate::buffer::BufIndex;
use crate::config::{Config, CryptoConfig, QueueConfig};
use crate::crypto::CryptoCtx;
use crate::descriptor::{Descriptor, build_send_hdr, build_sg_list};
use crate::error::Error;
use crate::lmt::{LMT_ARG_COUNT_SHIFT, LmtRegion, arg_size_slot, doorbell_addr};
use crate::metrics;
use crate::pool::{AuraCache, PktPool};
use crate::queue::SendQueue;
use crate::sched::SchedLock;

/// Per-burst option flags.
///
/// These are properties of the whole burst, hoisted out of the per-packet
/// loops: a caller that knows its packets are linear skips every chain
/// walk by leaving [`MSEG`](off::MSEG) clear.
pub mod off {
    /// Packets may be segment chains.
    pub const MSEG: u64 = 1 << 0;
    /// Honor per-packet outer checksum offload flags.
    pub const OUTER_CKSUM: u64 = 1 << 1;
    /// Serialize doorbell order through the scheduling lock.
    pub const SCHED_EN: u64 = 1 << 2;
}

/// The transmit path over one hardware line group.
///
/// Owns the device-facing line region, the send queues, and optionally the
/// inline-crypto context. One `TxPath` per worker; the underlying queues
/// and pool are shared.
pub struct TxPath<L: LmtRegion> {
    pub(crate) lmt: L,
    pub(crate) queues: Vec<SendQueue>,
    pub(crate) crypto: Option<CryptoCtx>,
    pub(crate) pool: Arc<PktPool>,
    sched: SchedLock,
    pub(crate) config: Config,
}

impl<L: LmtRegion> TxPath<L> {
    pub fn new(
        lmt: L,
        config: Config,
        queues: &[QueueConfig],
        crypto: Option<&CryptoConfig>,
        pool: Arc<PktPool>,
    ) -> Result<Self, Error> {
        config.validate()?;
        if queues.is_empty() {
            return Err(Error::QueueSetup("at least one send queue".into()));
        }
        let queues = queues
            .iter()
            .map(SendQueue::new)
            .collect::<Result<Vec<_>, _>>()?;
        let crypto = crypto.map(CryptoCtx::new).transpose()?;
        let sched = SchedLock::new(config.sched_spin_limit);
        Ok(Self {
            lmt,
            queues,
            crypto,
            pool,
            sched,
            config,
        })
    }

    /// The pool this path draws from.
    pub fn pool(&self) -> &PktPool {
        &self.pool
    }

    /// The underlying line region.
    pub fn lmt(&self) -> &L {
        &self.lmt
    }

    /// Send queue state, for completion handling and diagnostics.
    pub fn queue(&self, queue: usize) -> &SendQueue {
        &self.queues[queue]
    }

    /// Transmit a burst on `queue`. Returns the number of packets accepted;
    /// the rest are freed and counted as credit drops.
    pub fn send(&self, queue: usize, pkts: &[BufIndex], off_flags: u64) -> usize {
        assert!(
            pkts.len() <= self.config.max_burst,
            "burst exceeds configured max_burst"
        );
        if pkts.is_empty() {
            return 0;
        }
        let q = &self.queues[queue];

        let held = off_flags & off::SCHED_EN != 0
            && self.config.serialize_doorbells
            && self.sched.wait();

        let accepted = q.reserve_burst(pkts.len() as u16) as usize;

        let mut cache = AuraCache::new();
        let mut bytes = 0;
        let mut sent = 0;
        let mut remaining = accepted;

        while remaining > 16 {
            bytes += self.submit_batch(q, &pkts[sent..sent + 16], off_flags, &mut cache);
            sent += 16;
            remaining -= 16;
        }
        while remaining > 8 {
            bytes += self.submit_batch(q, &pkts[sent..sent + 8], off_flags, &mut cache);
            sent += 8;
            remaining -= 8;
        }
        while remaining > 4 {
            bytes += self.submit_batch(q, &pkts[sent..sent + 4], off_flags, &mut cache);
            sent += 4;
            remaining -= 4;
        }
        while remaining > 0 {
            bytes += self.submit_batch(q, &pkts[sent..sent + 1], off_flags, &mut cache);
            sent += 1;
            remaining -= 1;
        }

        if held {
            self.sched.release();
        }

        self.pool.flush_accounting(&cache);

        let n_drop = pkts.len() - accepted;
        if n_drop > 0 {
            self.pool.free_batch(&pkts[accepted..]);
            metrics::DROP_QUEUE_CREDIT.add(n_drop as u64);
        }
        metrics::PKT_SENT.add(accepted as u64);
        metrics::PKT_BYTES.add(bytes);

        accepted
    }

    /// Build, stage and commit one batch of up to 16 packets with a single
    /// doorbell. Returns the payload bytes submitted.
    fn submit_batch(
        &self,
        q: &SendQueue,
        pkts: &[BufIndex],
        off_flags: u64,
        cache: &mut AuraCache,
    ) -> u64 {
        let mseg = off_flags & off::MSEG != 0;
        let outer_cksum = off_flags & off::OUTER_CKSUM != 0;
        let n = pkts.len();

        let mut descs = [Descriptor::new(); 16];
        let mut dwords = [0u64; 16];
        let mut bytes = 0;

        for i in 0..n {
            let head = pkts[i];
            let n_segs = self.pool.chain_segs(head, mseg);
            let aura = self.pool.resolve_aura(self.pool.get(head), n_segs, cache);

            let sg = build_sg_list(&mut descs[i], &self.pool, head, n_segs, mseg);
            let hdr = build_send_hdr(
                &mut descs[i],
                &self.pool,
                head,
                aura,
                q.sq_id,
                sg,
                mseg,
                outer_cksum,
            );
            dwords[i] = sg + hdr;

            bytes += if mseg {
                self.pool.chain_len(head) as u64
            } else {
                self.pool.get(head).current_len() as u64
            };
        }

        // Lines from the previous doorbell may still be draining.
        self.lmt.wmb();

        let io_addr = doorbell_addr(q.io_addr, dwords[0]);
        let mut lmt_arg = self.lmt.lmt_id();

        for i in 0..n {
            self.lmt.write_line(i, descs[i].line_words(dwords[i]));
        }

        // Count and per-descriptor sizes, first descriptor excluded. A
        // single-descriptor doorbell carries nothing beyond the line id.
        if n > 1 {
            lmt_arg |= (n as u64 - 1) << LMT_ARG_COUNT_SHIFT;
            for i in 1..n {
                lmt_arg |= arg_size_slot(dwords[i], i);
            }
        }

        self.lmt.doorbell(lmt_arg, io_addr);
        metrics::DB_QUEUE.increment();

        bytes
    }
}
