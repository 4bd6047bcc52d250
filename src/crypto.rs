//! Inline-crypto submission path.
//!
//! Crypto-marked packets carry a prebuilt engine instruction plus the
//! network descriptor the engine forwards to the target queue after the
//! transform. The fast path gates the whole burst on crypto queue credit,
//! then walks it four packets at a time: each quad member may target a
//! different network queue, so the four lanes hold independently gated
//! credit and a quad ships whole, partially, or not at all.
//!
//! Instruction lines are committed with the crypto-mode doorbell tag and a
//! barrier after each doorbell, since the engine reads the lines
//! asynchronously.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::{BufIndex, F_INLINE_CRYPTO};
use crate::config::CryptoConfig;
use crate::descriptor::{Descriptor, build_send_hdr, build_sg_list};
use crate::error::Error;
use crate::lmt::{CPT_LMT_ARG_MODE, LMT_ARG_COUNT_SHIFT, LmtRegion, arg_size_slot};
use crate::metrics;
use crate::pool::AuraCache;
use crate::queue::CryptoQueue;
use crate::tx::{TxPath, off};

const ETH_HDR_LEN: u64 = 14;

/// Per-security-association transmit counters.
pub struct SaTable {
    slots: Box<[Sa]>,
}

#[derive(Default)]
struct Sa {
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl SaTable {
    fn new(entries: usize) -> Self {
        Self {
            slots: (0..entries).map(|_| Sa::default()).collect(),
        }
    }

    /// Charge one packet of `bytes` to association `index`.
    pub fn account(&self, index: u32, bytes: u64) {
        let sa = &self.slots[index as usize];
        sa.packets.fetch_add(1, Ordering::Relaxed);
        sa.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn packets(&self, index: u32) -> u64 {
        self.slots[index as usize].packets.load(Ordering::Relaxed)
    }

    pub fn bytes(&self, index: u32) -> u64 {
        self.slots[index as usize].bytes.load(Ordering::Relaxed)
    }
}

/// Crypto queue state plus the association counter table.
pub struct CryptoCtx {
    pub(crate) queue: CryptoQueue,
    sa: SaTable,
}

impl CryptoCtx {
    pub(crate) fn new(config: &CryptoConfig) -> Result<Self, Error> {
        Ok(Self {
            queue: CryptoQueue::new(config)?,
            sa: SaTable::new(config.sa_entries),
        })
    }

    /// The crypto queue, for completion handling and diagnostics.
    pub fn queue(&self) -> &CryptoQueue {
        &self.queue
    }

    /// Association counters.
    pub fn sa(&self) -> &SaTable {
        &self.sa
    }
}

/// One quad lane: the network queue it last gated against and the credit
/// left from that gate. Consecutive quads reuse a lane's credit as long as
/// the packet in that position targets the same queue.
#[derive(Clone, Copy)]
struct Lane {
    current: u32,
    queue: usize,
    left: u16,
}

impl Lane {
    const fn idle() -> Self {
        Self {
            current: u32::MAX,
            queue: 0,
            left: 0,
        }
    }
}

impl<L: LmtRegion> TxPath<L> {
    /// The inline-crypto context, when configured.
    pub fn crypto(&self) -> Option<&CryptoCtx> {
        self.crypto.as_ref()
    }

    /// Transmit a mixed burst: crypto-marked packets go through the crypto
    /// engine, the rest directly to `queue`. Returns the total accepted.
    pub fn send_inline_crypto(&self, queue: usize, pkts: &[BufIndex], off_flags: u64) -> usize {
        let mut marked = Vec::with_capacity(pkts.len());
        let mut plain = Vec::with_capacity(pkts.len());
        for &idx in pkts {
            if self.pool.get(idx).flags & F_INLINE_CRYPTO != 0 {
                marked.push(idx);
            } else {
                plain.push(idx);
            }
        }

        let mut accepted = 0;
        if !marked.is_empty() {
            accepted += self.send_crypto(&marked, off_flags);
        }
        if !plain.is_empty() {
            accepted += self.send(queue, &plain, off_flags);
        }
        accepted
    }

    /// Transmit a burst of crypto-marked packets. Returns the number
    /// accepted; the rest are freed and counted as drops.
    pub fn send_crypto(&self, pkts: &[BufIndex], off_flags: u64) -> usize {
        assert!(
            pkts.len() <= self.config.max_burst,
            "burst exceeds configured max_burst"
        );
        if pkts.is_empty() {
            return 0;
        }
        let Some(ctx) = &self.crypto else {
            metrics::DROP_CRYPTO_CREDIT.add(pkts.len() as u64);
            self.pool.free_batch(pkts);
            return 0;
        };

        let total = pkts.len();

        // The crypto gate covers the whole burst or none of it.
        if ctx.queue.reserve(total as u16) == 0 {
            metrics::DROP_CRYPTO_CREDIT.add(total as u64);
            self.pool.free_batch(pkts);
            return 0;
        }

        let mut cache = AuraCache::new();
        let mut failed: Vec<BufIndex> = Vec::new();
        let mut lanes = [Lane::idle(); 4];

        let mut cursor = 0;
        let mut n_packets = total;

        while n_packets > 3 {
            for (lane, state) in lanes.iter_mut().enumerate() {
                let sq = self.target_sq(pkts[cursor + lane]);
                if state.current != sq {
                    state.queue = sq as usize;
                    state.left = self.queues[state.queue].reserve((n_packets >> 2) as u16);
                    state.current = sq;
                }
            }

            let mut quad_bit = 0u32;
            for (lane, state) in lanes.iter().enumerate() {
                quad_bit |= u32::from(state.left > 0) << lane;
            }

            let mut lmt_arg = CPT_LMT_ARG_MODE | self.lmt.lmt_id();

            if quad_bit == 0xF {
                let mut dwords = [0u64; 4];
                for lane in 0..4 {
                    dwords[lane] = self.prepare_inst(
                        ctx,
                        pkts[cursor + lane],
                        self.queues[lanes[lane].queue].sq_id,
                        off_flags,
                        &mut cache,
                    );
                    self.stage_inst(lane, pkts[cursor + lane]);
                }

                lmt_arg |= 3 << LMT_ARG_COUNT_SHIFT;
                for slot in 1..4 {
                    lmt_arg |= arg_size_slot(dwords[slot], slot);
                }

                self.lmt.doorbell(lmt_arg, ctx.queue.io_addr);
                self.lmt.wmb();
                metrics::DB_CRYPTO.increment();

                for state in &mut lanes {
                    state.left -= 1;
                }
            } else {
                let mut count = 0;
                for (lane, state) in lanes.iter_mut().enumerate() {
                    let idx = pkts[cursor + lane];
                    if state.left == 0 {
                        failed.push(idx);
                        continue;
                    }
                    let dw = self.prepare_inst(
                        ctx,
                        idx,
                        self.queues[state.queue].sq_id,
                        off_flags,
                        &mut cache,
                    );
                    self.stage_inst(count, idx);
                    // The first staged slot's size is never carried in the
                    // argument; the device takes the full instruction width.
                    if count > 0 {
                        lmt_arg |= arg_size_slot(dw, count);
                    }
                    count += 1;
                    state.left -= 1;
                }

                if count == 1 {
                    // Discard stale size bits from abandoned slots.
                    lmt_arg = CPT_LMT_ARG_MODE | self.lmt.lmt_id();
                } else if count > 1 {
                    lmt_arg |= (count as u64 - 1) << LMT_ARG_COUNT_SHIFT;
                }

                if count > 0 {
                    self.lmt.doorbell(lmt_arg, ctx.queue.io_addr);
                    self.lmt.wmb();
                    metrics::DB_CRYPTO.increment();
                    metrics::DB_PARTIAL_QUAD.increment();
                }
            }

            cursor += 4;
            n_packets -= 4;
        }

        // Remainder, one instruction per doorbell. Lane 0 starts fresh.
        let mut lane0 = Lane::idle();
        while n_packets > 0 {
            let idx = pkts[cursor];
            let sq = self.target_sq(idx);
            if lane0.current != sq {
                lane0.queue = sq as usize;
                lane0.left = self.queues[lane0.queue].reserve(n_packets as u16);
                lane0.current = sq;
            }
            if lane0.left == 0 {
                failed.push(idx);
                cursor += 1;
                n_packets -= 1;
                continue;
            }

            self.prepare_inst(
                ctx,
                idx,
                self.queues[lane0.queue].sq_id,
                off_flags,
                &mut cache,
            );
            self.stage_inst(0, idx);

            self.lmt
                .doorbell(CPT_LMT_ARG_MODE | self.lmt.lmt_id(), ctx.queue.io_addr);
            self.lmt.wmb();
            metrics::DB_CRYPTO.increment();

            lane0.left -= 1;
            cursor += 1;
            n_packets -= 1;
        }

        self.pool.flush_accounting(&cache);

        let nix_drop = failed.len();
        if nix_drop > 0 {
            self.pool.free_batch(&failed);
            metrics::DROP_QUEUE_CREDIT.add(nix_drop as u64);
        }

        let accepted = total - nix_drop;
        metrics::PKT_CRYPTO_SENT.add(accepted as u64);
        accepted
    }

    fn target_sq(&self, idx: BufIndex) -> u32 {
        self.pool
            .get(idx)
            .crypto
            .as_ref()
            .expect("crypto packet without metadata")
            .target_sq as u32
    }

    /// Stage one packet's crypto instruction into write-combine line `line`.
    fn stage_inst(&self, line: usize, idx: BufIndex) {
        let buf = self.pool.get(idx);
        let meta = buf.crypto.as_ref().expect("crypto packet without metadata");
        self.lmt.write_line(line, &meta.inst);
    }

    /// Rebuild the post-crypto network descriptor into the packet's
    /// metadata and account the association. Returns the scatter-gather
    /// size in dwords; that, not the instruction width, is what the quad
    /// doorbell's size vector carries.
    fn prepare_inst(
        &self,
        ctx: &CryptoCtx,
        head: BufIndex,
        sq_id: u64,
        off_flags: u64,
        cache: &mut AuraCache,
    ) -> u64 {
        let mseg = off_flags & off::MSEG != 0;

        {
            // Safety: the burst exclusively owns its indices.
            let buf = unsafe { self.pool.get_mut(head) };
            let meta = buf.crypto.as_ref().expect("crypto packet without metadata");
            if !meta.sg_mode {
                // The transform output lands at the tail of the head
                // segment; the backing store reserved the room.
                buf.len += meta.dlen_adj as u32;
            }
        }

        let n_segs = self.pool.chain_segs(head, mseg);
        let aura = self.pool.resolve_aura(self.pool.get(head), n_segs, cache);

        let mut desc = Descriptor::new();
        let sg_dwords = build_sg_list(&mut desc, &self.pool, head, n_segs, mseg);
        build_send_hdr(
            &mut desc,
            &self.pool,
            head,
            aura,
            sq_id,
            sg_dwords,
            mseg,
            off_flags & off::OUTER_CKSUM != 0,
        );

        let (sa_index, sa_bytes) = {
            // Safety: same exclusive ownership as above.
            let buf = unsafe { self.pool.get_mut(head) };
            let meta = buf.crypto.as_mut().expect("crypto packet without metadata");
            meta.nixtx = desc.into_words();
            if meta.sg_mode {
                // Scatter-mode instructions learn their segment layout
                // here: L2 length and the descriptor dword count.
                meta.inst[0] = (ETH_HDR_LEN << 16) | (sg_dwords + 1);
            }
            (meta.sa_index, meta.sa_bytes)
        };
        ctx.sa.account(sa_index, sa_bytes);

        sg_dwords
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sa_table_accumulates_per_association() {
        let sa = SaTable::new(4);
        sa.account(1, 100);
        sa.account(1, 50);
        sa.account(3, 9);

        assert_eq!(sa.packets(1), 2);
        assert_eq!(sa.bytes(1), 150);
        assert_eq!(sa.packets(3), 1);
        assert_eq!(sa.packets(0), 0);
    }

    #[test]
    fn idle_lane_matches_no_queue() {
        let lane = Lane::idle();
        assert_eq!(lane.current, u32::MAX);
        assert_eq!(lane.left, 0);
    }
}
