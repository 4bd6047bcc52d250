//! Packet buffers: one segment each, chained through pool indices.
//!
//! A packet is a [`PktBuf`] optionally linked to further segments via
//! [`PktBuf::next`]. Segments carry an atomic reference count so a segment
//! replicated into several in-flight descriptors is freed exactly once.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;

/// Segment has a successor in the chain.
pub const F_NEXT_PRESENT: u32 = 1 << 0;
/// Packet requests checksum offload (consult the checksum kind flags).
pub const F_OFFLOAD: u32 = 1 << 1;
/// Compute the outer IPv4 header checksum.
pub const F_IP_CKSUM: u32 = 1 << 2;
/// Compute the outer UDP checksum.
pub const F_UDP_CKSUM: u32 = 1 << 3;
/// Compute the outer TCP checksum.
pub const F_TCP_CKSUM: u32 = 1 << 4;
/// Packet goes through the inline-crypto queue before the network queue.
pub const F_INLINE_CRYPTO: u32 = 1 << 5;

/// Handle to a buffer slot in a [`PktPool`](crate::pool::PktPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufIndex(pub u32);

/// Crypto instruction metadata written by the upstream protection stage.
///
/// Carried by buffers marked [`F_INLINE_CRYPTO`]. The instruction template
/// is prebuilt; the fast path only patches its first word and rebuilds the
/// network descriptor the crypto engine forwards after processing.
#[derive(Clone)]
pub struct CryptoMeta {
    /// Prebuilt crypto engine instruction, 8 words (4 doorbell dwords).
    pub inst: [u64; 8],
    /// Network descriptor rebuilt by the fast path for post-crypto transmit.
    pub nixtx: [u64; 16],
    /// Network sub-queue this packet targets after crypto processing.
    pub target_sq: u16,
    /// Security association index for counter accounting.
    pub sa_index: u32,
    /// Bytes to account against the security association.
    pub sa_bytes: u64,
    /// Length the crypto transform adds to the first segment.
    pub dlen_adj: u16,
    /// Instruction addresses its payload through a scatter-gather list.
    pub sg_mode: bool,
}

impl CryptoMeta {
    /// Metadata for a simple linear-payload instruction.
    pub fn new(target_sq: u16, sa_index: u32, sa_bytes: u64) -> Self {
        Self {
            inst: [0; 8],
            nixtx: [0; 16],
            target_sq,
            sa_index,
            sa_bytes,
            dlen_adj: 0,
            sg_mode: false,
        }
    }
}

/// One packet segment.
pub struct PktBuf {
    /// Payload backing store.
    pub data: Bytes,
    /// Valid payload length. May exceed `data.len()` after the crypto path
    /// extends it for transform output; the backing store reserves the room.
    pub len: u32,
    /// Next segment in the chain, when [`F_NEXT_PRESENT`] is set.
    pub next: Option<BufIndex>,
    /// Offload and chaining flags (`F_*`).
    pub flags: u32,
    /// Offset of the outer L3 header from the packet start.
    pub l3_hdr_offset: u8,
    /// Offset of the outer L4 header from the packet start.
    pub l4_hdr_offset: u8,
    /// Allocation domain this segment was drawn from.
    pub pool: u8,
    /// Inline-crypto metadata, present on crypto-marked head segments.
    pub crypto: Option<Box<CryptoMeta>>,
    ref_count: AtomicU32,
}

impl PktBuf {
    pub(crate) fn new(data: Bytes, pool: u8) -> Self {
        let len = data.len() as u32;
        Self {
            data,
            len,
            next: None,
            flags: 0,
            l3_hdr_offset: 0,
            l4_hdr_offset: 0,
            pool,
            crypto: None,
            ref_count: AtomicU32::new(1),
        }
    }

    /// Valid payload length of this segment.
    #[inline]
    pub fn current_len(&self) -> u32 {
        self.len
    }

    /// Device-visible address of the payload.
    #[inline]
    pub fn addr(&self) -> u64 {
        self.data.as_ptr() as u64
    }

    /// Current reference count.
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Take an additional reference to this segment.
    pub fn retain(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// CAS-checked release for descriptor construction.
    ///
    /// When the segment is uniquely owned this is a no-op and returns
    /// `false`: hardware may free it on completion. Otherwise one reference
    /// is dropped and `true` is returned, telling the descriptor to set the
    /// do-not-free bit so completion does not free still-referenced memory.
    pub fn release_if_shared(&self) -> bool {
        if self
            .ref_count
            .compare_exchange(1, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return false;
        }
        self.ref_count.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Drop one reference. Returns `true` when this was the last one.
    pub(crate) fn release(&self) -> bool {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(len: usize) -> PktBuf {
        PktBuf::new(Bytes::from(vec![0u8; len]), 0)
    }

    #[test]
    fn unique_segment_is_not_marked_shared() {
        let b = buf(64);
        assert!(!b.release_if_shared());
        assert_eq!(b.ref_count(), 1);
    }

    #[test]
    fn shared_segment_releases_exactly_one_ref() {
        let b = buf(64);
        b.retain();
        assert_eq!(b.ref_count(), 2);

        assert!(b.release_if_shared());
        assert_eq!(b.ref_count(), 1);

        // Now uniquely owned again; a second attempt must not release.
        assert!(!b.release_if_shared());
        assert_eq!(b.ref_count(), 1);
    }

    #[test]
    fn release_reports_last_reference() {
        let b = buf(16);
        b.retain();
        assert!(!b.release());
        assert!(b.release());
    }
}
