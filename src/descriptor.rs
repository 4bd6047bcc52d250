//! Hardware send descriptor construction.
//!
//! A descriptor is a send header (two words) followed by a scatter-gather
//! list: sub-descriptors of up to three (address, length) segment pairs,
//! chained at a four-word stride for longer chains. Sizes are accounted in
//! 16-byte dwords; the header is one dword, a one-segment sub-descriptor is
//! one, a two- or three-segment sub-descriptor is two.
//!
//! Segment counts outside the hardware contract (zero segments for a
//! packet, or a sub-descriptor group outside 1..=3) are programming errors
//! and abort deterministically.

use crate::buffer::{
    BufIndex, F_IP_CKSUM, F_NEXT_PRESENT, F_OFFLOAD, F_TCP_CKSUM, F_UDP_CKSUM, PktBuf,
};
use crate::pool::PktPool;

/// `u64` words of descriptor scratch (one full hardware line).
pub const DESC_WORDS: usize = 16;
/// Send header size in dwords.
pub const SEND_HDR_DWORDS: u64 = 1;
/// Longest supported segment chain: three full sub-descriptor groups plus
/// a trailing single, which together with the header fill the whole line.
pub const MAX_CHAIN_SEGS: u64 = 10;

// Send header word 0.
const HDR_TOTAL_MASK: u64 = 0x3FFFF;
const HDR_AURA_SHIFT: u64 = 20;
const HDR_AURA_MASK: u64 = 0xFFFFF;
const HDR_SIZEM1_SHIFT: u64 = 40;
const HDR_SQ_SHIFT: u64 = 44;
const HDR_SQ_MASK: u64 = 0xFFFFF;

// Send header word 1 (checksum offload subfields).
const HDR_OL4PTR_SHIFT: u64 = 8;
const HDR_OL3TYPE_SHIFT: u64 = 32;
const HDR_OL4TYPE_SHIFT: u64 = 36;

/// Outer L3 checksum type: IPv4 header checksum.
const L3TYPE_IP4_CKSUM: u64 = 3;
/// Outer L4 checksum type: TCP.
const L4TYPE_TCP_CKSUM: u64 = 1;
/// Outer L4 checksum type: UDP.
const L4TYPE_UDP_CKSUM: u64 = 3;

const IP4_HDR_LEN: u8 = 20;

// Scatter-gather control word.
const SG_SEG1_SIZE_SHIFT: u64 = 0;
const SG_SEG2_SIZE_SHIFT: u64 = 16;
const SG_SEG3_SIZE_SHIFT: u64 = 32;
const SG_SEGS_SHIFT: u64 = 48;
const SG_I1: u64 = 1 << 55;
const SG_I2: u64 = 1 << 56;
const SG_I3: u64 = 1 << 57;
const SG_SUBDC_SHIFT: u64 = 60;
const SUBDC_SG: u64 = 0x4;

/// Descriptor scratch: header words 0..2, sub-descriptor groups at a
/// four-word stride from word 2.
#[derive(Clone, Copy)]
pub struct Descriptor {
    pub(crate) words: [u64; DESC_WORDS],
}

impl Descriptor {
    pub const fn new() -> Self {
        Self {
            words: [0; DESC_WORDS],
        }
    }

    /// The populated words for a descriptor of `dwords` total size.
    pub fn line_words(&self, dwords: u64) -> &[u64] {
        &self.words[..(dwords * 2) as usize]
    }

    pub fn into_words(self) -> [u64; DESC_WORDS] {
        self.words
    }
}

impl Default for Descriptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Write one sub-descriptor group. Returns its size in dwords.
///
/// Shared segments get the do-not-free bit and release one reference via
/// the CAS check, so hardware completion never frees still-referenced
/// memory.
fn write_sg_group(words: &mut [u64], segs: &[&PktBuf]) -> u64 {
    let n = segs.len();
    assert!(
        (1..=3).contains(&n),
        "sub-descriptor segment count {n} outside 1..=3"
    );

    let mut sg = ((n as u64) << SG_SEGS_SHIFT) | (SUBDC_SG << SG_SUBDC_SHIFT);

    if n == 3 {
        sg |= (segs[2].current_len() as u64) << SG_SEG3_SIZE_SHIFT;
        words[3] = segs[2].addr();
        if segs[2].release_if_shared() {
            sg |= SG_I3;
        }
    }
    if n >= 2 {
        sg |= (segs[1].current_len() as u64) << SG_SEG2_SIZE_SHIFT;
        words[2] = segs[1].addr();
        if segs[1].release_if_shared() {
            sg |= SG_I2;
        }
    }
    sg |= (segs[0].current_len() as u64) << SG_SEG1_SIZE_SHIFT;
    words[1] = segs[0].addr();
    if segs[0].release_if_shared() {
        sg |= SG_I1;
    }

    words[0] = sg;
    if n == 1 { 1 } else { 2 }
}

/// Build the scatter-gather list for the chain headed by `head`.
/// Returns the list's size in dwords (header excluded).
pub fn build_sg_list(
    desc: &mut Descriptor,
    pool: &PktPool,
    head: BufIndex,
    n_segs: u64,
    mseg: bool,
) -> u64 {
    let b = pool.get(head);

    if !mseg || b.flags & F_NEXT_PRESENT == 0 {
        return write_sg_group(&mut desc.words[2..], &[b]);
    }

    assert!(n_segs != 0, "chained packet with zero segments");
    assert!(
        n_segs <= MAX_CHAIN_SEGS,
        "segment chain of {n_segs} exceeds descriptor capacity"
    );

    let mut dwords = 0;
    let mut group = 0;
    let mut remaining = n_segs;
    let mut seg1 = b;

    while remaining > 2 {
        let seg2 = pool.get(seg1.next.expect("chained buffer without next link"));
        let seg3 = pool.get(seg2.next.expect("chained buffer without next link"));

        let base = 2 + 4 * group;
        dwords += write_sg_group(&mut desc.words[base..], &[seg1, seg2, seg3]);
        group += 1;

        if seg3.flags & F_NEXT_PRESENT != 0 {
            seg1 = pool.get(seg3.next.expect("chained buffer without next link"));
        }
        remaining -= 3;
    }

    // A trailing group at the last word-stride slot can only be a single
    // (the chain cap guarantees it), so slicing to the end of the scratch
    // is always in bounds.
    let base = 2 + 4 * group;
    if remaining == 1 {
        dwords += write_sg_group(&mut desc.words[base..], &[seg1]);
    } else if remaining == 2 {
        let seg2 = pool.get(seg1.next.expect("chained buffer without next link"));
        dwords += write_sg_group(&mut desc.words[base..], &[seg1, seg2]);
    }

    dwords
}

/// Fill the send header. Returns the header size in dwords.
///
/// `sg_dwords` is the value returned by [`build_sg_list`]; the header's
/// size field covers the whole descriptor.
pub fn build_send_hdr(
    desc: &mut Descriptor,
    pool: &PktPool,
    head: BufIndex,
    aura: u64,
    sq: u64,
    sg_dwords: u64,
    mseg: bool,
    outer_cksum: bool,
) -> u64 {
    let b = pool.get(head);

    let total = if mseg {
        pool.chain_len(head)
    } else {
        b.current_len()
    };

    let mut w0 = (total as u64) & HDR_TOTAL_MASK;
    w0 |= (aura & HDR_AURA_MASK) << HDR_AURA_SHIFT;
    w0 |= (sg_dwords + SEND_HDR_DWORDS - 1) << HDR_SIZEM1_SHIFT;
    w0 |= (sq & HDR_SQ_MASK) << HDR_SQ_SHIFT;
    desc.words[0] = w0;

    if b.flags & F_OFFLOAD == 0 || !outer_cksum {
        desc.words[1] = 0;
        return SEND_HDR_DWORDS;
    }

    let mut ol3type = 0;
    let mut ol4type = 0;
    let mut ol3ptr = 0u8;
    let mut ol4ptr = 0u8;

    if b.flags & F_IP_CKSUM != 0 {
        ol3type = L3TYPE_IP4_CKSUM;
        ol3ptr = b.l3_hdr_offset;
        ol4ptr = b.l3_hdr_offset + IP4_HDR_LEN;
    }
    if b.flags & F_UDP_CKSUM != 0 {
        ol4type = L4TYPE_UDP_CKSUM;
        ol4ptr = b.l4_hdr_offset;
    } else if b.flags & F_TCP_CKSUM != 0 {
        ol4type = L4TYPE_TCP_CKSUM;
        ol4ptr = b.l4_hdr_offset;
    }

    desc.words[1] = (ol3ptr as u64)
        | ((ol4ptr as u64) << HDR_OL4PTR_SHIFT)
        | (ol3type << HDR_OL3TYPE_SHIFT)
        | (ol4type << HDR_OL4TYPE_SHIFT);

    SEND_HDR_DWORDS
}
