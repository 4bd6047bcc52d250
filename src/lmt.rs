//! Write-combine line region and doorbell encoding.
//!
//! Descriptors are staged into fixed 128-byte lines and handed to the
//! device with a single doorbell write per batch. Sizes travel in the
//! doorbell itself: the first descriptor's size rides in the address, the
//! rest are packed as 3-bit fields in the argument.
//!
//! Size accounting is in hardware dwords: one dword is 16 bytes, i.e. two
//! `u64` words. A full line is [`LMT_LINE_DWORDS`] dwords.

use std::sync::Mutex;

/// Lines per hardware line group.
pub const LMT_LINES: usize = 16;
/// Dwords (16-byte units) per line.
pub const LMT_LINE_DWORDS: u64 = 8;
/// `u64` words per line.
pub const LMT_LINE_WORDS: usize = 16;

/// Doorbell argument: bit offset of the batch count minus one.
pub const LMT_ARG_COUNT_SHIFT: u64 = 12;
/// Doorbell argument: start of the per-descriptor size vector.
pub const LMT_ARG_SIZE_VEC_SHIFT: u64 = 19;
/// Doorbell argument: width of one size field.
pub const LMT_ARG_SIZE_BITS: u64 = 3;
/// Crypto-submit mode tag ORed into crypto doorbell arguments.
pub const CPT_LMT_ARG_MODE: u64 = 1 << 49;

/// Encode a doorbell address: low 7 bits cleared, bits [6:4] carry the
/// first descriptor's size minus one.
#[inline]
pub fn doorbell_addr(io_addr: u64, first_dwords: u64) -> u64 {
    debug_assert!((1..=LMT_LINE_DWORDS).contains(&first_dwords));
    (io_addr & !0x7F) | ((first_dwords - 1) << 4)
}

/// Pack descriptor `slot` (1-based; slot 0 rides in the address) of size
/// `dwords` into a doorbell argument.
#[inline]
pub fn arg_size_slot(dwords: u64, slot: usize) -> u64 {
    debug_assert!((1..=LMT_LINE_DWORDS).contains(&dwords));
    debug_assert!((1..LMT_LINES).contains(&slot));
    (dwords - 1) << (LMT_ARG_SIZE_VEC_SHIFT + LMT_ARG_SIZE_BITS * (slot as u64 - 1))
}

/// A hardware line group plus its doorbell register.
///
/// Implementations write whole descriptors into numbered lines and issue
/// fire-and-forget doorbells. `wmb` orders line writes against doorbell
/// consumption so a batch's lines can be reused by the next one.
pub trait LmtRegion: Send + Sync {
    /// Stage `words` into line `line`.
    fn write_line(&self, line: usize, words: &[u64]);
    /// Ring the doorbell.
    fn doorbell(&self, lmt_arg: u64, io_addr: u64);
    /// Write barrier between batches.
    fn wmb(&self);
    /// Base line-group id carried in the low bits of every argument.
    fn lmt_id(&self) -> u64;
}

/// One recorded doorbell: the argument, the address, and the line contents
/// staged since the previous doorbell.
#[derive(Debug, Clone)]
pub struct Doorbell {
    pub lmt_arg: u64,
    pub io_addr: u64,
    pub lines: Vec<(usize, Vec<u64>)>,
}

impl Doorbell {
    /// Descriptor count encoded in the argument (count field plus one).
    pub fn count(&self) -> u64 {
        ((self.lmt_arg >> LMT_ARG_COUNT_SHIFT) & 0x7F) + 1
    }

    /// Size in dwords of the first descriptor, from the address bits [6:4].
    pub fn first_dwords(&self) -> u64 {
        ((self.io_addr >> 4) & 0x7) + 1
    }

    /// Size in dwords of descriptor `slot` (1-based), from the argument's
    /// size vector.
    pub fn slot_dwords(&self, slot: usize) -> u64 {
        let shift = LMT_ARG_SIZE_VEC_SHIFT + LMT_ARG_SIZE_BITS * (slot as u64 - 1);
        ((self.lmt_arg >> shift) & 0x7) + 1
    }
}

/// In-memory line region: the software stand-in for a device MMIO window.
///
/// Used by the test suite and by embedders running the fast path against a
/// simulated device. Records every doorbell along with the lines staged
/// for it.
pub struct MemLmt {
    lmt_id: u64,
    inner: Mutex<MemLmtInner>,
}

struct MemLmtInner {
    pending: Vec<(usize, Vec<u64>)>,
    doorbells: Vec<Doorbell>,
    wmb_count: u64,
}

impl MemLmt {
    pub fn new(lmt_id: u64) -> Self {
        Self {
            lmt_id,
            inner: Mutex::new(MemLmtInner {
                pending: Vec::new(),
                doorbells: Vec::new(),
                wmb_count: 0,
            }),
        }
    }

    /// All doorbells issued so far.
    pub fn doorbells(&self) -> Vec<Doorbell> {
        self.inner.lock().unwrap().doorbells.clone()
    }

    /// Number of write barriers issued.
    pub fn wmb_count(&self) -> u64 {
        self.inner.lock().unwrap().wmb_count
    }
}

impl LmtRegion for MemLmt {
    fn write_line(&self, line: usize, words: &[u64]) {
        assert!(line < LMT_LINES, "line index out of range");
        assert!(words.len() <= LMT_LINE_WORDS, "descriptor exceeds line");
        self.inner
            .lock()
            .unwrap()
            .pending
            .push((line, words.to_vec()));
    }

    fn doorbell(&self, lmt_arg: u64, io_addr: u64) {
        let mut inner = self.inner.lock().unwrap();
        let lines = std::mem::take(&mut inner.pending);
        inner.doorbells.push(Doorbell {
            lmt_arg,
            io_addr,
            lines,
        });
    }

    fn wmb(&self) {
        self.inner.lock().unwrap().wmb_count += 1;
    }

    fn lmt_id(&self) -> u64 {
        self.lmt_id
    }
}
