//! Integration tests: plain transmit path over the in-memory line region.
//!
//! Each test builds a `TxPath` against `MemLmt`, submits bursts through the
//! public API, and verifies the recorded doorbells, line contents, and pool
//! accounting.

use std::sync::Arc;

use bytes::Bytes;
use lmtline::buffer::{F_IP_CKSUM, F_OFFLOAD, F_UDP_CKSUM};
use lmtline::{
    AuraConfig, BufIndex, Config, ConfigBuilder, MemLmt, PktPool, QueueConfig, TxPath, off,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn queue_config(depth: u32) -> QueueConfig {
    QueueConfig {
        sq_id: 3,
        io_addr: 0x84_0200,
        depth,
        sqes_per_sqb_log2: 0,
    }
}

fn build_path(depth: u32, config: Config) -> TxPath<MemLmt> {
    let pool = Arc::new(PktPool::new(256, &[AuraConfig { handle: 0xBEEF0 }]).unwrap());
    TxPath::new(MemLmt::new(0x7), config, &[queue_config(depth)], None, pool).unwrap()
}

fn linear(tx: &TxPath<MemLmt>, n: usize, len: usize) -> Vec<BufIndex> {
    (0..n)
        .map(|_| tx.pool().alloc(Bytes::from(vec![0u8; len]), 0).unwrap())
        .collect()
}

fn chained(tx: &TxPath<MemLmt>, lens: &[usize]) -> BufIndex {
    let head = tx.pool().alloc(Bytes::from(vec![0u8; lens[0]]), 0).unwrap();
    let mut prev = head;
    for &len in &lens[1..] {
        let seg = tx.pool().alloc(Bytes::from(vec![0u8; len]), 0).unwrap();
        tx.pool().chain(prev, seg);
        prev = seg;
    }
    head
}

// ── Burst partitioning ──────────────────────────────────────────────

#[test]
fn burst_partitions_into_descending_batches() {
    let tx = build_path(64, Config::default());
    let pkts = linear(&tx, 33, 60);

    assert_eq!(tx.send(0, &pkts, 0), 33);

    let dbs = tx.lmt().doorbells();
    let counts: Vec<u64> = dbs.iter().map(|d| d.count()).collect();
    assert_eq!(counts, vec![16, 16, 1]);

    // Every staged line is a linear packet: header + one-segment list.
    for db in &dbs {
        assert_eq!(db.first_dwords(), 2);
        for (_, words) in &db.lines {
            assert_eq!(words.len(), 4);
        }
    }
}

#[test]
fn sub_threshold_burst_steps_down() {
    let tx = build_path(64, Config::default());
    let pkts = linear(&tx, 13, 60);

    assert_eq!(tx.send(0, &pkts, 0), 13);

    let counts: Vec<u64> = tx.lmt().doorbells().iter().map(|d| d.count()).collect();
    assert_eq!(counts, vec![8, 4, 1]);
}

// ── Credit shedding ─────────────────────────────────────────────────

#[test]
fn oversubscribed_burst_sheds_and_frees_tail() {
    let tx = build_path(10, Config::default());
    let pkts = linear(&tx, 16, 60);

    assert_eq!(tx.send(0, &pkts, 0), 10);

    // Tail of six freed in one batch; ten buffers still out with hardware.
    assert_eq!(tx.pool().freed(), 6);
    assert_eq!(tx.pool().free_count(), 256 - 10);

    let submitted: u64 = tx.lmt().doorbells().iter().map(|d| d.count()).sum();
    assert_eq!(submitted, 10);

    // Refill accounting saw exactly the ten consumed segments.
    assert_eq!(tx.pool().deplete_count(0), 10);
}

#[test]
fn completions_restore_credit() {
    let tx = build_path(8, Config::default());

    let first = linear(&tx, 8, 60);
    assert_eq!(tx.send(0, &first, 0), 8);

    // Device reports all eight descriptors in flight: queue full.
    tx.queue(0).set_hw_used(8);
    let second = linear(&tx, 4, 60);
    assert_eq!(tx.send(0, &second, 0), 0);
    assert_eq!(tx.pool().freed(), 4);

    // Device drains half the queue; the next burst fits.
    tx.queue(0).set_hw_used(4);
    let third = linear(&tx, 4, 60);
    assert_eq!(tx.send(0, &third, 0), 4);
}

// ── Doorbell encoding ───────────────────────────────────────────────

#[test]
fn multi_segment_sizes_ride_in_the_doorbell() {
    let tx = build_path(64, Config::default());

    // Five packets force one 4-batch plus a single. The first two are
    // chains: 3 segments (2 sg dwords) and 4 segments (3 sg dwords).
    let pkts = vec![
        chained(&tx, &[100, 200, 50]),
        chained(&tx, &[10, 20, 30, 40]),
        chained(&tx, &[60]),
        chained(&tx, &[60]),
        chained(&tx, &[60]),
    ];

    assert_eq!(tx.send(0, &pkts, off::MSEG), 5);

    let dbs = tx.lmt().doorbells();
    assert_eq!(dbs.len(), 2);

    let quad = &dbs[0];
    assert_eq!(quad.count(), 4);
    // Header dword plus the scatter-gather list of each packet.
    assert_eq!(quad.first_dwords(), 3);
    assert_eq!(quad.slot_dwords(1), 4);
    assert_eq!(quad.slot_dwords(2), 2);
    assert_eq!(quad.slot_dwords(3), 2);

    // Address carries the queue's register with the low bits re-encoded.
    assert_eq!(quad.io_addr & !0x7F, 0x84_0200 & !0x7F);

    // Line payloads match the advertised sizes (two words per dword).
    assert_eq!(quad.lines[0].1.len(), 6);
    assert_eq!(quad.lines[1].1.len(), 8);

    assert_eq!(dbs[1].count(), 1);
    assert_eq!(dbs[1].first_dwords(), 2);
}

#[test]
fn full_line_chain_fills_the_first_descriptor() {
    let tx = build_path(64, Config::default());

    // Ten segments: three full sub-descriptor groups plus a trailing
    // single, so header and scatter-gather list take the whole line.
    let pkts = vec![chained(&tx, &[10, 20, 30, 40, 50, 60, 70, 80, 90, 100])];

    assert_eq!(tx.send(0, &pkts, off::MSEG), 1);

    let dbs = tx.lmt().doorbells();
    assert_eq!(dbs.len(), 1);
    assert_eq!(dbs[0].count(), 1);
    assert_eq!(dbs[0].first_dwords(), 8);
    assert_eq!(dbs[0].lines[0].1.len(), 16);
}

#[test]
fn barrier_separates_consecutive_batches() {
    let tx = build_path(64, Config::default());
    let pkts = linear(&tx, 21, 60);

    assert_eq!(tx.send(0, &pkts, 0), 21);

    // 16 + 4 + 1: one barrier per doorbell, so lines are never
    // overwritten while the device may still be reading them.
    assert_eq!(tx.lmt().doorbells().len(), 3);
    assert_eq!(tx.lmt().wmb_count(), 3);
}

// ── Offload flags ───────────────────────────────────────────────────

#[test]
fn checksum_fields_reach_the_header() {
    let tx = build_path(8, Config::default());
    let pkts = linear(&tx, 1, 64);

    tx.pool().with_mut(pkts[0], |b| {
        b.flags |= F_OFFLOAD | F_IP_CKSUM | F_UDP_CKSUM;
        b.l3_hdr_offset = 14;
        b.l4_hdr_offset = 34;
    });

    assert_eq!(tx.send(0, &pkts, off::OUTER_CKSUM), 1);

    let dbs = tx.lmt().doorbells();
    let w1 = dbs[0].lines[0].1[1];
    assert_eq!(w1 & 0xFF, 14); // outer L3 pointer
    assert_eq!((w1 >> 8) & 0xFF, 34); // outer L4 pointer
    assert_eq!((w1 >> 32) & 0xF, 3); // IPv4 checksum
    assert_eq!((w1 >> 36) & 0xF, 3); // UDP checksum
}

#[test]
fn offload_is_inert_without_the_burst_flag() {
    let tx = build_path(8, Config::default());
    let pkts = linear(&tx, 1, 64);

    tx.pool().with_mut(pkts[0], |b| {
        b.flags |= F_OFFLOAD | F_IP_CKSUM;
        b.l3_hdr_offset = 14;
    });

    assert_eq!(tx.send(0, &pkts, 0), 1);
    assert_eq!(tx.lmt().doorbells()[0].lines[0].1[1], 0);
}

// ── Scheduling lock ─────────────────────────────────────────────────

#[test]
fn serialized_doorbells_release_between_bursts() {
    let config = ConfigBuilder::new()
        .serialize_doorbells(true)
        .build()
        .unwrap();
    let tx = build_path(64, config);

    let first = linear(&tx, 4, 60);
    assert_eq!(tx.send(0, &first, off::SCHED_EN), 4);

    // A second gated burst must not deadlock on the lock.
    let second = linear(&tx, 4, 60);
    assert_eq!(tx.send(0, &second, off::SCHED_EN), 4);
}
