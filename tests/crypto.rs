//! Integration tests: inline-crypto submission path.
//!
//! Bursts of crypto-marked packets go through the quad loop against an
//! in-memory line region; the tests verify quad admission, partial-quad
//! submission, crypto credit gating, association counters, and the mixed
//! splitter.

use std::sync::Arc;

use bytes::Bytes;
use lmtline::buffer::F_INLINE_CRYPTO;
use lmtline::lmt::CPT_LMT_ARG_MODE;
use lmtline::{
    AuraConfig, BufIndex, Config, CryptoConfig, CryptoMeta, MemLmt, PktPool, QueueConfig, TxPath,
};

const CPT_IO_ADDR: u64 = 0x90_0000;

// ── Helpers ─────────────────────────────────────────────────────────

fn build_path(queue_depths: &[u32], nb_desc: u32) -> TxPath<MemLmt> {
    let pool = Arc::new(PktPool::new(256, &[AuraConfig { handle: 0xC0DE0 }]).unwrap());
    let queues: Vec<QueueConfig> = queue_depths
        .iter()
        .enumerate()
        .map(|(i, &depth)| QueueConfig {
            sq_id: i as u64,
            io_addr: 0x84_0000 + (i as u64) * 0x100,
            depth,
            sqes_per_sqb_log2: 0,
        })
        .collect();
    let crypto = CryptoConfig {
        io_addr: CPT_IO_ADDR,
        nb_desc,
        sa_entries: 8,
    };
    TxPath::new(
        MemLmt::new(0xB),
        Config::default(),
        &queues,
        Some(&crypto),
        pool,
    )
    .unwrap()
}

fn crypto_pkt(tx: &TxPath<MemLmt>, target_sq: u16, sa_index: u32, len: usize) -> BufIndex {
    let idx = tx.pool().alloc(Bytes::from(vec![0u8; len]), 0).unwrap();
    tx.pool().with_mut(idx, |b| {
        b.flags |= F_INLINE_CRYPTO;
        let mut meta = CryptoMeta::new(target_sq, sa_index, len as u64);
        meta.inst = [0xC0 | (sa_index as u64) << 8; 8];
        b.crypto = Some(Box::new(meta));
    });
    idx
}

fn plain_pkt(tx: &TxPath<MemLmt>, len: usize) -> BufIndex {
    tx.pool().alloc(Bytes::from(vec![0u8; len]), 0).unwrap()
}

// ── Quad admission ──────────────────────────────────────────────────

#[test]
fn full_quad_ships_with_one_doorbell() {
    let tx = build_path(&[4, 4, 4, 4], 16);
    let pkts: Vec<_> = (0..4).map(|sq| crypto_pkt(&tx, sq, sq as u32, 100)).collect();

    assert_eq!(tx.send_crypto(&pkts, 0), 4);

    let dbs = tx.lmt().doorbells();
    assert_eq!(dbs.len(), 1);

    let quad = &dbs[0];
    assert_eq!(quad.count(), 4);
    assert_ne!(quad.lmt_arg & CPT_LMT_ARG_MODE, 0);
    // The crypto doorbell address is the raw register, never size-encoded.
    assert_eq!(quad.io_addr, CPT_IO_ADDR);
    // Four full instruction lines.
    assert_eq!(quad.lines.len(), 4);
    for (line, words) in &quad.lines {
        assert!(*line < 4);
        assert_eq!(words.len(), 8);
    }

    // Barrier follows the doorbell; the engine reads lines asynchronously.
    assert_eq!(tx.lmt().wmb_count(), 1);
}

#[test]
fn starved_lane_degrades_to_partial_quad() {
    let tx = build_path(&[4, 4, 1, 4], 16);

    // Drain queue 2 and let the device report it full.
    assert_eq!(tx.queue(2).reserve(1), 1);
    tx.queue(2).set_hw_used(1);

    let pkts: Vec<_> = (0..4).map(|sq| crypto_pkt(&tx, sq, 0, 100)).collect();
    assert_eq!(tx.send_crypto(&pkts, 0), 3);

    let dbs = tx.lmt().doorbells();
    assert_eq!(dbs.len(), 1);
    assert_eq!(dbs[0].count(), 3);
    assert_ne!(dbs[0].lmt_arg & CPT_LMT_ARG_MODE, 0);
    assert_eq!(dbs[0].lines.len(), 3);
    // Admitted members pack into the lowest lines.
    assert_eq!(dbs[0].lines[0].0, 0);
    assert_eq!(dbs[0].lines[1].0, 1);
    assert_eq!(dbs[0].lines[2].0, 2);

    // The starved packet was freed as a queue-credit drop.
    assert_eq!(tx.pool().freed(), 1);
}

#[test]
fn fully_starved_quad_drops_without_doorbell() {
    let tx = build_path(&[1, 1, 1, 1], 16);
    for q in 0..4 {
        assert_eq!(tx.queue(q).reserve(1), 1);
        tx.queue(q).set_hw_used(1);
    }

    let pkts: Vec<_> = (0..4).map(|sq| crypto_pkt(&tx, sq, 0, 100)).collect();
    assert_eq!(tx.send_crypto(&pkts, 0), 0);

    assert!(tx.lmt().doorbells().is_empty());
    assert_eq!(tx.pool().freed(), 4);
}

// ── Crypto credit gate ──────────────────────────────────────────────

#[test]
fn crypto_gate_refuses_whole_burst() {
    let tx = build_path(&[8, 8, 8, 8], 2);
    let pkts: Vec<_> = (0..4).map(|sq| crypto_pkt(&tx, sq, 0, 100)).collect();

    // The gate is all-or-nothing: two descriptors cannot cover four packets.
    assert_eq!(tx.send_crypto(&pkts, 0), 0);
    assert!(tx.lmt().doorbells().is_empty());
    assert_eq!(tx.pool().freed(), 4);
}

// ── Remainder singles ───────────────────────────────────────────────

#[test]
fn remainder_goes_out_one_instruction_at_a_time() {
    let tx = build_path(&[16], 16);
    let pkts: Vec<_> = (0..5).map(|_| crypto_pkt(&tx, 0, 0, 80)).collect();

    assert_eq!(tx.send_crypto(&pkts, 0), 5);

    let dbs = tx.lmt().doorbells();
    let counts: Vec<u64> = dbs.iter().map(|d| d.count()).collect();
    assert_eq!(counts, vec![4, 1]);
    for db in &dbs {
        assert_ne!(db.lmt_arg & CPT_LMT_ARG_MODE, 0);
    }
}

// ── Instruction preparation ─────────────────────────────────────────

#[test]
fn transform_length_lands_in_the_forwarded_descriptor() {
    let tx = build_path(&[8], 8);
    let idx = tx.pool().alloc(Bytes::from(vec![0u8; 64]), 0).unwrap();
    tx.pool().with_mut(idx, |b| {
        b.flags |= F_INLINE_CRYPTO;
        let mut meta = CryptoMeta::new(0, 2, 60);
        meta.dlen_adj = 16;
        b.crypto = Some(Box::new(meta));
    });

    assert_eq!(tx.send_crypto(&[idx], 0), 1);

    let b = tx.pool().get(idx);
    assert_eq!(b.current_len(), 80);

    // The rebuilt network descriptor carries the extended length and the
    // target queue.
    let nixtx = &b.crypto.as_ref().unwrap().nixtx;
    assert_eq!(nixtx[0] & 0x3FFFF, 80);
    assert_eq!((nixtx[0] >> 44) & 0xFFFFF, 0);
}

#[test]
fn association_counters_accumulate() {
    let tx = build_path(&[8, 8, 8, 8], 16);
    let pkts = vec![
        crypto_pkt(&tx, 0, 5, 100),
        crypto_pkt(&tx, 1, 5, 40),
        crypto_pkt(&tx, 2, 6, 9),
        crypto_pkt(&tx, 3, 5, 1),
    ];

    assert_eq!(tx.send_crypto(&pkts, 0), 4);

    let sa = tx.crypto().unwrap().sa();
    assert_eq!(sa.packets(5), 3);
    assert_eq!(sa.bytes(5), 141);
    assert_eq!(sa.packets(6), 1);
    assert_eq!(sa.bytes(6), 9);
}

// ── Mixed splitter ──────────────────────────────────────────────────

#[test]
fn splitter_routes_each_class_to_its_path() {
    let tx = build_path(&[32, 32], 16);
    let pkts = vec![
        plain_pkt(&tx, 60),
        crypto_pkt(&tx, 1, 0, 100),
        plain_pkt(&tx, 60),
        crypto_pkt(&tx, 1, 0, 100),
        plain_pkt(&tx, 60),
    ];

    assert_eq!(tx.send_inline_crypto(0, &pkts, 0), 5);

    // Crypto packets ship first (two singles), then the plain burst.
    let dbs = tx.lmt().doorbells();
    assert_eq!(dbs.len(), 5);
    assert_ne!(dbs[0].lmt_arg & CPT_LMT_ARG_MODE, 0);
    assert_ne!(dbs[1].lmt_arg & CPT_LMT_ARG_MODE, 0);
    for db in &dbs[2..] {
        assert_eq!(db.lmt_arg & CPT_LMT_ARG_MODE, 0);
        assert_eq!(db.io_addr & !0x7F, 0x84_0000 & !0x7F);
    }
}
