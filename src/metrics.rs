//! Transmit fast-path metrics.
//!
//! Counters cover accepted traffic, drops by cause, and doorbell issuance.
//! All statics are metriken metrics and can be scraped by whatever
//! exposition layer the embedding driver runs.

use crate::counter::{Counter, CounterGroup};
use metriken::metric;

// Counter groups (sharded storage, one shard per transmit worker).
static PKT: CounterGroup = CounterGroup::new();
static DROP: CounterGroup = CounterGroup::new();
static DB: CounterGroup = CounterGroup::new();

/// Counter slot indices for accepted traffic.
pub mod pkt {
    pub const SENT: usize = 0;
    pub const BYTES: usize = 1;
    pub const CRYPTO_SENT: usize = 2;
}

/// Counter slot indices for drops.
pub mod drop {
    pub const QUEUE_CREDIT: usize = 0;
    pub const CRYPTO_CREDIT: usize = 1;
}

/// Counter slot indices for doorbells.
pub mod db {
    pub const QUEUE: usize = 0;
    pub const CRYPTO: usize = 1;
    pub const PARTIAL_QUAD: usize = 2;
}

// ── Accepted traffic ─────────────────────────────────────────────

#[metric(
    name = "lmtline/pkt/sent",
    description = "Packets accepted by the hardware queue"
)]
pub static PKT_SENT: Counter = Counter::new(&PKT, pkt::SENT);

#[metric(
    name = "lmtline/pkt/bytes",
    description = "Payload bytes accepted by the hardware queue"
)]
pub static PKT_BYTES: Counter = Counter::new(&PKT, pkt::BYTES);

#[metric(
    name = "lmtline/pkt/crypto_sent",
    description = "Packets submitted through the inline-crypto queue"
)]
pub static PKT_CRYPTO_SENT: Counter = Counter::new(&PKT, pkt::CRYPTO_SENT);

// ── Drops ────────────────────────────────────────────────────────

#[metric(
    name = "lmtline/drop/queue_credit",
    description = "Packets dropped for lack of network queue credit"
)]
pub static DROP_QUEUE_CREDIT: Counter = Counter::new(&DROP, drop::QUEUE_CREDIT);

#[metric(
    name = "lmtline/drop/crypto_credit",
    description = "Packets dropped for lack of crypto queue credit"
)]
pub static DROP_CRYPTO_CREDIT: Counter = Counter::new(&DROP, drop::CRYPTO_CREDIT);

// ── Doorbells ────────────────────────────────────────────────────

#[metric(
    name = "lmtline/doorbell/queue",
    description = "Doorbell writes to network queues"
)]
pub static DB_QUEUE: Counter = Counter::new(&DB, db::QUEUE);

#[metric(
    name = "lmtline/doorbell/crypto",
    description = "Doorbell writes to the crypto queue"
)]
pub static DB_CRYPTO: Counter = Counter::new(&DB, db::CRYPTO);

#[metric(
    name = "lmtline/doorbell/partial_quad",
    description = "Crypto quads submitted with fewer than four members"
)]
pub static DB_PARTIAL_QUAD: Counter = Counter::new(&DB, db::PARTIAL_QUAD);
