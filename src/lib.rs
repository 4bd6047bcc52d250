//! lmtline — write-combine transmit fast path for line-group NICs.
//!
//! lmtline turns bursts of packet buffers into hardware send descriptors,
//! stages them into 128-byte write-combine lines, and commits them with one
//! doorbell per batch. Queue depth is enforced through a lock-free credit
//! cache, oversubscribed bursts shed their tail as accounted drops, and
//! crypto-marked packets detour through an inline crypto engine four at a
//! time before reaching their network queue.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use lmtline::{AuraConfig, Config, MemLmt, PktPool, QueueConfig, TxPath, off};
//!
//! fn main() -> Result<(), lmtline::Error> {
//!     let pool = Arc::new(PktPool::new(1024, &[AuraConfig { handle: 0xA0 }])?);
//!     let tx = TxPath::new(
//!         MemLmt::new(0x5),
//!         Config::default(),
//!         &[QueueConfig {
//!             sq_id: 0,
//!             io_addr: 0x840200,
//!             depth: 512,
//!             sqes_per_sqb_log2: 0,
//!         }],
//!         None,
//!         Arc::clone(&pool),
//!     )?;
//!
//!     let pkt = pool.alloc(bytes::Bytes::from_static(&[0u8; 60]), 0)?;
//!     let accepted = tx.send(0, &[pkt], off::OUTER_CKSUM);
//!     assert_eq!(accepted, 1);
//!     Ok(())
//! }
//! ```
//!
//! Production embedders implement [`LmtRegion`] over the device's mapped
//! line group; [`MemLmt`] is the in-memory stand-in used by the tests.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod counter;
pub(crate) mod credit;
pub(crate) mod descriptor;
pub(crate) mod metrics;
pub(crate) mod sched;

// ── Public modules ──────────────────────────────────────────────────────
pub mod buffer;
pub mod config;
pub mod crypto;
pub mod error;
pub mod lmt;
pub mod pool;
pub mod queue;
pub mod tx;

// ── Re-exports: setup ───────────────────────────────────────────────────

pub use config::{Config, ConfigBuilder, CryptoConfig, QueueConfig};
pub use error::Error;
pub use pool::{AuraConfig, PktPool};

// ── Re-exports: fast path ───────────────────────────────────────────────

pub use tx::TxPath;
/// Per-burst option flags.
pub use tx::off;

pub use buffer::{BufIndex, CryptoMeta, PktBuf};
pub use crypto::{CryptoCtx, SaTable};
pub use lmt::{Doorbell, LmtRegion, MemLmt};
pub use queue::{CryptoQueue, SendQueue};

// ── Re-exports: observability ───────────────────────────────────────────

/// Pin the current thread to a metrics shard. Call once per worker.
pub use counter::set_worker_shard;
