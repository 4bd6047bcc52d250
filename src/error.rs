use thiserror::Error;

/// Errors returned by lmtline setup paths.
///
/// The burst entry points themselves never fail; they return the count of
/// packets accepted by hardware and account the rest as drops. `Error` only
/// covers configuration and queue/pool construction.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration value out of range.
    #[error("config: {0}")]
    Config(String),
    /// Transmit queue setup failed.
    #[error("queue setup: {0}")]
    QueueSetup(String),
    /// Buffer pool has no free slots.
    #[error("packet pool exhausted")]
    PoolExhausted,
    /// Allocation-domain index outside the configured aura table.
    #[error("invalid allocation domain {0}")]
    InvalidAura(u8),
}
