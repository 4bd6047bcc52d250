use crate::error::Error;
use crate::lmt::LMT_LINES;

/// Configuration for the transmit fast path.
#[derive(Clone)]
pub struct Config {
    /// Maximum packets per burst call. Bursts longer than this are a caller
    /// contract violation.
    pub max_burst: usize,
    /// Number of write-combine lines in the hardware line group. The batch
    /// loops assume 16.
    pub lmt_lines: usize,
    /// Serialize doorbell order through the advisory scheduling lock.
    /// Enable when multiple producers share one hardware queue.
    pub serialize_doorbells: bool,
    /// Spin iterations the scheduling wait performs before giving up.
    /// The wait is advisory; exceeding the bound never fails the burst.
    pub sched_spin_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_burst: 256,
            lmt_lines: LMT_LINES,
            serialize_doorbells: false,
            sched_spin_limit: 4096,
        }
    }
}

impl Config {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_burst == 0 || self.max_burst > 4096 {
            return Err(Error::Config(
                "max_burst must be in 1..=4096".into(),
            ));
        }
        if self.lmt_lines != LMT_LINES {
            return Err(Error::Config(format!(
                "lmt_lines must be {LMT_LINES} (hardware line group size)"
            )));
        }
        if self.sched_spin_limit == 0 {
            return Err(Error::Config("sched_spin_limit must be > 0".into()));
        }
        Ok(())
    }
}

/// Configuration for one network send queue.
#[derive(Clone)]
pub struct QueueConfig {
    /// Queue id placed in the send header's destination field.
    pub sq_id: u64,
    /// Doorbell register address for this queue.
    pub io_addr: u64,
    /// Queue depth in hardware units.
    pub depth: u32,
    /// log2 of descriptor units per hardware depth unit.
    pub sqes_per_sqb_log2: u32,
}

impl QueueConfig {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.depth == 0 {
            return Err(Error::QueueSetup("depth must be > 0".into()));
        }
        if self.sqes_per_sqb_log2 > 8 {
            return Err(Error::QueueSetup(
                "sqes_per_sqb_log2 must be <= 8".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the inline-crypto queue.
#[derive(Clone)]
pub struct CryptoConfig {
    /// Doorbell register address for the crypto queue.
    pub io_addr: u64,
    /// Crypto queue depth in descriptors.
    pub nb_desc: u32,
    /// Number of security-association counter slots.
    pub sa_entries: usize,
}

impl CryptoConfig {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.nb_desc == 0 {
            return Err(Error::QueueSetup("nb_desc must be > 0".into()));
        }
        if self.sa_entries == 0 {
            return Err(Error::QueueSetup("sa_entries must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for [`Config`] with `build()` validation.
///
/// # Example
///
/// ```rust
/// use lmtline::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .max_burst(128)
///     .serialize_doorbells(true)
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum packets per burst call.
    pub fn max_burst(mut self, n: usize) -> Self {
        self.config.max_burst = n;
        self
    }

    /// Enable or disable doorbell serialization.
    pub fn serialize_doorbells(mut self, enable: bool) -> Self {
        self.config.serialize_doorbells = enable;
        self
    }

    /// Set the advisory scheduling spin bound.
    pub fn sched_spin_limit(mut self, n: u32) -> Self {
        self.config.sched_spin_limit = n;
        self
    }

    /// Mutable access to fields not covered by builder methods.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Validate and build the final [`Config`].
    pub fn build(self) -> Result<Config, Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_burst() {
        let config = ConfigBuilder::new().max_burst(0).build();
        assert!(matches!(config, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_odd_line_count() {
        let mut builder = ConfigBuilder::new();
        builder.config_mut().lmt_lines = 8;
        assert!(builder.build().is_err());
    }

    #[test]
    fn queue_config_rejects_zero_depth() {
        let qc = QueueConfig {
            sq_id: 0,
            io_addr: 0x8000,
            depth: 0,
            sqes_per_sqb_log2: 0,
        };
        assert!(qc.validate().is_err());
    }

    #[test]
    fn crypto_config_rejects_zero_desc() {
        let cc = CryptoConfig {
            io_addr: 0x9000,
            nb_desc: 0,
            sa_entries: 4,
        };
        assert!(cc.validate().is_err());
    }
}
