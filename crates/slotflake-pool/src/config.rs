use core::time::Duration;
use slotflake::{DEFAULT_EPOCH, Error, Result, UniqueId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of generator-id slots in a pool: one per representable generator id.
pub const DEFAULT_POOL_SIZE: u8 = UniqueId::max_generator_id() + 1;

/// How long a claimed slot stays valid before it lapses on its own.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Longest a claim attempt waits in the queue for a free slot.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

const _: () = assert!(
    DEFAULT_POOL_SIZE as u64 == UniqueId::GENERATOR_ID_MASK + 1,
    "pool size must cover every generator id"
);

/// Settings shared by every pool-backed generator built from one
/// [`SynchronizedGenerators`](crate::SynchronizedGenerators).
///
/// # Example
/// ```
/// use core::time::Duration;
/// use slotflake_pool::PoolConfig;
///
/// let config = PoolConfig::default()
///     .with_pool_size(8)
///     .with_claim_timeout(Duration::from_secs(60));
/// assert!(config.validate().is_ok());
/// ```
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pool_size: u8,
    claim_timeout: Duration,
    acquire_timeout: Duration,
    epoch: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            epoch: DEFAULT_EPOCH,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub const fn with_pool_size(mut self, pool_size: u8) -> Self {
        self.pool_size = pool_size;
        self
    }

    #[must_use]
    pub const fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Offset subtracted from wall-clock time before it is packed.
    #[must_use]
    pub const fn with_epoch(mut self, epoch: Duration) -> Self {
        self.epoch = epoch;
        self
    }

    pub const fn pool_size(&self) -> u8 {
        self.pool_size
    }

    pub const fn claim_timeout(&self) -> Duration {
        self.claim_timeout
    }

    pub const fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    pub const fn epoch(&self) -> Duration {
        self.epoch
    }

    /// # Errors
    ///
    /// [`Error::Configuration`] when the pool size is outside `1..=64`, the
    /// claim timeout is zero, or the epoch is not a whole number of
    /// milliseconds.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 || self.pool_size > DEFAULT_POOL_SIZE {
            return Err(Error::Configuration(format!(
                "pool size {} is outside 1..={DEFAULT_POOL_SIZE}",
                self.pool_size
            )));
        }
        if self.claim_timeout.is_zero() {
            return Err(Error::Configuration("claim timeout must be non-zero".into()));
        }
        // Slot handover waits on Unix millisecond boundaries.
        if self.epoch.subsec_nanos() % 1_000_000 != 0 {
            return Err(Error::Configuration(format!(
                "epoch {:?} is not a whole number of milliseconds",
                self.epoch
            )));
        }
        Ok(())
    }
}
