use slotflake::{Generator, Registry, Result, SlotSource, WallClock};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::{
    cluster,
    config::PoolConfig,
    coordinator::{Connector, Coordinator},
    expiring::ExpiringClaim,
};

/// Claims slots from one pool on one coordination session.
pub struct PoolSlots {
    coordinator: Arc<dyn Coordinator>,
    pool_path: String,
    config: PoolConfig,
}

impl PoolSlots {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        pool_path: impl Into<String>,
        config: PoolConfig,
    ) -> Self {
        Self {
            coordinator,
            pool_path: pool_path.into(),
            config,
        }
    }

    pub fn pool_path(&self) -> &str {
        &self.pool_path
    }
}

impl SlotSource for PoolSlots {
    type Claim = ExpiringClaim;

    fn claim(&self) -> Result<ExpiringClaim> {
        ExpiringClaim::claim(Arc::clone(&self.coordinator), &self.pool_path, &self.config)
    }
}

/// A generator whose generator id is claimed from a shared pool.
pub type SynchronizedGenerator = Generator<PoolSlots, WallClock>;

/// Pool-backed generators, at most one per `(endpoint, pool path)`.
///
/// One coordination session is opened per endpoint and shared by every pool on
/// it. Creation is exactly-once per key even under concurrent first use, and a
/// failed creation leaves the key free for a later attempt.
///
/// # Example
/// ```
/// use slotflake_pool::{MemoryEnsemble, PoolConfig, SynchronizedGenerators, provision};
///
/// let ensemble = MemoryEnsemble::new();
/// provision(&ensemble.session(), "/ids/east", 4).unwrap();
///
/// let generators = SynchronizedGenerators::new(ensemble, PoolConfig::default()).unwrap();
/// let generator = generators.generator("memory", "/ids/east").unwrap();
/// let id = generator.generate().unwrap();
/// assert_eq!(id.cluster_id(), 4);
/// assert_eq!(id.to_bytes().len(), 8);
/// ```
pub struct SynchronizedGenerators<C>
where
    C: Connector,
{
    connector: C,
    config: PoolConfig,
    connections: Registry<String, Arc<dyn Coordinator>>,
    generators: Registry<(String, String), Arc<SynchronizedGenerator>>,
}

impl<C> SynchronizedGenerators<C>
where
    C: Connector,
{
    /// # Errors
    ///
    /// [`Error::Configuration`](slotflake::Error::Configuration) if `config`
    /// is invalid.
    pub fn new(connector: C, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connector,
            config,
            connections: Registry::new(),
            generators: Registry::new(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns the generator for `pool_path` on `endpoint`, connecting,
    /// reading the pool's cluster id and claiming a slot on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`](slotflake::Error::Configuration) if the pool
    ///   has no valid cluster id.
    /// - [`Error::ClaimUnavailable`](slotflake::Error::ClaimUnavailable) if
    ///   the endpoint is unreachable, the pool does not exist, or no slot
    ///   frees up in time.
    #[instrument(level = "debug", skip(self))]
    pub fn generator(
        &self,
        endpoint: &str,
        pool_path: &str,
    ) -> Result<Arc<SynchronizedGenerator>> {
        let key = (endpoint.to_owned(), pool_path.to_owned());
        self.generators.get_or_try_insert_with(key, || {
            let coordinator = self.connection(endpoint)?;
            let cluster_id = cluster::cluster_id(&*coordinator, pool_path)?;
            let slots = PoolSlots::new(coordinator, pool_path, self.config.clone());
            let generator =
                Generator::new(slots, cluster_id, WallClock::with_epoch(self.config.epoch()))?;
            info!(
                endpoint,
                pool = pool_path,
                cluster_id,
                generator_id = generator.generator_id(),
                "created synchronized generator"
            );
            Ok(Arc::new(generator))
        })
    }

    /// The shared session for `endpoint`, opened on first use.
    ///
    /// # Errors
    ///
    /// [`Error::ClaimUnavailable`](slotflake::Error::ClaimUnavailable) if the
    /// endpoint cannot be reached.
    pub fn connection(&self, endpoint: &str) -> Result<Arc<dyn Coordinator>> {
        self.connections
            .get_or_try_insert_with(endpoint.to_owned(), || Ok(self.connector.connect(endpoint)?))
    }

    /// Forgets the generator for this key and gives its slot back. Holders of
    /// the returned `Arc` keep a usable generator that will re-claim on its
    /// next call.
    pub fn remove(&self, endpoint: &str, pool_path: &str) -> Option<Arc<SynchronizedGenerator>> {
        let generator = self
            .generators
            .remove(&(endpoint.to_owned(), pool_path.to_owned()))?;
        generator.relinquish();
        Some(generator)
    }

    /// Number of live generators.
    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}
