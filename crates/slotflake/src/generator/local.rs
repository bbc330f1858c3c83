use std::sync::Arc;

use crate::{
    Registry, Result,
    generator::{FixedSlot, Generator},
    time::{TimeSource, WallClock},
};

/// A generator pinned to a fixed, locally chosen slot.
pub type LocalGenerator<T = WallClock> = Generator<FixedSlot, T>;

/// Shared fixed-slot generators keyed by `(generator_id, cluster_id)`.
///
/// Two generators holding the same pair would collide as soon as they issue an
/// identifier in the same millisecond. Handing out one shared instance per
/// pair means independent callers that ask for the same pair share one
/// sequence and never collide.
///
/// # Example
/// ```
/// use slotflake::LocalGenerators;
///
/// let generators = LocalGenerators::default();
/// let a = generators.generator_for(1, 1).unwrap();
/// let b = generators.generator_for(1, 1).unwrap();
/// assert_ne!(a.generate().unwrap(), b.generate().unwrap());
/// ```
pub struct LocalGenerators<T = WallClock>
where
    T: TimeSource<u64>,
{
    time: T,
    generators: Registry<(u8, u8), Arc<LocalGenerator<T>>>,
}

impl Default for LocalGenerators<WallClock> {
    fn default() -> Self {
        Self::new(WallClock::default())
    }
}

impl<T> LocalGenerators<T>
where
    T: TimeSource<u64> + Clone,
{
    /// Every generator created by this registry reads from a clone of `time`.
    pub fn new(time: T) -> Self {
        Self {
            time,
            generators: Registry::new(),
        }
    }

    /// Returns the shared generator for this pair, creating it on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::Range`](crate::Error::Range) if `generator_id` exceeds 63.
    /// - [`Error::Configuration`](crate::Error::Configuration) if `cluster_id`
    ///   exceeds 15.
    pub fn generator_for(&self, generator_id: u8, cluster_id: u8) -> Result<Arc<LocalGenerator<T>>> {
        self.generators
            .get_or_try_insert_with((generator_id, cluster_id), || {
                let slot = FixedSlot::new(generator_id)?;
                Generator::new(slot, cluster_id, self.time.clone()).map(Arc::new)
            })
    }
}
