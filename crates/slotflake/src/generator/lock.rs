use core::cmp::Ordering;
use parking_lot::Mutex;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Error, Result, UniqueId,
    generator::{SlotClaim, SlotSource},
    time::TimeSource,
};

/// Busy-spin iterations before falling back to yielding the thread while
/// waiting out an exhausted millisecond.
const SPIN_LIMIT: u32 = 1 << 10;

#[derive(Clone, Copy, Debug)]
struct Tick {
    timestamp: u64,
    sequence: u64,
}

struct State<C> {
    claim: C,
    last: Option<Tick>,
}

/// A lock-based generator binding one slot claim and one cluster id to the
/// identifier codec.
///
/// The sequence/clock state and the claim live behind a single
/// [`parking_lot::Mutex`], so [`Generator::generate`] and
/// [`Generator::batch`] are fully serialized per instance: no two callers can
/// observe the same `(timestamp, sequence)` pair, and an expired claim is
/// replaced by exactly one caller.
///
/// Where the slot comes from is decided by the [`SlotSource`]: a
/// [`FixedSlot`] for local use, or a claim against a shared pool.
///
/// ## Clock behavior
/// - A new millisecond resets the sequence to zero.
/// - Within a millisecond the sequence increments; when all 8192 values are
///   used the call spins until the clock ticks (at most about 1ms on a
///   healthy clock).
/// - A clock that moves backwards fails with [`Error::ClockRegression`] and
///   no identifier is emitted.
/// - The clock is read before the claim is confirmed for each identifier, so
///   every stamped millisecond falls inside the time the claim was live.
///
/// # Example
/// ```
/// use slotflake::{FixedSlot, Generator, WallClock};
///
/// let generator = Generator::new(FixedSlot::new(1).unwrap(), 4, WallClock::default()).unwrap();
/// let id = generator.generate().unwrap();
/// assert_eq!(id.generator_id(), 1);
/// assert_eq!(id.cluster_id(), 4);
/// ```
///
/// [`FixedSlot`]: crate::generator::FixedSlot
pub struct Generator<S, T>
where
    S: SlotSource,
    T: TimeSource<u64>,
{
    source: S,
    cluster_id: u8,
    state: Mutex<State<S::Claim>>,
    time: T,
}

impl<S, T> Generator<S, T>
where
    S: SlotSource,
    T: TimeSource<u64>,
{
    /// Claims an initial slot from `source` and builds a generator that stamps
    /// `cluster_id` into every identifier.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if `cluster_id` exceeds 15.
    /// - Whatever [`SlotSource::claim`] fails with.
    pub fn new(source: S, cluster_id: u8, time: T) -> Result<Self> {
        if cluster_id > UniqueId::max_cluster_id() {
            return Err(Error::Configuration(format!(
                "cluster id {cluster_id} is outside 0..={}",
                UniqueId::max_cluster_id()
            )));
        }
        let claim = source.claim()?;
        Ok(Self {
            source,
            cluster_id,
            state: Mutex::new(State { claim, last: None }),
            time,
        })
    }

    /// Generates the next identifier.
    ///
    /// If the held claim has expired, a fresh one is claimed from the same
    /// source and the call proceeds with the new slot. Only one re-claim is
    /// attempted per call.
    ///
    /// # Errors
    ///
    /// - [`Error::ClockRegression`] if the clock moved backwards.
    /// - [`Error::Generator`] if the re-claim failed, or the fresh claim
    ///   lapsed too.
    /// - [`Error::Range`] if the clock has run past the 41-bit timestamp.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn generate(&self) -> Result<UniqueId> {
        let mut state = self.state.lock();
        self.next_id(&mut state, &mut false)
    }

    /// Generates `count` identifiers under one critical section.
    ///
    /// No other caller of this instance can interleave with the batch. If the
    /// claim lapses part-way through, the rest of the batch is stamped with
    /// the re-claimed slot; the one-re-claim limit applies to the whole call.
    /// The identifiers are returned in generation order. On error nothing is
    /// returned.
    ///
    /// # Errors
    ///
    /// Same as [`Generator::generate`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn batch(&self, count: usize) -> Result<Vec<UniqueId>> {
        let mut state = self.state.lock();
        let mut reclaimed = false;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(self.next_id(&mut state, &mut reclaimed)?);
        }
        Ok(ids)
    }

    /// Gives the held claim back early. The next [`Generator::generate`] call
    /// claims a new slot, so the generator id may change afterwards.
    pub fn relinquish(&self) {
        self.state.lock().claim.close();
    }

    /// The currently held slot, or `None` if the claim has lapsed.
    pub fn generator_id(&self) -> Option<u8> {
        self.state.lock().claim.get().ok()
    }

    pub fn cluster_id(&self) -> u8 {
        self.cluster_id
    }

    #[cold]
    #[inline(never)]
    fn reclaim(&self, state: &mut State<S::Claim>) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::debug!(cluster_id = self.cluster_id, "claim expired, claiming a new slot");

        state.claim.close();
        state.claim = self
            .source
            .claim()
            .map_err(|e| Error::Generator(Box::new(e)))?;
        Ok(())
    }

    fn next_id(&self, state: &mut State<S::Claim>, reclaimed: &mut bool) -> Result<UniqueId> {
        loop {
            // Clock first: a claim confirmed after the reading was live for
            // the whole stamped millisecond.
            let tick = self.next_tick(state.last)?;
            let generator_id = match state.claim.get() {
                Ok(slot) => slot,
                Err(Error::ClaimExpired) if !*reclaimed => {
                    *reclaimed = true;
                    self.reclaim(state)?;
                    continue;
                }
                Err(Error::ClaimExpired) => {
                    return Err(Error::Generator(Box::new(Error::ClaimExpired)));
                }
                Err(err) => return Err(err),
            };

            let id = UniqueId::from_components(
                tick.timestamp,
                tick.sequence,
                u64::from(generator_id),
                u64::from(self.cluster_id),
            )?;
            state.last = Some(tick);
            return Ok(id);
        }
    }

    fn next_tick(&self, last: Option<Tick>) -> Result<Tick> {
        let now = self.time.current_millis();
        let Some(last) = last else {
            return Ok(Tick {
                timestamp: now,
                sequence: 0,
            });
        };

        match now.cmp(&last.timestamp) {
            Ordering::Greater => Ok(Tick {
                timestamp: now,
                sequence: 0,
            }),
            Ordering::Equal if last.sequence < UniqueId::max_sequence() => Ok(Tick {
                timestamp: now,
                sequence: last.sequence + 1,
            }),
            Ordering::Equal => Ok(Tick {
                timestamp: self.wait_for_next_millis(last.timestamp)?,
                sequence: 0,
            }),
            Ordering::Less => Err(Self::cold_clock_behind(now, last.timestamp)),
        }
    }

    /// Waits out an exhausted millisecond: spins briefly, then yields, until
    /// the clock moves past `last`.
    #[cold]
    #[inline(never)]
    fn wait_for_next_millis(&self, last: u64) -> Result<u64> {
        let mut spins = 0;
        loop {
            let now = self.time.current_millis();
            match now.cmp(&last) {
                Ordering::Greater => return Ok(now),
                Ordering::Less => return Err(Self::cold_clock_behind(now, last)),
                Ordering::Equal if spins < SPIN_LIMIT => {
                    spins += 1;
                    core::hint::spin_loop();
                }
                Ordering::Equal => std::thread::yield_now(),
            }
        }
    }

    #[cold]
    #[inline(never)]
    fn cold_clock_behind(now: u64, last: u64) -> Error {
        #[cfg(feature = "tracing")]
        tracing::warn!(last, now, "clock moved backwards, refusing to generate");

        Error::ClockRegression { last, now }
    }
}

impl<S, T> Drop for Generator<S, T>
where
    S: SlotSource,
    T: TimeSource<u64>,
{
    fn drop(&mut self) {
        self.state.get_mut().claim.close();
    }
}
