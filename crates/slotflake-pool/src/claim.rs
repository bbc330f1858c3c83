use parking_lot::{Condvar, Mutex};
use slotflake::{
    Error, Result, TimeSource, UNIX_EPOCH_MILLIS, UniqueId, WallClock, wait_past_millis,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    coordinator::{
        Coordinator, CreateMode, WatchKind, Watcher, delete_if_exists, join_path, validate_path,
    },
    error::{CoordinationError, CoordinationResult},
};

/// Child of the pool node holding one ephemeral-sequential ticket per waiter.
pub const QUEUE_NODE: &str = "queue";

/// Child of the pool node holding one ephemeral node per bound slot.
pub const POOL_NODE: &str = "pool";

const TICKET_PREFIX: &str = "ticket-";

const QUEUE_WATCH: usize = 0;
const POOL_WATCH: usize = 1;

#[derive(Default)]
struct Watches {
    armed: [bool; 2],
    fired: bool,
}

/// Wakes a waiting claimant when the queue or the pool changes.
///
/// Watches are one-shot and re-armed only after they fire, so a claimant has
/// at most one pending watch per node however often it loops.
#[derive(Default)]
struct Signal {
    watches: Mutex<Watches>,
    changed: Condvar,
}

impl Signal {
    fn arm(
        self: &Arc<Self>,
        coordinator: &dyn Coordinator,
        index: usize,
        path: &str,
    ) -> CoordinationResult<()> {
        {
            let mut watches = self.watches.lock();
            if watches.armed[index] {
                return Ok(());
            }
            watches.armed[index] = true;
        }

        let signal = Arc::clone(self);
        let watcher: Watcher = Box::new(move |_| {
            let mut watches = signal.watches.lock();
            watches.armed[index] = false;
            watches.fired = true;
            signal.changed.notify_all();
        });
        coordinator
            .watch(path, WatchKind::Children, watcher)
            .inspect_err(|_| self.watches.lock().armed[index] = false)
    }

    /// Waits for a change and consumes it. Returns `false` if the deadline
    /// passed with no change.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut watches = self.watches.lock();
        while !watches.fired {
            if self.changed.wait_until(&mut watches, deadline).timed_out() {
                break;
            }
        }
        core::mem::take(&mut watches.fired)
    }
}

/// Exclusive ownership of one slot in `0..pool_size`, held through the
/// coordination service.
///
/// A claimant enqueues an ephemeral-sequential ticket under
/// `{pool}/queue`, and once its ticket ranks among the first `pool_size`
/// tickets it binds a free slot by creating the ephemeral node
/// `{pool}/pool/{slot}`. Both nodes vanish with the session, so a crashed
/// process frees its slot without help.
///
/// Slot choice prefers the claimant's rank, then the lowest unbound slot.
/// Binding is a create-if-absent on the slot node, so two claimants can never
/// hold the same slot even when their view of the queue is stale.
pub struct ResourceClaim {
    coordinator: Arc<dyn Coordinator>,
    pool_path: String,
    slot: u8,
    ticket: String,
    binding: String,
    released: Mutex<bool>,
}

impl ResourceClaim {
    /// Joins the queue under `pool_path` and blocks until a slot is bound or
    /// `wait` runs out.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if `pool_size` is 0 or exceeds 64.
    /// - [`Error::ClaimUnavailable`] if `pool_path` is malformed, the pool
    ///   node does not exist, the wait ceiling is reached, or the coordination
    ///   service fails. The ticket is withdrawn in every case.
    #[instrument(level = "debug", skip(coordinator))]
    pub fn claim(
        coordinator: Arc<dyn Coordinator>,
        pool_size: u8,
        pool_path: &str,
        wait: Duration,
    ) -> Result<Self> {
        if pool_size == 0 || pool_size > UniqueId::max_generator_id() + 1 {
            return Err(Error::Configuration(format!(
                "pool size {pool_size} is outside 1..={}",
                UniqueId::max_generator_id() + 1
            )));
        }
        validate_path(pool_path)
            .map_err(|err| Error::unavailable_from(format!("pool path {pool_path:?}"), err))?;
        if !coordinator.exists(pool_path)? {
            return Err(Error::unavailable(format!("pool {pool_path} does not exist")));
        }

        let queue = join_path(pool_path, QUEUE_NODE);
        let pool = join_path(pool_path, POOL_NODE);
        for node in [&queue, &pool] {
            match coordinator.create(node, &[], CreateMode::Persistent) {
                Ok(_) | Err(CoordinationError::NodeExists(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let ticket = coordinator.create(
            &join_path(&queue, TICKET_PREFIX),
            &[],
            CreateMode::EphemeralSequential,
        )?;
        debug!(%ticket, "joined claim queue");

        let deadline = Instant::now() + wait;
        match Self::acquire(&*coordinator, &queue, &pool, &ticket, pool_size, deadline) {
            Ok((slot, binding)) => {
                info!(slot, pool = pool_path, "claimed generator slot");
                Ok(Self {
                    coordinator,
                    pool_path: pool_path.to_owned(),
                    slot,
                    ticket,
                    binding,
                    released: Mutex::new(false),
                })
            }
            Err(err) => {
                if let Err(cleanup) = delete_if_exists(&*coordinator, &ticket) {
                    warn!(%ticket, error = %cleanup, "failed to withdraw claim ticket");
                }
                Err(err)
            }
        }
    }

    fn acquire(
        coordinator: &dyn Coordinator,
        queue: &str,
        pool: &str,
        ticket: &str,
        pool_size: u8,
        deadline: Instant,
    ) -> Result<(u8, String)> {
        let ticket_name = ticket.rsplit('/').next().unwrap_or(ticket);
        let signal = Arc::new(Signal::default());
        loop {
            // Watch before reading so a change between the read and the wait
            // still wakes us.
            signal.arm(coordinator, QUEUE_WATCH, queue)?;
            signal.arm(coordinator, POOL_WATCH, pool)?;

            let rank = rank_of(&coordinator.children(queue)?, ticket_name).ok_or_else(|| {
                Error::unavailable(format!("claim ticket {ticket} vanished from the queue"))
            })?;

            if rank < usize::from(pool_size) {
                let bound = coordinator.children(pool)?;
                for slot in candidates(rank, pool_size, &bound) {
                    let binding = join_path(pool, &slot.to_string());
                    match coordinator.create(&binding, ticket_name.as_bytes(), CreateMode::Ephemeral)
                    {
                        Ok(binding) => return Ok((slot, binding)),
                        Err(CoordinationError::NodeExists(_)) => continue,
                        Err(err) => return Err(err.into()),
                    }
                }
                debug!(rank, bound = bound.len(), "no free slot yet, waiting");
            } else {
                debug!(rank, pool_size, "queued behind a full pool, waiting");
            }

            if !signal.wait_until(deadline) {
                return Err(Error::unavailable(format!(
                    "no slot in {pool} became free before the wait ceiling"
                )));
            }
        }
    }

    /// The claimed slot number.
    pub fn get(&self) -> u8 {
        self.slot
    }

    pub fn pool_path(&self) -> &str {
        &self.pool_path
    }

    /// Path of the ephemeral node binding this claim to its slot.
    pub fn binding(&self) -> &str {
        &self.binding
    }

    pub fn is_released(&self) -> bool {
        *self.released.lock()
    }

    /// Withdraws the binding and the queue ticket.
    ///
    /// The binding is deleted only after the wall clock has moved past the
    /// millisecond in which the release began, so the next holder of the slot
    /// cannot stamp a millisecond this holder may have used.
    ///
    /// Safe to call any number of times. Returns `true` once both nodes are
    /// known to be gone; on a coordination failure the claim stays marked as
    /// held so a later call can finish the job.
    pub fn release(&self) -> bool {
        let mut released = self.released.lock();
        if *released {
            return true;
        }

        match self.withdraw() {
            Ok(()) => {
                *released = true;
                info!(slot = self.slot, "released generator slot");
                true
            }
            Err(err) => {
                warn!(slot = self.slot, error = %err, "failed to release generator slot");
                false
            }
        }
    }

    fn withdraw(&self) -> core::result::Result<(), CoordinationError> {
        let ticket_name = self.ticket.rsplit('/').next().unwrap_or(&self.ticket);
        match self.coordinator.get_data(&self.binding) {
            // Only remove the binding if it is still ours.
            Ok(owner) if owner == ticket_name.as_bytes() => {
                let clock = WallClock::with_epoch(UNIX_EPOCH_MILLIS);
                wait_past_millis(&clock, clock.current_millis());
                delete_if_exists(&*self.coordinator, &self.binding)?;
            }
            Ok(_) | Err(CoordinationError::NoNode(_)) => {}
            Err(err) => return Err(err),
        }
        delete_if_exists(&*self.coordinator, &self.ticket)
    }
}

impl core::fmt::Debug for ResourceClaim {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResourceClaim")
            .field("slot", &self.slot)
            .field("ticket", &self.ticket)
            .field("released", &self.is_released())
            .finish()
    }
}

fn ticket_sequence(name: &str) -> Option<u64> {
    name.strip_prefix(TICKET_PREFIX)?.parse().ok()
}

/// Position of `ticket` among the queued tickets ordered by sequence number.
fn rank_of(children: &[String], ticket: &str) -> Option<usize> {
    let mut tickets: Vec<(u64, &str)> = children
        .iter()
        .filter_map(|name| Some((ticket_sequence(name)?, name.as_str())))
        .collect();
    tickets.sort_unstable();
    tickets.iter().position(|(_, name)| *name == ticket)
}

/// Unbound slots to try, the one matching `rank` first.
fn candidates(rank: usize, pool_size: u8, bound: &[String]) -> Vec<u8> {
    let is_free = |slot: &u8| !bound.iter().any(|name| *name == slot.to_string());
    let preferred = u8::try_from(rank).ok().filter(|slot| *slot < pool_size);
    preferred
        .into_iter()
        .chain((0..pool_size).filter(|slot| Some(*slot) != preferred))
        .filter(is_free)
        .collect()
}
