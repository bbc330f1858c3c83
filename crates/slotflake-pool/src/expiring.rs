use parking_lot::{Condvar, Mutex};
use slotflake::{Error, Result, SlotClaim};
use std::{
    sync::{Arc, Weak},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    claim::ResourceClaim,
    config::PoolConfig,
    coordinator::{ConnectionObserver, Coordinator},
};

/// Where an [`ExpiringClaim`] stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Liveness {
    /// The slot may be used.
    Live,
    /// The timeout elapsed.
    Expired,
    /// The coordination session disconnected; the slot may already belong to
    /// someone else.
    ConnectionLost,
    /// Given back by the holder.
    Relinquished,
}

struct Shared {
    claim: ResourceClaim,
    state: Mutex<Liveness>,
    changed: Condvar,
    claimed_at: Instant,
    expires_at: Instant,
}

impl Shared {
    /// Body of the timer thread: sleeps until the deadline unless the claim
    /// ends first, then marks it expired and releases the slot.
    fn run_timer(&self) {
        let mut state = self.state.lock();
        while *state == Liveness::Live && Instant::now() < self.expires_at {
            self.changed.wait_until(&mut state, self.expires_at);
        }
        match *state {
            Liveness::Live => *state = Liveness::Expired,
            // Lapsed inside `get`; the release is still ours to do.
            Liveness::Expired => {}
            Liveness::ConnectionLost | Liveness::Relinquished => return,
        }
        drop(state);

        info!(slot = self.claim.get(), "generator slot claim timed out");
        self.claim.release();
    }

    fn end(&self, to: Liveness) -> Liveness {
        let mut state = self.state.lock();
        let previous = *state;
        if previous == Liveness::Live {
            *state = to;
            self.changed.notify_all();
        }
        previous
    }
}

impl ConnectionObserver for Shared {
    fn connected(&self) {
        if *self.state.lock() == Liveness::Live {
            return;
        }
        if !self.claim.is_released() {
            debug!(slot = self.claim.get(), "reconnected, cleaning up lapsed claim");
            self.claim.release();
        }
    }

    fn disconnected(&self) {
        if self.end(Liveness::ConnectionLost) == Liveness::Live {
            warn!(slot = self.claim.get(), "coordination session lost, claim is no longer valid");
        }
    }
}

/// A [`ResourceClaim`] that lapses after a timeout or as soon as the
/// coordination session disconnects.
///
/// A background timer releases the slot when the timeout elapses so the pool
/// does not wait for the holder. [`ExpiringClaim::get`] also checks the
/// deadline itself and never hands out a slot past it.
pub struct ExpiringClaim {
    shared: Arc<Shared>,
}

impl ExpiringClaim {
    /// Claims a slot from the pool at `pool_path` using `config`'s pool size,
    /// wait ceiling and timeout.
    ///
    /// # Errors
    ///
    /// Whatever [`ResourceClaim::claim`] fails with, or
    /// [`Error::ClaimUnavailable`] if the timer thread cannot be started.
    pub fn claim(
        coordinator: Arc<dyn Coordinator>,
        pool_path: &str,
        config: &PoolConfig,
    ) -> Result<Self> {
        let claim = ResourceClaim::claim(
            Arc::clone(&coordinator),
            config.pool_size(),
            pool_path,
            config.acquire_timeout(),
        )?;
        Self::wrap(&*coordinator, claim, config.claim_timeout())
    }

    /// Starts the timeout for an already bound claim and subscribes it to
    /// `coordinator`'s connection events.
    ///
    /// # Errors
    ///
    /// [`Error::ClaimUnavailable`] if the timer thread cannot be started; the
    /// claim is released.
    pub fn wrap(
        coordinator: &dyn Coordinator,
        claim: ResourceClaim,
        timeout: Duration,
    ) -> Result<Self> {
        let slot = claim.get();
        let claimed_at = Instant::now();
        let shared = Arc::new(Shared {
            claim,
            state: Mutex::new(Liveness::Live),
            changed: Condvar::new(),
            claimed_at,
            expires_at: claimed_at + timeout,
        });

        let timer = Arc::clone(&shared);
        if let Err(err) = thread::Builder::new()
            .name(format!("slot-{slot}-expiry"))
            .spawn(move || timer.run_timer())
        {
            shared.claim.release();
            return Err(Error::unavailable_from("failed to start claim timer", err));
        }

        let observer: Arc<dyn ConnectionObserver> = shared.clone();
        let observer: Weak<dyn ConnectionObserver> = Arc::downgrade(&observer);
        coordinator.observe(observer);

        debug!(slot, ?timeout, "claim timer started");
        Ok(Self { shared })
    }

    /// The claimed slot while the claim is live.
    ///
    /// # Errors
    ///
    /// [`Error::ClaimExpired`] once the timeout has elapsed, the session has
    /// disconnected, or the claim has been relinquished.
    pub fn get(&self) -> Result<u8> {
        let mut state = self.shared.state.lock();
        if *state == Liveness::Live && Instant::now() >= self.shared.expires_at {
            *state = Liveness::Expired;
            self.shared.changed.notify_all();
        }
        match *state {
            Liveness::Live => Ok(self.shared.claim.get()),
            _ => Err(Error::ClaimExpired),
        }
    }

    pub fn liveness(&self) -> Liveness {
        *self.shared.state.lock()
    }

    pub fn claimed_at(&self) -> Instant {
        self.shared.claimed_at
    }

    pub fn expires_at(&self) -> Instant {
        self.shared.expires_at
    }

    /// Ends the claim now and gives the slot back.
    pub fn relinquish(&self) {
        if self.shared.end(Liveness::Relinquished) == Liveness::Live {
            debug!(slot = self.shared.claim.get(), "claim relinquished");
        }
        self.shared.claim.release();
    }

    /// The underlying pool claim.
    pub fn resource(&self) -> &ResourceClaim {
        &self.shared.claim
    }
}

impl SlotClaim for ExpiringClaim {
    fn get(&self) -> Result<u8> {
        ExpiringClaim::get(self)
    }

    fn close(&self) {
        self.relinquish();
    }
}

impl Drop for ExpiringClaim {
    fn drop(&mut self) {
        self.relinquish();
    }
}

impl core::fmt::Debug for ExpiringClaim {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExpiringClaim")
            .field("claim", &self.shared.claim)
            .field("liveness", &self.liveness())
            .finish()
    }
}
