use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Default epoch: Wednesday, January 1, 2025 00:00:00 UTC
///
/// With a 41-bit millisecond timestamp this covers roughly 69 years.
pub const DEFAULT_EPOCH: Duration = Duration::from_millis(1_735_689_600_000);

/// Standard UNIX epoch: Thursday, January 1, 1970 00:00:00 UTC
pub const UNIX_EPOCH_MILLIS: Duration = Duration::from_millis(0);

/// A trait for time sources that return a wall-clock timestamp.
///
/// This abstraction lets the generator run against the system clock in
/// production and a scripted clock in tests (including one that moves
/// backwards).
///
/// The unit is **milliseconds** relative to a configurable origin.
///
/// # Example
///
/// ```
/// use slotflake::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource<u64> for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1234);
/// ```
pub trait TimeSource<T> {
    /// Returns the current time in milliseconds since the configured epoch.
    fn current_millis(&self) -> T;
}

impl<T, S> TimeSource<T> for Arc<S>
where
    S: TimeSource<T> + ?Sized,
{
    fn current_millis(&self) -> T {
        (**self).current_millis()
    }
}

/// Wall-clock time source measured from a custom epoch.
///
/// Unlike a monotonic timer this reports adjustments of the system clock,
/// including steps backwards, so the generator can refuse to reuse old
/// timestamps instead of silently masking them. Times before the epoch read
/// as `0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WallClock {
    epoch: Duration,
}

impl Default for WallClock {
    /// Constructs a wall clock aligned to [`DEFAULT_EPOCH`].
    fn default() -> Self {
        Self::with_epoch(DEFAULT_EPOCH)
    }
}

impl WallClock {
    /// Constructs a wall clock whose `t = 0` is `epoch`, given as a
    /// [`Duration`] since 1970-01-01 UTC.
    pub const fn with_epoch(epoch: Duration) -> Self {
        Self { epoch }
    }

    /// The configured origin.
    pub const fn epoch(&self) -> Duration {
        self.epoch
    }
}

impl TimeSource<u64> for WallClock {
    fn current_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|now| now.checked_sub(self.epoch))
            .map_or(0, |elapsed| {
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
            })
    }
}

/// Blocks until `clock` reads later than `millis` and returns that reading.
///
/// A slot may only change hands once every millisecond its previous holder
/// could have stamped is over; releasers call this before giving a slot back.
pub fn wait_past_millis<T>(clock: &T, millis: u64) -> u64
where
    T: TimeSource<u64> + ?Sized,
{
    loop {
        let now = clock.current_millis();
        if now > millis {
            return now;
        }
        std::thread::sleep(Duration::from_micros(100));
    }
}
