use thiserror::Error;

/// Boxed error used to carry a lower-level cause (usually a coordination
/// service failure) inside an [`Error`].
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors that `slotflake` and the claim providers plugged into it can
/// produce.
///
/// Codec failures ([`Error::Range`], [`Error::Format`]) are caller bugs and are
/// never retried. [`Error::ClaimExpired`] is handled inside the generator by a
/// single re-claim; everything else is surfaced to the caller as-is.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A field value does not fit in its bit width.
    #[error("{field} {value} is out of range (max {max})")]
    Range {
        /// Name of the offending field.
        field: &'static str,
        /// Value that was supplied.
        value: u64,
        /// Largest representable value.
        max: u64,
    },

    /// Input to the decoder was not a well-formed identifier.
    #[error("identifier must be exactly {expected} bytes, got {actual}")]
    Format {
        /// Required length.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// The clock reported a time earlier than one already used for an ID.
    ///
    /// Issuing an ID here could collide with one already handed out, so the
    /// generator refuses until the clock catches up again.
    #[error("clock moved backwards: last timestamp {last}, now {now}")]
    ClockRegression {
        /// Last timestamp an identifier was issued for.
        last: u64,
        /// Timestamp the clock just reported.
        now: u64,
    },

    /// No generator-id slot could be claimed: the pool stayed full past the
    /// wait ceiling, or the coordination service is unreachable or
    /// misconfigured.
    #[error("generator-id claim unavailable: {reason}")]
    ClaimUnavailable {
        /// Human-readable description.
        reason: String,
        /// Lower-level cause, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The claim on a generator-id slot has lapsed and must be re-claimed.
    #[error("generator-id claim has expired")]
    ClaimExpired,

    /// A cluster id, pool size or similar setting is outside its valid range.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// ID generation failed after the automatic re-claim was exhausted.
    #[error("ID generation failed: {0}")]
    Generator(#[source] Box<Error>),
}

impl Error {
    /// Convenience constructor for [`Error::ClaimUnavailable`] without a
    /// source.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::ClaimUnavailable {
            reason: reason.into(),
            source: None,
        }
    }

    /// Convenience constructor for [`Error::ClaimUnavailable`] wrapping a
    /// lower-level cause.
    pub fn unavailable_from(
        reason: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::ClaimUnavailable {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }
}
