use crate::Result;

/// A held claim on one generator-id slot.
///
/// Implementations decide how long the slot stays valid: a fixed local slot
/// never lapses, while a slot claimed from a shared pool expires after a
/// timeout or when the coordination session is lost.
pub trait SlotClaim: Send + Sync {
    /// Returns the claimed slot number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClaimExpired`](crate::Error::ClaimExpired) once the
    /// claim is no longer valid. Callers re-claim through the owning
    /// [`SlotSource`].
    fn get(&self) -> Result<u8>;

    /// Gives the slot back. Calling this more than once is a no-op.
    fn close(&self);
}

/// Something that can hand out [`SlotClaim`]s.
///
/// The generator calls [`SlotSource::claim`] once at construction and again
/// whenever the current claim reports expiry.
pub trait SlotSource: Send + Sync {
    /// The claim type produced by this source.
    type Claim: SlotClaim;

    /// Obtains a fresh claim, blocking until one is available or the source
    /// gives up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClaimUnavailable`](crate::Error::ClaimUnavailable) when
    /// no slot can be obtained.
    fn claim(&self) -> Result<Self::Claim>;
}
