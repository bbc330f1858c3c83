use crate::{
    Result, UniqueId,
    generator::{SlotClaim, SlotSource},
    id,
};

/// A generator-id slot fixed at construction.
///
/// This is the local-only provider: the slot never expires and closing it has
/// no effect. Uniqueness across processes is the deployer's responsibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FixedSlot {
    generator_id: u8,
}

impl FixedSlot {
    /// # Errors
    ///
    /// Returns [`Error::Range`](crate::Error::Range) if `generator_id` exceeds
    /// 63.
    pub fn new(generator_id: u8) -> Result<Self> {
        id::check_range(
            "generator_id",
            u64::from(generator_id),
            u64::from(UniqueId::max_generator_id()),
        )?;
        Ok(Self { generator_id })
    }
}

impl SlotClaim for FixedSlot {
    fn get(&self) -> Result<u8> {
        Ok(self.generator_id)
    }

    fn close(&self) {}
}

impl SlotSource for FixedSlot {
    type Claim = Self;

    fn claim(&self) -> Result<Self> {
        Ok(*self)
    }
}
