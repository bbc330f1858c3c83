use crate::{Error, Result};
use core::fmt;

/// Number of bytes in an encoded identifier.
pub const ID_SIZE: usize = 8;

/// A 64-bit identifier packing a timestamp, an intra-millisecond sequence, the
/// claimed generator slot and a static cluster number.
///
/// - 41 bits timestamp (ms since the generator's epoch)
/// - 13 bits sequence
/// - 6 bits generator ID (claimed pool slot)
/// - 4 bits cluster ID
///
/// ```text
///  Bit Index:  63             23 22            10 9                4 3              0
///              +----------------+----------------+------------------+----------------+
///  Field:      | timestamp (41) | sequence (13)  | generator ID (6) | cluster ID (4) |
///              +----------------+----------------+------------------+----------------+
///              |<----------- MSB ------------ 64 bits ------------- LSB ------------>|
/// ```
///
/// The wire form is the big-endian encoding of the raw value, so comparing
/// two [`UniqueId`]s, their raw `u64`s, or their byte arrays all agree.
///
/// # Example
///
/// ```
/// use slotflake::UniqueId;
///
/// let id = UniqueId::from_components(1000, 0, 1, 4).unwrap();
/// assert_eq!(id.timestamp(), 1000);
/// assert_eq!(id.generator_id(), 1);
/// assert_eq!(id.cluster_id(), 4);
/// assert_eq!(id.to_bytes().len(), 8);
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UniqueId {
    id: u64,
}

impl UniqueId {
    /// Width of the timestamp field.
    pub const TIMESTAMP_BITS: u32 = 41;

    /// Width of the sequence field.
    pub const SEQUENCE_BITS: u32 = 13;

    /// Width of the generator ID field.
    pub const GENERATOR_ID_BITS: u32 = 6;

    /// Width of the cluster ID field.
    pub const CLUSTER_ID_BITS: u32 = 4;

    /// Bitmask for the 41-bit timestamp field. Occupies bits 23 through 63.
    pub const TIMESTAMP_MASK: u64 = (1 << Self::TIMESTAMP_BITS) - 1;

    /// Bitmask for the 13-bit sequence field. Occupies bits 10 through 22.
    pub const SEQUENCE_MASK: u64 = (1 << Self::SEQUENCE_BITS) - 1;

    /// Bitmask for the 6-bit generator ID field. Occupies bits 4 through 9.
    pub const GENERATOR_ID_MASK: u64 = (1 << Self::GENERATOR_ID_BITS) - 1;

    /// Bitmask for the 4-bit cluster ID field. Occupies bits 0 through 3.
    pub const CLUSTER_ID_MASK: u64 = (1 << Self::CLUSTER_ID_BITS) - 1;

    /// Number of bits to shift the timestamp to its position (bit 23).
    pub const TIMESTAMP_SHIFT: u32 =
        Self::SEQUENCE_BITS + Self::GENERATOR_ID_BITS + Self::CLUSTER_ID_BITS;

    /// Number of bits to shift the sequence to its position (bit 10).
    pub const SEQUENCE_SHIFT: u32 = Self::GENERATOR_ID_BITS + Self::CLUSTER_ID_BITS;

    /// Number of bits to shift the generator ID to its position (bit 4).
    pub const GENERATOR_ID_SHIFT: u32 = Self::CLUSTER_ID_BITS;

    /// The cluster ID sits in the lowest bits.
    pub const CLUSTER_ID_SHIFT: u32 = 0;

    /// Packs already-validated fields. Out-of-range bits are masked off.
    pub const fn from(timestamp: u64, sequence: u64, generator_id: u64, cluster_id: u64) -> Self {
        let timestamp = (timestamp & Self::TIMESTAMP_MASK) << Self::TIMESTAMP_SHIFT;
        let sequence = (sequence & Self::SEQUENCE_MASK) << Self::SEQUENCE_SHIFT;
        let generator_id = (generator_id & Self::GENERATOR_ID_MASK) << Self::GENERATOR_ID_SHIFT;
        let cluster_id = (cluster_id & Self::CLUSTER_ID_MASK) << Self::CLUSTER_ID_SHIFT;
        Self {
            id: timestamp | sequence | generator_id | cluster_id,
        }
    }

    /// Packs the four fields, rejecting any value that does not fit its bit
    /// width.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] naming the first offending field.
    pub fn from_components(
        timestamp: u64,
        sequence: u64,
        generator_id: u64,
        cluster_id: u64,
    ) -> Result<Self> {
        check_range("timestamp", timestamp, Self::TIMESTAMP_MASK)?;
        check_range("sequence", sequence, Self::SEQUENCE_MASK)?;
        check_range("generator_id", generator_id, Self::GENERATOR_ID_MASK)?;
        check_range("cluster_id", cluster_id, Self::CLUSTER_ID_MASK)?;
        Ok(Self::from(timestamp, sequence, generator_id, cluster_id))
    }

    /// Extracts the timestamp from the packed ID.
    pub const fn timestamp(&self) -> u64 {
        (self.id >> Self::TIMESTAMP_SHIFT) & Self::TIMESTAMP_MASK
    }

    /// Extracts the sequence number from the packed ID.
    pub const fn sequence(&self) -> u64 {
        (self.id >> Self::SEQUENCE_SHIFT) & Self::SEQUENCE_MASK
    }

    /// Extracts the generator ID from the packed ID.
    pub const fn generator_id(&self) -> u8 {
        ((self.id >> Self::GENERATOR_ID_SHIFT) & Self::GENERATOR_ID_MASK) as u8
    }

    /// Extracts the cluster ID from the packed ID.
    pub const fn cluster_id(&self) -> u8 {
        ((self.id >> Self::CLUSTER_ID_SHIFT) & Self::CLUSTER_ID_MASK) as u8
    }

    pub const fn max_timestamp() -> u64 {
        Self::TIMESTAMP_MASK
    }

    pub const fn max_sequence() -> u64 {
        Self::SEQUENCE_MASK
    }

    pub const fn max_generator_id() -> u8 {
        Self::GENERATOR_ID_MASK as u8
    }

    pub const fn max_cluster_id() -> u8 {
        Self::CLUSTER_ID_MASK as u8
    }

    pub const fn to_raw(&self) -> u64 {
        self.id
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self { id: raw }
    }

    /// Returns the big-endian wire form.
    pub const fn to_bytes(&self) -> [u8; ID_SIZE] {
        self.id.to_be_bytes()
    }

    /// Parses the big-endian wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if `bytes` is not exactly [`ID_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; ID_SIZE] = bytes.try_into().map_err(|_| Error::Format {
            expected: ID_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self::from_raw(u64::from_be_bytes(raw)))
    }

    /// Returns the decoded field tuple.
    pub const fn blueprint(&self) -> Blueprint {
        Blueprint {
            timestamp: self.timestamp(),
            sequence: self.sequence(),
            generator_id: self.generator_id(),
            cluster_id: self.cluster_id(),
        }
    }

    /// Returns the ID as a zero-padded 20-digit string.
    pub fn to_padded_string(&self) -> String {
        format!("{:020}", self.id)
    }
}

const _: () = assert!(
    UniqueId::TIMESTAMP_BITS
        + UniqueId::SEQUENCE_BITS
        + UniqueId::GENERATOR_ID_BITS
        + UniqueId::CLUSTER_ID_BITS
        == u64::BITS
);

/// Decoded form of an identifier.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Blueprint {
    pub timestamp: u64,
    pub sequence: u64,
    pub generator_id: u8,
    pub cluster_id: u8,
}

impl Blueprint {
    /// Re-packs this blueprint into an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if any field exceeds its bit width.
    pub fn to_id(&self) -> Result<UniqueId> {
        UniqueId::from_components(
            self.timestamp,
            self.sequence,
            u64::from(self.generator_id),
            u64::from(self.cluster_id),
        )
    }
}

/// Encodes the four fields into the 8-byte wire form.
///
/// # Errors
///
/// Returns [`Error::Range`] if the timestamp needs more than 41 bits, the
/// sequence exceeds 8191, the generator ID exceeds 63 or the cluster ID
/// exceeds 15.
///
/// # Example
///
/// ```
/// use slotflake::{Blueprint, decode, encode};
///
/// let bytes = encode(1000, 0, 1, 4).unwrap();
/// assert_eq!(bytes.len(), 8);
/// assert_eq!(
///     decode(&bytes).unwrap(),
///     Blueprint { timestamp: 1000, sequence: 0, generator_id: 1, cluster_id: 4 }
/// );
/// ```
pub fn encode(
    timestamp: u64,
    sequence: u64,
    generator_id: u8,
    cluster_id: u8,
) -> Result<[u8; ID_SIZE]> {
    UniqueId::from_components(
        timestamp,
        sequence,
        u64::from(generator_id),
        u64::from(cluster_id),
    )
    .map(|id| id.to_bytes())
}

/// Decodes the 8-byte wire form.
///
/// # Errors
///
/// Returns [`Error::Format`] if `bytes` is not exactly 8 bytes long.
pub fn decode(bytes: &[u8]) -> Result<Blueprint> {
    UniqueId::from_bytes(bytes).map(|id| id.blueprint())
}

pub(crate) fn check_range(field: &'static str, value: u64, max: u64) -> Result<()> {
    if value > max {
        return Err(Error::Range { field, value, max });
    }
    Ok(())
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_padded_string())
    }
}

impl fmt::Debug for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_bit_layout_debug(f, self)
    }
}

impl From<UniqueId> for u64 {
    fn from(id: UniqueId) -> Self {
        id.to_raw()
    }
}

impl From<UniqueId> for [u8; ID_SIZE] {
    fn from(id: UniqueId) -> Self {
        id.to_bytes()
    }
}

impl TryFrom<&[u8]> for UniqueId {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes(bytes)
    }
}

/// One line per field, with the raw value in hex and the bits grouped by
/// field, most significant first.
fn write_bit_layout_debug(f: &mut fmt::Formatter<'_>, id: &UniqueId) -> fmt::Result {
    let bits = format!(
        "{:0ts$b}_{:0seq$b}_{:0generator$b}_{:0cluster$b}",
        id.timestamp(),
        id.sequence(),
        id.generator_id(),
        id.cluster_id(),
        ts = UniqueId::TIMESTAMP_BITS as usize,
        seq = UniqueId::SEQUENCE_BITS as usize,
        generator = UniqueId::GENERATOR_ID_BITS as usize,
        cluster = UniqueId::CLUSTER_ID_BITS as usize,
    );
    f.debug_struct("UniqueId")
        .field("raw", &format_args!("{:#018x}", id.to_raw()))
        .field("timestamp", &id.timestamp())
        .field("sequence", &id.sequence())
        .field("generator_id", &id.generator_id())
        .field("cluster_id", &id.cluster_id())
        .field("bits", &format_args!("{bits}"))
        .finish()
}
