//! Compact, roughly time-ordered 64-bit identifiers.
//!
//! Every [`UniqueId`] packs a 41-bit millisecond timestamp, a 13-bit
//! intra-millisecond sequence, a 6-bit generator id and a 4-bit cluster id.
//! Processes holding distinct `(generator_id, cluster_id)` pairs never produce
//! the same identifier, so no shared sequence state is needed on the hot path.
//!
//! A [`Generator`] composes the codec with a [`SlotSource`] that decides where
//! its generator id comes from: a [`FixedSlot`] for local use, or a claim on a
//! shared pool (see the `slotflake-pool` crate).
#![cfg_attr(docsrs, feature(doc_cfg))]

mod error;
mod generator;
mod id;
mod registry;
mod time;

pub use crate::error::*;
pub use crate::generator::*;
pub use crate::id::{Blueprint, ID_SIZE, UniqueId, decode, encode};
pub use crate::registry::*;
pub use crate::time::*;
