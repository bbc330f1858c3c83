//! # slotflake-pool
//!
//! Pool-backed generator ids for [`slotflake`].
//!
//! Every process that wants to mint identifiers claims one of a fixed number of
//! generator-id slots through a shared hierarchical coordination service. The
//! claim is a FIFO queue of ephemeral tickets plus one ephemeral binding node
//! per slot, so a crashed process gives its slot back when its session ends.
//!
//! ```text
//! {pool}/cluster-id         "4"
//! {pool}/queue/ticket-0000000007
//! {pool}/queue/ticket-0000000009
//! {pool}/pool/0             "ticket-0000000007"
//! {pool}/pool/1             "ticket-0000000009"
//! ```
//!
//! - [`ResourceClaim`]: the blocking queue-and-bind protocol.
//! - [`ExpiringClaim`]: a claim that lapses after a timeout or on disconnect.
//! - [`SynchronizedGenerators`]: one shared [`SynchronizedGenerator`] per
//!   `(endpoint, pool path)`, re-claiming automatically when its slot lapses.
//! - [`MemoryEnsemble`]: an in-process [`Coordinator`] for tests and
//!   single-process deployments.
//!
//! ## Example
//!
//! ```
//! use slotflake_pool::{MemoryEnsemble, PoolConfig, SynchronizedGenerators, provision};
//!
//! let ensemble = MemoryEnsemble::new();
//! provision(&ensemble.session(), "/ids", 2).unwrap();
//!
//! let generators = SynchronizedGenerators::new(ensemble, PoolConfig::default()).unwrap();
//! let generator = generators.generator("local", "/ids").unwrap();
//! let ids = generator.batch(100).unwrap();
//! assert!(ids.windows(2).all(|w| w[0] < w[1]));
//! ```

mod claim;
mod cluster;
mod config;
mod coordinator;
mod error;
mod expiring;
mod memory;
mod synchronized;

pub use crate::{
    claim::{POOL_NODE, QUEUE_NODE, ResourceClaim},
    cluster::{CLUSTER_ID_NODE, cluster_id, provision},
    config::{DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_CLAIM_TIMEOUT, DEFAULT_POOL_SIZE, PoolConfig},
    coordinator::{
        ConnectionObserver, Connector, Coordinator, CreateMode, WatchEvent, WatchKind, Watcher,
        delete_if_exists, ensure_path, join_path, split_path, validate_path,
    },
    error::{CoordinationError, CoordinationResult},
    expiring::{ExpiringClaim, Liveness},
    memory::{MemoryEnsemble, MemorySession},
    synchronized::{PoolSlots, SynchronizedGenerator, SynchronizedGenerators},
};
