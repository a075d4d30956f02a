//! Key-value store with per-key expiration.
//!
//! Two strategies implement the same [`Store`] contract:
//!
//! ```text
//!  ConcurrentStore                         EventLoopStore
//!  ┌───────────────────────────────┐       ┌──────────────┐   mpsc(1)   ┌──────────────┐
//!  │ StorageEngine                 │       │ caller task  │ ──────────> │ worker task  │
//!  │ ┌────────┐ ┌────────┐ ┌─────┐ │       │              │ <────────── │ owns the map │
//!  │ │Shard 0 │ │Shard 1 │ │ ... │ │       └──────────────┘   oneshot   └──────────────┘
//!  │ │RwLock  │ │RwLock  │ │ 64  │ │                                     1s tick sweep
//!  │ └────────┘ └────────┘ └─────┘ │
//!  └───────────────▲───────────────┘
//!                  │ 1s sweep
//!            ExpirySweeper
//! ```
//!
//! The sharded map lets operations on different keys run in parallel and
//! serializes operations on one key through its shard lock. The event loop
//! owns all state on a single task, so every operation is totally ordered.
//!
//! Both strategies drop expired entries lazily when they are touched and
//! periodically in the background, so a key that is never read again is
//! still reclaimed.

pub mod engine;
pub mod event_loop;
pub mod expiry;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::{Duration, Instant};
use thiserror::Error;

pub use engine::{ConcurrentStore, Entry, StorageEngine};
pub use event_loop::EventLoopStore;
pub use expiry::{ExpiryConfig, ExpirySweeper};

/// Interval between background expiration sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Failures of a store operation, as opposed to a negative answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store's worker has stopped; no further requests are served.
    #[error("store is closed")]
    Closed,
}

/// Result type for [`Store`] operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Modifiers for a single write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Time to live, counted from the moment the store applies the write.
    pub expire: Option<Duration>,
    /// Only write if the key is not live.
    pub nx: bool,
    /// Only write if the key is live.
    pub xx: bool,
    /// Report the previous live value.
    pub get: bool,
}

impl SetOptions {
    /// Absolute deadline for an entry written at `now`.
    ///
    /// A TTL too large for the platform clock yields no deadline, so the
    /// entry never expires.
    pub fn deadline(&self, now: Instant) -> Option<Instant> {
        self.expire.and_then(|ttl| now.checked_add(ttl))
    }

    /// Whether NX or XX forbids the write given the key's liveness.
    pub fn blocks(&self, live: bool) -> bool {
        (self.nx && live) || (self.xx && !live)
    }
}

/// Result of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome<V> {
    /// The value that was live before the write. Only filled in when
    /// [`SetOptions::get`] was requested, whether or not the write happened.
    pub previous: Option<V>,
    /// False exactly when NX or XX prevented the write.
    pub written: bool,
}

/// Key-value operations shared by every store strategy.
///
/// Operations on the same key are linearizable. Expired entries are never
/// returned and count as absent for NX and XX.
#[async_trait]
pub trait Store<V: Send + 'static>: Send + Sync {
    /// Returns the live value for `key`, evicting it if it has expired.
    async fn get(&self, key: &Bytes) -> StoreResult<Option<V>>;

    /// Writes `value` under `key` subject to `options`.
    async fn set(&self, key: Bytes, value: V, options: SetOptions)
        -> StoreResult<SetOutcome<V>>;

    /// Removes `key`. Returns true only if the key was live.
    async fn del(&self, key: &Bytes) -> StoreResult<bool>;

    /// Stops background work. Calling it more than once is harmless.
    async fn shutdown(&self);
}
