//! Lock-striped concurrent map with TTL support.
//!
//! Keys are spread over [`NUM_SHARDS`] shards by hash. Each shard is an
//! `RwLock<HashMap>`, so readers of one shard run in parallel and writers only
//! contend with traffic on the same shard.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A poisoned shard lock is taken over rather than propagated: every write
//! leaves the map in a consistent state before anything that could panic.

use crate::storage::{
    ExpiryConfig, ExpirySweeper, SetOptions, SetOutcome, Store, StoreResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::debug;

/// Number of shards.
const NUM_SHARDS: usize = 64;

/// A stored value and its optional deadline.
#[derive(Debug, Clone)]
pub struct Entry<V> {
    /// The stored value, returned as-is by reads.
    pub value: V,
    /// None means the entry never expires.
    pub expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    /// Wraps a value with an optional absolute deadline.
    pub fn new(value: V, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    /// Whether the deadline has been reached at `now`. The deadline itself
    /// already counts as expired.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// [`Entry::is_expired_at`] against the current time.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

#[derive(Debug)]
struct Shard<V> {
    data: RwLock<HashMap<Bytes, Entry<V>>>,
}

impl<V> Shard<V> {
    /// An empty shard.
    fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, Entry<V>>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, Entry<V>>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The sharded map. Synchronous; wrap it in an `Arc` to share it.
///
/// # Example
///
/// ```
/// use tidekv::storage::{SetOptions, StorageEngine};
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
/// let outcome = engine.set(Bytes::from("name"), "tide", &SetOptions::default());
/// assert!(outcome.written);
/// assert_eq!(engine.get(&Bytes::from("name")), Some("tide"));
/// ```
pub struct StorageEngine<V> {
    shards: Vec<Shard<V>>,
}

impl<V> std::fmt::Debug for StorageEngine<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl<V: Clone> Default for StorageEngine<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> StorageEngine<V> {
    /// Creates an empty map with all shards allocated up front.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::new()).collect();
        Self { shards }
    }

    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard<V> {
        &self.shards[self.shard_index(key)]
    }

    /// Returns the live value for `key`.
    ///
    /// Takes the read lock first; only an expired hit upgrades to the write
    /// lock to evict the entry.
    pub fn get(&self, key: &Bytes) -> Option<V> {
        let shard = self.shard(key);

        {
            let data = shard.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut data = shard.write();
        let now = Instant::now();
        match data.get(key) {
            Some(entry) if entry.is_expired_at(now) => {
                data.remove(key);
                None
            }
            // Rewritten between the two locks.
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Conditionally writes `value` under `key`.
    ///
    /// Liveness, the NX/XX decision and the replacement all happen under the
    /// shard's write lock, so no other writer can slip in between.
    pub fn set(&self, key: Bytes, value: V, options: &SetOptions) -> SetOutcome<V> {
        let mut data = self.shard(&key).write();
        let now = Instant::now();

        let live = match data.get(&key) {
            Some(entry) if entry.is_expired_at(now) => {
                data.remove(&key);
                false
            }
            Some(_) => true,
            None => false,
        };

        let previous = if options.get && live {
            data.get(&key).map(|entry| entry.value.clone())
        } else {
            None
        };

        if options.blocks(live) {
            return SetOutcome {
                previous,
                written: false,
            };
        }

        data.insert(key, Entry::new(value, options.deadline(now)));
        SetOutcome {
            previous,
            written: true,
        }
    }

    /// Removes `key`. Returns true if it was present and not expired.
    pub fn delete(&self, key: &Bytes) -> bool {
        let mut data = self.shard(key).write();
        match data.remove(key) {
            Some(entry) => !entry.is_expired(),
            None => false,
        }
    }

    /// Drops every expired entry. Returns how many were removed.
    ///
    /// Shards are locked one at a time, so client traffic on other shards
    /// keeps flowing during a sweep.
    pub fn cleanup_expired(&self) -> u64 {
        let now = Instant::now();
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut data = shard.write();
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired_at(now));
            cleaned += (before - data.len()) as u64;
        }

        cleaned
    }

    /// Number of physically stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// True if no shard holds any entry, expired or not.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }
}

/// [`Store`] backed by a [`StorageEngine`] and an [`ExpirySweeper`].
///
/// Must be created inside a Tokio runtime, since the sweeper is a spawned task.
#[derive(Debug)]
pub struct ConcurrentStore<V> {
    engine: Arc<StorageEngine<V>>,
    sweeper: ExpirySweeper,
}

impl<V> ConcurrentStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates the store with the default one-second sweep.
    pub fn new() -> Self {
        Self::with_config(ExpiryConfig::default())
    }

    /// Creates the store with a custom sweep interval, mainly for tests
    /// that cannot wait a full second.
    pub fn with_config(config: ExpiryConfig) -> Self {
        let engine = Arc::new(StorageEngine::new());
        let sweeper = ExpirySweeper::start(Arc::clone(&engine), config);
        Self { engine, sweeper }
    }

    /// The underlying map, mostly for inspection in tests.
    pub fn engine(&self) -> &Arc<StorageEngine<V>> {
        &self.engine
    }
}

impl<V> Default for ConcurrentStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> Store<V> for ConcurrentStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &Bytes) -> StoreResult<Option<V>> {
        Ok(self.engine.get(key))
    }

    async fn set(&self, key: Bytes, value: V, options: SetOptions) -> StoreResult<SetOutcome<V>> {
        Ok(self.engine.set(key, value, &options))
    }

    async fn del(&self, key: &Bytes) -> StoreResult<bool> {
        Ok(self.engine.delete(key))
    }

    async fn shutdown(&self) {
        debug!("Shutting down concurrent store");
        self.sweeper.stop();
    }
}
