//! Single-writer store.
//!
//! One Tokio task owns the map and the expiration index. Callers send a
//! [`Request`] through a mailbox of capacity one and wait on a oneshot reply,
//! so the worker sees operations one at a time and no locking is needed. The
//! cost is that every caller queues behind every other caller.
//!
//! The worker waits on three things at once: the mailbox, a periodic tick that
//! sweeps expired keys, and the shutdown signal.

use crate::storage::{SetOptions, SetOutcome, Store, StoreError, StoreResult, SWEEP_INTERVAL};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Callers block on their reply, so one slot is enough.
const MAILBOX_CAPACITY: usize = 1;

/// A store operation plus the slot its result goes to.
#[derive(Debug)]
enum Request<V> {
    Get {
        key: Bytes,
        reply: oneshot::Sender<Option<V>>,
    },
    Set {
        key: Bytes,
        value: V,
        options: SetOptions,
        reply: oneshot::Sender<SetOutcome<V>>,
    },
    Del {
        key: Bytes,
        reply: oneshot::Sender<bool>,
    },
    /// Number of stored entries, expired ones included.
    Len { reply: oneshot::Sender<usize> },
}

/// State owned by the worker task.
#[derive(Debug)]
struct Worker<V> {
    data: HashMap<Bytes, V>,
    expirations: HashMap<Bytes, Instant>,
}

impl<V: Clone + std::fmt::Debug> Worker<V> {
    /// Empty state for a fresh worker.
    fn new() -> Self {
        Self {
            data: HashMap::new(),
            expirations: HashMap::new(),
        }
    }

    fn handle(&mut self, request: Request<V>) {
        let now = Instant::now();
        // A caller that gave up waiting has dropped its receiver; nothing to do.
        match request {
            Request::Get { key, reply } => {
                let _ = reply.send(self.get(&key, now));
            }
            Request::Set {
                key,
                value,
                options,
                reply,
            } => {
                let _ = reply.send(self.set(key, value, &options, now));
            }
            Request::Del { key, reply } => {
                let _ = reply.send(self.del(&key, now));
            }
            Request::Len { reply } => {
                let _ = reply.send(self.data.len());
            }
        }
    }

    /// Drops `key` if its deadline has passed. Returns whether it is live.
    fn evict_if_expired(&mut self, key: &Bytes, now: Instant) -> bool {
        match self.expirations.get(key) {
            Some(deadline) if now >= *deadline => {
                self.expirations.remove(key);
                self.data.remove(key);
                false
            }
            _ => self.data.contains_key(key),
        }
    }

    fn get(&mut self, key: &Bytes, now: Instant) -> Option<V> {
        if !self.evict_if_expired(key, now) {
            return None;
        }
        self.data.get(key).cloned()
    }

    fn set(&mut self, key: Bytes, value: V, options: &SetOptions, now: Instant) -> SetOutcome<V> {
        let live = self.evict_if_expired(&key, now);

        let previous = if options.get && live {
            self.data.get(&key).cloned()
        } else {
            None
        };

        if options.blocks(live) {
            return SetOutcome {
                previous,
                written: false,
            };
        }

        match options.deadline(now) {
            Some(deadline) => {
                self.expirations.insert(key.clone(), deadline);
            }
            None => {
                self.expirations.remove(&key);
            }
        }
        self.data.insert(key, value);

        SetOutcome {
            previous,
            written: true,
        }
    }

    fn del(&mut self, key: &Bytes, now: Instant) -> bool {
        let live = self.evict_if_expired(key, now);
        self.expirations.remove(key);
        self.data.remove(key);
        live
    }

    /// Removes every key past its deadline.
    fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<Bytes> = self
            .expirations
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.expirations.remove(key);
            self.data.remove(key);
        }
        expired.len()
    }

    async fn run(
        mut self,
        mut mailbox: mpsc::Receiver<Request<V>>,
        mut shutdown_rx: watch::Receiver<bool>,
        tick: Duration,
    ) {
        let mut ticker = tokio::time::interval(tick);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        debug!("Event loop received shutdown signal");
                        break;
                    }
                }
                request = mailbox.recv() => match request {
                    Some(request) => {
                        trace!(?request, "Event loop request");
                        self.handle(request);
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    let expired = self.sweep(Instant::now());
                    if expired > 0 {
                        debug!(expired, remaining = self.data.len(), "Expired keys cleaned up");
                    }
                }
            }
        }

        mailbox.close();
        info!(keys = self.data.len(), "Event loop stopped");
    }
}

/// [`Store`] that funnels every operation through one worker task.
///
/// Must be created inside a Tokio runtime. After [`Store::shutdown`] every
/// call fails with [`StoreError::Closed`].
#[derive(Debug)]
pub struct EventLoopStore<V> {
    mailbox: mpsc::Sender<Request<V>>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<V> EventLoopStore<V>
where
    V: Clone + Send + std::fmt::Debug + 'static,
{
    /// Starts the worker with the default one-second sweep tick.
    pub fn new() -> Self {
        Self::with_tick(SWEEP_INTERVAL)
    }

    /// Starts the worker with a custom sweep tick.
    pub fn with_tick(tick: Duration) -> Self {
        let (mailbox, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(Worker::new().run(rx, shutdown_rx, tick));
        info!(tick_ms = tick.as_millis() as u64, "Event loop started");

        Self {
            mailbox,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Number of entries the worker holds, expired ones included until a
    /// sweep or an access removes them.
    pub async fn len(&self) -> StoreResult<usize> {
        self.call(|reply| Request::Len { reply }).await
    }

    /// Whether the worker holds no entries at all.
    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Sends a request and waits for the worker's answer.
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request<V>,
    ) -> StoreResult<T> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(make(reply))
            .await
            .map_err(|_| StoreError::Closed)?;
        response.await.map_err(|_| StoreError::Closed)
    }
}

impl<V> Default for EventLoopStore<V>
where
    V: Clone + Send + std::fmt::Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> Store<V> for EventLoopStore<V>
where
    V: Clone + Send + std::fmt::Debug + 'static,
{
    async fn get(&self, key: &Bytes) -> StoreResult<Option<V>> {
        let key = key.clone();
        self.call(|reply| Request::Get { key, reply }).await
    }

    async fn set(&self, key: Bytes, value: V, options: SetOptions) -> StoreResult<SetOutcome<V>> {
        self.call(|reply| Request::Set {
            key,
            value,
            options,
            reply,
        })
        .await
    }

    async fn del(&self, key: &Bytes) -> StoreResult<bool> {
        let key = key.clone();
        self.call(|reply| Request::Del { key, reply }).await
    }

    async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Event loop task failed");
            }
        }
    }
}
