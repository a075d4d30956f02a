//! Background expiry sweeper.
//!
//! Lazy expiry alone never reclaims a key that is not read again. The sweeper
//! is a Tokio task that wakes on a fixed interval and removes every expired
//! entry from the engine. It races freely with client traffic; a client never
//! sees an expired value either way, because reads check the deadline too.

use crate::storage::{StorageEngine, SWEEP_INTERVAL};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Settings for the background sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Time between sweeps (default: 1s)
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: SWEEP_INTERVAL,
        }
    }
}

/// Handle to a running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current Tokio runtime.
    pub fn start<V>(engine: Arc<StorageEngine<V>>, config: ExpiryConfig) -> Self
    where
        V: Clone + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(engine, config.interval, shutdown_rx));

        info!(interval_ms = config.interval.as_millis() as u64, "Expiry sweeper started");

        Self { shutdown_tx }
    }

    /// Signals the task to exit. Only the first call has any effect.
    pub fn stop(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Expiry sweeper stopped");
        }
    }

    /// Whether [`ExpirySweeper::stop`] has been called or the handle dropped.
    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop<V>(
    engine: Arc<StorageEngine<V>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    V: Clone + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
            _ = ticker.tick() => {}
        }

        let expired = engine.cleanup_expired();
        if expired > 0 {
            debug!(expired, "Expired keys cleaned up");
        } else {
            trace!("Expiry sweep found nothing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SetOptions;
    use bytes::Bytes;

    fn fast() -> ExpiryConfig {
        ExpiryConfig {
            interval: Duration::from_millis(10),
        }
    }

    fn short_ttl(ms: u64) -> SetOptions {
        SetOptions {
            expire: Some(Duration::from_millis(ms)),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_interval_is_one_second() {
        assert_eq!(ExpiryConfig::default().interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_sweeper_cleans_expired_keys() {
        let engine = Arc::new(StorageEngine::new());

        for i in 0..10 {
            engine.set(Bytes::from(format!("key{}", i)), "value", &short_ttl(50));
        }
        engine.set(Bytes::from("persistent"), "value", &SetOptions::default());
        assert_eq!(engine.len(), 11);

        let _sweeper = ExpirySweeper::start(Arc::clone(&engine), fast());

        tokio::time::sleep(Duration::from_millis(200)).await;

        // Counted without reading, so only the sweeper could have removed them.
        assert_eq!(engine.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let engine = Arc::new(StorageEngine::new());

        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&engine), fast());
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        engine.set(Bytes::from("key"), "value", &short_ttl(10));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(engine.len(), 1);
        // Lazy expiry still applies.
        assert!(engine.get(&Bytes::from("key")).is_none());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let engine: Arc<StorageEngine<&str>> = Arc::new(StorageEngine::new());
        let sweeper = ExpirySweeper::start(engine, fast());
        assert!(!sweeper.is_stopped());
        sweeper.stop();
        sweeper.stop();
        assert!(sweeper.is_stopped());
    }
}
