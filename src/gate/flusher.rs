//! gate::flusher
//!
//! Periodic flush for persistent-open mode.
//!
//! When the store stays open for the whole process lifetime, writes sit in
//! the in-memory index until something persists them. The idle flusher
//! persists them on a fixed interval so external readers of `index.json`
//! see current state without repogate ever giving up the lock.
//!
//! # Invariants
//!
//! - A failed flush is logged and retried on the next tick; it never stops
//!   the loop
//! - The loop runs until [`IdleFlusher::stop`] is called or the flusher is dropped

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::store::OpenStore;

/// The store handle shared between the persistent holder and the flusher.
pub type SharedHandle = Arc<Mutex<Option<Box<dyn OpenStore>>>>;

/// Background flush task.
#[derive(Debug)]
pub struct IdleFlusher {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl IdleFlusher {
    /// Start flushing `handle` every `interval`.
    ///
    /// The first flush happens one full interval after start.
    pub fn spawn(handle: SharedHandle, interval: Duration) -> Self {
        let (shutdown, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            info!(?interval, "idle flusher started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let handle = Arc::clone(&handle);
                        match tokio::task::spawn_blocking(move || flush_once(&handle)).await {
                            Ok(()) => {}
                            Err(e) => warn!(error = %e, "flush task panicked"),
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
            debug!("idle flusher stopped");
        });

        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Stop the loop and wait for an in-flight flush to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for IdleFlusher {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

fn flush_once(handle: &Mutex<Option<Box<dyn OpenStore>>>) {
    let mut guard = handle.lock();
    let Some(store) = guard.as_mut() else {
        return;
    };
    if let Err(e) = store.flush() {
        warn!(error = %e, "periodic flush failed; retrying next tick");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::MockStoreOpener;
    use crate::store::StoreOpener;

    fn shared(mock: &MockStoreOpener) -> SharedHandle {
        Arc::new(Mutex::new(Some(mock.open().unwrap())))
    }

    #[tokio::test]
    async fn flushes_on_each_tick() {
        let mock = MockStoreOpener::new();
        let flusher = IdleFlusher::spawn(shared(&mock), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(150)).await;
        flusher.stop().await;

        let flushes = mock.stats().flushes;
        assert!(flushes >= 3, "expected at least 3 flushes, got {flushes}");
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_loop() {
        let mock = MockStoreOpener::new();
        mock.fail_next_flushes(2);
        let flusher = IdleFlusher::spawn(shared(&mock), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(200)).await;
        flusher.stop().await;

        let stats = mock.stats();
        assert_eq!(stats.failed_flushes, 2);
        assert!(stats.flushes >= 1);
    }

    #[tokio::test]
    async fn stop_halts_ticks() {
        let mock = MockStoreOpener::new();
        let flusher = IdleFlusher::spawn(shared(&mock), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        flusher.stop().await;

        let after_stop = mock.stats().flushes;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mock.stats().flushes, after_stop);
    }

    #[tokio::test]
    async fn skips_when_handle_taken() {
        let mock = MockStoreOpener::new();
        let handle = shared(&mock);
        handle.lock().take();

        let flusher = IdleFlusher::spawn(Arc::clone(&handle), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        flusher.stop().await;

        assert_eq!(mock.stats().flushes, 0);
    }
}
