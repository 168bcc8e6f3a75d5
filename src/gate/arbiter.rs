//! gate::arbiter
//!
//! Reference-counted open/close controller for the store.
//!
//! # Architecture
//!
//! A single worker thread owns the [`ArbiterState`] and consumes a queue of
//! [`LockRequest`]s. Every open and close of the store happens on that
//! thread, so store transitions are totally ordered no matter how many
//! requests race. Callers are async: they enqueue a request and await a
//! oneshot reply.
//!
//! ```text
//!   request tasks ──► mpsc queue ──► worker thread ──► StoreOpener / OpenStore
//!        ▲                                │
//!        └──────── oneshot replies ◄──────┘
//! ```
//!
//! # State Machine
//!
//! ```text
//! Closed  --Acquire ok-->    Open(1)
//! Closed  --Acquire err-->   Closed      (StoreOpenFailed)
//! Open(n) --Acquire-->       Open(n+1)
//! Open(n) --Release-->       Open(n-1)   (n > 1)
//! Open(1) --Release-->       Closed      (close attempted; state cleared either way)
//! Closed  --Release-->       Closed      (RefCountUnderflow, logged)
//! ```
//!
//! # Invariants
//!
//! - `ref_count == outstanding tokens`, and the handle is present iff
//!   `ref_count > 0`, between any two processed requests
//! - The worker never calls into handler code; it blocks only on the
//!   store's own open and close
//! - An acquire whose caller stopped waiting is released by the worker
//!   itself, so abandoned requests never leak a count

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::lease::Lease;
use crate::store::{OpenStore, StoreError, StoreOpener};

/// Errors from arbitration.
#[derive(Debug, Error)]
pub enum ArbiterError {
    /// Opening the store failed; nothing was acquired.
    #[error("failed to open store: {0}")]
    StoreOpenFailed(#[source] StoreError),

    /// Closing the store failed; the arbiter still considers it closed.
    #[error("failed to close store: {0}")]
    StoreCloseFailed(#[source] StoreError),

    /// Release with the reference count already at zero.
    #[error("release without a matching acquire: reference count is already zero")]
    RefCountUnderflow,

    /// Release of a token the arbiter never issued or already released.
    #[error("release of unknown token #{0}")]
    UnknownToken(u64),

    /// The caller gave up waiting for the arbiter.
    #[error("timed out after {0:?} waiting for store access")]
    AcquireTimeout(Duration),

    /// The worker has shut down.
    #[error("store arbiter has stopped")]
    Stopped,
}

impl ArbiterError {
    /// Whether this error reveals a caller bug rather than an environmental failure.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::RefCountUnderflow | Self::UnknownToken(_))
    }
}

/// Proof of a successful acquire.
///
/// Not `Clone`: releasing consumes it, so one acquire pairs with at most one
/// release.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an acquired token must be released"]
pub struct Token {
    id: u64,
}

impl Token {
    /// Token serial number, for logging.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// One arbitration call.
#[derive(Debug)]
pub enum LockRequest {
    Acquire {
        reply: oneshot::Sender<Result<Token, ArbiterError>>,
    },
    /// `reply` is `None` for fire-and-forget releases from dropped leases.
    Release {
        token: Token,
        reply: Option<oneshot::Sender<Result<(), ArbiterError>>>,
    },
    Status {
        reply: oneshot::Sender<ArbiterStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Observable arbiter state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArbiterStatus {
    /// Active holders.
    pub ref_count: usize,
    /// Whether the store handle is present.
    pub open: bool,
    /// Set when the last close failed; cleared by the next clean close.
    pub degraded: bool,
    /// Successful opens since start.
    pub opens: u64,
    /// Close attempts since start.
    pub closes: u64,
}

/// The arbiter's private state.
///
/// Only the worker thread mutates this. It is public so the state machine
/// can be driven synchronously in tests.
pub struct ArbiterState {
    opener: Arc<dyn StoreOpener>,
    ref_count: usize,
    handle: Option<Box<dyn OpenStore>>,
    outstanding: HashSet<u64>,
    next_token: u64,
    degraded: bool,
    opens: u64,
    closes: u64,
}

impl std::fmt::Debug for ArbiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArbiterState")
            .field("ref_count", &self.ref_count)
            .field("open", &self.handle.is_some())
            .field("degraded", &self.degraded)
            .finish()
    }
}

impl ArbiterState {
    /// Start in `Closed`.
    pub fn new(opener: Arc<dyn StoreOpener>) -> Self {
        Self {
            opener,
            ref_count: 0,
            handle: None,
            outstanding: HashSet::new(),
            next_token: 1,
            degraded: false,
            opens: 0,
            closes: 0,
        }
    }

    /// Take a reference, opening the store on the first one.
    pub fn acquire(&mut self) -> Result<Token, ArbiterError> {
        if self.ref_count == 0 {
            let handle = self.opener.open().map_err(ArbiterError::StoreOpenFailed)?;
            self.handle = Some(handle);
            self.opens += 1;
            info!("store opened by arbiter");
        }

        self.ref_count += 1;
        let id = self.next_token;
        self.next_token += 1;
        self.outstanding.insert(id);
        debug!(token = id, ref_count = self.ref_count, "store acquired");
        Ok(Token { id })
    }

    /// Drop a reference, closing the store on the last one.
    pub fn release(&mut self, token: Token) -> Result<(), ArbiterError> {
        if !self.outstanding.remove(&token.id) {
            return Err(if self.ref_count == 0 {
                ArbiterError::RefCountUnderflow
            } else {
                ArbiterError::UnknownToken(token.id)
            });
        }

        self.ref_count -= 1;
        debug!(token = token.id, ref_count = self.ref_count, "store released");
        if self.ref_count > 0 {
            return Ok(());
        }

        self.close_handle()
    }

    fn close_handle(&mut self) -> Result<(), ArbiterError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.closes += 1;
        match handle.close() {
            Ok(()) => {
                self.degraded = false;
                info!("store closed by arbiter");
                Ok(())
            }
            Err(e) => {
                self.degraded = true;
                error!(error = %e, "store close failed; treating store as closed");
                Err(ArbiterError::StoreCloseFailed(e))
            }
        }
    }

    /// Force the state back to `Closed`.
    pub fn drain(&mut self) -> Result<(), ArbiterError> {
        if self.ref_count > 0 {
            warn!(
                ref_count = self.ref_count,
                "arbiter shutting down with outstanding holders"
            );
        }
        self.ref_count = 0;
        self.outstanding.clear();
        self.close_handle()
    }

    /// Current status.
    pub fn status(&self) -> ArbiterStatus {
        ArbiterStatus {
            ref_count: self.ref_count,
            open: self.handle.is_some(),
            degraded: self.degraded,
            opens: self.opens,
            closes: self.closes,
        }
    }

    fn run(mut self, mut rx: mpsc::UnboundedReceiver<LockRequest>) {
        while let Some(request) = rx.blocking_recv() {
            match request {
                LockRequest::Acquire { reply } => {
                    if reply.is_closed() {
                        debug!("acquirer timed out while queued; skipping open");
                        continue;
                    }
                    let result = self.acquire();
                    if let Err(Ok(token)) = reply.send(result) {
                        debug!(token = token.id, "acquirer went away; releasing");
                        if let Err(e) = self.release(token) {
                            error!(error = %e, "release of abandoned acquire failed");
                        }
                    }
                }
                LockRequest::Release { token, reply } => {
                    let result = self.release(token);
                    if let Err(e) = &result {
                        if e.is_invariant_violation() {
                            error!(error = %e, "store release invariant violated");
                        }
                    }
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                warn!(error = %e, "background release failed");
                            }
                        }
                    }
                }
                LockRequest::Status { reply } => {
                    let _ = reply.send(self.status());
                }
                LockRequest::Shutdown { reply } => {
                    if let Err(e) = self.drain() {
                        error!(error = %e, "store close at shutdown failed");
                    }
                    let _ = reply.send(());
                    return;
                }
            }
        }

        if let Err(e) = self.drain() {
            error!(error = %e, "store close at shutdown failed");
        }
    }
}

struct Shared {
    acquire_timeout: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the arbiter worker. Cheap to clone.
#[derive(Clone)]
pub struct GateArbiter {
    tx: mpsc::UnboundedSender<LockRequest>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for GateArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateArbiter")
            .field("acquire_timeout", &self.shared.acquire_timeout)
            .finish()
    }
}

impl GateArbiter {
    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// Fails only if the OS refuses to create a thread.
    pub fn spawn(
        opener: Arc<dyn StoreOpener>,
        acquire_timeout: Duration,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = ArbiterState::new(opener);
        let worker = thread::Builder::new()
            .name("store-arbiter".to_string())
            .spawn(move || state.run(rx))?;

        Ok(Self {
            tx,
            shared: Arc::new(Shared {
                acquire_timeout,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Acquire access to the store.
    ///
    /// Waits at most the configured acquire timeout for the worker.
    pub async fn acquire(&self) -> Result<Token, ArbiterError> {
        let (reply, rx) = oneshot::channel();
        self.send(LockRequest::Acquire { reply })?;

        let timeout = self.shared.acquire_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ArbiterError::Stopped),
            Err(_) => Err(ArbiterError::AcquireTimeout(timeout)),
        }
    }

    /// Release a token obtained from [`acquire`](Self::acquire).
    pub async fn release(&self, token: Token) -> Result<(), ArbiterError> {
        let (reply, rx) = oneshot::channel();
        self.send(LockRequest::Release {
            token,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| ArbiterError::Stopped)?
    }

    /// Acquire and wrap the token in a [`Lease`] that releases on drop.
    pub async fn lease(&self) -> Result<Lease, ArbiterError> {
        let token = self.acquire().await?;
        Ok(Lease::new(self.clone(), token))
    }

    /// Current status as seen by the worker.
    pub async fn status(&self) -> Result<ArbiterStatus, ArbiterError> {
        let (reply, rx) = oneshot::channel();
        self.send(LockRequest::Status { reply })?;
        rx.await.map_err(|_| ArbiterError::Stopped)
    }

    /// Drain to `Closed` and stop the worker.
    ///
    /// Later calls on any clone fail with [`ArbiterError::Stopped`].
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(LockRequest::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
        let worker = self.shared.worker.lock().take();
        if let Some(worker) = worker {
            let _ = tokio::task::spawn_blocking(move || worker.join()).await;
        }
    }

    /// Enqueue a release without waiting for the outcome.
    pub(crate) fn release_detached(&self, token: Token) {
        if self
            .send(LockRequest::Release { token, reply: None })
            .is_err()
        {
            warn!("arbiter stopped before a dropped lease could be released");
        }
    }

    fn send(&self, request: LockRequest) -> Result<(), ArbiterError> {
        self.tx.send(request).map_err(|_| ArbiterError::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::MockStoreOpener;

    fn state_with(mock: &MockStoreOpener) -> ArbiterState {
        ArbiterState::new(Arc::new(mock.clone()))
    }

    mod state_machine {
        use super::*;

        #[test]
        fn single_holder_opens_and_closes() {
            let mock = MockStoreOpener::new();
            let mut state = state_with(&mock);

            let token = state.acquire().unwrap();
            assert_eq!(state.status().ref_count, 1);
            assert!(state.status().open);
            assert!(mock.is_open());

            state.release(token).unwrap();
            assert_eq!(state.status(), ArbiterStatus {
                ref_count: 0,
                open: false,
                degraded: false,
                opens: 1,
                closes: 1,
            });
            assert!(!mock.is_open());
        }

        #[test]
        fn overlapping_holders_share_one_open() {
            let mock = MockStoreOpener::new();
            let mut state = state_with(&mock);

            let first = state.acquire().unwrap();
            let second = state.acquire().unwrap();
            assert_eq!(state.status().ref_count, 2);

            state.release(first).unwrap();
            assert_eq!(state.status().ref_count, 1);
            assert!(mock.is_open());

            state.release(second).unwrap();
            assert!(!mock.is_open());

            let stats = mock.stats();
            assert_eq!(stats.opens, 1);
            assert_eq!(stats.closes, 1);
        }

        #[test]
        fn open_failure_leaves_state_closed() {
            let mock = MockStoreOpener::new();
            mock.fail_next_opens(1);
            let mut state = state_with(&mock);

            let result = state.acquire();
            assert!(matches!(result, Err(ArbiterError::StoreOpenFailed(_))));
            assert_eq!(state.status().ref_count, 0);
            assert!(!state.status().open);

            // The next acquire retries the open.
            let token = state.acquire().unwrap();
            state.release(token).unwrap();
        }

        #[test]
        fn close_failure_still_transitions_to_closed() {
            let mock = MockStoreOpener::new();
            mock.fail_next_closes(1);
            let mut state = state_with(&mock);

            let token = state.acquire().unwrap();
            let result = state.release(token);
            assert!(matches!(result, Err(ArbiterError::StoreCloseFailed(_))));

            let status = state.status();
            assert_eq!(status.ref_count, 0);
            assert!(!status.open);
            assert!(status.degraded);

            let token = state.acquire().unwrap();
            state.release(token).unwrap();
            assert!(!state.status().degraded);
        }

        #[test]
        fn release_at_zero_is_underflow() {
            let mock = MockStoreOpener::new();
            let mut state = state_with(&mock);

            let result = state.release(Token { id: 42 });
            assert!(matches!(result, Err(ArbiterError::RefCountUnderflow)));
            assert_eq!(state.status().ref_count, 0);
            assert_eq!(mock.stats().closes, 0);
        }

        #[test]
        fn release_of_foreign_token_is_rejected() {
            let mock = MockStoreOpener::new();
            let mut state = state_with(&mock);

            let token = state.acquire().unwrap();
            let result = state.release(Token { id: token.id + 100 });
            assert!(matches!(result, Err(ArbiterError::UnknownToken(_))));
            assert_eq!(state.status().ref_count, 1);

            state.release(token).unwrap();
        }

        #[test]
        fn double_release_is_underflow() {
            let mock = MockStoreOpener::new();
            let mut state = state_with(&mock);

            let token = state.acquire().unwrap();
            let id = token.id;
            state.release(token).unwrap();
            assert!(matches!(
                state.release(Token { id }),
                Err(ArbiterError::RefCountUnderflow)
            ));
        }

        #[test]
        fn drain_closes_open_store() {
            let mock = MockStoreOpener::new();
            let mut state = state_with(&mock);

            let _leaked = state.acquire().unwrap();
            state.drain().unwrap();
            assert_eq!(state.status().ref_count, 0);
            assert!(!mock.is_open());
        }
    }

    mod worker {
        use super::*;

        fn spawn(mock: &MockStoreOpener) -> GateArbiter {
            GateArbiter::spawn(Arc::new(mock.clone()), Duration::from_secs(5)).unwrap()
        }

        #[tokio::test]
        async fn acquire_release_roundtrip() {
            let mock = MockStoreOpener::new();
            let arbiter = spawn(&mock);

            let token = arbiter.acquire().await.unwrap();
            assert!(mock.is_open());
            arbiter.release(token).await.unwrap();
            assert!(!mock.is_open());

            arbiter.shutdown().await;
        }

        #[tokio::test]
        async fn underflow_does_not_stop_worker() {
            let mock = MockStoreOpener::new();
            let arbiter = spawn(&mock);

            let result = arbiter.release(Token { id: 7 }).await;
            assert!(matches!(result, Err(ArbiterError::RefCountUnderflow)));

            let status = arbiter.status().await.unwrap();
            assert_eq!(status.ref_count, 0);
            assert!(!status.open);

            let token = arbiter.acquire().await.unwrap();
            arbiter.release(token).await.unwrap();
            arbiter.shutdown().await;
        }

        #[tokio::test]
        async fn abandoned_acquire_is_released() {
            let mock = MockStoreOpener::new();
            mock.set_delay(Duration::from_millis(200));
            let arbiter =
                GateArbiter::spawn(Arc::new(mock.clone()), Duration::from_millis(20)).unwrap();

            let result = arbiter.acquire().await;
            assert!(matches!(result, Err(ArbiterError::AcquireTimeout(_))));

            // Status is queued behind the slow open and its release-back.
            let status = arbiter.status().await.unwrap();
            assert_eq!(status.ref_count, 0);
            assert!(!status.open);
            assert_eq!(mock.stats().opens, 1);
            assert_eq!(mock.stats().closes, 1);

            arbiter.shutdown().await;
        }

        #[tokio::test]
        async fn timed_out_callers_cause_no_opens() {
            let mock = MockStoreOpener::new();
            mock.set_delay(Duration::from_millis(100));
            mock.fail_next_opens(10);
            let arbiter =
                GateArbiter::spawn(Arc::new(mock.clone()), Duration::from_millis(50)).unwrap();

            let callers: Vec<_> = (0..10)
                .map(|_| {
                    let arbiter = arbiter.clone();
                    tokio::spawn(async move { arbiter.acquire().await })
                })
                .collect();
            for caller in callers {
                let result = caller.await.unwrap();
                assert!(matches!(result, Err(ArbiterError::AcquireTimeout(_))));
            }

            // Only the caller the worker picked up while still waiting
            // drove an open; the rest were dropped from the queue.
            let status = arbiter.status().await.unwrap();
            assert_eq!(status.ref_count, 0);
            assert!(!status.open);
            let stats = mock.stats();
            assert!(stats.opens + stats.failed_opens <= 1, "{stats:?}");

            arbiter.shutdown().await;
        }

        #[tokio::test]
        async fn shutdown_stops_further_requests() {
            let mock = MockStoreOpener::new();
            let arbiter = spawn(&mock);
            let clone = arbiter.clone();

            let _token = arbiter.acquire().await.unwrap();
            arbiter.shutdown().await;

            assert!(!mock.is_open());
            assert!(matches!(clone.acquire().await, Err(ArbiterError::Stopped)));
        }
    }
}
