//! End-to-end behavior of the request gate and store modes.
//!
//! Requests go through a real router with the gate installed; the store
//! is the mock opener so opens, closes and flushes can be counted.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::{middleware, Router};
use tokio::sync::Barrier;
use tower::ServiceExt;

use repogate::gate::{
    request_gate, AccessSettings, ArbiterError, ArbiterState, GateArbiter, StoreAccess, StoreMode,
};
use repogate::store::mock::MockStoreOpener;
use repogate::store::Database;

fn arbiter(mock: &MockStoreOpener) -> GateArbiter {
    GateArbiter::spawn(Arc::new(mock.clone()), Duration::from_secs(5)).unwrap()
}

fn gated(arbiter: &GateArbiter, mock: &MockStoreOpener) -> Router {
    let seen = mock.clone();
    Router::new()
        .route(
            "/work",
            get(move || {
                let seen = seen.clone();
                async move {
                    // The handler only ever sees an open store.
                    assert!(seen.is_open());
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    "ok"
                }
            }),
        )
        .route_layer(middleware::from_fn_with_state(arbiter.clone(), request_gate))
}

async fn get_work(router: &Router) -> StatusCode {
    router
        .clone()
        .oneshot(Request::get("/work").body(Body::empty()).unwrap())
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn single_request_opens_then_closes() {
    let mock = MockStoreOpener::new();
    let arbiter = arbiter(&mock);
    let router = gated(&arbiter, &mock);

    assert_eq!(get_work(&router).await, StatusCode::OK);

    let stats = mock.stats();
    assert_eq!((stats.opens, stats.closes), (1, 1));
    assert!(!mock.is_open());
    let status = arbiter.status().await.unwrap();
    assert_eq!(status.ref_count, 0);
    assert!(!status.open);

    arbiter.shutdown().await;
}

#[tokio::test]
async fn overlapping_holders_share_one_open() {
    let mock = MockStoreOpener::new();
    let arbiter = arbiter(&mock);

    let first = arbiter.lease().await.unwrap();
    let second = arbiter.lease().await.unwrap();
    assert_eq!(arbiter.status().await.unwrap().ref_count, 2);

    first.release().await.unwrap();
    let status = arbiter.status().await.unwrap();
    assert_eq!(status.ref_count, 1);
    assert!(status.open);

    second.release().await.unwrap();
    assert!(!arbiter.status().await.unwrap().open);
    assert_eq!((mock.stats().opens, mock.stats().closes), (1, 1));

    arbiter.shutdown().await;
}

#[tokio::test]
async fn open_failure_never_reaches_handler() {
    let mock = MockStoreOpener::new();
    mock.fail_next_opens(1);
    let arbiter = arbiter(&mock);
    let router = gated(&arbiter, &mock);

    assert_eq!(get_work(&router).await, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(arbiter.status().await.unwrap().ref_count, 0);
    assert_eq!(mock.stats().opens, 0);

    // The failure is not sticky.
    assert_eq!(get_work(&router).await, StatusCode::OK);

    arbiter.shutdown().await;
}

#[tokio::test]
async fn persistent_mode_flushes_without_gating() {
    let mock = MockStoreOpener::new();
    let access = StoreAccess::start(
        StoreMode::Persistent,
        Arc::new(mock.clone()),
        AccessSettings {
            acquire_timeout: Duration::from_secs(5),
            flush_interval: Duration::from_millis(10),
        },
    )
    .await
    .unwrap();
    assert!(access.arbiter().is_none());
    assert!(mock.is_open());

    let seen = mock.clone();
    let router: Router = Router::new().route(
        "/work",
        get(move || {
            let seen = seen.clone();
            async move {
                assert!(seen.is_open());
                "ok"
            }
        }),
    );
    for _ in 0..100 {
        assert_eq!(get_work(&router).await, StatusCode::OK);
    }
    tokio::time::sleep(Duration::from_millis(60)).await;

    let before_shutdown = mock.stats();
    assert_eq!(before_shutdown.opens, 1);
    assert_eq!(before_shutdown.closes, 0);
    assert!(before_shutdown.flushes >= 2);

    access.shutdown().await;
    assert!(!mock.is_open());
    assert_eq!(mock.stats().closes, 1);
}

#[tokio::test]
async fn flush_failures_do_not_stop_the_flusher() {
    let mock = MockStoreOpener::new();
    mock.fail_next_flushes(2);
    let access = StoreAccess::start(
        StoreMode::Persistent,
        Arc::new(mock.clone()),
        AccessSettings {
            acquire_timeout: Duration::from_secs(5),
            flush_interval: Duration::from_millis(10),
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = mock.stats();
    assert_eq!(stats.failed_flushes, 2);
    assert!(stats.flushes >= 1);

    access.shutdown().await;
}

#[test]
fn release_at_zero_reports_underflow_and_stays_closed() {
    let mock = MockStoreOpener::new();
    let mut other = ArbiterState::new(Arc::new(MockStoreOpener::new()));
    let mut state = ArbiterState::new(Arc::new(mock.clone()));

    // A token this state never issued, released while nothing is held.
    let stray = other.acquire().unwrap();
    let err = state.release(stray).unwrap_err();
    assert!(matches!(err, ArbiterError::RefCountUnderflow));
    assert!(err.is_invariant_violation());

    let status = state.status();
    assert_eq!(status.ref_count, 0);
    assert!(!status.open);

    // Still usable afterwards.
    let token = state.acquire().unwrap();
    state.release(token).unwrap();
    assert_eq!((mock.stats().opens, mock.stats().closes), (1, 1));
}

#[tokio::test]
async fn arbiter_survives_underflow() {
    let mock = MockStoreOpener::new();
    let foreign = MockStoreOpener::new();
    let arbiter = arbiter(&mock);
    let other = GateArbiter::spawn(Arc::new(foreign), Duration::from_secs(5)).unwrap();

    let stray = other.acquire().await.unwrap();
    let err = arbiter.release(stray).await.unwrap_err();
    assert!(matches!(err, ArbiterError::RefCountUnderflow));

    let lease = arbiter.lease().await.unwrap();
    lease.release().await.unwrap();
    assert_eq!(mock.stats().opens, 1);

    arbiter.shutdown().await;
    other.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pairs_never_overlap_transitions() {
    const TASKS: usize = 32;
    const ROUNDS: usize = 10;

    let mock = MockStoreOpener::new();
    mock.set_delay(Duration::from_millis(1));
    let arbiter = arbiter(&mock);
    let barrier = Arc::new(Barrier::new(TASKS));

    let mut tasks = Vec::with_capacity(TASKS);
    for _ in 0..TASKS {
        let arbiter = arbiter.clone();
        let barrier = Arc::clone(&barrier);
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            for _ in 0..ROUNDS {
                let lease = arbiter.lease().await.unwrap();
                tokio::task::yield_now().await;
                lease.release().await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = mock.stats();
    assert_eq!(stats.overlaps, 0);
    assert_eq!(stats.double_opens, 0);
    assert_eq!(stats.opens, stats.closes);
    assert!(stats.opens >= 1);
    assert!(!mock.is_open());

    let status = arbiter.status().await.unwrap();
    assert_eq!(status.ref_count, 0);
    assert_eq!(status.opens, stats.opens);

    arbiter.shutdown().await;
}

#[tokio::test]
async fn dropped_lease_is_released() {
    let mock = MockStoreOpener::new();
    let arbiter = arbiter(&mock);

    {
        let _lease = arbiter.lease().await.unwrap();
        assert!(mock.is_open());
    }

    // Status is queued behind the detached release.
    let status = arbiter.status().await.unwrap();
    assert_eq!(status.ref_count, 0);
    assert!(!mock.is_open());

    arbiter.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_held_store() {
    let mock = MockStoreOpener::new();
    let arbiter = arbiter(&mock);

    let lease = arbiter.lease().await.unwrap();
    arbiter.shutdown().await;
    assert!(!mock.is_open());
    assert!(matches!(
        arbiter.acquire().await,
        Err(ArbiterError::Stopped)
    ));

    // The worker is gone; the late release fails quietly.
    assert!(matches!(lease.release().await, Err(ArbiterError::Stopped)));
}

#[tokio::test]
async fn abandoned_request_finishes_its_index_write() {
    const PENDING: u8 = 0;
    const WRITTEN: u8 = 1;
    const FAILED: u8 = 2;

    let db = Arc::new(Database::new());
    let mock = MockStoreOpener::with_database(Arc::clone(&db));
    let arbiter = arbiter(&mock);
    let outcome = Arc::new(AtomicU8::new(PENDING));

    let writer = Arc::clone(&db);
    let recorded = Arc::clone(&outcome);
    let router = Router::new()
        .route(
            "/import",
            get(move || {
                let db = Arc::clone(&writer);
                let outcome = Arc::clone(&recorded);
                async move {
                    tokio::task::spawn_blocking(move || {
                        std::thread::sleep(Duration::from_millis(300));
                        let code = match db.write(|index| Ok(index.repos.len())) {
                            Ok(_) => WRITTEN,
                            Err(_) => FAILED,
                        };
                        outcome.store(code, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
                    "imported"
                }
            }),
        )
        .route_layer(middleware::from_fn_with_state(arbiter.clone(), request_gate));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        router.oneshot(Request::get("/import").body(Body::empty()).unwrap()),
    )
    .await;
    assert!(abandoned.is_err());

    // The client is gone but the handler's work still holds the store.
    let status = arbiter.status().await.unwrap();
    assert_eq!(status.ref_count, 1);
    assert!(db.is_loaded());
    assert_eq!(outcome.load(Ordering::SeqCst), PENDING);

    for _ in 0..200 {
        let status = arbiter.status().await.unwrap();
        if status.ref_count == 0 && !status.open {
            assert_eq!(outcome.load(Ordering::SeqCst), WRITTEN);
            assert!(!db.is_loaded());
            assert_eq!((mock.stats().opens, mock.stats().closes), (1, 1));
            arbiter.shutdown().await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("store never released after the abandoned request");
}
