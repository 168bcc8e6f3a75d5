//! gate::request
//!
//! Per-request acquire/release around every route.
//!
//! The handler and the release run on a spawned task that owns the
//! [`Lease`](super::Lease). A client disconnect drops only the join handle,
//! so the store stays open until the handler, including any blocking work
//! it awaits, has finished.
//!
//! # Failure contract
//!
//! | Stage | Outcome |
//! |-------|---------|
//! | acquire fails | 500 (503 on timeout); handler never runs |
//! | handler returns | release, then send the handler's response |
//! | release fails | handler's response is replaced by a 500 |
//! | client disconnects | handler runs to completion, then release |
//! | handler panics | lease drop releases; panic resumes in the caller |

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn, Instrument, Span};

use super::arbiter::GateArbiter;
use crate::server::error::ApiError;

/// Middleware that brackets a request with store acquire and release.
///
/// Install with `axum::middleware::from_fn_with_state(arbiter, request_gate)`.
pub async fn request_gate(
    State(arbiter): State<GateArbiter>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let lease = match arbiter.lease().await {
        Ok(lease) => lease,
        Err(e) => {
            warn!(%method, %path, error = %e, "store acquire failed; request aborted");
            return ApiError::from(e).into_response();
        }
    };

    let bracket = async move {
        let response = next.run(request).await;
        match lease.release().await {
            Ok(()) => response,
            Err(e) => {
                error!(
                    %method,
                    %path,
                    status = response.status().as_u16(),
                    error = %e,
                    "store release failed after handler; discarding response"
                );
                ApiError::from(e).into_response()
            }
        }
    };

    match tokio::spawn(bracket.instrument(Span::current())).await {
        Ok(response) => response,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            error!(error = %e, "request task cancelled");
            ApiError::internal("request task cancelled").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::{middleware, Router};
    use tower::ServiceExt;
    use tower_http::catch_panic::CatchPanicLayer;

    use super::*;
    use crate::store::mock::MockStoreOpener;

    fn router(arbiter: &GateArbiter, mock: &MockStoreOpener, ran: Arc<AtomicBool>) -> Router {
        let seen = mock.clone();
        Router::new()
            .route(
                "/ok",
                get(move || {
                    let seen = seen.clone();
                    let ran = Arc::clone(&ran);
                    async move {
                        ran.store(true, Ordering::SeqCst);
                        if seen.is_open() {
                            "open"
                        } else {
                            "closed"
                        }
                    }
                }),
            )
            .route("/panic", get(panics))
            .layer(middleware::from_fn_with_state(arbiter.clone(), request_gate))
            .layer(CatchPanicLayer::new())
    }

    async fn panics() -> &'static str {
        panic!("handler blew up")
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn single_request_opens_and_closes() {
        let mock = MockStoreOpener::new();
        let arbiter = GateArbiter::spawn(Arc::new(mock.clone()), Duration::from_secs(5)).unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        let response = router(&arbiter, &mock, Arc::clone(&ran))
            .oneshot(get_request("/ok"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "open");
        assert!(!mock.is_open());
        let stats = mock.stats();
        assert_eq!((stats.opens, stats.closes), (1, 1));
        arbiter.shutdown().await;
    }

    #[tokio::test]
    async fn open_failure_skips_handler() {
        let mock = MockStoreOpener::new();
        mock.fail_next_opens(1);
        let arbiter = GateArbiter::spawn(Arc::new(mock.clone()), Duration::from_secs(5)).unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        let response = router(&arbiter, &mock, Arc::clone(&ran))
            .oneshot(get_request("/ok"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(arbiter.status().await.unwrap().ref_count, 0);

        // The next request succeeds.
        let response = router(&arbiter, &mock, ran)
            .oneshot(get_request("/ok"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        arbiter.shutdown().await;
    }

    #[tokio::test]
    async fn release_failure_replaces_response() {
        let mock = MockStoreOpener::new();
        mock.fail_next_closes(1);
        let arbiter = GateArbiter::spawn(Arc::new(mock.clone()), Duration::from_secs(5)).unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        let response = router(&arbiter, &mock, Arc::clone(&ran))
            .oneshot(get_request("/ok"))
            .await
            .unwrap();

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("STORE_RELEASE_FAILED"));

        let status = arbiter.status().await.unwrap();
        assert_eq!(status.ref_count, 0);
        assert!(!status.open);
        arbiter.shutdown().await;
    }

    #[tokio::test]
    async fn handler_panic_still_releases() {
        let mock = MockStoreOpener::new();
        let arbiter = GateArbiter::spawn(Arc::new(mock.clone()), Duration::from_secs(5)).unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        let response = router(&arbiter, &mock, ran)
            .oneshot(get_request("/panic"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        for _ in 0..100 {
            let status = arbiter.status().await.unwrap();
            if status.ref_count == 0 && !status.open {
                assert_eq!(mock.stats().closes, 1);
                arbiter.shutdown().await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("store stayed open after handler panic");
    }

    #[tokio::test]
    async fn disconnect_keeps_store_open_until_work_finishes() {
        let mock = MockStoreOpener::new();
        let arbiter = GateArbiter::spawn(Arc::new(mock.clone()), Duration::from_secs(5)).unwrap();
        let open_after_work = Arc::new(AtomicBool::new(false));

        let seen = mock.clone();
        let flag = Arc::clone(&open_after_work);
        let router = Router::new()
            .route(
                "/slow",
                get(move || {
                    let seen = seen.clone();
                    let flag = Arc::clone(&flag);
                    async move {
                        tokio::task::spawn_blocking(move || {
                            std::thread::sleep(Duration::from_millis(300));
                            flag.store(seen.is_open(), Ordering::SeqCst);
                        })
                        .await
                        .unwrap();
                        "done"
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(arbiter.clone(), request_gate));

        // The client gives up while the blocking work is still running.
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), router.oneshot(get_request("/slow")))
                .await;
        assert!(abandoned.is_err());

        let status = arbiter.status().await.unwrap();
        assert_eq!(status.ref_count, 1);
        assert!(status.open);
        assert!(mock.is_open());

        for _ in 0..200 {
            let status = arbiter.status().await.unwrap();
            if status.ref_count == 0 && !status.open {
                assert!(open_after_work.load(Ordering::SeqCst));
                let stats = mock.stats();
                assert_eq!((stats.opens, stats.closes), (1, 1));
                arbiter.shutdown().await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("store never released after abandoned request");
    }
}
