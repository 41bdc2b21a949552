//! Step 16: the guest HTTP API, served over a vsock listener via
//! `axum::serve` — `POST /signal` accepts `{signal: 15|2}` and forwards
//! accepted values onto the kill-channel; `GET /v1/ping` is a liveness
//! check.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use nix::sys::signal::Signal;
use serde::Deserialize;
use tokio::sync::mpsc;

#[derive(Clone)]
struct ApiState {
    kill_tx: mpsc::Sender<Signal>,
}

#[derive(Deserialize)]
struct SignalRequest {
    signal: i32,
}

async fn ping() -> &'static str {
    "ok"
}

async fn signal_handler(
    State(state): State<ApiState>,
    Json(body): Json<SignalRequest>,
) -> StatusCode {
    let signal = match body.signal {
        15 => Signal::SIGTERM,
        2 => Signal::SIGINT,
        _ => return StatusCode::BAD_REQUEST,
    };

    match state.kill_tx.send(signal).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build the router for the guest HTTP API.
pub fn router(kill_tx: mpsc::Sender<Signal>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/signal", post(signal_handler))
        .with_state(ApiState { kill_tx })
}

/// Serve the API on the given vsock port until the listener errors or the
/// process exits.
pub async fn serve(port: u32, kill_tx: mpsc::Sender<Signal>) -> anyhow::Result<()> {
    let listener = crate::vsock_async::AsyncVsockListener::bind(port)?;
    axum::serve(listener, router(kill_tx)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn ping_returns_ok() {
        let (tx, _rx) = mpsc::channel(1);
        let app = router(tx);
        let response = app
            .oneshot(Request::builder().uri("/v1/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn signal_rejects_unknown_values() {
        let (tx, _rx) = mpsc::channel(1);
        let app = router(tx);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/signal")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"signal":9}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signal_forwards_sigterm() {
        let (tx, mut rx) = mpsc::channel(1);
        let app = router(tx);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/signal")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"signal":15}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(rx.recv().await, Some(Signal::SIGTERM));
    }
}
