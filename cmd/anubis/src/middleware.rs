//! Tags every request with a monotonic-time-ordered unique id (ULID),
//! logged on entry and exit, and bumps the request counter `/v1/sys/metrics`
//! reports.

use std::sync::atomic::Ordering;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use ulid::Ulid;

use crate::routes::AppState;

pub async fn tag_request(State(state): State<AppState>, req: Request, next: Next) -> Response {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let request_id = Ulid::new();
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    async move {
        tracing::info!("request started");
        let response = next.run(req).await;
        tracing::info!(status = %response.status(), "request finished");
        response
    }
    .instrument(span)
    .await
}
