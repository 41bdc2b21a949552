//! The Vault-KV-v2-shaped HTTP surface: secret data/metadata CRUD plus a
//! handful of `/v1/sys/*` introspection endpoints.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use pkg_kms::envelope::{
    HealthResponse, ListPayload, PutSecretRequest, SealStatusResponse, SecretDataPayload,
    SecretMetadataPayload, SecretResponse,
};
use pkg_kms::SecretStore;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SecretStore>,
    pub request_count: Arc<AtomicU64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/secret/data/{*path}", get(get_secret).put(put_secret).delete(delete_secret))
        .route("/v1/secret/metadata/{*path}", get(get_metadata))
        .route("/v1/sys/health", get(health))
        .route("/v1/sys/seal-status", get(seal_status))
        .route("/v1/sys/metrics", get(metrics))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::tag_request,
        ))
        .with_state(state)
}

async fn get_secret(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<SecretResponse<SecretDataPayload>>, ApiError> {
    let token = CancellationToken::new();
    let secret = state.store.get(&path, &token).await?;
    Ok(Json(SecretResponse::new(
        Ulid::new().to_string(),
        SecretDataPayload {
            data: secret.data,
            metadata: secret.metadata,
        },
    )))
}

async fn put_secret(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(body): Json<PutSecretRequest>,
) -> Result<Json<SecretResponse<SecretMetadataPayload>>, ApiError> {
    let token = CancellationToken::new();
    let metadata = state.store.put(&path, body.data, &token).await?;
    Ok(Json(SecretResponse::new(
        Ulid::new().to_string(),
        SecretMetadataPayload {
            current_version: metadata.version,
            metadata,
        },
    )))
}

async fn delete_secret(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<StatusCode, ApiError> {
    let token = CancellationToken::new();
    state.store.delete(&path, &token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct MetadataQuery {
    #[serde(default)]
    list: bool,
}

async fn get_metadata(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<MetadataQuery>,
) -> Result<Json<SecretResponse<serde_json::Value>>, ApiError> {
    let token = CancellationToken::new();
    let request_id = Ulid::new().to_string();
    let payload = if query.list {
        let keys = state.store.list(&path, &token).await?;
        serde_json::to_value(ListPayload { keys }).expect("ListPayload always serializes")
    } else {
        let metadata = state.store.get_metadata(&path, &token).await?;
        serde_json::to_value(SecretMetadataPayload {
            current_version: metadata.version,
            metadata,
        })
        .expect("SecretMetadataPayload always serializes")
    };
    Ok(Json(SecretResponse::new(request_id, payload)))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

async fn seal_status() -> Json<SealStatusResponse> {
    Json(SealStatusResponse::default())
}

/// Hand-written Prometheus text exposition — the one counter this service
/// tracks is request volume, incremented by the request-id middleware.
async fn metrics(State(state): State<AppState>) -> String {
    let count = state.request_count.load(Ordering::Relaxed);
    format!(
        "# HELP anubis_requests_total Total HTTP requests served\n\
         # TYPE anubis_requests_total counter\n\
         anubis_requests_total {count}\n\
         # HELP anubis_up Whether the secret store is serving requests\n\
         # TYPE anubis_up gauge\n\
         anubis_up 1\n"
    )
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    fn test_state() -> AppState {
        AppState {
            store: Arc::new(SecretStore::open_in_memory().unwrap()),
            request_count: Arc::new(AtomicU64::new(0)),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let app = router(test_state());

        let put_body = serde_json::json!({"data": {"key": "dGVzdGtleQ=="}}).to_string();
        let put_req = Request::builder()
            .method("PUT")
            .uri("/v1/secret/data/inferno/volumes/vol_a/encryption-key")
            .header("content-type", "application/json")
            .body(Body::from(put_body))
            .unwrap();
        let put_resp = app.clone().oneshot(put_req).await.unwrap();
        assert_eq!(put_resp.status(), StatusCode::OK);

        let get_req = Request::builder()
            .uri("/v1/secret/data/inferno/volumes/vol_a/encryption-key")
            .body(Body::empty())
            .unwrap();
        let get_resp = app.oneshot(get_req).await.unwrap();
        assert_eq!(get_resp.status(), StatusCode::OK);
        let bytes = get_resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["data"]["key"], "dGVzdGtleQ==");
    }

    #[tokio::test]
    async fn get_missing_secret_is_not_found() {
        let app = router(test_state());
        let req = Request::builder()
            .uri("/v1/secret/data/nope")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_query_returns_immediate_children() {
        let state = test_state();
        let token = CancellationToken::new();
        state
            .store
            .put(
                "inferno/volumes/vol_a/encryption-key",
                std::collections::HashMap::new(),
                &token,
            )
            .await
            .unwrap();
        let app = router(state);

        let req = Request::builder()
            .uri("/v1/secret/metadata/inferno/volumes?list=true")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["keys"][0], "vol_a/");
    }

    #[tokio::test]
    async fn health_and_seal_status_report_unsealed() {
        let app = router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/v1/sys/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
