use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Thin per-binary error newtype translating library errors into status
/// codes next to the router, the same shape Anubis and Kiln use.
pub struct ApiError(pub anyhow::Error, pub StatusCode);

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError(anyhow::anyhow!(msg.into()), StatusCode::NOT_FOUND)
    }

    pub fn internal(e: impl Into<anyhow::Error>) -> Self {
        ApiError(e.into(), StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError(e, StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.0.to_string() });
        (self.1, Json(body)).into_response()
    }
}
