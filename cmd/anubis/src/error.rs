//! HTTP-layer translation of `KmsError` into status codes, kept once next
//! to the router instead of duplicated per-handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use pkg_kms::KmsError;
use pkg_kms::envelope::ApiErrorBody;

pub struct ApiError(pub anyhow::Error);

impl From<KmsError> for ApiError {
    fn from(e: KmsError) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<KmsError>() {
            Some(KmsError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(KmsError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            Some(KmsError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ApiErrorBody {
            errors: vec![self.0.to_string()],
        };
        (status, Json(body)).into_response()
    }
}
