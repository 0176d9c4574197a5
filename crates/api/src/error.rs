//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lifecycle::{ErrorKind, LifecycleError};
use order_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    /// The request carried no organization scope.
    #[error("missing or empty x-organization-id header")]
    MissingOrganization,

    /// Lifecycle operation error.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::MissingOrganization => (
                StatusCode::BAD_REQUEST,
                ApiError::MissingOrganization.to_string(),
            ),
            ApiError::Lifecycle(err) => lifecycle_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn lifecycle_error_to_response(err: LifecycleError) -> (StatusCode, String) {
    let status = match (&err, err.kind()) {
        (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
        (_, ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        (_, ErrorKind::Conflict) => StatusCode::CONFLICT,
        (LifecycleError::Store(StoreError::LockTimeout { .. }), _) => {
            tracing::warn!(error = %err, "lock wait timed out");
            StatusCode::SERVICE_UNAVAILABLE
        }
        (_, ErrorKind::Infrastructure) => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}
