//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use projections::ProjectionError;
use reconciliation::ReconciliationError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Reconciliation or domain failure.
    Reconciliation(ReconciliationError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Reconciliation(err) => reconciliation_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn reconciliation_error_to_response(err: ReconciliationError) -> (StatusCode, String) {
    match &err {
        ReconciliationError::OrderNotFound(_) | ReconciliationError::UnknownPaymentLabel(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        ReconciliationError::EmptyCart(_) | ReconciliationError::InvalidDelivery(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        ReconciliationError::Forbidden(_) => (StatusCode::FORBIDDEN, err.to_string()),
        ReconciliationError::StaleState(detail) => {
            tracing::debug!(%detail, "request lost a race");
            (
                StatusCode::CONFLICT,
                "The order changed while handling the request, try again".to_string(),
            )
        }
        ReconciliationError::InvalidState { .. } => (StatusCode::CONFLICT, err.to_string()),
        ReconciliationError::UnavailableItem { lines } => {
            let details: Vec<String> = lines
                .iter()
                .map(|line| format!("{}: {}", line.product_id, line.reason))
                .collect();
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("{err}: {}", details.join("; ")),
            )
        }
        ReconciliationError::PaymentAmountMismatch { .. } | ReconciliationError::AmountOverflow => {
            (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        ReconciliationError::PaymentRequest(_)
        | ReconciliationError::RemoteSync(_)
        | ReconciliationError::Catalog(_)
        | ReconciliationError::CartStore(_) => {
            tracing::warn!(error = %err, "upstream call failed");
            (StatusCode::BAD_GATEWAY, err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<ReconciliationError> for ApiError {
    fn from(err: ReconciliationError) -> Self {
        ApiError::Reconciliation(err)
    }
}

impl From<ProjectionError> for ApiError {
    fn from(err: ProjectionError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
