//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory::ReservationError;
use orders::OrderError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client (malformed ids, bad JSON shapes).
    BadRequest(String),
    /// Reservation orchestrator error.
    Reservation(ReservationError),
    /// Order service error.
    Order(OrderError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg }),
            ),
            ApiError::Reservation(err) => reservation_error_to_response(err),
            ApiError::Order(err) => order_error_to_response(err),
        };

        (status, axum::Json(body)).into_response()
    }
}

fn reservation_error_to_response(err: ReservationError) -> (StatusCode, serde_json::Value) {
    match &err {
        ReservationError::ProductNotFound(_) | ReservationError::NotFound(_) => {
            (StatusCode::NOT_FOUND, serde_json::json!({ "error": err.to_string() }))
        }
        ReservationError::InvalidRequest(_) => {
            (StatusCode::BAD_REQUEST, serde_json::json!({ "error": err.to_string() }))
        }
        ReservationError::InsufficientStock(shortfalls) => (
            StatusCode::CONFLICT,
            serde_json::json!({
                "error": err.to_string(),
                "unavailable_items": shortfalls,
            }),
        ),
        // The whole request can be retried once the contention clears.
        ReservationError::Conflict(_) => (
            StatusCode::CONFLICT,
            serde_json::json!({ "error": err.to_string(), "retryable": true }),
        ),
        ReservationError::InvalidState(_) => {
            (StatusCode::CONFLICT, serde_json::json!({ "error": err.to_string() }))
        }
        ReservationError::Ledger(_) | ReservationError::Store(_) => {
            tracing::error!(error = %err, "internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "internal error" }),
            )
        }
    }
}

fn order_error_to_response(err: OrderError) -> (StatusCode, serde_json::Value) {
    match &err {
        OrderError::NotFound(_) => {
            (StatusCode::NOT_FOUND, serde_json::json!({ "error": err.to_string() }))
        }
        OrderError::InvalidRequest(_) => {
            (StatusCode::BAD_REQUEST, serde_json::json!({ "error": err.to_string() }))
        }
        OrderError::InvalidState(_) => {
            (StatusCode::CONFLICT, serde_json::json!({ "error": err.to_string() }))
        }
        OrderError::Conflict(_) => (
            StatusCode::CONFLICT,
            serde_json::json!({ "error": err.to_string(), "retryable": true }),
        ),
        OrderError::Store(_) => {
            tracing::error!(error = %err, "internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "internal error" }),
            )
        }
    }
}

impl From<ReservationError> for ApiError {
    fn from(err: ReservationError) -> Self {
        ApiError::Reservation(err)
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}
