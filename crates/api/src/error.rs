//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory::StockError;
use orders::{OrderStoreError, UnknownStatus};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Order store error.
    Orders(OrderStoreError),
    /// Stock ledger error.
    Stock(StockError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Orders(err) => order_error_to_response(err),
            ApiError::Stock(err) => stock_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn order_error_to_response(err: OrderStoreError) -> (StatusCode, String) {
    let status = match &err {
        OrderStoreError::NotFound(_) => StatusCode::NOT_FOUND,
        OrderStoreError::InvalidOrder(_) => StatusCode::BAD_REQUEST,
        OrderStoreError::AlreadyExists(_)
        | OrderStoreError::InvalidTransition { .. }
        | OrderStoreError::VersionConflict { .. } => StatusCode::CONFLICT,
        OrderStoreError::Bus(_) | OrderStoreError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
        OrderStoreError::Corrupt { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn stock_error_to_response(err: StockError) -> (StatusCode, String) {
    let status = match &err {
        StockError::UnknownProduct(_) => StatusCode::NOT_FOUND,
        StockError::InvalidStock { .. } => StatusCode::BAD_REQUEST,
        StockError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
        StockError::CorruptReservation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

impl From<OrderStoreError> for ApiError {
    fn from(err: OrderStoreError) -> Self {
        ApiError::Orders(err)
    }
}

impl From<StockError> for ApiError {
    fn from(err: StockError) -> Self {
        ApiError::Stock(err)
    }
}

impl From<UnknownStatus> for ApiError {
    fn from(err: UnknownStatus) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}
