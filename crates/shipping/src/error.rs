use common::OrderId;
use thiserror::Error;

/// Errors that can occur while recording shipments or calling back the
/// order service.
#[derive(Debug, Error)]
pub enum ShippingError {
    /// The status callback could not be sent or its response not read.
    #[error("Callback request failed: {0}")]
    Callback(#[from] reqwest::Error),

    /// The order service answered the callback with something other than
    /// `200 OK`.
    #[error("Callback for order {order_id} rejected with {status}: {body}")]
    CallbackRejected {
        order_id: OrderId,
        status: u16,
        body: String,
    },

    /// A stored shipment could not be read back.
    #[error("Corrupt shipment for order {order_id}: {reason}")]
    Corrupt { order_id: OrderId, reason: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ShippingError {
    /// True if calling back again cannot succeed: the order service
    /// understood the request and refused it.
    pub fn is_permanent(&self) -> bool {
        match self {
            ShippingError::CallbackRejected { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            _ => false,
        }
    }
}

/// Result type for shipping operations.
pub type Result<T> = std::result::Result<T, ShippingError>;
