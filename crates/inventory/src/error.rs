use common::{OrderId, ProductId};
use thiserror::Error;

/// Errors that can occur when reading or mutating stock.
#[derive(Debug, Error)]
pub enum StockError {
    /// No stock row exists for the product.
    #[error("Unknown product: {0}")]
    UnknownProduct(ProductId),

    /// A reservation row holds a state this version does not understand.
    #[error("Corrupt reservation for order {order_id}: {state}")]
    CorruptReservation { order_id: OrderId, state: String },

    /// A message names another product than the one the order's
    /// reservation was taken against.
    #[error("Order {order_id} is recorded against product {recorded}, not {claimed}")]
    ProductMismatch {
        order_id: OrderId,
        recorded: ProductId,
        claimed: ProductId,
    },

    /// A quantity or threshold was negative.
    #[error("Invalid stock level for product {product_id}: {reason}")]
    InvalidStock {
        product_id: ProductId,
        reason: String,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for stock ledger operations.
pub type Result<T> = std::result::Result<T, StockError>;

/// A notification could not be delivered.
#[derive(Debug, Error)]
#[error("Notification to {to} failed: {reason}")]
pub struct NotifyError {
    pub to: String,
    pub reason: String,
}
