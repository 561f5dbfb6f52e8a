use common::OrderId;
use event_bus::BusError;
use thiserror::Error;

use crate::status::OrderStatus;

/// Errors that can occur when storing or updating orders.
#[derive(Debug, Error)]
pub enum OrderStoreError {
    /// No order exists with the given id.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// An order with the given id already exists.
    #[error("Order already exists: {0}")]
    AlreadyExists(OrderId),

    /// The requested status contradicts the order's current status.
    #[error("Invalid status transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Another writer kept changing the order while this one retried.
    #[error("Concurrent update conflict for order {order_id} at version {version}")]
    VersionConflict { order_id: OrderId, version: u64 },

    /// The order request is not valid.
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// A stored row could not be decoded.
    #[error("Corrupt order row {order_id}: {reason}")]
    Corrupt { order_id: OrderId, reason: String },

    /// Publishing to the event bus failed.
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderStoreError>;
