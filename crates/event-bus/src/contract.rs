//! Topics and JSON payloads exchanged between the fulfillment services.
//!
//! Field names follow the wire schema (`order_id`, `product_id`, ...). The
//! `action` of an [`InventoryStatus`] is carried as a plain string: the order
//! service maps it onto its own status vocabulary through a translation
//! table instead of sharing the inventory service's enum.

use common::{CustomerId, OrderId, ProductId};
use serde::{Deserialize, Serialize};

/// Names of the topics the services exchange messages on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Order creations and cancellations, keyed by product.
    pub order_events: String,
    /// Reservation outcomes, keyed by order.
    pub inventory_status: String,
    /// Low-stock crossings, keyed by product.
    pub low_stock: String,
    /// Ship requests, keyed by order.
    pub ship_requests: String,
    /// Customer-facing order updates, keyed by order.
    pub order_notices: String,
    /// Messages that could not be processed.
    pub dead_letters: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            order_events: "order-events".to_string(),
            inventory_status: "inventory-status".to_string(),
            low_stock: "low-stock-notifications".to_string(),
            ship_requests: "shipping-status".to_string(),
            order_notices: "order-notifications".to_string(),
            dead_letters: "dead-letters".to_string(),
        }
    }
}

/// What an [`OrderEvent`] asks the inventory service to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderAction {
    /// Reserve stock for a newly placed order.
    Create,
    /// Release the stock reserved for an order.
    Cancel,
}

/// Published on `order-events` by the order service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub action: OrderAction,
}

impl OrderEvent {
    /// Creates a `create` event for an order.
    pub fn create(order_id: OrderId, product_id: ProductId, quantity: u32) -> Self {
        Self {
            order_id,
            product_id,
            quantity,
            action: OrderAction::Create,
        }
    }

    /// Creates a `cancel` event for an order.
    pub fn cancel(order_id: OrderId, product_id: ProductId, quantity: u32) -> Self {
        Self {
            order_id,
            product_id,
            quantity,
            action: OrderAction::Cancel,
        }
    }

    /// Partition key: all events for one product land on one partition, so
    /// reservations against the same stock row are consumed in order.
    pub fn key(&self) -> String {
        self.product_id.to_string()
    }
}

/// Outcome of a reservation as named by the inventory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InventoryOutcome {
    ReadyForShipping,
    OutOfStock,
    Cancelled,
}

impl InventoryOutcome {
    /// Returns the wire spelling of the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryOutcome::ReadyForShipping => "ReadyForShipping",
            InventoryOutcome::OutOfStock => "OutOfStock",
            InventoryOutcome::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for InventoryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Published on `inventory-status` by the inventory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryStatus {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub action: String,
}

impl InventoryStatus {
    /// Creates a status message for the given outcome.
    pub fn new(
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
        outcome: InventoryOutcome,
    ) -> Self {
        Self {
            order_id,
            product_id,
            quantity,
            action: outcome.as_str().to_string(),
        }
    }

    /// Partition key: the order, so every status for one order is ordered.
    pub fn key(&self) -> String {
        self.order_id.to_string()
    }
}

/// Published on `low-stock-notifications` when a reservation leaves a
/// product at or below its threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockNotification {
    pub product_id: ProductId,
    pub quantity: i64,
    pub low_stock_threshold: i64,
}

impl LowStockNotification {
    /// Partition key: the product.
    pub fn key(&self) -> String {
        self.product_id.to_string()
    }
}

/// The only action a ship request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShipAction {
    Ship,
}

/// Published on the ship-request channel by the order service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipRequest {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub action: ShipAction,
}

impl ShipRequest {
    /// Creates a ship request for an order.
    pub fn new(order_id: OrderId, product_id: ProductId, quantity: u32) -> Self {
        Self {
            order_id,
            product_id,
            quantity,
            action: ShipAction::Ship,
        }
    }

    /// Partition key: the order.
    pub fn key(&self) -> String {
        self.order_id.to_string()
    }
}

/// Published on `order-notifications` by the order service when an order
/// is shipped or cancelled, so the customer can be told.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNotice {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    /// The order's new status in the order service's vocabulary.
    pub status: String,
}

impl OrderNotice {
    /// Partition key: the order.
    pub fn key(&self) -> String {
        self.order_id.to_string()
    }
}
