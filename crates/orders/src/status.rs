//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order.
///
/// ```text
/// Pending ──┬──► ReadyForShipping ──► Shipped
///           │          │
///           ├──► OutOfStock
///           │          │
///           └──────────┴──► Cancelled
/// ```
///
/// Status updates reach an order over two independent paths (the inventory
/// outcome and the shipping callback), possibly more than once and out of
/// order. [`OrderStatus::classify`] makes every update idempotent and
/// order-insensitive: a repeated target is a no-op, a target that a later
/// status already supersedes is a no-op, and only contradictions are
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Placed, waiting for the inventory outcome.
    #[default]
    Pending,
    /// Stock reserved, waiting for shipment.
    ReadyForShipping,
    /// Not enough stock (terminal).
    OutOfStock,
    /// Shipped (terminal).
    Shipped,
    /// Cancelled (terminal).
    Cancelled,
}

/// How a requested status relates to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// A forward move; the status changes.
    Apply,
    /// The order already has the requested status.
    AlreadyApplied,
    /// The order has moved past the requested status; nothing to do.
    Superseded,
    /// The requested status contradicts the current one.
    Rejected,
}

impl Transition {
    /// True unless the update was rejected.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Transition::Rejected)
    }
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::ReadyForShipping,
        OrderStatus::OutOfStock,
        OrderStatus::Shipped,
        OrderStatus::Cancelled,
    ];

    /// Classifies a request to move from `self` to `target`.
    pub fn classify(self, target: OrderStatus) -> Transition {
        use OrderStatus::*;

        if self == target {
            return Transition::AlreadyApplied;
        }
        match (self, target) {
            (Pending, ReadyForShipping | OutOfStock | Cancelled) => Transition::Apply,
            (ReadyForShipping, Shipped | Cancelled) => Transition::Apply,
            (Shipped, ReadyForShipping) => Transition::Superseded,
            (OutOfStock, Cancelled) => Transition::Superseded,
            (Cancelled, ReadyForShipping | OutOfStock) => Transition::Superseded,
            _ => Transition::Rejected,
        }
    }

    /// Returns true if the order can still be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::ReadyForShipping)
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::OutOfStock | OrderStatus::Shipped | OrderStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::ReadyForShipping => "ReadyForShipping",
            OrderStatus::OutOfStock => "OutOfStock",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Parses the stored spelling produced by [`OrderStatus::as_str`].
    pub fn from_stored(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which path asked for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    /// The inventory-status consumer.
    Inventory,
    /// The shipping service's HTTP callback.
    ShippingCallback,
}

impl StatusSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusSource::Inventory => "inventory",
            StatusSource::ShippingCallback => "shipping_callback",
        }
    }

    pub fn from_stored(value: &str) -> Option<Self> {
        match value {
            "inventory" => Some(StatusSource::Inventory),
            "shipping_callback" => Some(StatusSource::ShippingCallback),
            _ => None,
        }
    }
}
