use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, ProductId};
use serde::{Deserialize, Serialize};

use crate::status::{OrderStatus, StatusSource, Transition};
use crate::{OrderStoreError, Result};

/// A request to place an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub product_id: ProductId,
    pub quantity: u32,
    pub customer_id: CustomerId,
}

impl NewOrder {
    pub fn validate(&self) -> Result<()> {
        if self.quantity == 0 {
            return Err(OrderStoreError::InvalidOrder(
                "quantity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// An order as owned by the order service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    /// The path that applied the current status, if any has.
    pub status_source: Option<StatusSource>,
    /// Number of status changes applied so far.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a pending order.
    pub fn new(id: OrderId, request: NewOrder) -> Self {
        let now = Utc::now();
        Self {
            id,
            product_id: request.product_id,
            quantity: request.quantity,
            customer_id: request.customer_id,
            status: OrderStatus::Pending,
            status_source: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the order towards `target`.
    ///
    /// Changes the order and bumps its version only when the transition is
    /// [`Transition::Apply`]; contradictions are returned as errors.
    pub fn transition_to(&mut self, target: OrderStatus, source: StatusSource) -> Result<Transition> {
        let transition = self.status.classify(target);
        match transition {
            Transition::Apply => {
                self.status = target;
                self.status_source = Some(source);
                self.version += 1;
                self.updated_at = Utc::now();
            }
            Transition::Rejected => {
                return Err(OrderStoreError::InvalidTransition {
                    order_id: self.id,
                    from: self.status,
                    to: target,
                });
            }
            Transition::AlreadyApplied | Transition::Superseded => {}
        }
        Ok(transition)
    }
}

/// The outcome of a status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// The order after the update.
    pub order: Order,
    /// The status before the update.
    pub previous: OrderStatus,
    pub transition: Transition,
}
