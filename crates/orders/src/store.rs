use async_trait::async_trait;
use common::OrderId;

use crate::Result;
use crate::order::{Order, StatusChange};
use crate::status::{OrderStatus, StatusSource};

/// Durable store of orders, owned by the order service.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Reserves a fresh order id.
    async fn next_id(&self) -> Result<OrderId>;

    /// Stores a new order. Fails if the id is taken.
    async fn insert(&self, order: &Order) -> Result<()>;

    /// Loads an order.
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Moves an order towards `target` under an optimistic version check.
    ///
    /// Repeated and superseded targets succeed without changing the order;
    /// contradicting ones fail with `InvalidTransition` and leave it as is.
    async fn apply_status(
        &self,
        id: OrderId,
        target: OrderStatus,
        source: StatusSource,
    ) -> Result<StatusChange>;
}
