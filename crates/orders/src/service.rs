use common::OrderId;
use event_bus::{EventBus, EventBusExt, OrderEvent, OrderNotice, Topics};

use crate::order::{NewOrder, Order, StatusChange};
use crate::status::{OrderStatus, StatusSource, Transition};
use crate::store::OrderStore;
use crate::{OrderStoreError, Result};

/// Application service for orders: intake, cancellation and status updates.
///
/// Both status writers (the inventory-status consumer and the shipping
/// callback) go through [`OrderService::apply_status`].
#[derive(Debug, Clone)]
pub struct OrderService<S, B> {
    store: S,
    bus: B,
    topics: Topics,
}

impl<S, B> OrderService<S, B>
where
    S: OrderStore,
    B: EventBus,
{
    pub fn new(store: S, bus: B, topics: Topics) -> Self {
        Self { store, bus, topics }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Stores a pending order and asks inventory to reserve stock for it.
    #[tracing::instrument(skip(self))]
    pub async fn place_order(&self, request: NewOrder) -> Result<Order> {
        request.validate()?;
        let id = self.store.next_id().await?;
        let order = Order::new(id, request);
        self.store.insert(&order).await?;

        let event = OrderEvent::create(order.id, order.product_id, order.quantity);
        self.bus
            .publish_json(&self.topics.order_events, &event.key(), &event)
            .await?;

        tracing::info!(order_id = %order.id, product_id = %order.product_id, quantity = order.quantity, "order placed");
        Ok(order)
    }

    /// Loads an order.
    pub async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        self.store.get(id).await
    }

    /// Asks inventory to release an order's stock.
    ///
    /// The order becomes `Cancelled` once inventory confirms. Cancelling an
    /// already cancelled order publishes the request again, which inventory
    /// treats as a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, id: OrderId) -> Result<Order> {
        let order = self.store.get(id).await?.ok_or(OrderStoreError::NotFound(id))?;
        if !order.status.can_cancel() && order.status != OrderStatus::Cancelled {
            return Err(OrderStoreError::InvalidTransition {
                order_id: id,
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        let event = OrderEvent::cancel(order.id, order.product_id, order.quantity);
        self.bus
            .publish_json(&self.topics.order_events, &event.key(), &event)
            .await?;

        tracing::info!(order_id = %order.id, "order cancellation requested");
        Ok(order)
    }

    /// Applies a status change from either writer.
    ///
    /// An order that is (or already was) shipped or cancelled by this change
    /// also gets a customer notice. Replays publish the notice again, so a
    /// notice lost to a failed publish is sent on the retry.
    #[tracing::instrument(skip(self))]
    pub async fn apply_status(
        &self,
        id: OrderId,
        target: OrderStatus,
        source: StatusSource,
    ) -> Result<StatusChange> {
        let change = self.store.apply_status(id, target, source).await?;

        match change.transition {
            Transition::Apply => {
                metrics::counter!("order_status_updates_total", "status" => target.as_str())
                    .increment(1);
                tracing::info!(
                    order_id = %id,
                    from = %change.previous,
                    to = %target,
                    source = source.as_str(),
                    version = change.order.version,
                    "order status updated"
                );
            }
            Transition::AlreadyApplied | Transition::Superseded => {
                tracing::debug!(
                    order_id = %id,
                    current = %change.order.status,
                    requested = %target,
                    transition = ?change.transition,
                    "order status unchanged"
                );
            }
            Transition::Rejected => {}
        }

        let settled = matches!(change.transition, Transition::Apply | Transition::AlreadyApplied);
        if settled && matches!(target, OrderStatus::Shipped | OrderStatus::Cancelled) {
            self.notify_customer(&change.order).await?;
        }

        Ok(change)
    }

    async fn notify_customer(&self, order: &Order) -> Result<()> {
        let notice = OrderNotice {
            order_id: order.id,
            customer_id: order.customer_id,
            status: order.status.as_str().to_string(),
        };
        self.bus
            .publish_json(&self.topics.order_notices, &notice.key(), &notice)
            .await?;
        Ok(())
    }
}
