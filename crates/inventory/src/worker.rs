//! Consumes `order-events` and turns them into stock changes.

use async_trait::async_trait;
use event_bus::{
    Delivery, EventBus, EventBusExt, HandlerError, InventoryStatus, LowStockNotification,
    MessageHandler, OrderAction, OrderEvent, Topics,
};

use crate::ledger::{LedgerUpdate, StockLedger};
use crate::StockError;

/// Reserves or releases stock for each order event, then reports the
/// outcome on `inventory-status`.
///
/// A reservation that takes a product to or below its threshold also emits
/// one low-stock notification. The ledger keeps that notification owed until
/// it has been published, so a retry after a failed publish still sends it.
/// Redelivered events replay the recorded outcome: the status is published
/// again, stock is not touched.
pub struct ReservationWorker<B, L> {
    bus: B,
    ledger: L,
    topics: Topics,
}

impl<B, L> ReservationWorker<B, L>
where
    B: EventBus,
    L: StockLedger,
{
    pub fn new(bus: B, ledger: L, topics: Topics) -> Self {
        Self { bus, ledger, topics }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id, product_id = %event.product_id))]
    async fn apply(&self, event: &OrderEvent) -> Result<LedgerUpdate, HandlerError> {
        let result = match event.action {
            OrderAction::Create => {
                self.ledger
                    .reserve(event.order_id, event.product_id, event.quantity)
                    .await
            }
            OrderAction::Cancel => {
                self.ledger
                    .release(event.order_id, event.product_id, event.quantity)
                    .await
            }
        };

        result.map_err(handler_error)
    }
}

fn handler_error(e: StockError) -> HandlerError {
    match e {
        StockError::UnknownProduct(_)
        | StockError::CorruptReservation { .. }
        | StockError::ProductMismatch { .. } => HandlerError::unrecoverable(e.to_string()),
        StockError::InvalidStock { .. } => HandlerError::malformed(e.to_string()),
        StockError::Database(_) => HandlerError::transient(e.to_string()),
    }
}

#[async_trait]
impl<B, L> MessageHandler for ReservationWorker<B, L>
where
    B: EventBus,
    L: StockLedger,
{
    fn name(&self) -> &str {
        "inventory-reservation"
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let event: OrderEvent = delivery.decode()?;
        if event.quantity == 0 {
            return Err(HandlerError::malformed(format!(
                "order {} has zero quantity",
                event.order_id
            )));
        }

        let update = self.apply(&event).await?;
        if update.replayed {
            tracing::info!(
                order_id = %event.order_id,
                outcome = %update.outcome,
                "order already handled, replaying outcome"
            );
        } else {
            metrics::counter!(
                "inventory_reservations_total",
                "outcome" => update.outcome.as_str()
            )
            .increment(1);
            tracing::info!(
                order_id = %event.order_id,
                product_id = %event.product_id,
                outcome = %update.outcome,
                remaining = update.stock.quantity,
                "stock updated"
            );
        }

        let status = InventoryStatus::new(
            event.order_id,
            event.product_id,
            event.quantity,
            update.outcome,
        );
        self.bus
            .publish_json(&self.topics.inventory_status, &status.key(), &status)
            .await?;

        if update.low_stock_crossed {
            let notification = LowStockNotification {
                product_id: update.stock.product_id,
                quantity: update.stock.quantity,
                low_stock_threshold: update.stock.low_stock_threshold,
            };
            self.bus
                .publish_json(&self.topics.low_stock, &notification.key(), &notification)
                .await?;
            self.ledger
                .low_stock_notified(event.order_id)
                .await
                .map_err(handler_error)?;
            metrics::counter!("low_stock_notifications_total").increment(1);
            tracing::warn!(
                product_id = %notification.product_id,
                quantity = notification.quantity,
                threshold = notification.low_stock_threshold,
                "product crossed low-stock threshold"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryStockLedger, StockRecord};
    use common::{OrderId, ProductId};
    use event_bus::{FailureKind, InMemoryEventBus, InventoryOutcome};
    use futures_util::StreamExt;

    type Worker = ReservationWorker<InMemoryEventBus, InMemoryStockLedger>;

    async fn setup(quantity: i64, threshold: i64) -> (InMemoryEventBus, Worker) {
        let bus = InMemoryEventBus::new();
        let ledger = InMemoryStockLedger::new();
        ledger
            .upsert_stock(StockRecord::new(ProductId::new(7), quantity, threshold).unwrap())
            .await
            .unwrap();
        let worker = ReservationWorker::new(bus.clone(), ledger, Topics::default());
        (bus, worker)
    }

    async fn deliver(bus: &InMemoryEventBus, event: &OrderEvent) -> Delivery {
        bus.publish_json("order-events", &event.key(), event).await.unwrap();
        let mut stream = bus.subscribe("order-events", "inventory").await.unwrap();
        stream.next().await.unwrap().unwrap()
    }

    async fn handle(
        bus: &InMemoryEventBus,
        worker: &Worker,
        event: OrderEvent,
    ) -> Result<(), HandlerError> {
        let delivery = deliver(bus, &event).await;
        let result = worker.handle(&delivery).await;
        delivery.ack().await.unwrap();
        result
    }

    #[tokio::test]
    async fn test_reservation_publishes_ready_for_shipping() {
        let (bus, worker) = setup(10, 3).await;
        handle(&bus, &worker, OrderEvent::create(OrderId::new(42), ProductId::new(7), 5))
            .await
            .unwrap();

        let statuses: Vec<InventoryStatus> = bus.decoded("inventory-status").await.unwrap();
        assert_eq!(
            statuses,
            vec![InventoryStatus::new(
                OrderId::new(42),
                ProductId::new(7),
                5,
                InventoryOutcome::ReadyForShipping
            )]
        );
        assert_eq!(bus.message_count("low-stock-notifications").await, 0);
        let stock = worker.ledger().stock(ProductId::new(7)).await.unwrap().unwrap();
        assert_eq!(stock.quantity, 5);
    }

    #[tokio::test]
    async fn test_out_of_stock_leaves_quantity() {
        let (bus, worker) = setup(3, 1).await;
        handle(&bus, &worker, OrderEvent::create(OrderId::new(1), ProductId::new(7), 4))
            .await
            .unwrap();

        let statuses: Vec<InventoryStatus> = bus.decoded("inventory-status").await.unwrap();
        assert_eq!(statuses[0].action, "OutOfStock");
        let stock = worker.ledger().stock(ProductId::new(7)).await.unwrap().unwrap();
        assert_eq!(stock.quantity, 3);
    }

    #[tokio::test]
    async fn test_low_stock_crossing_notifies_once() {
        let (bus, worker) = setup(3, 5).await;
        handle(&bus, &worker, OrderEvent::create(OrderId::new(1), ProductId::new(7), 2))
            .await
            .unwrap();
        handle(&bus, &worker, OrderEvent::create(OrderId::new(2), ProductId::new(7), 1))
            .await
            .unwrap();

        let notifications: Vec<LowStockNotification> =
            bus.decoded("low-stock-notifications").await.unwrap();
        assert_eq!(
            notifications,
            vec![LowStockNotification {
                product_id: ProductId::new(7),
                quantity: 1,
                low_stock_threshold: 5,
            }]
        );
    }

    #[tokio::test]
    async fn test_redelivered_create_republishes_status_only() {
        let (bus, worker) = setup(3, 5).await;
        let event = OrderEvent::create(OrderId::new(1), ProductId::new(7), 2);
        let delivery = deliver(&bus, &event).await;

        worker.handle(&delivery).await.unwrap();
        worker.handle(&delivery).await.unwrap();

        assert_eq!(bus.message_count("inventory-status").await, 2);
        assert_eq!(bus.message_count("low-stock-notifications").await, 1);
        let stock = worker.ledger().stock(ProductId::new(7)).await.unwrap().unwrap();
        assert_eq!(stock.quantity, 1);
    }

    #[tokio::test]
    async fn test_redelivered_cancel_restocks_once() {
        let (bus, worker) = setup(10, 3).await;
        handle(&bus, &worker, OrderEvent::create(OrderId::new(1), ProductId::new(7), 4))
            .await
            .unwrap();

        let cancel = OrderEvent::cancel(OrderId::new(1), ProductId::new(7), 4);
        let delivery = deliver(&bus, &cancel).await;
        worker.handle(&delivery).await.unwrap();
        worker.handle(&delivery).await.unwrap();

        let stock = worker.ledger().stock(ProductId::new(7)).await.unwrap().unwrap();
        assert_eq!(stock.quantity, 10);
        let statuses: Vec<InventoryStatus> = bus.decoded("inventory-status").await.unwrap();
        assert_eq!(statuses.last().unwrap().action, "Cancelled");
    }

    #[tokio::test]
    async fn test_cancel_naming_other_product_is_unrecoverable() {
        let (bus, worker) = setup(10, 3).await;
        worker
            .ledger()
            .upsert_stock(StockRecord::new(ProductId::new(8), 10, 3).unwrap())
            .await
            .unwrap();
        handle(&bus, &worker, OrderEvent::create(OrderId::new(1), ProductId::new(7), 5))
            .await
            .unwrap();

        let err = handle(&bus, &worker, OrderEvent::cancel(OrderId::new(1), ProductId::new(8), 5))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::Unrecoverable);
        let reserved = worker.ledger().stock(ProductId::new(7)).await.unwrap().unwrap();
        let other = worker.ledger().stock(ProductId::new(8)).await.unwrap().unwrap();
        assert_eq!((reserved.quantity, other.quantity), (5, 10));
        assert_eq!(bus.message_count("inventory-status").await, 1);
    }

    #[tokio::test]
    async fn test_unknown_product_is_unrecoverable() {
        let (bus, worker) = setup(10, 3).await;
        let err = handle(&bus, &worker, OrderEvent::create(OrderId::new(1), ProductId::new(99), 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Unrecoverable);
        assert_eq!(bus.message_count("inventory-status").await, 0);
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let (bus, worker) = setup(10, 3).await;
        bus.publish("order-events", "7", br#"{"order_id":"x"}"#.to_vec())
            .await
            .unwrap();
        let mut stream = bus.subscribe("order-events", "inventory").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();

        let err = worker.handle(&delivery).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Malformed);
    }
}
