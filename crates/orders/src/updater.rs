//! Consumes `inventory-status` and moves orders accordingly.

use std::time::Duration;

use async_trait::async_trait;
use event_bus::{
    Delivery, EventBus, EventBusExt, FailureKind, HandlerError, InventoryStatus, MessageHandler,
    RetryPolicy, ShipRequest, retry_with_backoff,
};

use crate::order::Order;
use crate::service::OrderService;
use crate::status::{OrderStatus, StatusSource, Transition};
use crate::store::OrderStore;
use crate::translation::INVENTORY_STATUS_V1;
use crate::OrderStoreError;

/// Default lookup policy: three attempts two seconds apart.
pub fn default_lookup_policy() -> RetryPolicy {
    RetryPolicy::fixed(3, Duration::from_secs(2))
}

/// Applies inventory outcomes to orders and requests shipment of orders
/// that are ready.
///
/// The inventory outcome can arrive before the order is readable here, so
/// the lookup is retried under `lookup_policy` before the message is given
/// up as not yet visible.
pub struct StatusUpdater<S, B> {
    service: OrderService<S, B>,
    lookup_policy: RetryPolicy,
}

impl<S, B> StatusUpdater<S, B>
where
    S: OrderStore,
    B: EventBus,
{
    pub fn new(service: OrderService<S, B>) -> Self {
        Self {
            service,
            lookup_policy: default_lookup_policy(),
        }
    }

    pub fn with_lookup_policy(mut self, lookup_policy: RetryPolicy) -> Self {
        self.lookup_policy = lookup_policy;
        self
    }

    async fn find_order(&self, status: &InventoryStatus) -> Result<Order, HandlerError> {
        let order_id = status.order_id;
        retry_with_backoff(
            &self.lookup_policy,
            |e: &HandlerError| e.kind == FailureKind::NotYetVisible,
            move |attempt| async move {
                if attempt > 0 {
                    metrics::counter!("order_lookup_retries_total").increment(1);
                }
                match self.service.get_order(order_id).await {
                    Ok(Some(order)) => Ok(order),
                    Ok(None) => Err(HandlerError::not_yet_visible(format!(
                        "order {order_id} not found"
                    ))),
                    Err(e) => Err(HandlerError::transient(e.to_string())),
                }
            },
        )
        .await
    }

    async fn request_shipment(&self, order: &Order) -> Result<(), HandlerError> {
        let request = ShipRequest::new(order.id, order.product_id, order.quantity);
        self.service
            .bus()
            .publish_json(&self.service.topics().ship_requests, &request.key(), &request)
            .await?;
        tracing::info!(order_id = %order.id, "shipment requested");
        Ok(())
    }
}

#[async_trait]
impl<S, B> MessageHandler for StatusUpdater<S, B>
where
    S: OrderStore,
    B: EventBus,
{
    fn name(&self) -> &str {
        "order-status-updater"
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let status: InventoryStatus = delivery.decode()?;
        let target = INVENTORY_STATUS_V1
            .translate(&status.action)
            .map_err(|e| HandlerError::malformed(e.to_string()))?;

        let order = self.find_order(&status).await?;
        if order.product_id != status.product_id {
            tracing::warn!(
                order_id = %order.id,
                ordered = %order.product_id,
                reported = %status.product_id,
                "inventory status names a different product"
            );
        }

        let change = self
            .service
            .apply_status(order.id, target, StatusSource::Inventory)
            .await
            .map_err(|e| match e {
                OrderStoreError::NotFound(_) => HandlerError::not_yet_visible(e.to_string()),
                OrderStoreError::InvalidTransition { .. } => {
                    HandlerError::unrecoverable(e.to_string())
                }
                _ => HandlerError::transient(e.to_string()),
            })?;

        // Re-request shipment on replays too: the earlier attempt may have
        // stopped between the status write and the publish.
        let ready = target == OrderStatus::ReadyForShipping
            && matches!(
                change.transition,
                Transition::Apply | Transition::AlreadyApplied
            );
        if ready {
            self.request_shipment(&change.order).await?;
        }

        Ok(())
    }
}
