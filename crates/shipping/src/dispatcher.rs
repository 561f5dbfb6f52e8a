//! Consumes ship requests, records shipments and confirms them with the
//! order service.

use async_trait::async_trait;
use event_bus::{
    DeadLetter, Delivery, EventBus, EventBusExt, FailureKind, HandlerError, MessageHandler,
    ShipRequest, Topics,
};

use crate::ShippingError;
use crate::client::OrderStatusClient;
use crate::record::ShippingRecord;
use crate::store::ShippingStore;

/// Creates one shipment per order and calls back into the order service.
///
/// A failed callback does not fail the message: the shipment stays
/// unconfirmed, a dead letter is published for the reconciliation path and
/// the request is acknowledged. The [`Reconciler`](crate::Reconciler)
/// retries the callback later, unless the order service refused it with a
/// client error, in which case the shipment is abandoned.
pub struct Dispatcher<S, C, B> {
    store: S,
    client: C,
    bus: B,
    topics: Topics,
}

impl<S, C, B> Dispatcher<S, C, B>
where
    S: ShippingStore,
    C: OrderStatusClient,
    B: EventBus,
{
    pub fn new(store: S, client: C, bus: B, topics: Topics) -> Self {
        Self {
            store,
            client,
            bus,
            topics,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn record(&self, request: &ShipRequest) -> Result<ShippingRecord, HandlerError> {
        let (record, created) = self
            .store
            .record_shipment(request)
            .await
            .map_err(|e| match e {
                ShippingError::Corrupt { .. } => HandlerError::unrecoverable(e.to_string()),
                _ => HandlerError::transient(e.to_string()),
            })?;

        if created {
            metrics::counter!("shipments_created_total").increment(1);
            tracing::info!(
                order_id = %record.order_id,
                shipment_id = %record.id,
                "shipment recorded"
            );
        } else {
            tracing::info!(order_id = %record.order_id, "shipment already recorded");
        }
        Ok(record)
    }

    async fn callback_failed(
        &self,
        delivery: &Delivery,
        record: &ShippingRecord,
        error: ShippingError,
    ) -> Result<(), HandlerError> {
        let reason = error.to_string();
        metrics::counter!("shipping_callbacks_failed_total").increment(1);
        tracing::error!(order_id = %record.order_id, error = %reason, "status callback failed");

        let stored = if error.is_permanent() {
            self.store.abandon_callback(record.order_id, &reason).await
        } else {
            self.store.record_callback_failure(record.order_id, &reason).await
        };
        stored.map_err(|e| HandlerError::transient(e.to_string()))?;

        let letter = DeadLetter::new(
            delivery.topic.clone(),
            delivery.key.clone(),
            delivery.payload_text(),
            FailureKind::Unrecoverable,
            format!("shipment {} recorded but order status not confirmed: {reason}", record.id),
            record.callback_attempts + 1,
        );
        self.bus
            .publish_json(&self.topics.dead_letters, &letter.key, &letter)
            .await?;
        metrics::counter!(
            "dead_letters_total",
            "topic" => delivery.topic.clone(),
            "kind" => FailureKind::Unrecoverable.as_str()
        )
        .increment(1);
        Ok(())
    }
}

#[async_trait]
impl<S, C, B> MessageHandler for Dispatcher<S, C, B>
where
    S: ShippingStore,
    C: OrderStatusClient,
    B: EventBus,
{
    fn name(&self) -> &str {
        "shipping-dispatcher"
    }

    #[tracing::instrument(skip(self, delivery), fields(key = %delivery.key, offset = delivery.offset))]
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let request: ShipRequest = delivery.decode()?;
        if request.quantity == 0 {
            return Err(HandlerError::malformed(format!(
                "ship request for order {} has zero quantity",
                request.order_id
            )));
        }

        let record = self.record(&request).await?;
        if record.callback_confirmed {
            tracing::debug!(order_id = %record.order_id, "order status already confirmed");
            return Ok(());
        }
        if record.callback_abandoned {
            tracing::debug!(order_id = %record.order_id, "order service refused this shipment");
            return Ok(());
        }

        match self.client.mark_shipped(record.order_id).await {
            Ok(()) => {
                self.store
                    .confirm_callback(record.order_id)
                    .await
                    .map_err(|e| HandlerError::transient(e.to_string()))?;
                Ok(())
            }
            Err(e) => self.callback_failed(delivery, &record, e).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryShippingStore;
    use common::{OrderId, ProductId};
    use event_bus::InMemoryEventBus;
    use futures_util::StreamExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct FakeClient {
        calls: Arc<AtomicUsize>,
        reject: Arc<AtomicBool>,
        conflict: Arc<AtomicBool>,
    }

    #[async_trait]
    impl OrderStatusClient for FakeClient {
        async fn mark_shipped(&self, order_id: OrderId) -> crate::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.conflict.load(Ordering::SeqCst) {
                return Err(ShippingError::CallbackRejected {
                    order_id,
                    status: 409,
                    body: "order is cancelled".to_string(),
                });
            }
            if self.reject.load(Ordering::SeqCst) {
                return Err(ShippingError::CallbackRejected {
                    order_id,
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    type TestDispatcher = Dispatcher<InMemoryShippingStore, FakeClient, InMemoryEventBus>;

    fn setup() -> (TestDispatcher, FakeClient, InMemoryEventBus) {
        let bus = InMemoryEventBus::new();
        let client = FakeClient::default();
        let dispatcher = Dispatcher::new(
            InMemoryShippingStore::new(),
            client.clone(),
            bus.clone(),
            Topics::default(),
        );
        (dispatcher, client, bus)
    }

    async fn delivery(bus: &InMemoryEventBus, payload: Vec<u8>) -> Delivery {
        bus.publish("shipping-status", "42", payload).await.unwrap();
        let mut stream = bus.subscribe("shipping-status", "shipping").await.unwrap();
        stream.next().await.unwrap().unwrap()
    }

    fn ship(order: u64) -> Vec<u8> {
        serde_json::to_vec(&ShipRequest::new(OrderId::new(order), ProductId::new(7), 5)).unwrap()
    }

    #[tokio::test]
    async fn test_ship_request_records_and_confirms() {
        let (dispatcher, client, bus) = setup();
        let d = delivery(&bus, ship(42)).await;

        dispatcher.handle(&d).await.unwrap();

        let record = dispatcher.store().get(OrderId::new(42)).await.unwrap().unwrap();
        assert_eq!(record.status, "Shipped");
        assert!(record.callback_confirmed);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.message_count("dead-letters").await, 0);
    }

    #[tokio::test]
    async fn test_redelivered_request_creates_one_record() {
        let (dispatcher, client, bus) = setup();
        let d = delivery(&bus, ship(42)).await;

        dispatcher.handle(&d).await.unwrap();
        dispatcher.handle(&d).await.unwrap();

        assert_eq!(dispatcher.store().len().await, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_callback_is_dead_lettered_and_acked() {
        let (dispatcher, client, bus) = setup();
        client.reject.store(true, Ordering::SeqCst);
        let d = delivery(&bus, ship(42)).await;

        dispatcher.handle(&d).await.unwrap();

        let record = dispatcher.store().get(OrderId::new(42)).await.unwrap().unwrap();
        assert!(!record.callback_confirmed);
        assert_eq!(record.callback_attempts, 1);
        assert!(record.last_callback_error.unwrap().contains("503"));

        let letters: Vec<DeadLetter> = bus.decoded("dead-letters").await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].kind, FailureKind::Unrecoverable);
        assert_eq!(letters[0].source_topic, "shipping-status");
        assert_eq!(letters[0].key, "42");
    }

    #[tokio::test]
    async fn test_redelivery_retries_unconfirmed_callback() {
        let (dispatcher, client, bus) = setup();
        client.reject.store(true, Ordering::SeqCst);
        let d = delivery(&bus, ship(42)).await;
        dispatcher.handle(&d).await.unwrap();

        client.reject.store(false, Ordering::SeqCst);
        dispatcher.handle(&d).await.unwrap();

        let record = dispatcher.store().get(OrderId::new(42)).await.unwrap().unwrap();
        assert!(record.callback_confirmed);
        assert_eq!(dispatcher.store().len().await, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refused_callback_abandons_shipment() {
        let (dispatcher, client, bus) = setup();
        client.conflict.store(true, Ordering::SeqCst);
        let d = delivery(&bus, ship(42)).await;

        dispatcher.handle(&d).await.unwrap();
        dispatcher.handle(&d).await.unwrap();

        let record = dispatcher.store().get(OrderId::new(42)).await.unwrap().unwrap();
        assert!(record.callback_abandoned);
        assert!(!record.callback_confirmed);
        assert!(dispatcher.store().unconfirmed(10).await.unwrap().is_empty());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.message_count("dead-letters").await, 1);
    }

    #[tokio::test]
    async fn test_zero_quantity_is_malformed() {
        let (dispatcher, _, bus) = setup();
        let payload = br#"{"order_id":42,"product_id":7,"quantity":0,"action":"ship"}"#;
        let d = delivery(&bus, payload.to_vec()).await;

        let err = dispatcher.handle(&d).await.unwrap_err();

        assert_eq!(err.kind, FailureKind::Malformed);
        assert!(dispatcher.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_action_is_malformed() {
        let (dispatcher, _, bus) = setup();
        let payload = br#"{"order_id":42,"product_id":7,"quantity":5,"action":"return"}"#;
        let d = delivery(&bus, payload.to_vec()).await;

        let err = dispatcher.handle(&d).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Malformed);
    }
}
