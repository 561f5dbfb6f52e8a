//! Reservation worker driven through the consumer loop, including dead
//! letters and redelivery after a simulated crash.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, ProductId};
use event_bus::{
    BusError, Consumer, DeadLetter, EventBus, EventBusExt, FailureKind, InMemoryEventBus,
    InventoryStatus, LowStockNotification, MessageHandler, MessageStream, OrderEvent, RetryPolicy,
    Topics,
};
use futures_util::StreamExt;
use inventory::{InMemoryStockLedger, ReservationWorker, StockLedger, StockRecord};
use tokio::sync::watch;

async fn seeded_ledger(stock: &[(u64, i64, i64)]) -> InMemoryStockLedger {
    let ledger = InMemoryStockLedger::new();
    for &(product, quantity, threshold) in stock {
        ledger
            .upsert_stock(StockRecord::new(ProductId::new(product), quantity, threshold).unwrap())
            .await
            .unwrap();
    }
    ledger
}

/// Bus that refuses the first publishes to chosen topics, as a broker
/// outage would.
#[derive(Clone)]
struct FlakyBus {
    inner: InMemoryEventBus,
    failures: Arc<Mutex<HashMap<String, u32>>>,
}

impl FlakyBus {
    fn new(inner: InMemoryEventBus, failing: &[(&str, u32)]) -> Self {
        let failures = failing
            .iter()
            .map(|&(topic, count)| (topic.to_string(), count))
            .collect();
        Self {
            inner,
            failures: Arc::new(Mutex::new(failures)),
        }
    }
}

#[async_trait]
impl EventBus for FlakyBus {
    fn partitions(&self) -> u32 {
        self.inner.partitions()
    }

    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> event_bus::Result<u64> {
        let refuse = match self.failures.lock().unwrap().get_mut(topic) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };
        if refuse {
            return Err(BusError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.publish(topic, key, payload).await
    }

    async fn subscribe_partitions(
        &self,
        topic: &str,
        group: &str,
        partitions: &[u32],
    ) -> event_bus::Result<MessageStream> {
        self.inner.subscribe_partitions(topic, group, partitions).await
    }
}

/// Runs one low-stock-crossing create through the consumer while `failing`
/// topics refuse their first publishes.
async fn cross_threshold_with_failures(failing: &[(&str, u32)]) -> (InMemoryEventBus, InMemoryStockLedger) {
    let bus = InMemoryEventBus::new();
    let ledger = seeded_ledger(&[(7, 3, 5)]).await;
    let flaky = FlakyBus::new(bus.clone(), failing);
    let worker = ReservationWorker::new(flaky.clone(), ledger.clone(), Topics::default());
    let consumer = Consumer::new(flaky, "order-events", "inventory", "dead-letters", worker)
        .with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(1)));

    let event = OrderEvent::create(OrderId::new(42), ProductId::new(7), 2);
    bus.publish_json("order-events", &event.key(), &event)
        .await
        .unwrap();
    let mut stream = bus.subscribe("order-events", "inventory").await.unwrap();
    consumer.process(stream.next().await.unwrap().unwrap()).await;

    (bus, ledger)
}

#[tokio::test]
async fn failed_status_publish_still_notifies_low_stock() {
    let (bus, ledger) = cross_threshold_with_failures(&[("inventory-status", 1)]).await;

    let stock = ledger.stock(ProductId::new(7)).await.unwrap().unwrap();
    assert_eq!(stock.quantity, 1);
    assert_eq!(bus.message_count("inventory-status").await, 1);
    assert_eq!(bus.message_count("low-stock-notifications").await, 1);
    assert_eq!(bus.message_count("dead-letters").await, 0);
    assert_eq!(bus.pending("order-events", "inventory").await, 0);
}

#[tokio::test]
async fn failed_low_stock_publish_is_retried() {
    let (bus, ledger) = cross_threshold_with_failures(&[("low-stock-notifications", 2)]).await;

    let stock = ledger.stock(ProductId::new(7)).await.unwrap().unwrap();
    assert_eq!(stock.quantity, 1);
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
    let entry = ledger.reservation(OrderId::new(42)).await.unwrap().unwrap();
    assert!(!entry.low_stock_pending);
    assert_eq!(bus.message_count("dead-letters").await, 0);
}

async fn wait_until_drained(bus: &InMemoryEventBus) {
    for _ in 0..200 {
        if bus.pending("order-events", "inventory").await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("order-events was not drained");
}

#[tokio::test]
async fn scenario_b_emits_exactly_one_low_stock_notification() {
    let bus = InMemoryEventBus::new();
    let ledger = seeded_ledger(&[(7, 3, 5)]).await;
    let worker = ReservationWorker::new(bus.clone(), ledger.clone(), Topics::default());
    let consumer = Consumer::new(bus.clone(), "order-events", "inventory", "dead-letters", worker);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(consumer.run(rx));

    let event = OrderEvent::create(OrderId::new(42), ProductId::new(7), 2);
    bus.publish_json("order-events", &event.key(), &event)
        .await
        .unwrap();
    wait_until_drained(&bus).await;

    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

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
    let statuses: Vec<InventoryStatus> = bus.decoded("inventory-status").await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].action, "ReadyForShipping");
}

#[tokio::test]
async fn unknown_product_goes_to_dead_letters() {
    let bus = InMemoryEventBus::new();
    let ledger = seeded_ledger(&[(7, 10, 3)]).await;
    let worker = ReservationWorker::new(bus.clone(), ledger, Topics::default());
    let consumer = Consumer::new(bus.clone(), "order-events", "inventory", "dead-letters", worker)
        .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(1)));

    let event = OrderEvent::create(OrderId::new(5), ProductId::new(404), 1);
    bus.publish_json("order-events", &event.key(), &event)
        .await
        .unwrap();
    let mut stream = bus.subscribe("order-events", "inventory").await.unwrap();
    consumer.process(stream.next().await.unwrap().unwrap()).await;

    let letters: Vec<DeadLetter> = bus.decoded("dead-letters").await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].kind, FailureKind::Unrecoverable);
    assert_eq!(letters[0].source_topic, "order-events");
    assert_eq!(letters[0].key, "404");
    assert_eq!(bus.pending("order-events", "inventory").await, 0);
}

#[tokio::test]
async fn crash_before_ack_does_not_double_reserve() {
    let bus = InMemoryEventBus::new();
    let ledger = seeded_ledger(&[(7, 10, 0)]).await;
    let worker = ReservationWorker::new(bus.clone(), ledger.clone(), Topics::default());
    let consumer = Consumer::new(bus.clone(), "order-events", "inventory", "dead-letters", worker);

    let event = OrderEvent::create(OrderId::new(1), ProductId::new(7), 4);
    bus.publish_json("order-events", &event.key(), &event)
        .await
        .unwrap();

    // Handle without acknowledging, then lose the in-flight message.
    let mut stream = bus.subscribe("order-events", "inventory").await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    consumer.handler().handle(&first).await.unwrap();
    bus.redeliver_in_flight("order-events", "inventory").await;

    let again = stream.next().await.unwrap().unwrap();
    assert!(again.is_redelivery());
    consumer.process(again).await;

    let stock = ledger.stock(ProductId::new(7)).await.unwrap().unwrap();
    assert_eq!(stock.quantity, 6);
    let statuses: Vec<InventoryStatus> = bus.decoded("inventory-status").await.unwrap();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().all(|s| s.action == "ReadyForShipping"));
    assert_eq!(bus.pending("order-events", "inventory").await, 0);
}

#[tokio::test]
async fn products_on_different_partitions_are_reserved_independently() {
    let bus = InMemoryEventBus::with_partitions(4);
    let ledger = seeded_ledger(&[(1, 5, 0), (2, 5, 0), (3, 5, 0)]).await;

    for order in 0..9u64 {
        let product = order % 3 + 1;
        let event = OrderEvent::create(OrderId::new(order), ProductId::new(product), 1);
        bus.publish_json("order-events", &event.key(), &event)
            .await
            .unwrap();
    }

    let (tx, rx) = watch::channel(false);
    let mut handles = Vec::new();
    for partitions in [vec![0, 1], vec![2, 3]] {
        let worker = ReservationWorker::new(bus.clone(), ledger.clone(), Topics::default());
        let consumer =
            Consumer::new(bus.clone(), "order-events", "inventory", "dead-letters", worker)
                .with_partitions(partitions);
        handles.push(tokio::spawn(consumer.run(rx.clone())));
    }

    wait_until_drained(&bus).await;
    tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for product in 1..=3 {
        let stock = ledger.stock(ProductId::new(product)).await.unwrap().unwrap();
        assert_eq!(stock.quantity, 2);
    }
}
