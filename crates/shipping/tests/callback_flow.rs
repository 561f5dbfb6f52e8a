//! Dispatcher and reconciler against a real HTTP order-status endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::put;
use axum::{Json, Router};
use common::{OrderId, ProductId};
use event_bus::{
    Consumer, DeadLetter, EventBusExt, FailureKind, InMemoryEventBus, ShipRequest, Topics,
};
use shipping::{
    Dispatcher, HttpOrderStatusClient, InMemoryShippingStore, OrderStatusClient, Reconciler,
    ShippingError, ShippingStore,
};
use tokio::sync::{Mutex, watch};

#[derive(Clone, Default)]
struct OrderEndpoint {
    calls: Arc<Mutex<Vec<(u64, serde_json::Value)>>>,
    failing: Arc<AtomicBool>,
}

async fn set_status(
    State(endpoint): State<OrderEndpoint>,
    Path(id): Path<u64>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    endpoint.calls.lock().await.push((id, body));
    if endpoint.failing.load(Ordering::SeqCst) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// Starts an order-status endpoint on an ephemeral port.
async fn start_endpoint() -> (OrderEndpoint, String) {
    let endpoint = OrderEndpoint::default();
    let app = Router::new()
        .route("/orders/{id}/status", put(set_status))
        .with_state(endpoint.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (endpoint, format!("http://{addr}"))
}

fn client(base_url: &str) -> HttpOrderStatusClient {
    HttpOrderStatusClient::new(base_url, Duration::from_secs(5)).unwrap()
}

async fn wait_until_drained(bus: &InMemoryEventBus) {
    for _ in 0..200 {
        if bus.pending("shipping-status", "shipping").await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("shipping-status was not drained");
}

#[tokio::test]
async fn http_client_sends_shipped_status() {
    let (endpoint, base_url) = start_endpoint().await;

    client(&base_url).mark_shipped(OrderId::new(42)).await.unwrap();

    let calls = endpoint.calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, 42);
    assert_eq!(calls[0].1, serde_json::json!({"status": "Shipped"}));
}

#[tokio::test]
async fn http_client_treats_non_ok_as_failure() {
    let (endpoint, base_url) = start_endpoint().await;
    endpoint.failing.store(true, Ordering::SeqCst);

    let err = client(&base_url)
        .mark_shipped(OrderId::new(42))
        .await
        .unwrap_err();

    assert!(matches!(err, ShippingError::CallbackRejected { status: 503, .. }));
}

#[tokio::test]
async fn http_client_reports_unreachable_service() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}"))
        .mark_shipped(OrderId::new(1))
        .await
        .unwrap_err();

    assert!(matches!(err, ShippingError::Callback(_)));
}

#[tokio::test]
async fn scenario_c_redelivered_ship_request_yields_one_record() {
    let (endpoint, base_url) = start_endpoint().await;
    let bus = InMemoryEventBus::new();
    let store = InMemoryShippingStore::new();
    let dispatcher = Dispatcher::new(store.clone(), client(&base_url), bus.clone(), Topics::default());
    let consumer = Consumer::new(bus.clone(), "shipping-status", "shipping", "dead-letters", dispatcher);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(consumer.run(rx));

    let request = ShipRequest::new(OrderId::new(42), ProductId::new(7), 5);
    bus.publish_json("shipping-status", &request.key(), &request)
        .await
        .unwrap();
    bus.publish_json("shipping-status", &request.key(), &request)
        .await
        .unwrap();
    wait_until_drained(&bus).await;

    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(store.len().await, 1);
    let record = store.get(OrderId::new(42)).await.unwrap().unwrap();
    assert_eq!(record.status, "Shipped");
    assert!(record.callback_confirmed);
    assert_eq!(endpoint.calls.lock().await.len(), 1);
}

#[tokio::test]
async fn failed_callback_is_reconciled_later() {
    let (endpoint, base_url) = start_endpoint().await;
    endpoint.failing.store(true, Ordering::SeqCst);
    let bus = InMemoryEventBus::new();
    let store = InMemoryShippingStore::new();
    let dispatcher = Dispatcher::new(store.clone(), client(&base_url), bus.clone(), Topics::default());
    let consumer = Consumer::new(bus.clone(), "shipping-status", "shipping", "dead-letters", dispatcher);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(consumer.run(rx));

    let request = ShipRequest::new(OrderId::new(9), ProductId::new(7), 1);
    bus.publish_json("shipping-status", &request.key(), &request)
        .await
        .unwrap();
    wait_until_drained(&bus).await;
    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let letters: Vec<DeadLetter> = bus.decoded("dead-letters").await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].kind, FailureKind::Unrecoverable);
    assert_eq!(store.unconfirmed(10).await.unwrap().len(), 1);

    endpoint.failing.store(false, Ordering::SeqCst);
    let report = Reconciler::new(store.clone(), client(&base_url))
        .sweep()
        .await
        .unwrap();

    assert_eq!(report.confirmed, 1);
    assert!(store.unconfirmed(10).await.unwrap().is_empty());
    assert_eq!(endpoint.calls.lock().await.len(), 2);
}
