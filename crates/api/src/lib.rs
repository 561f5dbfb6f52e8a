//! The `fulfillment` process: the order service's HTTP surface and the
//! saga workers, wired per [`ServiceRole`].
//!
//! Every role serves `/health` and `/metrics`. The order role adds the
//! order routes, including the status callback the shipping service calls;
//! the inventory role adds stock administration.

pub mod config;
pub mod error;
pub mod routes;
pub mod workers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use event_bus::EventBus;
use inventory::StockLedger;
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{OrderService, OrderStore};
use shipping::ShippingStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError, ServiceRole};
pub use workers::{Backends, Workers, spawn_workers};

/// Creates the Axum application router around the role's service routes.
pub fn create_app(role: ServiceRole, metrics_handle: PrometheusHandle, services: Router) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);
    let health_router = Router::new()
        .route("/health", get(routes::health::check))
        .with_state(role);

    services
        .merge(health_router)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Order intake and the shipping status callback.
pub fn order_routes<S, B>(service: OrderService<S, B>) -> Router
where
    S: OrderStore + 'static,
    B: EventBus + 'static,
{
    Router::new()
        .route("/orders", post(routes::orders::create::<S, B>))
        .route("/orders/{id}", get(routes::orders::get::<S, B>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S, B>))
        .route("/orders/{id}/status", put(routes::orders::update_status::<S, B>))
        .with_state(Arc::new(service))
}

/// Stock administration.
pub fn stock_routes<L>(ledger: L) -> Router
where
    L: StockLedger + Clone + 'static,
{
    Router::new()
        .route(
            "/inventory/stocks/{product_id}",
            get(routes::stock::get::<L>).put(routes::stock::set::<L>),
        )
        .with_state(ledger)
}

/// Builds the full router for `config.role` over the given backends.
pub fn build_router<B, OS, SL, SS>(
    config: &Config,
    backends: &Backends<B, OS, SL, SS>,
    metrics_handle: PrometheusHandle,
) -> Router
where
    B: EventBus + Clone + 'static,
    OS: OrderStore + Clone + 'static,
    SL: StockLedger + Clone + 'static,
    SS: ShippingStore + Clone + 'static,
{
    let mut services = Router::new();
    if config.role.runs_orders() {
        services = services.merge(order_routes(OrderService::new(
            backends.orders.clone(),
            backends.bus.clone(),
            config.topics.clone(),
        )));
    }
    if config.role.runs_inventory() {
        services = services.merge(stock_routes(backends.ledger.clone()));
    }
    create_app(config.role, metrics_handle, services)
}
