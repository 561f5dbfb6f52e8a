//! `fulfillment` entry point.

use api::{Backends, Config, build_router, spawn_workers};
use event_bus::{EventBus, InMemoryEventBus, PostgresEventBus};
use inventory::{InMemoryStockLedger, PostgresStockLedger, StockLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use shipping::{InMemoryShippingStore, PostgresShippingStore, ShippingStore};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Serves HTTP and runs the role's workers until a shutdown signal, then
/// drains the workers.
async fn run<B, OS, SL, SS>(
    config: Config,
    backends: Backends<B, OS, SL, SS>,
    metrics_handle: PrometheusHandle,
) where
    B: EventBus + Clone + 'static,
    OS: OrderStore + Clone + 'static,
    SL: StockLedger + Clone + 'static,
    SS: ShippingStore + Clone + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers =
        spawn_workers(&config, &backends, shutdown_rx).expect("failed to start workers");
    let app = build_router(&config, &backends, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, role = config.role.as_str(), "starting fulfillment server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Workers finish their in-flight message and stop pulling.
    let _ = shutdown_tx.send(true);
    workers.join().await;
}

#[tokio::main]
async fn main() {
    // 1. Load configuration
    let config = Config::from_env().expect("invalid configuration");

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Pick backends and run
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(20)
                .connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");

            let bus = PostgresEventBus::new(pool.clone(), config.partitions);
            let orders = PostgresOrderStore::new(pool.clone());
            let ledger = PostgresStockLedger::new(pool.clone());
            let shipments = PostgresShippingStore::new(pool);
            bus.ensure_schema().await.expect("failed to create bus tables");
            orders.ensure_schema().await.expect("failed to create order tables");
            ledger.ensure_schema().await.expect("failed to create stock tables");
            shipments
                .ensure_schema()
                .await
                .expect("failed to create shipping tables");

            tracing::info!("using PostgreSQL backends");
            let backends = Backends {
                bus,
                orders,
                ledger,
                shipments,
            };
            run(config, backends, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory backends");
            let backends = Backends {
                bus: InMemoryEventBus::with_partitions(config.partitions),
                orders: InMemoryOrderStore::new(),
                ledger: InMemoryStockLedger::new(),
                shipments: InMemoryShippingStore::new(),
            };
            run(config, backends, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
