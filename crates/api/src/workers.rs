//! Spawns the saga's consumer loops and the shipping reconciler.

use event_bus::{Consumer, EventBus, MessageHandler};
use inventory::{LowStockNotifier, OrderNotifier, ReservationWorker, StockLedger, TracingNotifier};
use orders::{OrderService, OrderStore, StatusUpdater};
use shipping::{Dispatcher, HttpOrderStatusClient, Reconciler, ShippingStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;

/// The bus and the three services' stores.
#[derive(Debug, Clone)]
pub struct Backends<B, OS, SL, SS> {
    pub bus: B,
    pub orders: OS,
    pub ledger: SL,
    pub shipments: SS,
}

/// Handles of the running workers.
#[derive(Debug, Default)]
pub struct Workers {
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Workers {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Names of the running workers, in start order.
    pub fn names(&self) -> Vec<&str> {
        self.handles.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Waits for every worker to finish its in-flight work and stop.
    pub async fn join(self) {
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(worker = %name, error = %e, "worker task panicked");
            }
        }
    }

    /// Starts one consumer per group of `topic`'s partitions, each with a
    /// fresh handler from `make_handler`.
    #[allow(clippy::too_many_arguments)]
    fn spawn_consumers<B, H, F>(
        &mut self,
        bus: &B,
        topic: &str,
        group: &str,
        dead_letters: &str,
        consumers: u32,
        shutdown: &watch::Receiver<bool>,
        mut make_handler: F,
    ) where
        B: EventBus + Clone + 'static,
        H: MessageHandler + 'static,
        F: FnMut() -> H,
    {
        for partitions in partition_groups(bus.partitions(), consumers) {
            let label: Vec<String> = partitions.iter().map(u32::to_string).collect();
            let consumer = Consumer::new(bus.clone(), topic, group, dead_letters, make_handler())
                .with_partitions(partitions);
            let name = format!("{}[{}]", consumer.handler().name(), label.join(","));
            let worker = name.clone();
            let shutdown = shutdown.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = consumer.run(shutdown).await {
                    tracing::error!(%worker, error = %e, "worker stopped with error");
                }
            });
            self.handles.push((name, handle));
        }
    }
}

/// Deals `partitions` round-robin into at most `consumers` non-empty groups.
pub fn partition_groups(partitions: u32, consumers: u32) -> Vec<Vec<u32>> {
    let count = consumers.clamp(1, partitions.max(1)) as usize;
    let mut groups = vec![Vec::new(); count];
    for partition in 0..partitions {
        groups[partition as usize % count].push(partition);
    }
    groups.retain(|g| !g.is_empty());
    groups
}

/// Starts the workers of `config.role`, `config.consumers_per_topic`
/// consumers per topic, each owning a share of its partitions. They stop
/// once `shutdown` turns true.
pub fn spawn_workers<B, OS, SL, SS>(
    config: &Config,
    backends: &Backends<B, OS, SL, SS>,
    shutdown: watch::Receiver<bool>,
) -> shipping::Result<Workers>
where
    B: EventBus + Clone + 'static,
    OS: OrderStore + Clone + 'static,
    SL: StockLedger + Clone + 'static,
    SS: ShippingStore + Clone + 'static,
{
    let topics = &config.topics;
    let consumers = config.consumers_per_topic;
    let mut workers = Workers::default();

    if config.role.runs_inventory() {
        workers.spawn_consumers(
            &backends.bus,
            &topics.order_events,
            "inventory",
            &topics.dead_letters,
            consumers,
            &shutdown,
            || ReservationWorker::new(backends.bus.clone(), backends.ledger.clone(), topics.clone()),
        );
        workers.spawn_consumers(
            &backends.bus,
            &topics.low_stock,
            "notifications",
            &topics.dead_letters,
            consumers,
            &shutdown,
            || LowStockNotifier::new(TracingNotifier, config.low_stock_alert_email.clone()),
        );
        workers.spawn_consumers(
            &backends.bus,
            &topics.order_notices,
            "notifications",
            &topics.dead_letters,
            consumers,
            &shutdown,
            || OrderNotifier::new(TracingNotifier),
        );
    }

    if config.role.runs_orders() {
        workers.spawn_consumers(
            &backends.bus,
            &topics.inventory_status,
            "orders",
            &topics.dead_letters,
            consumers,
            &shutdown,
            || {
                let service =
                    OrderService::new(backends.orders.clone(), backends.bus.clone(), topics.clone());
                StatusUpdater::new(service).with_lookup_policy(config.lookup_policy())
            },
        );
    }

    if config.role.runs_shipping() {
        let client =
            HttpOrderStatusClient::new(config.order_service_url.clone(), config.callback_timeout)?;
        workers.spawn_consumers(
            &backends.bus,
            &topics.ship_requests,
            "shipping",
            &topics.dead_letters,
            consumers,
            &shutdown,
            || {
                Dispatcher::new(
                    backends.shipments.clone(),
                    client.clone(),
                    backends.bus.clone(),
                    topics.clone(),
                )
            },
        );

        let reconciler = Reconciler::new(backends.shipments.clone(), client);
        let interval = config.reconcile_interval;
        let handle = tokio::spawn(reconciler.run(interval, shutdown));
        workers.handles.push(("shipping-reconciler".to_string(), handle));
    }

    tracing::info!(role = config.role.as_str(), workers = ?workers.names(), "workers started");
    Ok(workers)
}
