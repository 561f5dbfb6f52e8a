//! Periodic repair of shipments whose order status was never confirmed.

use std::time::Duration;

use tokio::sync::watch;

use crate::Result;
use crate::client::OrderStatusClient;
use crate::store::ShippingStore;

/// Unconfirmed shipments looked at per sweep.
const DEFAULT_BATCH_SIZE: usize = 100;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub confirmed: usize,
    pub failed: usize,
    /// Refused by the order service and dropped from reconciliation.
    pub abandoned: usize,
}

/// Retries the order status callback for shipments left unconfirmed.
///
/// Shipments the order service refuses with a client error are abandoned,
/// and each sweep starts with the least retried shipments, so a few
/// failing orders cannot hold back the rest.
pub struct Reconciler<S, C> {
    store: S,
    client: C,
    batch_size: usize,
}

impl<S, C> Reconciler<S, C>
where
    S: ShippingStore,
    C: OrderStatusClient,
{
    pub fn new(store: S, client: C) -> Self {
        Self {
            store,
            client,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Calls back once for every unconfirmed shipment in the batch.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for record in self.store.unconfirmed(self.batch_size).await? {
            report.attempted += 1;
            match self.client.mark_shipped(record.order_id).await {
                Ok(()) => {
                    self.store.confirm_callback(record.order_id).await?;
                    report.confirmed += 1;
                    tracing::info!(order_id = %record.order_id, "shipment reconciled");
                }
                Err(e) if e.is_permanent() => {
                    metrics::counter!("shipping_callbacks_abandoned_total").increment(1);
                    tracing::error!(order_id = %record.order_id, error = %e, "order service refused shipment, abandoning");
                    self.store
                        .abandon_callback(record.order_id, &e.to_string())
                        .await?;
                    report.abandoned += 1;
                }
                Err(e) => {
                    metrics::counter!("shipping_callbacks_failed_total").increment(1);
                    tracing::warn!(order_id = %record.order_id, error = %e, "reconciliation callback failed");
                    self.store
                        .record_callback_failure(record.order_id, &e.to_string())
                        .await?;
                    report.failed += 1;
                }
            }
        }

        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                confirmed = report.confirmed,
                failed = report.failed,
                abandoned = report.abandoned,
                "reconciliation sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` turns true.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "reconciler started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::warn!(error = %e, "reconciliation sweep failed");
                    }
                }
            }
        }

        tracing::info!("reconciler stopped");
    }
}
