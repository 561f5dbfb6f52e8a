use async_trait::async_trait;
use common::OrderId;
use event_bus::ShipRequest;

use crate::Result;
use crate::record::ShippingRecord;

/// Storage for shipment records.
#[async_trait]
pub trait ShippingStore: Send + Sync {
    /// Creates the shipment for the request's order unless one exists.
    ///
    /// Returns the stored record and whether this call created it. A
    /// repeated request returns the original record untouched.
    async fn record_shipment(&self, request: &ShipRequest) -> Result<(ShippingRecord, bool)>;

    async fn get(&self, order_id: OrderId) -> Result<Option<ShippingRecord>>;

    /// Marks the order service as having acknowledged the shipment.
    async fn confirm_callback(&self, order_id: OrderId) -> Result<()>;

    /// Counts a failed callback and remembers why it failed.
    async fn record_callback_failure(&self, order_id: OrderId, reason: &str) -> Result<()>;

    /// Counts a refused callback and stops reconciling the shipment.
    async fn abandon_callback(&self, order_id: OrderId, reason: &str) -> Result<()>;

    /// Shipments still waiting for a callback, fewest attempts first and
    /// oldest first among equals. Abandoned shipments are left out.
    async fn unconfirmed(&self, limit: usize) -> Result<Vec<ShippingRecord>>;
}
