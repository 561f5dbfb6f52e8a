use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, ShipmentId};
use event_bus::ShipRequest;
use serde::{Deserialize, Serialize};

/// Status written on every shipment record.
pub const SHIPPED: &str = "Shipped";

/// A shipment, at most one per order.
///
/// `callback_confirmed` is false until the order service has acknowledged
/// the `Shipped` status. Unconfirmed records are what the reconciler
/// retries, unless `callback_abandoned` says the order service refused the
/// callback for good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingRecord {
    pub id: ShipmentId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub status: String,
    pub shipment_time: DateTime<Utc>,
    pub callback_confirmed: bool,
    pub callback_abandoned: bool,
    pub callback_attempts: u32,
    pub last_callback_error: Option<String>,
}

impl ShippingRecord {
    /// A new, unconfirmed shipment for a ship request.
    pub fn shipped(request: &ShipRequest) -> Self {
        Self {
            id: ShipmentId::new(),
            order_id: request.order_id,
            product_id: request.product_id,
            quantity: request.quantity,
            status: SHIPPED.to_string(),
            shipment_time: Utc::now(),
            callback_confirmed: false,
            callback_abandoned: false,
            callback_attempts: 0,
            last_callback_error: None,
        }
    }
}
