//! Shipping service: shipment records and the ship-request dispatcher.
//!
//! The [`Dispatcher`] consumes ship requests, records at most one shipment
//! per order and then tells the order service over HTTP that the order has
//! shipped. Shipments whose callback failed stay unconfirmed until the
//! [`Reconciler`] gets a `200 OK` for them.

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod reconciler;
pub mod record;
pub mod store;

pub use client::{HttpOrderStatusClient, OrderStatusClient};
pub use dispatcher::Dispatcher;
pub use error::{Result, ShippingError};
pub use memory::InMemoryShippingStore;
pub use postgres::PostgresShippingStore;
pub use reconciler::{Reconciler, SweepReport};
pub use record::{SHIPPED, ShippingRecord};
pub use store::ShippingStore;
