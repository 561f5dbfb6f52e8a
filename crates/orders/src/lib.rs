//! Order service: the order store and the consumer of inventory outcomes.
//!
//! Orders are owned here and change status through one state machine,
//! whether the change comes from the `inventory-status` topic or from the
//! shipping service's HTTP callback. Foreign status strings are translated
//! through versioned tables before they touch an order.

pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod service;
pub mod status;
pub mod store;
pub mod translation;
pub mod updater;

pub use error::{OrderStoreError, Result};
pub use memory::InMemoryOrderStore;
pub use order::{NewOrder, Order, StatusChange};
pub use postgres::PostgresOrderStore;
pub use service::OrderService;
pub use status::{OrderStatus, StatusSource, Transition};
pub use store::OrderStore;
pub use translation::{INVENTORY_STATUS_V1, SHIPPING_STATUS_V1, TranslationTable, UnknownStatus};
pub use updater::{StatusUpdater, default_lookup_policy};
