//! Inventory service: the stock ledger and the workers that drive it.
//!
//! The [`ReservationWorker`] consumes order creations and cancellations,
//! changes stock under a per-product lock and reports the outcome. Stock
//! changes are recorded per order so redelivered events never reserve or
//! restock twice. The [`LowStockNotifier`] turns low-stock events into
//! alerts and the [`OrderNotifier`] tells customers about shipped and
//! cancelled orders, both through a [`Notifier`].

pub mod error;
pub mod ledger;
pub mod memory;
pub mod notifications;
pub mod postgres;
pub mod worker;

pub use error::{NotifyError, Result, StockError};
pub use ledger::{LedgerUpdate, Reservation, ReservationEntry, StockLedger, StockRecord};
pub use memory::InMemoryStockLedger;
pub use notifications::{LowStockNotifier, Notifier, OrderNotifier, TracingNotifier};
pub use postgres::PostgresStockLedger;
pub use worker::ReservationWorker;
