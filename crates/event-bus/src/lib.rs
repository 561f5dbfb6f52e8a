//! Event bus for the order-fulfillment choreography.
//!
//! The order, inventory and shipping services never share a database; they
//! coordinate by publishing and consuming the messages defined in
//! [`contract`]. This crate provides:
//!
//! - the wire contract (topics and JSON payloads)
//! - the [`EventBus`] trait with in-memory and PostgreSQL logs
//! - a [`Consumer`] loop that applies retry and dead-letter policy and only
//!   acknowledges a message once its effects are durable
//!
//! Delivery is at-least-once and ordered only within a partition, so every
//! handler built on top of this crate must be idempotent.

pub mod bus;
pub mod consumer;
pub mod contract;
pub mod dead_letter;
pub mod error;
pub mod memory;
pub mod message;
pub mod postgres;
pub mod retry;

pub use bus::{EventBus, EventBusExt, MessageStream};
pub use consumer::{Consumer, HandlerError, MessageHandler};
pub use contract::{
    InventoryOutcome, InventoryStatus, LowStockNotification, OrderAction, OrderEvent, OrderNotice,
    ShipAction, ShipRequest, Topics,
};
pub use dead_letter::{DeadLetter, FailureKind};
pub use error::{BusError, Result};
pub use memory::InMemoryEventBus;
pub use message::{Acknowledger, Delivery, partition_for};
pub use postgres::PostgresEventBus;
pub use retry::{RetryPolicy, retry_with_backoff};
