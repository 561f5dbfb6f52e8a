//! Identifier types shared by the order, inventory and shipping services.
//!
//! Each service owns its own store, so these types are the only vocabulary
//! that crosses a service boundary besides the event payloads themselves.

pub mod types;

pub use types::{CustomerId, OrderId, ProductId, ShipmentId};
