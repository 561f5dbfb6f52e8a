//! Translation of other services' status vocabulary into [`OrderStatus`].
//!
//! Each upstream service names its outcomes in its own words. Rather than
//! copying those strings onto the order, every boundary has a versioned
//! table; a value missing from the table is a malformed message.

use crate::status::OrderStatus;

/// A foreign status value that no table entry covers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {table} v{version} status: {value:?}")]
pub struct UnknownStatus {
    pub table: &'static str,
    pub version: u32,
    pub value: String,
}

/// Maps one service's status strings onto order statuses.
#[derive(Debug, Clone, Copy)]
pub struct TranslationTable {
    pub name: &'static str,
    pub version: u32,
    entries: &'static [(&'static str, OrderStatus)],
}

impl TranslationTable {
    pub const fn new(
        name: &'static str,
        version: u32,
        entries: &'static [(&'static str, OrderStatus)],
    ) -> Self {
        Self {
            name,
            version,
            entries,
        }
    }

    pub fn translate(&self, value: &str) -> Result<OrderStatus, UnknownStatus> {
        let value = value.trim();
        self.entries
            .iter()
            .find(|(foreign, _)| *foreign == value)
            .map(|(_, status)| *status)
            .ok_or_else(|| UnknownStatus {
                table: self.name,
                version: self.version,
                value: value.to_string(),
            })
    }

    /// Every foreign value this table accepts.
    pub fn accepted(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(foreign, _)| *foreign)
    }
}

/// Statuses published by the inventory service on `inventory-status`.
///
/// Includes the spaced spellings older inventory builds emitted.
pub const INVENTORY_STATUS_V1: TranslationTable = TranslationTable::new(
    "inventory-status",
    1,
    &[
        ("ReadyForShipping", OrderStatus::ReadyForShipping),
        ("Ready for Shipping", OrderStatus::ReadyForShipping),
        ("OutOfStock", OrderStatus::OutOfStock),
        ("Out of Stock", OrderStatus::OutOfStock),
        ("Cancelled", OrderStatus::Cancelled),
    ],
);

/// Statuses the shipping service sends on its HTTP callback.
pub const SHIPPING_STATUS_V1: TranslationTable =
    TranslationTable::new("shipping-callback", 1, &[("Shipped", OrderStatus::Shipped)]);
