//! Stock ledger: per-product quantities plus a per-order reservation log.
//!
//! Stock is only ever changed through [`StockLedger::reserve`] and
//! [`StockLedger::release`], and both record what they did against the
//! order. A redelivered create or cancel finds that record and replays the
//! earlier outcome instead of touching stock again.

use async_trait::async_trait;
use common::{OrderId, ProductId};
use event_bus::InventoryOutcome;
use serde::{Deserialize, Serialize};

use crate::{Result, StockError};

/// Stock held for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: ProductId,
    /// Units on hand. Never negative.
    pub quantity: i64,
    pub low_stock_threshold: i64,
    /// Set once a low-stock notification has gone out for the current dip
    /// below the threshold; cleared when stock climbs back above it.
    pub low_stock_alerted: bool,
}

impl StockRecord {
    pub fn new(product_id: ProductId, quantity: i64, low_stock_threshold: i64) -> Result<Self> {
        if quantity < 0 {
            return Err(StockError::InvalidStock {
                product_id,
                reason: format!("quantity {quantity} is negative"),
            });
        }
        if low_stock_threshold < 0 {
            return Err(StockError::InvalidStock {
                product_id,
                reason: format!("threshold {low_stock_threshold} is negative"),
            });
        }
        Ok(Self {
            product_id,
            quantity,
            low_stock_threshold,
            low_stock_alerted: false,
        })
    }

    pub fn is_low(&self) -> bool {
        self.quantity <= self.low_stock_threshold
    }
}

/// What the ledger last did for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Stock was taken for the order.
    Reserved(u32),
    /// There was not enough stock.
    Rejected,
    /// The order was cancelled; the given quantity went back on the shelf.
    Released(u32),
    /// A cancel arrived before any reservation. A later create is refused.
    Tombstone,
}

impl Reservation {
    pub fn state(&self) -> &'static str {
        match self {
            Reservation::Reserved(_) => "reserved",
            Reservation::Rejected => "rejected",
            Reservation::Released(_) => "released",
            Reservation::Tombstone => "tombstone",
        }
    }

    pub fn quantity(&self) -> u32 {
        match self {
            Reservation::Reserved(q) | Reservation::Released(q) => *q,
            Reservation::Rejected | Reservation::Tombstone => 0,
        }
    }

    /// Rebuilds a reservation from its stored columns.
    pub fn from_parts(order_id: OrderId, state: &str, quantity: i64) -> Result<Self> {
        let quantity = u32::try_from(quantity).map_err(|_| StockError::CorruptReservation {
            order_id,
            state: format!("{state} with quantity {quantity}"),
        })?;
        match state {
            "reserved" => Ok(Reservation::Reserved(quantity)),
            "rejected" => Ok(Reservation::Rejected),
            "released" => Ok(Reservation::Released(quantity)),
            "tombstone" => Ok(Reservation::Tombstone),
            other => Err(StockError::CorruptReservation {
                order_id,
                state: other.to_string(),
            }),
        }
    }

    /// The status the inventory service reports for an order in this state.
    pub fn outcome(&self) -> InventoryOutcome {
        match self {
            Reservation::Reserved(_) => InventoryOutcome::ReadyForShipping,
            Reservation::Rejected => InventoryOutcome::OutOfStock,
            Reservation::Released(_) | Reservation::Tombstone => InventoryOutcome::Cancelled,
        }
    }
}

/// A reservation as stored, with the product it was taken against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationEntry {
    pub product_id: ProductId,
    pub reservation: Reservation,
    /// The reservation crossed the low-stock threshold and the notification
    /// has not been confirmed as published yet.
    pub low_stock_pending: bool,
}

impl ReservationEntry {
    /// Fails if a message names a different product than the one the order
    /// was recorded against.
    pub(crate) fn check_product(&self, order_id: OrderId, claimed: ProductId) -> Result<()> {
        if self.product_id != claimed {
            return Err(StockError::ProductMismatch {
                order_id,
                recorded: self.product_id,
                claimed,
            });
        }
        Ok(())
    }
}

/// Result of a reserve or release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerUpdate {
    pub outcome: InventoryOutcome,
    /// True if the order had already been handled and nothing changed.
    pub replayed: bool,
    /// The stock row after the operation.
    pub stock: StockRecord,
    /// True if this order took the product across its low-stock threshold
    /// and the notification is still owed. Stays true on replays until
    /// [`StockLedger::low_stock_notified`] is called.
    pub low_stock_crossed: bool,
}

/// Durable store of stock rows and reservations.
///
/// Implementations serialize `reserve` and `release` per product; calls for
/// different products may run concurrently.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Creates or overwrites the stock row for a product.
    async fn upsert_stock(&self, record: StockRecord) -> Result<()>;

    /// Returns the stock row for a product.
    async fn stock(&self, product_id: ProductId) -> Result<Option<StockRecord>>;

    /// Returns what the ledger recorded for an order.
    async fn reservation(&self, order_id: OrderId) -> Result<Option<ReservationEntry>>;

    /// Records that the low-stock notification owed for an order went out.
    async fn low_stock_notified(&self, order_id: OrderId) -> Result<()>;

    /// Takes `quantity` units for an order if enough are on hand.
    ///
    /// Fails with [`StockError::ProductMismatch`] if the order is already
    /// recorded against another product.
    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<LedgerUpdate>;

    /// Returns an order's reserved units to stock.
    ///
    /// The quantity put back is the one recorded at reservation time;
    /// `quantity` is what the cancel claimed and is only checked against it.
    /// A cancel naming another product than the reservation's fails with
    /// [`StockError::ProductMismatch`] and leaves stock untouched.
    async fn release(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<LedgerUpdate>;
}

/// A decision taken against a locked stock row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Decision {
    pub outcome: InventoryOutcome,
    /// New reservation state to persist, or `None` when replaying.
    pub record: Option<Reservation>,
    pub low_stock_crossed: bool,
}

impl Decision {
    pub fn into_update(self, stock: StockRecord) -> LedgerUpdate {
        LedgerUpdate {
            outcome: self.outcome,
            replayed: self.record.is_none(),
            stock,
            low_stock_crossed: self.low_stock_crossed,
        }
    }
}

/// Applies a create to a locked stock row.
pub(crate) fn decide_reserve(
    stock: &mut StockRecord,
    existing: Option<ReservationEntry>,
    quantity: u32,
) -> Decision {
    if let Some(existing) = existing {
        return Decision {
            outcome: existing.reservation.outcome(),
            record: None,
            low_stock_crossed: existing.low_stock_pending,
        };
    }

    let wanted = i64::from(quantity);
    if stock.quantity < wanted {
        return Decision {
            outcome: InventoryOutcome::OutOfStock,
            record: Some(Reservation::Rejected),
            low_stock_crossed: false,
        };
    }

    stock.quantity -= wanted;
    let low_stock_crossed = stock.is_low() && !stock.low_stock_alerted;
    if low_stock_crossed {
        stock.low_stock_alerted = true;
    }

    Decision {
        outcome: InventoryOutcome::ReadyForShipping,
        record: Some(Reservation::Reserved(quantity)),
        low_stock_crossed,
    }
}

/// Applies a cancel to a locked stock row.
pub(crate) fn decide_release(
    stock: &mut StockRecord,
    existing: Option<ReservationEntry>,
) -> Decision {
    let record = match existing.map(|entry| entry.reservation) {
        Some(Reservation::Reserved(quantity)) => {
            stock.quantity += i64::from(quantity);
            if !stock.is_low() {
                stock.low_stock_alerted = false;
            }
            Reservation::Released(quantity)
        }
        Some(Reservation::Rejected) => Reservation::Released(0),
        Some(Reservation::Released(_)) | Some(Reservation::Tombstone) => {
            return Decision {
                outcome: InventoryOutcome::Cancelled,
                record: None,
                low_stock_crossed: false,
            };
        }
        None => Reservation::Tombstone,
    };

    Decision {
        outcome: InventoryOutcome::Cancelled,
        record: Some(record),
        low_stock_crossed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(quantity: i64, threshold: i64) -> StockRecord {
        StockRecord::new(ProductId::new(7), quantity, threshold).unwrap()
    }

    fn entry(reservation: Reservation) -> Option<ReservationEntry> {
        Some(ReservationEntry {
            product_id: ProductId::new(7),
            reservation,
            low_stock_pending: false,
        })
    }

    #[test]
    fn test_new_rejects_negative_quantity() {
        let result = StockRecord::new(ProductId::new(7), -1, 3);
        assert!(matches!(result, Err(StockError::InvalidStock { .. })));
    }

    #[test]
    fn test_first_reservation_on_low_row_notifies() {
        let mut row = stock(3, 5);
        assert!(!row.low_stock_alerted);
        let decision = decide_reserve(&mut row, None, 2);
        assert!(decision.low_stock_crossed);
        assert_eq!(row.quantity, 1);
    }

    #[test]
    fn test_reserve_decrements_when_enough_stock() {
        let mut row = stock(10, 3);
        let decision = decide_reserve(&mut row, None, 5);
        assert_eq!(decision.outcome, InventoryOutcome::ReadyForShipping);
        assert_eq!(decision.record, Some(Reservation::Reserved(5)));
        assert!(!decision.low_stock_crossed);
        assert_eq!(row.quantity, 5);
    }

    #[test]
    fn test_reserve_exact_quantity_empties_stock() {
        let mut row = stock(4, 0);
        let decision = decide_reserve(&mut row, None, 4);
        assert_eq!(decision.outcome, InventoryOutcome::ReadyForShipping);
        assert_eq!(row.quantity, 0);
        assert!(decision.low_stock_crossed);
    }

    #[test]
    fn test_reserve_out_of_stock_leaves_quantity() {
        let mut row = stock(3, 1);
        let decision = decide_reserve(&mut row, None, 4);
        assert_eq!(decision.outcome, InventoryOutcome::OutOfStock);
        assert_eq!(decision.record, Some(Reservation::Rejected));
        assert_eq!(row.quantity, 3);
    }

    #[test]
    fn test_low_stock_fires_once_per_crossing() {
        let mut row = stock(10, 5);
        assert!(!decide_reserve(&mut row, None, 4).low_stock_crossed);
        assert!(decide_reserve(&mut row, None, 2).low_stock_crossed);
        assert!(!decide_reserve(&mut row, None, 1).low_stock_crossed);
        assert_eq!(row.quantity, 3);
    }

    #[test]
    fn test_low_stock_latch_resets_after_restock_above_threshold() {
        let mut row = stock(10, 5);
        assert!(decide_reserve(&mut row, None, 6).low_stock_crossed);

        decide_release(&mut row, entry(Reservation::Reserved(6)));
        assert_eq!(row.quantity, 10);
        assert!(!row.low_stock_alerted);

        assert!(decide_reserve(&mut row, None, 5).low_stock_crossed);
    }

    #[test]
    fn test_restock_still_below_threshold_keeps_latch() {
        let mut row = stock(10, 5);
        decide_reserve(&mut row, None, 8);
        decide_release(&mut row, entry(Reservation::Reserved(1)));
        assert_eq!(row.quantity, 3);
        assert!(row.low_stock_alerted);
    }

    #[test]
    fn test_reserve_replays_recorded_outcome() {
        let mut row = stock(10, 3);
        for (existing, outcome) in [
            (Reservation::Reserved(5), InventoryOutcome::ReadyForShipping),
            (Reservation::Rejected, InventoryOutcome::OutOfStock),
            (Reservation::Released(5), InventoryOutcome::Cancelled),
            (Reservation::Tombstone, InventoryOutcome::Cancelled),
        ] {
            let decision = decide_reserve(&mut row, entry(existing), 5);
            assert_eq!(decision.outcome, outcome);
            assert_eq!(decision.record, None);
            assert!(!decision.low_stock_crossed);
        }
        assert_eq!(row.quantity, 10);
    }

    #[test]
    fn test_replay_still_owes_unsent_low_stock_notification() {
        let mut row = stock(1, 5);
        let pending = ReservationEntry {
            product_id: ProductId::new(7),
            reservation: Reservation::Reserved(2),
            low_stock_pending: true,
        };

        let decision = decide_reserve(&mut row, Some(pending), 2);
        assert_eq!(decision.record, None);
        assert!(decision.low_stock_crossed);
        assert_eq!(row.quantity, 1);
    }

    #[test]
    fn test_check_product_rejects_other_product() {
        let recorded = entry(Reservation::Reserved(5)).unwrap();
        assert!(recorded.check_product(OrderId::new(1), ProductId::new(7)).is_ok());
        assert!(matches!(
            recorded.check_product(OrderId::new(1), ProductId::new(8)),
            Err(StockError::ProductMismatch { recorded, claimed, .. })
                if recorded == ProductId::new(7) && claimed == ProductId::new(8)
        ));
    }

    #[test]
    fn test_release_restocks_reserved_quantity_once() {
        let mut row = stock(5, 1);
        let first = decide_release(&mut row, entry(Reservation::Reserved(5)));
        assert_eq!(first.record, Some(Reservation::Released(5)));
        assert_eq!(row.quantity, 10);

        let again = decide_release(&mut row, first.record.and_then(entry));
        assert_eq!(again.outcome, InventoryOutcome::Cancelled);
        assert_eq!(again.record, None);
        assert_eq!(row.quantity, 10);
    }

    #[test]
    fn test_release_without_reservation_leaves_tombstone() {
        let mut row = stock(5, 1);
        let decision = decide_release(&mut row, None);
        assert_eq!(decision.record, Some(Reservation::Tombstone));
        assert_eq!(row.quantity, 5);
    }

    #[test]
    fn test_release_of_rejected_order_does_not_restock() {
        let mut row = stock(5, 1);
        let decision = decide_release(&mut row, entry(Reservation::Rejected));
        assert_eq!(decision.record, Some(Reservation::Released(0)));
        assert_eq!(row.quantity, 5);
    }

    #[test]
    fn test_reservation_from_parts() {
        let order = OrderId::new(1);
        assert_eq!(
            Reservation::from_parts(order, "reserved", 4).unwrap(),
            Reservation::Reserved(4)
        );
        assert_eq!(
            Reservation::from_parts(order, "tombstone", 0).unwrap(),
            Reservation::Tombstone
        );
        assert!(Reservation::from_parts(order, "lost", 0).is_err());
        assert!(Reservation::from_parts(order, "reserved", -1).is_err());
    }
}
