use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, ProductId};
use tokio::sync::{Mutex, RwLock};

use crate::ledger::{
    Decision, LedgerUpdate, Reservation, ReservationEntry, StockLedger, StockRecord,
    decide_release, decide_reserve,
};
use crate::{Result, StockError};

/// In-memory stock ledger.
///
/// Every product row sits behind its own async mutex, standing in for the
/// row lock a database would take. Reservations are only read or written
/// while the owning product's row is locked.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockLedger {
    rows: Arc<RwLock<HashMap<ProductId, Arc<Mutex<StockRecord>>>>>,
    reservations: Arc<Mutex<HashMap<OrderId, ReservationEntry>>>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn row(&self, product_id: ProductId) -> Result<Arc<Mutex<StockRecord>>> {
        self.rows
            .read()
            .await
            .get(&product_id)
            .cloned()
            .ok_or(StockError::UnknownProduct(product_id))
    }

    /// Writes a decision taken against `stock`. Replays leave both untouched.
    fn commit(
        reservations: &mut HashMap<OrderId, ReservationEntry>,
        order_id: OrderId,
        stock: &mut StockRecord,
        next: StockRecord,
        decision: Decision,
    ) -> LedgerUpdate {
        if let Some(reservation) = decision.record {
            reservations.insert(
                order_id,
                ReservationEntry {
                    product_id: next.product_id,
                    reservation,
                    low_stock_pending: decision.low_stock_crossed,
                },
            );
            *stock = next.clone();
        }
        decision.into_update(next)
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn upsert_stock(&self, record: StockRecord) -> Result<()> {
        let mut rows = self.rows.write().await;
        match rows.get(&record.product_id) {
            Some(existing) => {
                let mut row = existing.lock().await;
                let alerted = row.low_stock_alerted && record.is_low();
                *row = StockRecord {
                    low_stock_alerted: alerted,
                    ..record
                };
            }
            None => {
                rows.insert(record.product_id, Arc::new(Mutex::new(record)));
            }
        }
        Ok(())
    }

    async fn stock(&self, product_id: ProductId) -> Result<Option<StockRecord>> {
        let row = self.rows.read().await.get(&product_id).cloned();
        match row {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn reservation(&self, order_id: OrderId) -> Result<Option<ReservationEntry>> {
        Ok(self.reservations.lock().await.get(&order_id).copied())
    }

    async fn low_stock_notified(&self, order_id: OrderId) -> Result<()> {
        if let Some(entry) = self.reservations.lock().await.get_mut(&order_id) {
            entry.low_stock_pending = false;
        }
        Ok(())
    }

    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<LedgerUpdate> {
        let row = self.row(product_id).await?;
        let mut stock = row.lock().await;
        let mut reservations = self.reservations.lock().await;

        let existing = reservations.get(&order_id).copied();
        if let Some(entry) = existing {
            entry.check_product(order_id, product_id)?;
        }

        let mut next = stock.clone();
        let decision = decide_reserve(&mut next, existing, quantity);
        Ok(Self::commit(&mut reservations, order_id, &mut stock, next, decision))
    }

    async fn release(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<LedgerUpdate> {
        let row = self.row(product_id).await?;
        let mut stock = row.lock().await;
        let mut reservations = self.reservations.lock().await;

        let existing = reservations.get(&order_id).copied();
        if let Some(entry) = existing {
            entry.check_product(order_id, product_id)?;
            if let Reservation::Reserved(reserved) = entry.reservation
                && reserved != quantity
            {
                tracing::warn!(%order_id, reserved, claimed = quantity, "cancel quantity differs from reservation");
            }
        }

        let mut next = stock.clone();
        let decision = decide_release(&mut next, existing);
        Ok(Self::commit(&mut reservations, order_id, &mut stock, next, decision))
    }
}
