use async_trait::async_trait;
use common::{OrderId, ProductId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::ledger::{
    Decision, LedgerUpdate, Reservation, ReservationEntry, StockLedger, StockRecord,
    decide_release, decide_reserve,
};
use crate::{Result, StockError};

/// PostgreSQL-backed stock ledger.
///
/// `reserve` and `release` run in one transaction that starts with
/// `SELECT ... FOR UPDATE` on the product's row, so operations on the same
/// product serialize while other products proceed.
#[derive(Debug, Clone)]
pub struct PostgresStockLedger {
    pool: PgPool,
}

impl PostgresStockLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the stock tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_create_stock_tables.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_stock(row: PgRow) -> Result<StockRecord> {
        Ok(StockRecord {
            product_id: ProductId::new(row.try_get::<i64, _>("product_id")? as u64),
            quantity: row.try_get("quantity")?,
            low_stock_threshold: row.try_get("low_stock_threshold")?,
            low_stock_alerted: row.try_get("low_stock_alerted")?,
        })
    }

    async fn lock_stock(
        tx: &mut Transaction<'_, Postgres>,
        product_id: ProductId,
    ) -> Result<StockRecord> {
        let row = sqlx::query(
            r#"
            SELECT product_id, quantity, low_stock_threshold, low_stock_alerted
            FROM stock_records
            WHERE product_id = $1
            FOR UPDATE
            "#,
        )
        .bind(product_id.as_i64())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StockError::UnknownProduct(product_id))?;

        Self::row_to_stock(row)
    }

    async fn load_reservation(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
    ) -> Result<Option<ReservationEntry>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, state, quantity, low_stock_pending
            FROM stock_reservations
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_optional(&mut **tx)
        .await?;

        row.map(|row| {
            let state: String = row.try_get("state")?;
            let quantity: i64 = row.try_get("quantity")?;
            Ok(ReservationEntry {
                product_id: ProductId::new(row.try_get::<i64, _>("product_id")? as u64),
                reservation: Reservation::from_parts(order_id, &state, quantity)?,
                low_stock_pending: row.try_get("low_stock_pending")?,
            })
        })
        .transpose()
    }

    /// Persists a decision and commits. Replays roll back untouched.
    async fn commit(
        mut tx: Transaction<'_, Postgres>,
        order_id: OrderId,
        stock: StockRecord,
        decision: Decision,
    ) -> Result<LedgerUpdate> {
        let Some(record) = decision.record else {
            tx.rollback().await?;
            return Ok(decision.into_update(stock));
        };

        sqlx::query(
            r#"
            UPDATE stock_records
            SET quantity = $2, low_stock_alerted = $3, updated_at = NOW()
            WHERE product_id = $1
            "#,
        )
        .bind(stock.product_id.as_i64())
        .bind(stock.quantity)
        .bind(stock.low_stock_alerted)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO stock_reservations (order_id, product_id, state, quantity, low_stock_pending)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_id) DO UPDATE SET
                state = EXCLUDED.state,
                quantity = EXCLUDED.quantity,
                low_stock_pending = EXCLUDED.low_stock_pending,
                updated_at = NOW()
            WHERE stock_reservations.product_id = EXCLUDED.product_id
            "#,
        )
        .bind(order_id.as_i64())
        .bind(stock.product_id.as_i64())
        .bind(record.state())
        .bind(i64::from(record.quantity()))
        .bind(decision.low_stock_crossed)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(decision.into_update(stock))
    }
}

#[async_trait]
impl StockLedger for PostgresStockLedger {
    async fn upsert_stock(&self, record: StockRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_records (product_id, quantity, low_stock_threshold, low_stock_alerted)
            VALUES ($1, $2, $3, FALSE)
            ON CONFLICT (product_id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                low_stock_threshold = EXCLUDED.low_stock_threshold,
                low_stock_alerted = stock_records.low_stock_alerted
                    AND EXCLUDED.quantity <= EXCLUDED.low_stock_threshold,
                updated_at = NOW()
            "#,
        )
        .bind(record.product_id.as_i64())
        .bind(record.quantity)
        .bind(record.low_stock_threshold)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stock(&self, product_id: ProductId) -> Result<Option<StockRecord>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, quantity, low_stock_threshold, low_stock_alerted
            FROM stock_records
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_stock).transpose()
    }

    async fn reservation(&self, order_id: OrderId) -> Result<Option<ReservationEntry>> {
        let mut tx = self.pool.begin().await?;
        let reservation = Self::load_reservation(&mut tx, order_id).await?;
        tx.rollback().await?;
        Ok(reservation)
    }

    async fn low_stock_notified(&self, order_id: OrderId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE stock_reservations
            SET low_stock_pending = FALSE, updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<LedgerUpdate> {
        let mut tx = self.pool.begin().await?;
        let mut stock = Self::lock_stock(&mut tx, product_id).await?;
        let existing = Self::load_reservation(&mut tx, order_id).await?;
        if let Some(entry) = existing {
            entry.check_product(order_id, product_id)?;
        }

        let decision = decide_reserve(&mut stock, existing, quantity);
        Self::commit(tx, order_id, stock, decision).await
    }

    #[tracing::instrument(skip(self))]
    async fn release(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<LedgerUpdate> {
        let mut tx = self.pool.begin().await?;
        let mut stock = Self::lock_stock(&mut tx, product_id).await?;
        let existing = Self::load_reservation(&mut tx, order_id).await?;
        if let Some(entry) = existing {
            entry.check_product(order_id, product_id)?;
            if let Reservation::Reserved(reserved) = entry.reservation
                && reserved != quantity
            {
                tracing::warn!(reserved, claimed = quantity, "cancel quantity differs from reservation");
            }
        }

        let decision = decide_release(&mut stock, existing);
        Self::commit(tx, order_id, stock, decision).await
    }
}
