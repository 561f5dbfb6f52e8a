use async_trait::async_trait;
use common::{OrderId, ProductId, ShipmentId};
use event_bus::ShipRequest;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::record::ShippingRecord;
use crate::store::ShippingStore;
use crate::{Result, ShippingError};

const RECORD_COLUMNS: &str = "id, order_id, product_id, quantity, status, shipment_time, callback_confirmed, callback_abandoned, callback_attempts, last_callback_error";

/// PostgreSQL-backed shipping store.
///
/// `order_id` is unique, so concurrent or repeated ship requests for one
/// order settle on a single row.
#[derive(Debug, Clone)]
pub struct PostgresShippingStore {
    pool: PgPool,
}

impl PostgresShippingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the shipping table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_create_shipping_records.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<ShippingRecord> {
        let order_id = OrderId::new(row.try_get::<i64, _>("order_id")? as u64);
        let quantity: i64 = row.try_get("quantity")?;
        let attempts: i32 = row.try_get("callback_attempts")?;

        let corrupt = |reason: String| ShippingError::Corrupt { order_id, reason };

        Ok(ShippingRecord {
            id: ShipmentId::from_uuid(row.try_get("id")?),
            order_id,
            product_id: ProductId::new(row.try_get::<i64, _>("product_id")? as u64),
            quantity: u32::try_from(quantity)
                .map_err(|_| corrupt(format!("quantity {quantity} out of range")))?,
            status: row.try_get("status")?,
            shipment_time: row.try_get("shipment_time")?,
            callback_confirmed: row.try_get("callback_confirmed")?,
            callback_abandoned: row.try_get("callback_abandoned")?,
            callback_attempts: u32::try_from(attempts)
                .map_err(|_| corrupt(format!("callback attempts {attempts} out of range")))?,
            last_callback_error: row.try_get("last_callback_error")?,
        })
    }
}

#[async_trait]
impl ShippingStore for PostgresShippingStore {
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn record_shipment(&self, request: &ShipRequest) -> Result<(ShippingRecord, bool)> {
        let record = ShippingRecord::shipped(request);
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO shipping_records (id, order_id, product_id, quantity, status, shipment_time)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (order_id) DO NOTHING
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(record.id.as_uuid())
        .bind(record.order_id.as_i64())
        .bind(record.product_id.as_i64())
        .bind(i64::from(record.quantity))
        .bind(&record.status)
        .bind(record.shipment_time)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((Self::row_to_record(row)?, true));
        }

        let existing = self.get(request.order_id).await?.ok_or_else(|| {
            ShippingError::Corrupt {
                order_id: request.order_id,
                reason: "conflicting shipment row vanished".to_string(),
            }
        })?;
        Ok((existing, false))
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<ShippingRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM shipping_records WHERE order_id = $1"
        ))
        .bind(order_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn confirm_callback(&self, order_id: OrderId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE shipping_records
            SET callback_confirmed = TRUE,
                callback_attempts = callback_attempts + 1,
                last_callback_error = NULL
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_callback_failure(&self, order_id: OrderId, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE shipping_records
            SET callback_attempts = callback_attempts + 1, last_callback_error = $2
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_i64())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn abandon_callback(&self, order_id: OrderId, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE shipping_records
            SET callback_abandoned = TRUE,
                callback_attempts = callback_attempts + 1,
                last_callback_error = $2
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_i64())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unconfirmed(&self, limit: usize) -> Result<Vec<ShippingRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM shipping_records
            WHERE NOT callback_confirmed AND NOT callback_abandoned
            ORDER BY callback_attempts, shipment_time, order_id
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }
}
