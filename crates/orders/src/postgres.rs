use async_trait::async_trait;
use common::{CustomerId, OrderId, ProductId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::order::{Order, StatusChange};
use crate::status::{OrderStatus, StatusSource, Transition};
use crate::store::OrderStore;
use crate::{OrderStoreError, Result};

/// How many times a status update re-reads the order after losing a race.
const MAX_VERSION_RETRIES: usize = 5;

const ORDER_COLUMNS: &str = "id, product_id, quantity, customer_id, status, status_source, version, created_at, updated_at";

/// PostgreSQL-backed order store.
#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the orders table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_create_orders_table.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let order_id = OrderId::new(row.try_get::<i64, _>("id")? as u64);
        let status: String = row.try_get("status")?;
        let status_source: Option<String> = row.try_get("status_source")?;
        let quantity: i64 = row.try_get("quantity")?;

        let corrupt = |reason: String| OrderStoreError::Corrupt { order_id, reason };

        Ok(Order {
            id: order_id,
            product_id: ProductId::new(row.try_get::<i64, _>("product_id")? as u64),
            quantity: u32::try_from(quantity)
                .map_err(|_| corrupt(format!("quantity {quantity} out of range")))?,
            customer_id: CustomerId::new(row.try_get::<i64, _>("customer_id")? as u64),
            status: OrderStatus::from_stored(&status)
                .ok_or_else(|| corrupt(format!("unknown status {status:?}")))?,
            status_source: match status_source {
                Some(source) => Some(
                    StatusSource::from_stored(&source)
                        .ok_or_else(|| corrupt(format!("unknown status source {source:?}")))?,
                ),
                None => None,
            },
            version: row.try_get::<i64, _>("version")? as u64,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn next_id(&self) -> Result<OrderId> {
        let id: i64 = sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence('orders', 'id'))")
            .fetch_one(&self.pool)
            .await?;
        Ok(OrderId::new(id as u64))
    }

    async fn insert(&self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (id, product_id, quantity, customer_id, status, status_source, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(order.id.as_i64())
        .bind(order.product_id.as_i64())
        .bind(i64::from(order.quantity))
        .bind(order.customer_id.as_i64())
        .bind(order.status.as_str())
        .bind(order.status_source.map(|s| s.as_str()))
        .bind(order.version as i64)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrderStoreError::AlreadyExists(order.id));
        }
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn apply_status(
        &self,
        id: OrderId,
        target: OrderStatus,
        source: StatusSource,
    ) -> Result<StatusChange> {
        let mut last_version = 0;

        for _ in 0..MAX_VERSION_RETRIES {
            let mut order = self.get(id).await?.ok_or(OrderStoreError::NotFound(id))?;
            let previous = order.status;
            let expected_version = order.version;
            let transition = order.transition_to(target, source)?;

            if transition != Transition::Apply {
                return Ok(StatusChange {
                    order,
                    previous,
                    transition,
                });
            }

            let row = sqlx::query(&format!(
                r#"
                UPDATE orders
                SET status = $2, status_source = $3, version = version + 1, updated_at = $4
                WHERE id = $1 AND version = $5
                RETURNING {ORDER_COLUMNS}
                "#
            ))
            .bind(id.as_i64())
            .bind(order.status.as_str())
            .bind(source.as_str())
            .bind(order.updated_at)
            .bind(expected_version as i64)
            .fetch_optional(&self.pool)
            .await?;

            match row {
                Some(row) => {
                    return Ok(StatusChange {
                        order: Self::row_to_order(row)?,
                        previous,
                        transition,
                    });
                }
                None => {
                    tracing::debug!(%id, expected_version, "order changed concurrently, retrying");
                    last_version = expected_version;
                }
            }
        }

        Err(OrderStoreError::VersionConflict {
            order_id: id,
            version: last_version,
        })
    }
}
