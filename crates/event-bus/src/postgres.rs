use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::bus::{EventBus, MessageStream, validate_partitions};
use crate::message::{Acknowledger, Delivery, partition_for};
use crate::Result;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// PostgreSQL-backed event bus.
///
/// Messages live in an append-only `bus_messages` table; each consumer
/// group's committed position per partition lives in `bus_consumer_offsets`.
/// Offsets are the table's global sequence, which is monotonic within a
/// partition because publishers serialize on a per-partition advisory lock.
#[derive(Clone)]
pub struct PostgresEventBus {
    pool: PgPool,
    partitions: u32,
    poll_interval: Duration,
}

impl PostgresEventBus {
    /// Creates a new PostgreSQL event bus.
    pub fn new(pool: PgPool, partitions: u32) -> Self {
        Self {
            pool,
            partitions: partitions.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides how long an idle subscription waits between polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the bus tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_create_bus_tables.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_next(
        &self,
        topic: &str,
        group: &str,
        partitions: &[i32],
    ) -> Result<Option<MessageRow>> {
        let row = sqlx::query(
            r#"
            SELECT m.id, m.partition, m.message_key, m.payload
            FROM bus_messages m
            LEFT JOIN bus_consumer_offsets o
                ON o.group_id = $2 AND o.topic = m.topic AND o.partition = m.partition
            WHERE m.topic = $1
              AND m.partition = ANY($3)
              AND m.id > COALESCE(o.committed_id, 0)
            ORDER BY m.id ASC
            LIMIT 1
            "#,
        )
        .bind(topic)
        .bind(group)
        .bind(partitions)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_message).transpose()
    }

    fn row_to_message(row: PgRow) -> Result<MessageRow> {
        Ok(MessageRow {
            id: row.try_get("id")?,
            partition: row.try_get("partition")?,
            key: row.try_get("message_key")?,
            payload: row.try_get("payload")?,
        })
    }
}

/// A message row as read from `bus_messages`.
struct MessageRow {
    id: i64,
    partition: i32,
    key: String,
    payload: Vec<u8>,
}

#[async_trait]
impl EventBus for PostgresEventBus {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<u64> {
        let partition = partition_for(key, self.partitions) as i32;
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), $2)")
            .bind(topic)
            .bind(partition)
            .execute(&mut *tx)
            .await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO bus_messages (topic, partition, message_key, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(topic)
        .bind(partition)
        .bind(key)
        .bind(payload)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id as u64)
    }

    async fn subscribe_partitions(
        &self,
        topic: &str,
        group: &str,
        partitions: &[u32],
    ) -> Result<MessageStream> {
        validate_partitions(topic, group, partitions, self.partitions)?;

        let subscription = Subscription {
            bus: self.clone(),
            acknowledger: Arc::new(PostgresAcknowledger {
                pool: self.pool.clone(),
                topic: topic.to_string(),
                group: group.to_string(),
            }),
            topic: topic.to_string(),
            group: group.to_string(),
            partitions: partitions.iter().map(|&p| p as i32).collect(),
            delivery_counts: HashMap::new(),
        };

        let stream = futures_util::stream::unfold(subscription, |mut sub| async move {
            loop {
                match sub.bus.fetch_next(&sub.topic, &sub.group, &sub.partitions).await {
                    Ok(Some(row)) => {
                        let delivery = sub.deliver(row);
                        return Some((Ok(delivery), sub));
                    }
                    Ok(None) => tokio::time::sleep(sub.bus.poll_interval).await,
                    Err(e) => return Some((Err(e), sub)),
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

struct Subscription {
    bus: PostgresEventBus,
    acknowledger: Arc<PostgresAcknowledger>,
    topic: String,
    group: String,
    partitions: Vec<i32>,
    /// Redeliveries seen by this subscription, per partition. A restarted
    /// process starts counting again from one.
    delivery_counts: HashMap<i32, (i64, u32)>,
}

impl Subscription {
    fn deliver(&mut self, row: MessageRow) -> Delivery {
        let entry = self.delivery_counts.entry(row.partition).or_insert((row.id, 0));
        if entry.0 != row.id {
            *entry = (row.id, 0);
        }
        entry.1 += 1;

        Delivery::new(
            self.topic.clone(),
            row.partition as u32,
            row.id as u64,
            row.key,
            row.payload,
            entry.1,
            self.acknowledger.clone(),
        )
    }
}

struct PostgresAcknowledger {
    pool: PgPool,
    topic: String,
    group: String,
}

#[async_trait]
impl Acknowledger for PostgresAcknowledger {
    async fn ack(&self, partition: u32, offset: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bus_consumer_offsets (group_id, topic, partition, committed_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (group_id, topic, partition) DO UPDATE SET
                committed_id = GREATEST(bus_consumer_offsets.committed_id, EXCLUDED.committed_id),
                updated_at = NOW()
            "#,
        )
        .bind(&self.group)
        .bind(&self.topic)
        .bind(partition as i32)
        .bind(offset as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn nack(&self, _partition: u32, _offset: u64) -> Result<()> {
        // Nothing to release: the next poll returns the first uncommitted row.
        Ok(())
    }
}
