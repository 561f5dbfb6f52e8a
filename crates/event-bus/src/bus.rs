use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use serde::Serialize;

use crate::{BusError, Delivery, Result};

/// A lazy, never-ending stream of deliveries for one subscription.
///
/// Read errors are yielded as items; the stream keeps going after them.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// Core trait for event bus implementations.
///
/// A bus is a set of named topics, each split into a fixed number of
/// append-only partitions. Consumer groups track their own position per
/// partition. Delivery is at-least-once: a message stays pending for its
/// group until it is acknowledged, and only one message per partition is
/// handed out at a time, which preserves per-partition order.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Number of partitions every topic is split into.
    fn partitions(&self) -> u32;

    /// Appends a message to the partition chosen by `key`.
    ///
    /// Returns the offset of the message once it is durable.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<u64>;

    /// Subscribes a consumer group to a subset of a topic's partitions.
    ///
    /// Several subscriptions of one group may split the partitions between
    /// them to consume concurrently.
    async fn subscribe_partitions(
        &self,
        topic: &str,
        group: &str,
        partitions: &[u32],
    ) -> Result<MessageStream>;

    /// Subscribes a consumer group to every partition of a topic.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<MessageStream> {
        let partitions: Vec<u32> = (0..self.partitions()).collect();
        self.subscribe_partitions(topic, group, &partitions).await
    }
}

/// Extension trait providing convenience methods for event buses.
#[async_trait]
pub trait EventBusExt: EventBus {
    /// Serializes `payload` as JSON and publishes it.
    async fn publish_json<T>(&self, topic: &str, key: &str, payload: &T) -> Result<u64>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(payload)?;
        let offset = self.publish(topic, key, bytes).await?;
        metrics::counter!("bus_messages_published_total", "topic" => topic.to_string())
            .increment(1);
        tracing::debug!(topic, key, offset, "message published");
        Ok(offset)
    }
}

impl<T: EventBus + ?Sized> EventBusExt for T {}

/// Checks a subscription request against the bus's partition count.
pub(crate) fn validate_partitions(
    topic: &str,
    group: &str,
    partitions: &[u32],
    available: u32,
) -> Result<()> {
    if partitions.is_empty() {
        return Err(BusError::EmptySubscription {
            topic: topic.to_string(),
            group: group.to_string(),
        });
    }
    if let Some(&partition) = partitions.iter().find(|&&p| p >= available) {
        return Err(BusError::UnknownPartition {
            topic: topic.to_string(),
            partition,
            partitions: available,
        });
    }
    Ok(())
}
