use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::Result;

/// Commits or releases a delivered message on behalf of a consumer group.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Marks the message at `offset` as processed. The group will not see it
    /// again.
    async fn ack(&self, partition: u32, offset: u64) -> Result<()>;

    /// Releases the message at `offset` without committing it, so it is
    /// delivered again before anything after it on the same partition.
    async fn nack(&self, partition: u32, offset: u64) -> Result<()>;
}

/// A message handed to a consumer, together with its acknowledgement handle.
pub struct Delivery {
    /// Topic the message was published to.
    pub topic: String,
    /// Partition within the topic.
    pub partition: u32,
    /// Position of the message within its partition.
    pub offset: u64,
    /// Partition key the publisher used.
    pub key: String,
    /// Raw JSON payload.
    pub payload: Vec<u8>,
    /// How many times this message has been handed out, including this one.
    pub delivery_count: u32,
    acknowledger: Arc<dyn Acknowledger>,
}

impl Delivery {
    /// Creates a delivery bound to the given acknowledger.
    pub fn new(
        topic: impl Into<String>,
        partition: u32,
        offset: u64,
        key: impl Into<String>,
        payload: Vec<u8>,
        delivery_count: u32,
        acknowledger: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: key.into(),
            payload,
            delivery_count,
            acknowledger,
        }
    }

    /// Decodes the payload as JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }

    /// Returns the payload as text, replacing invalid UTF-8.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Returns true if this message was delivered before.
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    /// Commits the message for this consumer group.
    pub async fn ack(&self) -> Result<()> {
        self.acknowledger.ack(self.partition, self.offset).await
    }

    /// Releases the message for redelivery.
    pub async fn nack(&self) -> Result<()> {
        self.acknowledger.nack(self.partition, self.offset).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("key", &self.key)
            .field("payload", &self.payload_text())
            .field("delivery_count", &self.delivery_count)
            .finish()
    }
}

/// Maps a partition key onto one of `partitions` partitions.
///
/// Uses 64-bit FNV-1a so the mapping is identical in every process that
/// publishes to the same log.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = key.bytes().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    });
    (hash % u64::from(partitions.max(1))) as u32
}
