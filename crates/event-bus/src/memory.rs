use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, Notify};

use crate::bus::{EventBus, MessageStream, validate_partitions};
use crate::message::{Acknowledger, Delivery, partition_for};
use crate::Result;

const DEFAULT_PARTITIONS: u32 = 4;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
struct StoredMessage {
    sequence: u64,
    key: String,
    payload: Vec<u8>,
}

/// Position of one consumer group on one topic.
#[derive(Debug)]
struct GroupCursor {
    /// Next offset to hand out, per partition.
    committed: Vec<u64>,
    /// Offset currently handed out and not yet acknowledged, per partition.
    in_flight: Vec<Option<u64>>,
    delivery_counts: HashMap<(u32, u64), u32>,
}

impl GroupCursor {
    fn new(partitions: u32) -> Self {
        Self {
            committed: vec![0; partitions as usize],
            in_flight: vec![None; partitions as usize],
            delivery_counts: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct BusState {
    topics: HashMap<String, Vec<Vec<StoredMessage>>>,
    groups: HashMap<(String, String), GroupCursor>,
    next_sequence: u64,
}

/// In-memory event bus implementation for testing and single-process runs.
///
/// Provides the same delivery guarantees as the PostgreSQL log: per-partition
/// ordering, per-group offsets and redelivery of anything not acknowledged.
#[derive(Clone)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
    notify: Arc<Notify>,
    partitions: u32,
    poll_interval: Duration,
}

impl InMemoryEventBus {
    /// Creates an empty bus with four partitions per topic.
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Creates an empty bus with the given number of partitions per topic.
    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            notify: Arc::new(Notify::new()),
            partitions: partitions.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Returns the number of messages published to a topic.
    pub async fn message_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Returns every `(key, payload)` published to a topic, in publish order.
    pub async fn messages(&self, topic: &str) -> Vec<(String, Vec<u8>)> {
        let state = self.state.lock().await;
        let mut messages: Vec<StoredMessage> = state
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default();
        messages.sort_by_key(|m| m.sequence);
        messages.into_iter().map(|m| (m.key, m.payload)).collect()
    }

    /// Decodes every payload published to a topic, in publish order.
    pub async fn decoded<T: DeserializeOwned>(&self, topic: &str) -> Result<Vec<T>> {
        self.messages(topic)
            .await
            .iter()
            .map(|(_, payload)| serde_json::from_slice(payload).map_err(Into::into))
            .collect()
    }

    /// Returns how many messages on a topic the group has not acknowledged.
    pub async fn pending(&self, topic: &str, group: &str) -> usize {
        let state = self.state.lock().await;
        let Some(partitions) = state.topics.get(topic) else {
            return 0;
        };
        let cursor = state.groups.get(&(topic.to_string(), group.to_string()));
        partitions
            .iter()
            .enumerate()
            .map(|(p, log)| {
                let committed = cursor.map(|c| c.committed[p]).unwrap_or(0);
                log.len().saturating_sub(committed as usize)
            })
            .sum()
    }

    /// Releases every message the group holds without acknowledging it, as
    /// if the consumer had crashed. Each is delivered again.
    pub async fn redeliver_in_flight(&self, topic: &str, group: &str) {
        let mut state = self.state.lock().await;
        if let Some(cursor) = state.groups.get_mut(&(topic.to_string(), group.to_string())) {
            cursor.in_flight.iter_mut().for_each(|slot| *slot = None);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    async fn take_next(
        &self,
        topic: &str,
        group: &str,
        partitions: &[u32],
        rotation: usize,
    ) -> Option<Delivery> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let log = state.topics.get(topic)?;
        let cursor = state
            .groups
            .entry((topic.to_string(), group.to_string()))
            .or_insert_with(|| GroupCursor::new(self.partitions));

        for i in 0..partitions.len() {
            let partition = partitions[(rotation + i) % partitions.len()];
            let p = partition as usize;
            if cursor.in_flight[p].is_some() {
                continue;
            }
            let offset = cursor.committed[p];
            let Some(message) = log[p].get(offset as usize) else {
                continue;
            };

            cursor.in_flight[p] = Some(offset);
            let count = cursor.delivery_counts.entry((partition, offset)).or_insert(0);
            *count += 1;

            let acknowledger = Arc::new(InMemoryAcknowledger {
                bus: self.clone(),
                topic: topic.to_string(),
                group: group.to_string(),
            });
            return Some(Delivery::new(
                topic,
                partition,
                offset,
                message.key.clone(),
                message.payload.clone(),
                *count,
                acknowledger,
            ));
        }
        None
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<u64> {
        let partition = partition_for(key, self.partitions) as usize;
        let mut state = self.state.lock().await;
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let partitions = self.partitions;
        let log = state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| (0..partitions).map(|_| Vec::new()).collect());
        log[partition].push(StoredMessage {
            sequence,
            key: key.to_string(),
            payload,
        });
        let offset = (log[partition].len() - 1) as u64;
        drop(state);

        self.notify.notify_waiters();
        Ok(offset)
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
            topic: topic.to_string(),
            group: group.to_string(),
            partitions: partitions.to_vec(),
            rotation: 0,
        };

        let stream = futures_util::stream::unfold(subscription, |mut sub| async move {
            loop {
                let notify = sub.bus.notify.clone();
                let notified = notify.notified();
                if let Some(delivery) = sub
                    .bus
                    .take_next(&sub.topic, &sub.group, &sub.partitions, sub.rotation)
                    .await
                {
                    sub.rotation = sub.rotation.wrapping_add(1);
                    return Some((Ok(delivery), sub));
                }
                let _ = tokio::time::timeout(sub.bus.poll_interval, notified).await;
            }
        });

        Ok(Box::pin(stream))
    }
}

struct Subscription {
    bus: InMemoryEventBus,
    topic: String,
    group: String,
    partitions: Vec<u32>,
    rotation: usize,
}

struct InMemoryAcknowledger {
    bus: InMemoryEventBus,
    topic: String,
    group: String,
}

#[async_trait]
impl Acknowledger for InMemoryAcknowledger {
    async fn ack(&self, partition: u32, offset: u64) -> Result<()> {
        let mut state = self.bus.state.lock().await;
        if let Some(cursor) = state
            .groups
            .get_mut(&(self.topic.clone(), self.group.clone()))
        {
            let p = partition as usize;
            if cursor.in_flight[p] == Some(offset) {
                cursor.committed[p] = offset + 1;
                cursor.in_flight[p] = None;
                cursor.delivery_counts.remove(&(partition, offset));
            }
        }
        drop(state);
        self.bus.notify.notify_waiters();
        Ok(())
    }

    async fn nack(&self, partition: u32, offset: u64) -> Result<()> {
        let mut state = self.bus.state.lock().await;
        if let Some(cursor) = state
            .groups
            .get_mut(&(self.topic.clone(), self.group.clone()))
        {
            let p = partition as usize;
            if cursor.in_flight[p] == Some(offset) {
                cursor.in_flight[p] = None;
            }
        }
        drop(state);
        self.bus.notify.notify_waiters();
        Ok(())
    }
}
