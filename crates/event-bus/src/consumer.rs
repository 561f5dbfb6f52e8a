//! Consumer loop shared by every saga participant.

use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::watch;

use crate::bus::{EventBus, EventBusExt, MessageStream};
use crate::dead_letter::{DeadLetter, FailureKind};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::{BusError, Delivery, Result};

/// Error returned by a [`MessageHandler`], classified so the consumer loop
/// knows whether to retry or dead-letter the message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    pub kind: FailureKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn not_yet_visible(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotYetVisible, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Malformed, message)
    }

    pub fn unrecoverable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unrecoverable, message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}

impl From<BusError> for HandlerError {
    fn from(err: BusError) -> Self {
        Self::transient(err.to_string())
    }
}

/// Processes messages delivered to one consumer group.
///
/// Handlers must be idempotent: a message is redelivered if the process
/// stops between the handler's effects and the acknowledgement.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Applies the message's effects and publishes any follow-up messages.
    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError>;
}

/// Drives a [`MessageHandler`] from a bus subscription.
///
/// Each delivery is handled to completion before the next one is pulled.
/// Transient failures are retried with backoff; any other failure, or a
/// transient one that outlives the retry policy, is published to the
/// dead-letter topic and the original is acknowledged.
pub struct Consumer<B, H> {
    bus: B,
    handler: H,
    topic: String,
    group: String,
    partitions: Option<Vec<u32>>,
    dead_letter_topic: String,
    retry: RetryPolicy,
}

impl<B, H> Consumer<B, H>
where
    B: EventBus + Clone,
    H: MessageHandler,
{
    pub fn new(
        bus: B,
        topic: impl Into<String>,
        group: impl Into<String>,
        dead_letter_topic: impl Into<String>,
        handler: H,
    ) -> Self {
        Self {
            bus,
            handler,
            topic: topic.into(),
            group: group.into(),
            partitions: None,
            dead_letter_topic: dead_letter_topic.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Restricts the consumer to some of the topic's partitions.
    pub fn with_partitions(mut self, partitions: Vec<u32>) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Sets how transient handler failures are retried.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Consumes until `shutdown` flips to true or its sender is dropped.
    ///
    /// A delivery that is being handled when shutdown is signalled is
    /// finished and acknowledged before this returns.
    #[tracing::instrument(skip_all, fields(consumer = self.handler.name(), topic = %self.topic))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Some(mut stream) = self.subscribe(&mut shutdown).await? else {
            return Ok(());
        };
        tracing::info!(group = %self.group, "consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = stream.next() => match next {
                    Some(Ok(delivery)) => self.process(delivery).await,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "failed to read from bus");
                        tokio::time::sleep(self.retry.initial_delay).await;
                    }
                    None => break,
                },
            }
        }

        tracing::info!(group = %self.group, "consumer stopped");
        Ok(())
    }

    async fn subscribe(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<MessageStream>> {
        let subscribe = retry_with_backoff(
            &self.retry,
            |_: &BusError| true,
            move |_| async move {
                match &self.partitions {
                    Some(partitions) => {
                        self.bus
                            .subscribe_partitions(&self.topic, &self.group, partitions)
                            .await
                    }
                    None => self.bus.subscribe(&self.topic, &self.group).await,
                }
            },
        );

        tokio::select! {
            biased;
            _ = shutdown.changed() => Ok(None),
            stream = subscribe => stream.map(Some),
        }
    }

    /// Handles a single delivery: retries, dead-lettering and the final
    /// acknowledgement.
    pub async fn process(&self, delivery: Delivery) {
        let started = Instant::now();
        let mut attempts = 0;

        let outcome = retry_with_backoff(
            &self.retry,
            |e: &HandlerError| e.kind.is_retryable(),
            |attempt| {
                attempts = attempt + 1;
                self.handler.handle(&delivery)
            },
        )
        .await;

        match outcome {
            Ok(()) => self.ack(&delivery).await,
            Err(error) => self.dead_letter(&delivery, &error, attempts).await,
        }

        metrics::histogram!("message_handling_seconds", "topic" => self.topic.clone())
            .record(started.elapsed().as_secs_f64());
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &HandlerError, attempts: u32) {
        let letter = DeadLetter::from_delivery(delivery, error, attempts);

        match self
            .bus
            .publish_json(&self.dead_letter_topic, &delivery.key, &letter)
            .await
        {
            Ok(_) => {
                metrics::counter!(
                    "dead_letters_total",
                    "topic" => self.topic.clone(),
                    "kind" => error.kind.as_str()
                )
                .increment(1);
                tracing::error!(
                    consumer = self.handler.name(),
                    partition = delivery.partition,
                    offset = delivery.offset,
                    key = %delivery.key,
                    kind = %error.kind,
                    attempts,
                    reason = %error.message,
                    "message dead-lettered"
                );
                self.ack(delivery).await;
            }
            Err(e) => {
                // Keep the message pending rather than lose it.
                tracing::error!(error = %e, offset = delivery.offset, "failed to publish dead letter");
                if let Err(e) = delivery.nack().await {
                    tracing::warn!(error = %e, "failed to release message");
                }
                tokio::time::sleep(self.retry.max_delay).await;
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        match delivery.ack().await {
            Ok(()) => {
                metrics::counter!("bus_messages_acked_total", "topic" => self.topic.clone())
                    .increment(1);
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    offset = delivery.offset,
                    "failed to acknowledge message, it will be redelivered"
                );
            }
        }
    }
}
