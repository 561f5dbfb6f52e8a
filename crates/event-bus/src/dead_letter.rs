use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Delivery;
use crate::consumer::HandlerError;

/// Why a message could not be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A dependency was unavailable; worth retrying.
    Transient,
    /// The record the message refers to was not visible after bounded retries.
    NotYetVisible,
    /// The payload could not be decoded or held an unknown value.
    Malformed,
    /// The message is well formed but can never be applied.
    Unrecoverable,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::NotYetVisible => "not_yet_visible",
            Self::Malformed => "malformed",
            Self::Unrecoverable => "unrecoverable",
        }
    }

    /// Only transient failures are retried by the consumer loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message that was set aside instead of being processed.
///
/// Published to the dead-letter topic keyed by the original message key, so
/// an operator can inspect and replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub source_topic: String,
    pub key: String,
    /// Original payload as text.
    pub payload: String,
    pub kind: FailureKind,
    pub reason: String,
    /// Handling attempts made before giving up.
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        source_topic: impl Into<String>,
        key: impl Into<String>,
        payload: impl Into<String>,
        kind: FailureKind,
        reason: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_topic: source_topic.into(),
            key: key.into(),
            payload: payload.into(),
            kind,
            reason: reason.into(),
            attempts,
            failed_at: Utc::now(),
        }
    }

    /// Builds a dead letter for a delivery its handler gave up on.
    pub fn from_delivery(delivery: &Delivery, error: &HandlerError, attempts: u32) -> Self {
        Self::new(
            delivery.topic.clone(),
            delivery.key.clone(),
            delivery.payload_text(),
            error.kind,
            error.message.clone(),
            attempts,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_wire_names() {
        let json = serde_json::to_string(&FailureKind::NotYetVisible).unwrap();
        assert_eq!(json, r#""not_yet_visible""#);
        assert_eq!(FailureKind::Malformed.to_string(), "malformed");
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(FailureKind::Transient.is_retryable());
        assert!(!FailureKind::NotYetVisible.is_retryable());
        assert!(!FailureKind::Malformed.is_retryable());
        assert!(!FailureKind::Unrecoverable.is_retryable());
    }

    #[test]
    fn test_dead_letter_serializes_kind_and_payload() {
        let letter = DeadLetter::new(
            "inventory-status",
            "7",
            r#"{"order_id":7}"#,
            FailureKind::Malformed,
            "unknown status",
            1,
        );
        let value = serde_json::to_value(&letter).unwrap();
        assert_eq!(value["source_topic"], "inventory-status");
        assert_eq!(value["kind"], "malformed");
        assert_eq!(value["payload"], r#"{"order_id":7}"#);
    }
}
