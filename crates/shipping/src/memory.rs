use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use event_bus::ShipRequest;
use tokio::sync::RwLock;

use crate::Result;
use crate::record::ShippingRecord;
use crate::store::ShippingStore;

/// In-memory shipping store for tests and single-process runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingStore {
    records: Arc<RwLock<HashMap<OrderId, ShippingRecord>>>,
}

impl InMemoryShippingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored shipments.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ShippingStore for InMemoryShippingStore {
    async fn record_shipment(&self, request: &ShipRequest) -> Result<(ShippingRecord, bool)> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&request.order_id) {
            return Ok((existing.clone(), false));
        }
        let record = ShippingRecord::shipped(request);
        records.insert(request.order_id, record.clone());
        Ok((record, true))
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<ShippingRecord>> {
        Ok(self.records.read().await.get(&order_id).cloned())
    }

    async fn confirm_callback(&self, order_id: OrderId) -> Result<()> {
        if let Some(record) = self.records.write().await.get_mut(&order_id) {
            record.callback_confirmed = true;
            record.callback_attempts += 1;
            record.last_callback_error = None;
        }
        Ok(())
    }

    async fn record_callback_failure(&self, order_id: OrderId, reason: &str) -> Result<()> {
        if let Some(record) = self.records.write().await.get_mut(&order_id) {
            record.callback_attempts += 1;
            record.last_callback_error = Some(reason.to_string());
        }
        Ok(())
    }

    async fn abandon_callback(&self, order_id: OrderId, reason: &str) -> Result<()> {
        if let Some(record) = self.records.write().await.get_mut(&order_id) {
            record.callback_abandoned = true;
            record.callback_attempts += 1;
            record.last_callback_error = Some(reason.to_string());
        }
        Ok(())
    }

    async fn unconfirmed(&self, limit: usize) -> Result<Vec<ShippingRecord>> {
        let mut pending: Vec<ShippingRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| !r.callback_confirmed && !r.callback_abandoned)
            .cloned()
            .collect();
        pending.sort_by_key(|r| (r.callback_attempts, r.shipment_time, r.order_id));
        pending.truncate(limit);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;

    fn request(order: u64) -> ShipRequest {
        ShipRequest::new(OrderId::new(order), ProductId::new(7), 5)
    }

    #[tokio::test]
    async fn test_record_shipment_is_idempotent() {
        let store = InMemoryShippingStore::new();

        let (first, created) = store.record_shipment(&request(42)).await.unwrap();
        let (second, created_again) = store.record_shipment(&request(42)).await.unwrap();

        assert!(created);
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_confirm_removes_from_unconfirmed() {
        let store = InMemoryShippingStore::new();
        store.record_shipment(&request(1)).await.unwrap();
        store.record_shipment(&request(2)).await.unwrap();

        store.record_callback_failure(OrderId::new(1), "connection refused").await.unwrap();
        store.confirm_callback(OrderId::new(2)).await.unwrap();

        let pending = store.unconfirmed(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].order_id, OrderId::new(1));
        assert_eq!(pending[0].callback_attempts, 1);
        assert_eq!(pending[0].last_callback_error.as_deref(), Some("connection refused"));

        let confirmed = store.get(OrderId::new(2)).await.unwrap().unwrap();
        assert!(confirmed.callback_confirmed);
    }

    #[tokio::test]
    async fn test_unconfirmed_prefers_fewest_attempts_and_skips_abandoned() {
        let store = InMemoryShippingStore::new();
        for order in 1..=3 {
            store.record_shipment(&request(order)).await.unwrap();
        }
        store.record_callback_failure(OrderId::new(1), "timeout").await.unwrap();
        store.abandon_callback(OrderId::new(2), "409 Conflict").await.unwrap();

        let pending: Vec<OrderId> = store
            .unconfirmed(10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.order_id)
            .collect();
        assert_eq!(pending, vec![OrderId::new(3), OrderId::new(1)]);

        let abandoned = store.get(OrderId::new(2)).await.unwrap().unwrap();
        assert!(abandoned.callback_abandoned);
        assert!(!abandoned.callback_confirmed);
    }

    #[tokio::test]
    async fn test_unconfirmed_respects_limit() {
        let store = InMemoryShippingStore::new();
        for order in 1..=5 {
            store.record_shipment(&request(order)).await.unwrap();
        }
        assert_eq!(store.unconfirmed(3).await.unwrap().len(), 3);
    }
}
