use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::RwLock;

use crate::order::{Order, StatusChange};
use crate::status::{OrderStatus, StatusSource};
use crate::store::OrderStore;
use crate::{OrderStoreError, Result};

/// In-memory order store for tests and single-process runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    last_id: Arc<AtomicU64>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders.
    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn next_id(&self) -> Result<OrderId> {
        Ok(OrderId::new(self.last_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn insert(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(OrderStoreError::AlreadyExists(order.id));
        }
        self.last_id.fetch_max(order.id.value(), Ordering::SeqCst);
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn apply_status(
        &self,
        id: OrderId,
        target: OrderStatus,
        source: StatusSource,
    ) -> Result<StatusChange> {
        let mut orders = self.orders.write().await;
        let stored = orders.get_mut(&id).ok_or(OrderStoreError::NotFound(id))?;

        let mut order = stored.clone();
        let previous = order.status;
        let transition = order.transition_to(target, source)?;
        *stored = order.clone();

        Ok(StatusChange {
            order,
            previous,
            transition,
        })
    }
}
