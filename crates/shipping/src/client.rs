//! Synchronous status callback into the order service.

use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use reqwest::StatusCode;
use serde::Serialize;

use crate::record::SHIPPED;
use crate::{Result, ShippingError};

/// Tells the order service that an order has shipped.
#[async_trait]
pub trait OrderStatusClient: Send + Sync {
    async fn mark_shipped(&self, order_id: OrderId) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct StatusBody<'a> {
    status: &'a str,
}

/// Calls `PUT {base_url}/orders/{id}/status` with `{"status":"Shipped"}`.
///
/// Only `200 OK` counts as success.
#[derive(Debug, Clone)]
pub struct HttpOrderStatusClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOrderStatusClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn status_url(&self, order_id: OrderId) -> String {
        format!("{}/orders/{}/status", self.base_url, order_id)
    }
}

#[async_trait]
impl OrderStatusClient for HttpOrderStatusClient {
    #[tracing::instrument(skip(self))]
    async fn mark_shipped(&self, order_id: OrderId) -> Result<()> {
        let response = self
            .client
            .put(self.status_url(order_id))
            .json(&StatusBody { status: SHIPPED })
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ShippingError::CallbackRejected {
                order_id,
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(%order_id, "order service confirmed shipment");
        Ok(())
    }
}
