//! Stock administration for the inventory service.

use axum::Json;
use axum::extract::{Path, State};
use common::ProductId;
use inventory::{StockLedger, StockRecord};
use serde::Deserialize;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    pub quantity: i64,
    pub low_stock_threshold: i64,
}

/// PUT /inventory/stocks/{product_id}: sets a product's stock level.
#[tracing::instrument(skip(ledger, req), fields(quantity = req.quantity))]
pub async fn set<L>(
    State(ledger): State<L>,
    Path(product_id): Path<u64>,
    Json(req): Json<SetStockRequest>,
) -> Result<Json<StockRecord>, ApiError>
where
    L: StockLedger + Clone + 'static,
{
    let product_id = ProductId::new(product_id);
    let record = StockRecord::new(product_id, req.quantity, req.low_stock_threshold)?;
    ledger.upsert_stock(record).await?;

    // Read back: the stored row keeps its low-stock latch.
    let stored = ledger
        .stock(product_id)
        .await?
        .ok_or(ApiError::Stock(inventory::StockError::UnknownProduct(product_id)))?;
    tracing::info!(%product_id, quantity = stored.quantity, "stock level set");
    Ok(Json(stored))
}

/// GET /inventory/stocks/{product_id}
pub async fn get<L>(
    State(ledger): State<L>,
    Path(product_id): Path<u64>,
) -> Result<Json<StockRecord>, ApiError>
where
    L: StockLedger + Clone + 'static,
{
    let product_id = ProductId::new(product_id);
    let record = ledger
        .stock(product_id)
        .await?
        .ok_or(ApiError::NotFound(format!("Stock for product {product_id} not found")))?;
    Ok(Json(record))
}
