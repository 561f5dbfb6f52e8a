//! Order intake, lookup, cancellation and the shipping status callback.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CustomerId, OrderId, ProductId};
use event_bus::EventBus;
use orders::{NewOrder, Order, OrderService, OrderStore, SHIPPING_STATUS_V1, StatusSource, Transition};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared state of the order routes.
pub type OrderState<S, B> = Arc<OrderService<S, B>>;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub product_id: u64,
    pub quantity: u32,
    pub customer_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct StatusUpdateResponse {
    pub order: Order,
    pub transition: Transition,
}

// -- Handlers --

/// POST /orders: stores a pending order and asks inventory for stock.
#[tracing::instrument(skip(service, req))]
pub async fn create<S, B>(
    State(service): State<OrderState<S, B>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError>
where
    S: OrderStore + 'static,
    B: EventBus + 'static,
{
    let order = service
        .place_order(NewOrder {
            product_id: ProductId::new(req.product_id),
            quantity: req.quantity,
            customer_id: CustomerId::new(req.customer_id),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id}
#[tracing::instrument(skip(service))]
pub async fn get<S, B>(
    State(service): State<OrderState<S, B>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError>
where
    S: OrderStore + 'static,
    B: EventBus + 'static,
{
    let order_id = parse_order_id(&id)?;
    let order = service
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(order))
}

/// POST /orders/{id}/cancel: asks inventory to release the order's stock.
///
/// Answers `202 Accepted`: the order becomes `Cancelled` once inventory
/// confirms.
#[tracing::instrument(skip(service))]
pub async fn cancel<S, B>(
    State(service): State<OrderState<S, B>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Order>), ApiError>
where
    S: OrderStore + 'static,
    B: EventBus + 'static,
{
    let order = service.cancel_order(parse_order_id(&id)?).await?;
    Ok((StatusCode::ACCEPTED, Json(order)))
}

/// PUT /orders/{id}/status: status callback from the shipping service.
#[tracing::instrument(skip(service, req), fields(status = %req.status))]
pub async fn update_status<S, B>(
    State(service): State<OrderState<S, B>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<StatusUpdateResponse>, ApiError>
where
    S: OrderStore + 'static,
    B: EventBus + 'static,
{
    let order_id = parse_order_id(&id)?;
    let target = SHIPPING_STATUS_V1.translate(&req.status)?;
    let change = service
        .apply_status(order_id, target, StatusSource::ShippingCallback)
        .await?;
    metrics::counter!(
        "order_status_callbacks_total",
        "transition" => format!("{:?}", change.transition)
    )
    .increment(1);

    Ok(Json(StatusUpdateResponse {
        order: change.order,
        transition: change.transition,
    }))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid order id: {id}")))
}
