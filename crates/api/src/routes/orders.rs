//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CustomerId, Money, OrderId};
use domain::{Order, OrderLine};
use orders::CreateOrder;
use serde::{Deserialize, Serialize};
use store::{InventoryStore, OrderStore};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: Option<String>,
    pub lines: Vec<OrderLineRequest>,
}

#[derive(Deserialize)]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub customer_id: String,
    pub status: String,
    pub lines: Vec<OrderLineResponse>,
    pub total_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    pub created_at: String,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id().to_string(),
            customer_id: order.customer_id().to_string(),
            status: order.status().to_string(),
            lines: order
                .lines()
                .iter()
                .map(|line| OrderLineResponse {
                    product_id: line.product_id.to_string(),
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price.cents(),
                })
                .collect(),
            total_cents: order.total_amount().cents(),
            cancel_reason: order.cancel_reason().map(String::from),
            created_at: order.created_at().to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /orders — record an order; the reservation outcome settles it
/// asynchronously through the saga.
#[tracing::instrument(skip(state, req))]
pub async fn create<I, O>(
    State(state): State<Arc<AppState<I, O>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError>
where
    I: InventoryStore,
    O: OrderStore,
{
    let customer_id = if let Some(ref id_str) = req.customer_id {
        let uuid = uuid::Uuid::parse_str(id_str)
            .map_err(|e| ApiError::BadRequest(format!("invalid customer id: {e}")))?;
        CustomerId::from_uuid(uuid)
    } else {
        CustomerId::new()
    };

    let lines: Vec<OrderLine> = req
        .lines
        .iter()
        .map(|line| {
            OrderLine::new(
                line.product_id.as_str(),
                line.quantity,
                Money::from_cents(line.unit_price_cents),
            )
        })
        .collect();

    let order = state
        .orders
        .create_order(CreateOrder::new(customer_id, lines))
        .await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders/:id — load an order by id.
#[tracing::instrument(skip(state))]
pub async fn get<I, O>(
    State(state): State<Arc<AppState<I, O>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    I: InventoryStore,
    O: OrderStore,
{
    let uuid = uuid::Uuid::parse_str(&id)
        .map_err(|e| ApiError::BadRequest(format!("invalid order id: {e}")))?;
    let order = state.orders.get_order(OrderId::from_uuid(uuid)).await?;
    Ok(Json(OrderResponse::from(&order)))
}
