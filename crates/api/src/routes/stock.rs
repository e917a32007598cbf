//! Stock query and provisioning endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::ProductId;
use inventory::StockLevel;
use serde::{Deserialize, Serialize};
use store::{InventoryStore, OrderStore};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct RestockRequest {
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct StockResponse {
    pub product_id: String,
    pub available: u32,
    pub reserved: u32,
    pub total: u32,
}

impl From<StockLevel> for StockResponse {
    fn from(level: StockLevel) -> Self {
        Self {
            product_id: level.product_id.to_string(),
            available: level.available,
            reserved: level.reserved,
            total: level.total,
        }
    }
}

/// GET /stock/:product_id — current stock levels.
#[tracing::instrument(skip(state))]
pub async fn get<I, O>(
    State(state): State<Arc<AppState<I, O>>>,
    Path(product_id): Path<String>,
) -> Result<Json<StockResponse>, ApiError>
where
    I: InventoryStore,
    O: OrderStore,
{
    let level = state
        .reservations
        .get_stock(&ProductId::new(product_id))
        .await?;
    Ok(Json(level.into()))
}

/// POST /stock/:product_id/restock — provision stock, creating the ledger
/// entry on first restock.
#[tracing::instrument(skip(state, req))]
pub async fn restock<I, O>(
    State(state): State<Arc<AppState<I, O>>>,
    Path(product_id): Path<String>,
    Json(req): Json<RestockRequest>,
) -> Result<Json<StockResponse>, ApiError>
where
    I: InventoryStore,
    O: OrderStore,
{
    let level = state
        .reservations
        .restock(&ProductId::new(product_id), req.quantity)
        .await?;
    Ok(Json(level.into()))
}
