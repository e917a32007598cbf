//! Reservation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, ReservationId};
use domain::{Reservation, ReservationItem};
use inventory::CreateReservation;
use serde::{Deserialize, Serialize};
use store::{InventoryStore, OrderStore};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateReservationRequest {
    pub order_id: String,
    pub items: Vec<ReservationItemRequest>,
    pub ttl_minutes: Option<u32>,
}

#[derive(Deserialize)]
pub struct ReservationItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct ReservationItemResponse {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct ReservationResponse {
    pub reservation_id: String,
    pub order_id: String,
    pub status: String,
    pub items: Vec<ReservationItemResponse>,
    pub created_at: String,
    pub expires_at: String,

    /// Set when a Pending reservation's window has elapsed but the reaper
    /// has not processed it yet.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_expired: bool,
}

impl ReservationResponse {
    fn from_reservation(reservation: &Reservation, is_expired: bool) -> Self {
        Self {
            reservation_id: reservation.id().to_string(),
            order_id: reservation.order_id().to_string(),
            status: reservation.status().to_string(),
            items: reservation
                .items()
                .iter()
                .map(|item| ReservationItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                })
                .collect(),
            created_at: reservation.created_at().to_rfc3339(),
            expires_at: reservation.expires_at().to_rfc3339(),
            is_expired,
        }
    }
}

// -- Handlers --

/// POST /reservations — hold stock for an order.
#[tracing::instrument(skip(state, req))]
pub async fn create<I, O>(
    State(state): State<Arc<AppState<I, O>>>,
    Json(req): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), ApiError>
where
    I: InventoryStore,
    O: OrderStore,
{
    let order_id = parse_order_id(&req.order_id)?;
    let items: Vec<ReservationItem> = req
        .items
        .iter()
        .map(|item| ReservationItem::new(item.product_id.as_str(), item.quantity))
        .collect();

    let mut cmd = CreateReservation::new(order_id, items);
    cmd.ttl_minutes = req.ttl_minutes;

    let reservation = state.reservations.create_reservation(cmd).await?;
    Ok((
        StatusCode::CREATED,
        Json(ReservationResponse::from_reservation(&reservation, false)),
    ))
}

/// GET /reservations/:id — return the reservation as persisted.
#[tracing::instrument(skip(state))]
pub async fn get<I, O>(
    State(state): State<Arc<AppState<I, O>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError>
where
    I: InventoryStore,
    O: OrderStore,
{
    let id = parse_reservation_id(&id)?;
    let view = state.reservations.get_reservation(id).await?;
    Ok(Json(ReservationResponse::from_reservation(
        &view.reservation,
        view.is_expired,
    )))
}

/// POST /reservations/:id/confirm — convert the hold into an allocation.
#[tracing::instrument(skip(state))]
pub async fn confirm<I, O>(
    State(state): State<Arc<AppState<I, O>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
    I: InventoryStore,
    O: OrderStore,
{
    let id = parse_reservation_id(&id)?;
    state.reservations.confirm_reservation(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /reservations/:id/cancel — give up the hold (idempotent).
#[tracing::instrument(skip(state))]
pub async fn cancel<I, O>(
    State(state): State<Arc<AppState<I, O>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
    I: InventoryStore,
    O: OrderStore,
{
    let id = parse_reservation_id(&id)?;
    state.reservations.cancel_reservation(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_reservation_id(id: &str) -> Result<ReservationId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("invalid reservation id: {e}")))?;
    Ok(ReservationId::from_uuid(uuid))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("invalid order id: {e}")))?;
    Ok(OrderId::from_uuid(uuid))
}
