use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{errors::ServiceError, models::OrderStatus, ApiResponse, AppState};

#[derive(Debug, Serialize)]
pub struct OrderStatusResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
}

// GET /api/v1/orders/:id/status
pub async fn get_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let status = state.orders.status(id)?;
    Ok(Json(ApiResponse::success(OrderStatusResponse {
        order_id: id,
        status,
    })))
}

// POST /api/v1/orders/:id/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.checkout.cancel_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}
