use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use validator::Validate;

use crate::{errors::ServiceError, models::CartLine, ApiResponse, AppState};

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "cart must contain at least one line"))]
    pub lines: Vec<CartLine>,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

// POST /api/v1/checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    request.validate()?;
    let confirmation = state
        .checkout
        .checkout(request.lines, request.coupon_code)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(confirmation))))
}
