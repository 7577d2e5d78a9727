use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{handlers, AppState};

/// Assembles the HTTP surface over the pipeline services.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/v1/checkout", post(handlers::checkout::create_checkout))
        .route(
            "/api/v1/payments/webhook",
            post(handlers::payments::payment_webhook),
        )
        .route(
            "/api/v1/payments/:payment_ref/poll",
            post(handlers::payments::poll_payment),
        )
        .route(
            "/api/v1/orders/:id/status",
            get(handlers::orders::get_order_status),
        )
        .route(
            "/api/v1/orders/:id/cancel",
            post(handlers::orders::cancel_order),
        )
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
