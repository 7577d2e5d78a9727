//! Storefront checkout, payment and order-fulfillment core.
//!
//! The pipeline converts an untrusted client cart into a durably tracked
//! order: stock is reserved atomically per product, a payment intent is
//! requested from an external gateway, and asynchronous payment callbacks
//! are reconciled idempotently into the authoritative order state machine.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod api;
pub mod config;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::{
    config::AppConfig,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        CatalogService, CheckoutService, CouponService, InventoryService, OrderService,
        ReconciliationService,
    },
};

/// Shared application state: configuration plus handles to every pipeline
/// service. Cheap to clone; all services are internally synchronized.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub catalog: Arc<CatalogService>,
    pub inventory: Arc<InventoryService>,
    pub coupons: Arc<CouponService>,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub reconciliation: Arc<ReconciliationService>,
}

impl AppState {
    /// Wires the full service graph against the given gateway adapter.
    pub fn build(
        config: AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        let gateway_timeout = Duration::from_secs(config.gateway.timeout_secs);
        let catalog = Arc::new(CatalogService::new());
        let inventory = Arc::new(InventoryService::new(event_sender.clone()));
        let coupons = Arc::new(CouponService::new());
        let orders = Arc::new(OrderService::new(event_sender.clone()));
        let checkout = Arc::new(CheckoutService::new(
            catalog.clone(),
            inventory.clone(),
            coupons.clone(),
            orders.clone(),
            gateway.clone(),
            event_sender.clone(),
            config.currency.clone(),
            gateway_timeout,
        ));
        let reconciliation = Arc::new(ReconciliationService::new(
            orders.clone(),
            inventory.clone(),
            coupons.clone(),
            gateway,
            event_sender,
            gateway_timeout,
        ));
        Self {
            config,
            catalog,
            inventory,
            coupons,
            orders,
            checkout,
            reconciliation,
        }
    }
}

/// Uniform JSON envelope for successful responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}
