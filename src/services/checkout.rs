//! Checkout orchestrator.
//!
//! Converts an untrusted, client-held cart into an AWAITING_PAYMENT order:
//! validate and re-price the cart, evaluate the coupon, reserve stock line
//! by line with compensating rollback, persist the order, then request a
//! payment intent under a bounded timeout. Reservations are settled before
//! the gateway call starts, so gateway latency never blocks other buyers.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::PaymentGateway,
    models::{CartLine, Order, OrderLine, OrderStatus},
    services::{CatalogService, CouponService, InventoryService, OrderService},
};

/// What the caller needs to send the buyer to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutConfirmation {
    pub order_id: Uuid,
    pub payment_ref: String,
    pub redirect_url: String,
    pub total: i64,
}

pub struct CheckoutService {
    catalog: Arc<CatalogService>,
    inventory: Arc<InventoryService>,
    coupons: Arc<CouponService>,
    orders: Arc<OrderService>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    currency: String,
    gateway_timeout: Duration,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<CatalogService>,
        inventory: Arc<InventoryService>,
        coupons: Arc<CouponService>,
        orders: Arc<OrderService>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        currency: String,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            inventory,
            coupons,
            orders,
            gateway,
            event_sender,
            currency,
            gateway_timeout,
        }
    }

    /// Re-derives every line from the live catalog. The client's price
    /// hint is never consulted; quantity below one and inactive or unknown
    /// products fail the whole cart with no side effects.
    fn validate_cart(&self, cart: &[CartLine]) -> Result<Vec<OrderLine>, ServiceError> {
        if cart.is_empty() {
            return Err(ServiceError::ValidationError("cart is empty".into()));
        }
        let mut lines = Vec::with_capacity(cart.len());
        for item in cart {
            if item.quantity < 1 {
                return Err(ServiceError::InvalidQuantity {
                    product_id: item.product_id,
                    quantity: item.quantity,
                });
            }
            let product = self.catalog.get_active(item.product_id)?;
            lines.push(OrderLine {
                product_id: product.id,
                quantity: item.quantity,
                unit_price: product.price,
            });
        }
        Ok(lines)
    }

    /// Runs one checkout attempt end to end.
    #[instrument(skip(self, cart), fields(lines = cart.len()))]
    pub async fn checkout(
        &self,
        cart: Vec<CartLine>,
        coupon_code: Option<String>,
    ) -> Result<CheckoutConfirmation, ServiceError> {
        // 1. Validation is side-effect free; fail fast on any line.
        let lines = self.validate_cart(&cart)?;
        let subtotal: i64 = lines.iter().map(OrderLine::line_total).sum();

        // 2. Coupon evaluation is read-only; usage is consumed at PAID.
        let discount = match &coupon_code {
            Some(code) => self.coupons.evaluate_code(code, subtotal, Utc::now())?,
            None => 0,
        };

        // 3. Reserve per line; on any failure release everything reserved
        //    so far in this attempt. Partial reservations never survive.
        let mut reserved: Vec<&OrderLine> = Vec::with_capacity(lines.len());
        for line in &lines {
            if let Err(err) = self.inventory.reserve(line.product_id, line.quantity).await {
                join_all(
                    reserved
                        .iter()
                        .map(|r| self.inventory.release(r.product_id, r.quantity)),
                )
                .await;
                return Err(err);
            }
            reserved.push(line);
        }

        // 4. Persist the order before talking to the gateway.
        let order = self
            .orders
            .create(lines, subtotal, discount, coupon_code)
            .await;

        // 5. Payment intent under a bounded timeout. Stock is already
        //    settled, so the gateway call holds no inventory lock.
        let intent = match tokio::time::timeout(
            self.gateway_timeout,
            self.gateway
                .create_intent(order.id, order.total, &self.currency),
        )
        .await
        {
            Ok(Ok(intent)) => intent,
            Ok(Err(err)) => {
                return Err(self
                    .fail_initiation(&order, format!("gateway error: {}", err))
                    .await);
            }
            Err(_) => {
                return Err(self
                    .fail_initiation(&order, "gateway timeout".to_string())
                    .await);
            }
        };

        let updated = self
            .orders
            .attach_payment_ref(order.id, &intent.payment_ref)
            .await?;

        info!(
            order_id = %updated.id,
            payment_ref = %intent.payment_ref,
            total = updated.total,
            "checkout complete, awaiting payment"
        );

        Ok(CheckoutConfirmation {
            order_id: updated.id,
            payment_ref: intent.payment_ref,
            redirect_url: intent.redirect_url,
            total: updated.total,
        })
    }

    /// Compensates a failed intent request: reservations go back to the
    /// pool and the order is marked FAILED. The caller must resubmit the
    /// whole checkout; the orchestrator never retries the gateway itself.
    async fn fail_initiation(&self, order: &Order, reason: String) -> ServiceError {
        warn!(order_id = %order.id, %reason, "payment initiation failed, rolling back");
        join_all(
            order
                .lines
                .iter()
                .map(|l| self.inventory.release(l.product_id, l.quantity)),
        )
        .await;
        if let Err(err) = self.orders.transition(order.id, OrderStatus::Failed).await {
            warn!(order_id = %order.id, %err, "could not mark order failed");
        }
        ServiceError::PaymentInitiationFailed(reason)
    }

    /// Operator-initiated cancellation; legal only from PENDING or
    /// AWAITING_PAYMENT (enforced by the transition table). Releases the
    /// order's reservations.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        let order = self
            .orders
            .transition(order_id, OrderStatus::Cancelled)
            .await?;
        join_all(
            order
                .lines
                .iter()
                .map(|l| self.inventory.release(l.product_id, l.quantity)),
        )
        .await;
        self.event_sender.send(Event::OrderCancelled(order_id)).await;
        Ok(order)
    }

    /// Expires AWAITING_PAYMENT orders created before `before`, returning
    /// their reservations to the pool. Called by an external scheduler.
    /// Returns the number of orders expired.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self, before: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for order_id in self.orders.stale_awaiting_payment(before) {
            // A payment landing mid-sweep wins the entry guard; losing the
            // race here is expected, not an error.
            match self.orders.transition(order_id, OrderStatus::Expired).await {
                Ok(order) => {
                    join_all(
                        order
                            .lines
                            .iter()
                            .map(|l| self.inventory.release(l.product_id, l.quantity)),
                    )
                    .await;
                    self.event_sender.send(Event::OrderExpired(order_id)).await;
                    expired += 1;
                }
                Err(ServiceError::InvalidStatus(_)) => continue,
                Err(err) => {
                    warn!(%order_id, %err, "expiry sweep skipped order");
                }
            }
        }
        if expired > 0 {
            info!(count = expired, "expired stale orders");
        }
        expired
    }
}
