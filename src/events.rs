//! Domain events emitted by the pipeline services.
//!
//! Events are fire-and-forget over a bounded mpsc channel; a logging
//! consumer task drains them. Losing an event never fails the operation
//! that emitted it.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::OrderStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCancelled(Uuid),
    OrderExpired(Uuid),
    PaymentIntentCreated {
        order_id: Uuid,
        payment_ref: String,
    },
    PaymentEventApplied {
        payment_id: String,
        order_id: Uuid,
        new_status: OrderStatus,
    },
    InventoryReserved {
        product_id: Uuid,
        quantity: i32,
    },
    InventoryReleased {
        product_id: Uuid,
        quantity: i32,
    },
    InventoryCommitted {
        product_id: Uuid,
        quantity: i32,
    },
    CouponRedeemed {
        code: String,
        order_id: Uuid,
    },
    CouponRedemptionVoided {
        code: String,
        order_id: Uuid,
    },
    StockReconciliationConflict {
        order_id: Uuid,
        payment_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, logging instead of failing if the consumer is gone.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!("event channel closed, dropping event: {}", e);
        }
    }
}

/// Drains the event channel, logging each event. Conflict events are
/// surfaced at warn level so operators see them without a metrics stack.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockReconciliationConflict {
                order_id,
                payment_id,
            } => {
                warn!(
                    %order_id,
                    %payment_id,
                    "stock reconciliation conflict requires operator review"
                );
            }
            Event::CouponRedemptionVoided { code, order_id } => {
                warn!(%order_id, code, "coupon redemption voided at usage limit");
            }
            other => info!(event = ?other, "domain event"),
        }
    }
    info!("event channel closed; event processor exiting");
}
