//! Payment reconciliation.
//!
//! Gateway callbacks and polling results both funnel into [`apply`], which
//! is idempotent: events are appended to a per-payment log, terminal
//! outcomes are recorded once, and replaying the same terminal event
//! returns the recorded outcome with no further state change. Events for
//! different payments run fully in parallel; events for the same payment id
//! serialize on a per-payment mutex.

use std::{sync::Arc, time::Duration};

use async_recursion::async_recursion;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    errors::{CouponError, ServiceError},
    events::{Event, EventSender},
    gateway::PaymentGateway,
    models::{OrderStatus, PaymentEvent, PaymentEventStatus},
    services::{CouponService, InventoryService, OrderService},
};

/// Result of applying one payment event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The event advanced the order to a new terminal status.
    Applied {
        order_id: Uuid,
        new_status: OrderStatus,
    },
    /// A terminal event for this payment was applied earlier; no change.
    AlreadyApplied {
        order_id: Uuid,
        status: OrderStatus,
    },
    /// Unrecognized status: logged and held, no order mutation.
    Held,
    /// No order carries this payment reference (e.g. a callback racing
    /// ahead of intent attachment, or a pre-intent rejection).
    NoMatchingOrder,
    /// Recognized terminal event but the order was already in a terminal
    /// state that needs no compensation.
    NoOp {
        order_id: Uuid,
        status: OrderStatus,
    },
}

/// One appended log entry. The log is append-only and never pruned; it is
/// what makes duplicate delivery detectable.
#[derive(Debug, Clone)]
pub struct PaymentEventRecord {
    pub status: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

/// The recorded result of a terminal event, keyed by payment id. The
/// status it was recorded under scopes the duplicate short-circuit: a
/// replay of the same terminal status returns this, a different terminal
/// status for the same payment is a new event and is processed.
#[derive(Debug, Clone)]
struct AppliedTerminal {
    status: PaymentEventStatus,
    result: AppliedResult,
}

#[derive(Debug, Clone)]
enum AppliedResult {
    Outcome(ReconcileOutcome),
    Conflict { order_id: Uuid },
}

pub struct ReconciliationService {
    orders: Arc<OrderService>,
    inventory: Arc<InventoryService>,
    coupons: Arc<CouponService>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    gateway_timeout: Duration,
    log: DashMap<String, Vec<PaymentEventRecord>>,
    applied: DashMap<String, AppliedTerminal>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ReconciliationService {
    pub fn new(
        orders: Arc<OrderService>,
        inventory: Arc<InventoryService>,
        coupons: Arc<CouponService>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            orders,
            inventory,
            coupons,
            gateway,
            event_sender,
            gateway_timeout,
            log: DashMap::new(),
            applied: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Full event history for a payment id, oldest first.
    pub fn event_log(&self, payment_id: &str) -> Vec<PaymentEventRecord> {
        self.log
            .get(payment_id)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Payment ids whose serialization entry is still live, i.e. no
    /// terminal outcome recorded yet.
    pub fn open_payments(&self) -> usize {
        self.locks.len()
    }

    /// Applies one payment event. At-most-once effective transition per
    /// payment id and terminal status regardless of delivery path or
    /// duplication.
    #[instrument(skip(self, event), fields(payment_id = %event.payment_id, status = %event.status))]
    pub async fn apply(&self, event: PaymentEvent) -> Result<ReconcileOutcome, ServiceError> {
        let payment_id = event.payment_id.clone();
        let lock = self
            .locks
            .entry(payment_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let result = self.apply_serialized(event, &payment_id).await;
        // Once a terminal outcome is recorded, duplicates replay it without
        // touching the order; the serialization entry has nothing left to
        // protect and pruning it keeps the map bounded by open payments.
        if self.applied.contains_key(&payment_id) {
            self.locks.remove(&payment_id);
        }
        result
    }

    async fn apply_serialized(
        &self,
        event: PaymentEvent,
        payment_id: &str,
    ) -> Result<ReconcileOutcome, ServiceError> {
        self.log
            .entry(payment_id.to_string())
            .or_default()
            .push(PaymentEventRecord {
                status: event.status.clone(),
                payload: event.payload.clone(),
                received_at: Utc::now(),
            });

        let status = match event.status.parse::<PaymentEventStatus>() {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    %payment_id,
                    status = %event.status,
                    "unrecognized payment status held as non-terminal"
                );
                return Ok(ReconcileOutcome::Held);
            }
        };

        // Duplicate delivery of the same terminal status: return the
        // recorded outcome. A different terminal status for this payment
        // (say an approval after a rejection) is not a duplicate and falls
        // through to processing against the order's current state.
        if let Some(prior) = self.applied.get(payment_id).map(|p| p.clone()) {
            if prior.status == status {
                return match prior.result {
                    AppliedResult::Outcome(outcome) => {
                        info!(%payment_id, "duplicate terminal event; replaying prior outcome");
                        match outcome {
                            ReconcileOutcome::Applied {
                                order_id,
                                new_status,
                            } => Ok(ReconcileOutcome::AlreadyApplied {
                                order_id,
                                status: new_status,
                            }),
                            other => Ok(other),
                        }
                    }
                    AppliedResult::Conflict { order_id } => {
                        Err(ServiceError::StockReconciliationConflict {
                            order_id,
                            payment_id: payment_id.to_string(),
                        })
                    }
                };
            }
        }

        let Some(order) = self.orders.find_by_payment_ref(payment_id) else {
            info!(%payment_id, "no order matches payment reference; acknowledged");
            return Ok(ReconcileOutcome::NoMatchingOrder);
        };

        match status {
            PaymentEventStatus::Approved => self.apply_approved(payment_id, order).await,
            PaymentEventStatus::Rejected | PaymentEventStatus::Cancelled => {
                self.apply_rejected(payment_id, status, order).await
            }
        }
    }

    fn record(&self, payment_id: &str, status: PaymentEventStatus, result: AppliedResult) {
        self.applied
            .insert(payment_id.to_string(), AppliedTerminal { status, result });
    }

    #[async_recursion]
    async fn apply_approved(
        &self,
        payment_id: &str,
        order: crate::models::Order,
    ) -> Result<ReconcileOutcome, ServiceError> {
        match order.status {
            OrderStatus::AwaitingPayment => {
                let paid = match self.orders.transition(order.id, OrderStatus::Paid).await {
                    Ok(paid) => paid,
                    // Lost the entry-guard race (expiry or cancellation
                    // landed first); re-read and fall through.
                    Err(ServiceError::InvalidStatus(_)) => {
                        let current = self.orders.get(order.id)?;
                        return self.apply_approved(payment_id, current).await;
                    }
                    Err(err) => return Err(err),
                };

                for line in &paid.lines {
                    self.inventory.commit(line.product_id, line.quantity).await?;
                }

                if let Some(code) = &paid.coupon_code {
                    match self.coupons.redeem(code) {
                        Ok(()) => {
                            self.event_sender
                                .send(Event::CouponRedeemed {
                                    code: code.clone(),
                                    order_id: paid.id,
                                })
                                .await;
                        }
                        Err(CouponError::UsageExhausted) => {
                            // The order stays PAID (funds are captured);
                            // the redemption is voided for operator review.
                            warn!(order_id = %paid.id, code, "coupon exhausted at redemption; voided");
                            self.event_sender
                                .send(Event::CouponRedemptionVoided {
                                    code: code.clone(),
                                    order_id: paid.id,
                                })
                                .await;
                        }
                        Err(err) => {
                            warn!(order_id = %paid.id, code, %err, "coupon redemption failed");
                        }
                    }
                }

                let outcome = ReconcileOutcome::Applied {
                    order_id: paid.id,
                    new_status: OrderStatus::Paid,
                };
                self.record(payment_id, PaymentEventStatus::Approved, AppliedResult::Outcome(outcome.clone()));
                self.event_sender
                    .send(Event::PaymentEventApplied {
                        payment_id: payment_id.to_string(),
                        order_id: paid.id,
                        new_status: OrderStatus::Paid,
                    })
                    .await;
                Ok(outcome)
            }
            OrderStatus::Paid => {
                let outcome = ReconcileOutcome::AlreadyApplied {
                    order_id: order.id,
                    status: OrderStatus::Paid,
                };
                self.record(payment_id, PaymentEventStatus::Approved, AppliedResult::Outcome(outcome.clone()));
                Ok(outcome)
            }
            // The reservation was already released; committing would need a
            // re-reserve that can oversell. Flag for manual review instead.
            OrderStatus::Expired | OrderStatus::Cancelled | OrderStatus::Failed => {
                error!(
                    order_id = %order.id,
                    %payment_id,
                    status = %order.status,
                    "approved payment for an order whose reservation is gone"
                );
                self.record(
                    payment_id,
                    PaymentEventStatus::Approved,
                    AppliedResult::Conflict { order_id: order.id },
                );
                self.event_sender
                    .send(Event::StockReconciliationConflict {
                        order_id: order.id,
                        payment_id: payment_id.to_string(),
                    })
                    .await;
                Err(ServiceError::StockReconciliationConflict {
                    order_id: order.id,
                    payment_id: payment_id.to_string(),
                })
            }
            OrderStatus::Pending => {
                // A payment reference only exists once the intent was
                // attached, so a PENDING order here means an inconsistent
                // ledger, not a normal race.
                Err(ServiceError::InvalidStatus(format!(
                    "order {} is PENDING but carries payment reference {}",
                    order.id, payment_id
                )))
            }
        }
    }

    #[async_recursion]
    async fn apply_rejected(
        &self,
        payment_id: &str,
        status: PaymentEventStatus,
        order: crate::models::Order,
    ) -> Result<ReconcileOutcome, ServiceError> {
        match order.status {
            OrderStatus::AwaitingPayment => {
                let failed = match self.orders.transition(order.id, OrderStatus::Failed).await {
                    Ok(failed) => failed,
                    Err(ServiceError::InvalidStatus(_)) => {
                        let current = self.orders.get(order.id)?;
                        return self.apply_rejected(payment_id, status, current).await;
                    }
                    Err(err) => return Err(err),
                };

                for line in &failed.lines {
                    self.inventory
                        .release(line.product_id, line.quantity)
                        .await?;
                }

                let outcome = ReconcileOutcome::Applied {
                    order_id: failed.id,
                    new_status: OrderStatus::Failed,
                };
                self.record(payment_id, status, AppliedResult::Outcome(outcome.clone()));
                self.event_sender
                    .send(Event::PaymentEventApplied {
                        payment_id: payment_id.to_string(),
                        order_id: failed.id,
                        new_status: OrderStatus::Failed,
                    })
                    .await;
                Ok(outcome)
            }
            // Already settled one way or another; nothing to compensate.
            settled => {
                info!(order_id = %order.id, %payment_id, status = %settled, "rejection for settled order; no-op");
                let outcome = ReconcileOutcome::NoOp {
                    order_id: order.id,
                    status: settled,
                };
                self.record(payment_id, status, AppliedResult::Outcome(outcome.clone()));
                Ok(outcome)
            }
        }
    }

    /// Polling fallback: asks the gateway for the current status of a
    /// payment and funnels it through the same idempotent apply path.
    #[instrument(skip(self))]
    pub async fn poll(&self, payment_ref: &str) -> Result<ReconcileOutcome, ServiceError> {
        let status = tokio::time::timeout(self.gateway_timeout, self.gateway.fetch_status(payment_ref))
            .await
            .map_err(|_| ServiceError::ExternalServiceError("gateway status poll timed out".into()))?
            .map_err(|e| ServiceError::ExternalServiceError(e.to_string()))?;

        // Key by the reference we asked about. The gateway's echoed
        // reference is untrusted and must not redirect the apply to a
        // different payment.
        if status.payment_ref != payment_ref {
            warn!(
                requested = %payment_ref,
                echoed = %status.payment_ref,
                "gateway echoed a different payment reference; ignoring it"
            );
        }
        self.apply(PaymentEvent {
            payment_id: payment_ref.to_string(),
            status: status.status,
            payload: serde_json::json!({ "source": "poll" }),
        })
        .await
    }
}
