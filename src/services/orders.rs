//! Order ledger: the single source of truth for fulfillment status.
//!
//! Every status change goes through [`OrderService::transition`], which
//! checks the legal-transition table under the order entry's write guard.
//! A transition is therefore an atomic check-and-set per order: of two
//! racing writers (say the expiry sweep and an approval callback) exactly
//! one wins and the other observes the new status.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    models::{Order, OrderLine, OrderStatus},
};

pub struct OrderService {
    orders: DashMap<Uuid, Order>,
    by_payment_ref: DashMap<String, Uuid>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(event_sender: EventSender) -> Self {
        Self {
            orders: DashMap::new(),
            by_payment_ref: DashMap::new(),
            event_sender,
        }
    }

    /// Creates a PENDING order with immutable snapshot lines and totals.
    #[instrument(skip(self, lines))]
    pub async fn create(
        &self,
        lines: Vec<OrderLine>,
        subtotal: i64,
        discount: i64,
        coupon_code: Option<String>,
    ) -> Order {
        let order = Order {
            id: Uuid::new_v4(),
            status: OrderStatus::Pending,
            total: (subtotal - discount).max(0),
            lines,
            subtotal,
            discount,
            coupon_code,
            payment_ref: None,
            created_at: Utc::now(),
            payment_confirmed_at: None,
        };
        self.orders.insert(order.id, order.clone());
        self.event_sender.send(Event::OrderCreated(order.id)).await;
        order
    }

    pub fn get(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.orders
            .get(&order_id)
            .map(|o| o.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))
    }

    pub fn status(&self, order_id: Uuid) -> Result<OrderStatus, ServiceError> {
        Ok(self.get(order_id)?.status)
    }

    pub fn find_by_payment_ref(&self, payment_ref: &str) -> Option<Order> {
        let id = *self.by_payment_ref.get(payment_ref)?;
        self.orders.get(&id).map(|o| o.clone())
    }

    /// Records the gateway reference and advances PENDING → AWAITING_PAYMENT
    /// in one atomic step.
    #[instrument(skip(self))]
    pub async fn attach_payment_ref(
        &self,
        order_id: Uuid,
        payment_ref: &str,
    ) -> Result<Order, ServiceError> {
        let updated = {
            let mut entry = self
                .orders
                .get_mut(&order_id)
                .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))?;
            if !entry.status.can_transition_to(OrderStatus::AwaitingPayment) {
                return Err(ServiceError::InvalidStatus(format!(
                    "order {} cannot move from {} to {}",
                    order_id,
                    entry.status,
                    OrderStatus::AwaitingPayment
                )));
            }
            entry.payment_ref = Some(payment_ref.to_string());
            entry.status = OrderStatus::AwaitingPayment;
            entry.clone()
        };
        self.by_payment_ref.insert(payment_ref.to_string(), order_id);
        self.event_sender
            .send(Event::PaymentIntentCreated {
                order_id,
                payment_ref: payment_ref.to_string(),
            })
            .await;
        self.event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status: OrderStatus::Pending,
                new_status: OrderStatus::AwaitingPayment,
            })
            .await;
        Ok(updated)
    }

    /// Atomic status check-and-set. Fails with `InvalidStatus` when the
    /// transition table forbids the move; callers decide whether that is
    /// an error or an expected lost race.
    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        next: OrderStatus,
    ) -> Result<Order, ServiceError> {
        let (old_status, updated) = {
            let mut entry = self
                .orders
                .get_mut(&order_id)
                .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))?;
            let old = entry.status;
            if !old.can_transition_to(next) {
                return Err(ServiceError::InvalidStatus(format!(
                    "order {} cannot move from {} to {}",
                    order_id, old, next
                )));
            }
            entry.status = next;
            if next == OrderStatus::Paid {
                entry.payment_confirmed_at = Some(Utc::now());
            }
            (old, entry.clone())
        };
        self.event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: next,
            })
            .await;
        Ok(updated)
    }

    /// Ids of AWAITING_PAYMENT orders created before the cutoff, for the
    /// expiry sweep. The sweep re-checks status under the entry guard via
    /// `transition`, so a payment landing mid-sweep still wins or loses
    /// atomically.
    pub fn stale_awaiting_payment(&self, before: DateTime<Utc>) -> Vec<Uuid> {
        self.orders
            .iter()
            .filter(|o| o.status == OrderStatus::AwaitingPayment && o.created_at < before)
            .map(|o| o.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;

    fn service() -> OrderService {
        let (tx, mut rx) = mpsc::channel(64);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        OrderService::new(EventSender::new(tx))
    }

    fn lines() -> Vec<OrderLine> {
        vec![OrderLine {
            product_id: Uuid::new_v4(),
            quantity: 2,
            unit_price: 250,
        }]
    }

    #[tokio::test]
    async fn create_snapshots_totals_and_starts_pending() {
        let svc = service();
        let order = svc.create(lines(), 500, 100, Some("SAVE".into())).await;
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total, 400);
        assert_eq!(svc.status(order.id).unwrap(), OrderStatus::Pending);
    }

    #[tokio::test]
    async fn discount_never_drives_total_negative() {
        let svc = service();
        let order = svc.create(lines(), 500, 900, None).await;
        assert_eq!(order.total, 0);
    }

    #[tokio::test]
    async fn attach_payment_ref_advances_and_indexes() {
        let svc = service();
        let order = svc.create(lines(), 500, 0, None).await;
        let updated = svc.attach_payment_ref(order.id, "pay-1").await.unwrap();
        assert_eq!(updated.status, OrderStatus::AwaitingPayment);
        assert_eq!(updated.payment_ref.as_deref(), Some("pay-1"));
        assert_eq!(svc.find_by_payment_ref("pay-1").unwrap().id, order.id);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let svc = service();
        let order = svc.create(lines(), 500, 0, None).await;
        // PENDING orders cannot be paid before an intent exists.
        assert_matches!(
            svc.transition(order.id, OrderStatus::Paid).await,
            Err(ServiceError::InvalidStatus(_))
        );
    }

    #[tokio::test]
    async fn paid_sets_confirmation_timestamp() {
        let svc = service();
        let order = svc.create(lines(), 500, 0, None).await;
        svc.attach_payment_ref(order.id, "pay-2").await.unwrap();
        let paid = svc.transition(order.id, OrderStatus::Paid).await.unwrap();
        assert!(paid.payment_confirmed_at.is_some());
    }

    #[tokio::test]
    async fn racing_terminal_transitions_have_one_winner() {
        let svc = std::sync::Arc::new(service());
        let order = svc.create(lines(), 500, 0, None).await;
        svc.attach_payment_ref(order.id, "pay-3").await.unwrap();

        let a = {
            let svc = svc.clone();
            let id = order.id;
            tokio::spawn(async move { svc.transition(id, OrderStatus::Paid).await.is_ok() })
        };
        let b = {
            let svc = svc.clone();
            let id = order.id;
            tokio::spawn(async move { svc.transition(id, OrderStatus::Expired).await.is_ok() })
        };
        let wins = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(wins.iter().filter(|w| **w).count(), 1);
    }

    #[tokio::test]
    async fn stale_scan_only_sees_awaiting_payment() {
        let svc = service();
        let pending = svc.create(lines(), 500, 0, None).await;
        let awaiting = svc.create(lines(), 500, 0, None).await;
        svc.attach_payment_ref(awaiting.id, "pay-4").await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let stale = svc.stale_awaiting_payment(cutoff);
        assert!(stale.contains(&awaiting.id));
        assert!(!stale.contains(&pending.id));
    }
}
