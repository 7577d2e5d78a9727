//! Domain types for the checkout → payment → fulfillment pipeline.
//!
//! Monetary amounts are integer minor currency units (cents). Prices are
//! snapshotted onto order lines at creation time; the live catalog price is
//! never consulted again for a placed order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog product. Stock is tracked separately by the inventory ledger;
/// the catalog owns identity, pricing and availability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    /// Unit price in minor currency units.
    pub price: i64,
    pub is_active: bool,
}

/// A client-held cart line. Untrusted input: the price hint is advisory
/// only and is always re-derived server-side at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_price_hint: Option<i64>,
}

/// A priced, validated order line. Immutable once the order is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Price per unit captured at order creation.
    pub unit_price: i64,
}

impl OrderLine {
    pub fn line_total(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

/// Order fulfillment status. The order ledger is the single writer; all
/// transitions go through [`OrderStatus::can_transition_to`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created with reserved stock, payment intent not yet requested.
    Pending,
    /// Payment intent exists; waiting on a terminal gateway status.
    AwaitingPayment,
    /// Payment confirmed; reservations committed.
    Paid,
    /// Payment rejected or intent creation failed; reservations released.
    Failed,
    /// Operator-cancelled before payment; reservations released.
    Cancelled,
    /// Abandoned past the payment window; reservations released.
    Expired,
}

impl OrderStatus {
    /// Legal transition table for the order state machine.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, AwaitingPayment)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (AwaitingPayment, Paid)
                | (AwaitingPayment, Failed)
                | (AwaitingPayment, Cancelled)
                | (AwaitingPayment, Expired)
        )
    }

    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Failed | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }
}

/// An order as held by the order ledger. Lines and monetary figures are
/// immutable after creation; only `status`, `payment_ref` and
/// `payment_confirmed_at` change over the order's life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    pub subtotal: i64,
    pub discount: i64,
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    /// Gateway-assigned reference, set once the payment intent exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_confirmed_at: Option<DateTime<Utc>>,
}

/// Discount rule attached to a coupon code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscountRule {
    /// Percentage of the subtotal, 0..=100.
    Percentage { percent: u32 },
    /// Fixed amount in minor currency units.
    Fixed { amount: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub rule: DiscountRule,
    pub min_subtotal: i64,
    pub expires_at: DateTime<Utc>,
    pub usage_limit: u32,
    pub usage_count: u32,
}

/// Inbound payment notification, from a gateway callback or from polling.
/// Appended verbatim to the payment-event log before any interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub payment_id: String,
    pub status: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Recognized terminal gateway statuses. Anything else is held as
/// non-terminal pending a later recognized event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PaymentEventStatus {
    Approved,
    Rejected,
    Cancelled,
}
