#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use storefront_api::{
    config::AppConfig,
    events::{Event, EventSender},
    gateway::{GatewayError, GatewayPaymentStatus, PaymentGateway, PaymentIntent},
    models::{Coupon, DiscountRule, Product},
    AppState,
};

/// Programmable gateway double: intents succeed with sequential references
/// unless told to fail or hang; polled statuses come from the `statuses`
/// map, defaulting to a non-terminal "in_process". `echo_refs` makes a
/// status response carry a different payment reference than the one asked
/// about, for misbehaving-gateway tests.
#[derive(Default)]
pub struct TestGateway {
    pub fail_next_intent: AtomicBool,
    pub hang_next_intent: AtomicBool,
    pub statuses: DashMap<String, String>,
    pub echo_refs: DashMap<String, String>,
    seq: AtomicU64,
}

#[async_trait]
impl PaymentGateway for TestGateway {
    async fn create_intent(
        &self,
        _order_id: Uuid,
        _amount: i64,
        _currency: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        if self.hang_next_intent.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
        if self.fail_next_intent.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Declined("card declined".into()));
        }
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        let payment_ref = format!("pay_{}", n);
        Ok(PaymentIntent {
            redirect_url: format!("https://gateway.test/pay/{}", payment_ref),
            payment_ref,
        })
    }

    async fn fetch_status(&self, payment_ref: &str) -> Result<GatewayPaymentStatus, GatewayError> {
        Ok(GatewayPaymentStatus {
            payment_ref: self
                .echo_refs
                .get(payment_ref)
                .map(|r| r.clone())
                .unwrap_or_else(|| payment_ref.to_string()),
            status: self
                .statuses
                .get(payment_ref)
                .map(|s| s.clone())
                .unwrap_or_else(|| "in_process".to_string()),
        })
    }
}

pub struct TestHarness {
    pub state: AppState,
    pub gateway: Arc<TestGateway>,
    pub events: mpsc::Receiver<Event>,
}

/// Builds the full service graph against the test gateway with a short
/// gateway timeout so timeout paths stay fast.
pub fn harness() -> TestHarness {
    let mut cfg = AppConfig::default();
    cfg.gateway.timeout_secs = 1;
    harness_with_config(cfg)
}

pub fn harness_with_config(config: AppConfig) -> TestHarness {
    let (tx, rx) = mpsc::channel(2048);
    let gateway = Arc::new(TestGateway::default());
    let state = AppState::build(config, gateway.clone(), EventSender::new(tx));
    TestHarness {
        state,
        gateway,
        events: rx,
    }
}

pub fn seed_product(state: &AppState, price: i64, stock: i32) -> Uuid {
    let id = Uuid::new_v4();
    state.catalog.upsert(Product {
        id,
        name: format!("product-{}", id.simple()),
        price,
        is_active: true,
    });
    state.inventory.set_level(id, stock);
    id
}

pub fn seed_coupon(state: &AppState, code: &str, rule: DiscountRule, usage_limit: u32) {
    state.coupons.upsert(Coupon {
        code: code.to_string(),
        rule,
        min_subtotal: 0,
        expires_at: Utc::now() + ChronoDuration::days(1),
        usage_limit,
        usage_count: 0,
    });
}
