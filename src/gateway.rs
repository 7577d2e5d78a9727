//! Payment gateway adapter.
//!
//! The gateway is an external collaborator: it creates payment intents and
//! later reports a terminal status via webhook or polling. Implementations
//! must be safe to call concurrently; the orchestrator wraps every call in
//! a bounded timeout and never holds inventory locks across one.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway declined: {0}")]
    Declined(String),

    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

/// A created payment intent: the gateway's reference plus the URL the
/// buyer is redirected to for payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub payment_ref: String,
    pub redirect_url: String,
}

/// Current status of a payment as reported by the gateway, used by the
/// polling fallback.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPaymentStatus {
    pub payment_ref: String,
    pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn fetch_status(&self, payment_ref: &str) -> Result<GatewayPaymentStatus, GatewayError>;
}

#[derive(Serialize)]
struct CreateIntentRequest<'a> {
    order_id: Uuid,
    amount: i64,
    currency: &'a str,
}

/// Gateway client speaking JSON over HTTP to a remote payment provider.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self))]
    async fn create_intent(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/intents", self.base_url))
            .json(&CreateIntentRequest {
                order_id,
                amount,
                currency,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Declined(format!("{}: {}", status, body)));
        }

        let intent: PaymentIntent = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn fetch_status(&self, payment_ref: &str) -> Result<GatewayPaymentStatus, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v1/intents/{}", self.base_url, payment_ref))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::InvalidResponse(format!(
                "status fetch returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

/// In-process gateway for local runs and demos: every intent succeeds and
/// the buyer is "redirected" to a sandbox URL. Terminal statuses must be
/// injected through the webhook endpoint.
pub struct SandboxGateway {
    redirect_base: String,
}

impl SandboxGateway {
    pub fn new(redirect_base: impl Into<String>) -> Self {
        Self {
            redirect_base: redirect_base.into(),
        }
    }
}

impl Default for SandboxGateway {
    fn default() -> Self {
        Self::new("https://sandbox.gateway.invalid/pay")
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_intent(
        &self,
        _order_id: Uuid,
        _amount: i64,
        _currency: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        let payment_ref = format!("sandbox_{}", Uuid::new_v4().simple());
        Ok(PaymentIntent {
            redirect_url: format!("{}/{}", self.redirect_base, payment_ref),
            payment_ref,
        })
    }

    async fn fetch_status(&self, payment_ref: &str) -> Result<GatewayPaymentStatus, GatewayError> {
        Ok(GatewayPaymentStatus {
            payment_ref: payment_ref.to_string(),
            status: "in_process".to_string(),
        })
    }
}
