use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::warn;

use crate::{errors::ServiceError, models::PaymentEvent, ApiResponse, AppState};

type HmacSha256 = Hmac<Sha256>;

// POST /api/v1/payments/webhook
//
// Inbound gateway callback. Delivery is at-least-once and possibly out of
// order; the reconciliation service makes the apply idempotent, so this
// handler only authenticates and parses.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.webhook_secret.clone() {
        if !verify_signature(&headers, &body, &secret, state.config.webhook_tolerance_secs) {
            warn!("payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized("invalid webhook signature".into()));
        }
    }

    let json: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

    let payment_id = json
        .get("payment_id")
        .or_else(|| json.get("id"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| ServiceError::BadRequest("missing payment id".into()))?
        .to_string();
    let status = json
        .get("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ServiceError::BadRequest("missing status".into()))?
        .to_string();

    let outcome = state
        .reconciliation
        .apply(PaymentEvent {
            payment_id,
            status,
            payload: json,
        })
        .await?;

    Ok(Json(ApiResponse::success(outcome)))
}

// POST /api/v1/payments/:payment_ref/poll
//
// Operator-triggered polling fallback for callbacks that never arrived.
pub async fn poll_payment(
    State(state): State<AppState>,
    Path(payment_ref): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state.reconciliation.poll(&payment_ref).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// HMAC-SHA256 over `"{timestamp}.{body}"` with `x-timestamp` and
/// `x-signature` headers, rejected outside the timestamp tolerance.
pub(crate) fn verify_signature(
    headers: &HeaderMap,
    payload: &Bytes,
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) else {
        return false;
    };
    let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) else {
        return false;
    };
    if let Ok(ts_i) = ts.parse::<i64>() {
        let now = chrono::Utc::now().timestamp();
        if (now - ts_i).unsigned_abs() > tolerance_secs {
            return false;
        }
    } else {
        return false;
    }

    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, sig)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, ts: i64, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", ts, body).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_passes() {
        let body = Bytes::from_static(b"{\"id\":\"p1\"}");
        let ts = chrono::Utc::now().timestamp();
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", ts.to_string().parse().unwrap());
        headers.insert(
            "x-signature",
            sign("secret", ts, "{\"id\":\"p1\"}").parse().unwrap(),
        );
        assert!(verify_signature(&headers, &body, "secret", 300));
    }

    #[test]
    fn stale_timestamp_fails() {
        let body = Bytes::from_static(b"{}");
        let ts = chrono::Utc::now().timestamp() - 3600;
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", ts.to_string().parse().unwrap());
        headers.insert("x-signature", sign("secret", ts, "{}").parse().unwrap());
        assert!(!verify_signature(&headers, &body, "secret", 300));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = Bytes::from_static(b"{}");
        let ts = chrono::Utc::now().timestamp();
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", ts.to_string().parse().unwrap());
        headers.insert("x-signature", sign("other", ts, "{}").parse().unwrap());
        assert!(!verify_signature(&headers, &body, "secret", 300));
    }

    #[test]
    fn missing_headers_fail() {
        let body = Bytes::from_static(b"{}");
        assert!(!verify_signature(&HeaderMap::new(), &body, "secret", 300));
    }
}
