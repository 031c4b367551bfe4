use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{errors::ServiceError, AppState};

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Maximum clock skew accepted on signed webhooks.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub order_id: Uuid,
    #[serde(default)]
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

// POST /api/v1/payments/webhook
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    match state.config.payment_webhook_secret.as_deref() {
        Some(secret) if !secret.is_empty() => {
            let now = chrono::Utc::now().timestamp();
            if !verify_signature(&headers, &body, secret, now) {
                warn!("Payment webhook signature verification failed");
                return Err(ServiceError::Unauthorized(
                    "invalid webhook signature".to_string(),
                ));
            }
        }
        _ => warn!("payment_webhook_secret not set, accepting unsigned webhook"),
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::InvalidInput(format!("invalid webhook payload: {}", e)))?;
    let order_id = event.data.order_id;

    match event.event_type.as_str() {
        "payment.succeeded" | "checkout.session.completed" => {
            let reference = event.data.payment_reference.ok_or_else(|| {
                ServiceError::InvalidInput("payment_reference is required".to_string())
            })?;
            state
                .services
                .checkout
                .record_payment_succeeded(order_id, reference)
                .await?;
        }
        "payment.failed" | "checkout.session.expired" => {
            let reason = event
                .data
                .reason
                .unwrap_or_else(|| event.event_type.clone());
            state
                .services
                .checkout
                .record_payment_failed(order_id, reason)
                .await?;
        }
        other => {
            info!(event_type = other, event_id = ?event.id, "Unhandled payment webhook type");
        }
    }

    Ok((StatusCode::OK, "ok"))
}

/// Checks `x-signature = hex(HMAC-SHA256(secret, "{x-timestamp}.{body}"))`.
pub fn verify_signature(headers: &HeaderMap, payload: &[u8], secret: &str, now: i64) -> bool {
    let (Some(ts), Some(sig)) = (
        headers.get(TIMESTAMP_HEADER).and_then(|h| h.to_str().ok()),
        headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok()),
    ) else {
        return false;
    };

    match ts.parse::<i64>() {
        Ok(ts) if (now - ts).abs() <= SIGNATURE_TOLERANCE_SECS => {}
        _ => return false,
    }
    let Ok(expected) = hex::decode(sig.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Produces the signature header value for a payload. Used by gateway
/// simulators and tests.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}
