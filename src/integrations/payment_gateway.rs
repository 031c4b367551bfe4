use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    CheckoutSession, CheckoutSessionRequest, IntegrationError, PaymentGateway, RefundConfirmation,
};

const SERVICE: &str = "payment gateway";

/// JSON-over-HTTP payment gateway client authenticated with a bearer secret.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    secret: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    status: String,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentLookupResponse {
    #[serde(default)]
    payment_reference: Option<String>,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, IntegrationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntegrationError::from_reqwest(SERVICE, e))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn error_for_status(response: reqwest::Response) -> IntegrationError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        IntegrationError::UnexpectedStatus {
            service: SERVICE,
            status,
            body,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, IntegrationError> {
        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(&self.secret)
            .json(&request)
            .send()
            .await
            .map_err(|e| IntegrationError::from_reqwest(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(Self::error_for_status(response).await);
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| IntegrationError::from_reqwest(SERVICE, e))?;
        debug!(reference = %session.id, "checkout session created");

        Ok(CheckoutSession {
            reference: session.id,
            redirect_url: session.url,
        })
    }

    #[instrument(skip(self))]
    async fn refund(&self, payment_reference: &str) -> Result<RefundConfirmation, IntegrationError> {
        let response = self
            .client
            .post(self.url("/v1/refunds"))
            .bearer_auth(&self.secret)
            .json(&serde_json::json!({ "payment_reference": payment_reference }))
            .send()
            .await
            .map_err(|e| IntegrationError::from_reqwest(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(Self::error_for_status(response).await);
        }

        let refund: RefundResponse = response
            .json()
            .await
            .map_err(|e| IntegrationError::from_reqwest(SERVICE, e))?;

        match refund.status.as_str() {
            "succeeded" | "pending" => Ok(RefundConfirmation { refund_id: refund.id }),
            other => {
                warn!(refund_id = %refund.id, status = other, "refund not accepted");
                Err(IntegrationError::Rejected {
                    service: SERVICE,
                    reason: refund
                        .failure_reason
                        .unwrap_or_else(|| format!("refund status {}", other)),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn find_payment_reference(
        &self,
        order_id: Uuid,
    ) -> Result<Option<String>, IntegrationError> {
        let response = self
            .client
            .get(self.url("/v1/payments"))
            .bearer_auth(&self.secret)
            .query(&[("order_id", order_id.to_string())])
            .send()
            .await
            .map_err(|e| IntegrationError::from_reqwest(SERVICE, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_for_status(response).await);
        }

        let lookup: PaymentLookupResponse = response
            .json()
            .await
            .map_err(|e| IntegrationError::from_reqwest(SERVICE, e))?;
        Ok(lookup.payment_reference)
    }
}
