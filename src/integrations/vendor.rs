use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{IntegrationError, VendorReadiness};

const SERVICE: &str = "vendor service";

/// Asks the vendor service whether a restaurant has a payment account able to
/// receive funds.
#[derive(Clone)]
pub struct HttpVendorReadiness {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ReadinessResponse {
    payment_ready: bool,
}

impl HttpVendorReadiness {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, IntegrationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntegrationError::from_reqwest(SERVICE, e))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl VendorReadiness for HttpVendorReadiness {
    #[instrument(skip(self))]
    async fn is_payment_ready(&self, restaurant_id: Uuid) -> Result<bool, IntegrationError> {
        let url = format!(
            "{}/v1/restaurants/{}/payment-readiness",
            self.base_url, restaurant_id
        );
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IntegrationError::from_reqwest(SERVICE, e))?;

        // Unknown restaurant: cannot take payments.
        if response.status() == StatusCode::NOT_FOUND {
            warn!(%restaurant_id, "restaurant unknown to vendor service");
            return Ok(false);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(IntegrationError::UnexpectedStatus {
                service: SERVICE,
                status,
                body,
            });
        }

        let readiness: ReadinessResponse = response
            .json()
            .await
            .map_err(|e| IntegrationError::from_reqwest(SERVICE, e))?;
        Ok(readiness.payment_ready)
    }
}
