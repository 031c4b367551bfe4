//! Collaborators the order core talks to but does not own: the payment
//! gateway, the vendor service and the pricing catalog.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod payment_gateway;
pub mod vendor;

pub use payment_gateway::HttpPaymentGateway;
pub use vendor::HttpVendorReadiness;

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("{service} request timed out")]
    Timeout { service: &'static str },

    #[error("{service} transport error: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned HTTP {status}: {body}")]
    UnexpectedStatus {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} rejected the request: {reason}")]
    Rejected {
        service: &'static str,
        reason: String,
    },

    #[error("{service} sent an unreadable response: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },
}

impl IntegrationError {
    pub(crate) fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IntegrationError::Timeout { service }
        } else if err.is_decode() {
            IntegrationError::InvalidResponse {
                service,
                message: err.to_string(),
            }
        } else {
            IntegrationError::Transport {
                service,
                message: err.to_string(),
            }
        }
    }
}

/// Input to [`PaymentGateway::create_checkout_session`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    pub order_id: Uuid,
    pub restaurant_id: Uuid,
    /// Order total (subtotal + tax + delivery).
    pub amount: Decimal,
    pub service_fee: Decimal,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub reference: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundConfirmation {
    pub refund_id: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, IntegrationError>;

    async fn refund(&self, payment_reference: &str) -> Result<RefundConfirmation, IntegrationError>;

    /// Looks up the gateway's payment reference for an order whose reference
    /// was never stored locally.
    async fn find_payment_reference(
        &self,
        order_id: Uuid,
    ) -> Result<Option<String>, IntegrationError>;
}

#[async_trait]
pub trait VendorReadiness: Send + Sync {
    async fn is_payment_ready(&self, restaurant_id: Uuid) -> Result<bool, IntegrationError>;
}

/// One line as seen by the pricing catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    pub menu_item_id: Uuid,
    pub unit_price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PriceQuote {
    pub tax: Decimal,
    pub delivery_fee: Decimal,
}

/// Tax and delivery-fee source. Called on every cart mutation.
pub trait PricingPolicy: Send + Sync {
    fn quote(&self, restaurant_id: Option<Uuid>, subtotal: Decimal, lines: &[PricedLine])
        -> PriceQuote;
}
