use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::integrations::IntegrationError;

/// Error body returned by every failing HTTP endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Taxonomy code, stable across releases (e.g., "invalid_transition")
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

/// Coarse error taxonomy shared by all callers of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Conflict,
    InvalidTransition,
    Unauthorized,
    Forbidden,
    UpstreamUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidInput => "invalid_input",
            Self::Conflict => "conflict",
            Self::InvalidTransition => "invalid_transition",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Cart {0} not found")]
    CartNotFound(Uuid),

    #[error("Cart item {0} not found")]
    ItemNotFound(Uuid),

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cart {0} is empty")]
    EmptyCart(Uuid),

    #[error("Cart is bound to restaurant {cart_restaurant}, item belongs to {item_restaurant}")]
    RestaurantMismatch {
        cart_restaurant: Uuid,
        item_restaurant: Uuid,
    },

    #[error("Cart {0} is no longer active")]
    CartNotActive(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Cannot transition order from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Order {0} has no successful payment to refund")]
    NoPaymentToRefund(Uuid),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Restaurant {0} cannot accept payments right now")]
    VendorNotPaymentReady(Uuid),

    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<IntegrationError> for ServiceError {
    fn from(err: IntegrationError) -> Self {
        ServiceError::UpstreamUnavailable(err.to_string())
    }
}

impl ServiceError {
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        ServiceError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Maps the specific failure onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CartNotFound(_)
            | Self::ItemNotFound(_)
            | Self::OrderNotFound(_)
            | Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidQuantity(_)
            | Self::InvalidInput(_)
            | Self::ValidationError(_)
            | Self::EmptyCart(_) => ErrorKind::InvalidInput,
            Self::RestaurantMismatch { .. }
            | Self::CartNotActive(_)
            | Self::Conflict(_)
            | Self::ConcurrentModification(_) => ErrorKind::Conflict,
            Self::InvalidTransition { .. } | Self::NoPaymentToRefund(_) => {
                ErrorKind::InvalidTransition
            }
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::VendorNotPaymentReady(_) | Self::UpstreamUnavailable(_) => {
                ErrorKind::UpstreamUnavailable
            }
            Self::DatabaseError(_)
            | Self::CacheError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::VendorNotPaymentReady(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NoPaymentToRefund(_) | Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => match self.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                ErrorKind::Conflict | ErrorKind::InvalidTransition => StatusCode::CONFLICT,
                ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::CacheError(_) | Self::SerializationError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            Self::ConcurrentModification(id) => {
                format!("Concurrent modification for ID {}, please retry", id)
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.kind().as_str().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// API Error type for HTTP responses
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::ServiceError(service_error) => return service_error.into_response(),
            ApiError::ValidationError(msg) => {
                (StatusCode::BAD_REQUEST, ErrorKind::InvalidInput, msg)
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorKind::Unauthorized,
                "Unauthorized".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorKind::InvalidInput, msg),
        };

        let error_response = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            code: code.as_str().to_string(),
            message,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn taxonomy_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(ServiceError::CartNotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(ServiceError::ItemNotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(ServiceError::InvalidQuantity(0).kind(), ErrorKind::InvalidInput);
        assert_eq!(ServiceError::EmptyCart(id).kind(), ErrorKind::InvalidInput);
        assert_eq!(
            ServiceError::RestaurantMismatch {
                cart_restaurant: id,
                item_restaurant: Uuid::new_v4(),
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ServiceError::invalid_transition("pending", "delivered").kind(),
            ErrorKind::InvalidTransition
        );
        assert_eq!(
            ServiceError::VendorNotPaymentReady(id).kind(),
            ErrorKind::UpstreamUnavailable
        );
        assert_eq!(
            ServiceError::Forbidden("nope".into()).kind(),
            ErrorKind::Forbidden
        );
    }

    #[test]
    fn service_error_status_code_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(
            ServiceError::OrderNotFound(id).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::InvalidQuantity(-1).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::CartNotActive(id).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::NoPaymentToRefund(id).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::VendorNotPaymentReady(id).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::UpstreamUnavailable("gateway".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::CacheError("redis down".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("secret".into())).response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::InvalidInput("delivery address is required".into()).response_message(),
            "Invalid input: delivery address is required"
        );
    }

    #[tokio::test]
    async fn into_response_carries_taxonomy_code() {
        let response =
            ServiceError::invalid_transition("delivered", "cancelled").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.code, "invalid_transition");
        assert_eq!(payload.error, "Conflict");
    }
}
