use crate::errors::{ApiError, ServiceError};
use crate::repositories::Page;
use crate::ApiResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use validator::Validate;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PER_PAGE: u64 = 20;

/// 200 with the standard `ApiResponse` envelope.
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(format!("Validation failed: {}", e)))
}

pub fn map_service_error(err: ServiceError) -> ApiError {
    ApiError::ServiceError(err)
}

#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

/// One page of a listing plus where it sits in the whole.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> From<Page<T>> for PaginatedResponse<T> {
    fn from(page: Page<T>) -> Self {
        let total_pages = page.total.div_ceil(page.per_page.max(1));
        Self {
            pagination: PaginationMeta {
                page: page.page,
                per_page: page.per_page,
                total: page.total,
                total_pages,
            },
            data: page.items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    fn page(total: u64) -> PaginatedResponse<u8> {
        Page {
            items: vec![],
            total,
            page: 1,
            per_page: 20,
        }
        .into()
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(page(0).pagination.total_pages, 0);
        assert_eq!(page(20).pagination.total_pages, 1);
        assert_eq!(page(21).pagination.total_pages, 2);
    }

    #[tokio::test]
    async fn success_response_uses_the_envelope() {
        let response = success_response(serde_json::json!({ "id": 7 }));
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["id"], 7);
        assert!(body["timestamp"].is_string());
    }
}
