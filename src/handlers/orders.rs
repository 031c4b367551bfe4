use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthenticatedActor,
    entities::order::{Model as OrderModel, OrderStatus},
    entities::order_status_history::Model as OrderStatusHistoryModel,
    errors::ServiceError,
    handlers::common::{PaginatedResponse, DEFAULT_PAGE, DEFAULT_PER_PAGE},
    services::commerce::checkout_service::{PlaceOrderOutcome, PlaceOrderRequest},
    services::orders::OrderDetails,
    ApiResponse, AppState,
};

/// Header carrying the client-chosen placement key.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

fn validation_error(err: validator::ValidationErrors) -> ServiceError {
    let errors: Vec<String> = err
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            let field = field.to_string();
            errors.iter().map(move |error| {
                format!(
                    "{}: {}",
                    field,
                    error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| error.code.to_string())
                )
            })
        })
        .collect();
    ServiceError::ValidationError(errors.join(", "))
}

/// Place an order from the caller's cart.
///
/// Returns `201 Created` for a new order and `200 OK` when the
/// `Idempotency-Key` was already used by this customer.
pub async fn create_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PlaceOrderOutcome>>), ServiceError> {
    request.validate().map_err(validation_error)?;

    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::InvalidInput("Idempotency-Key header is required".into()))?;

    let outcome = state
        .services
        .checkout
        .place_order(
            &actor,
            PlaceOrderRequest {
                cart_id: request.cart_id,
                idempotency_key,
                delivery_address: request.delivery_address,
                special_instructions: request.special_instructions,
            },
        )
        .await?;

    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let message = outcome.message.clone();
    Ok((status, Json(ApiResponse::with_message(outcome, message))))
}

/// List the caller's orders, newest first. Admins may pass `customer_id`.
pub async fn list_orders(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderModel>>>, ServiceError> {
    let customer_id = query.customer_id.unwrap_or(actor.id);
    let page = state
        .services
        .orders
        .list_customer_orders(&actor, customer_id, query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::success(page.into())))
}

/// List one restaurant's orders for its vendor.
pub async fn list_restaurant_orders(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(restaurant_id): Path<Uuid>,
    Query(query): Query<RestaurantOrdersQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderModel>>>, ServiceError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(|_| ServiceError::InvalidInput("unknown order status".to_string()))?;

    let page = state
        .services
        .orders
        .list_restaurant_orders(
            &actor,
            restaurant_id,
            status,
            query.page,
            query.per_page,
        )
        .await?;
    Ok(Json(ApiResponse::success(page.into())))
}

/// Get an order with its items
pub async fn get_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderDetails>>, ServiceError> {
    let order = state.services.orders.get_order(&actor, id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Status history of an order, oldest first
pub async fn get_order_history(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<OrderStatusHistoryModel>>>, ServiceError> {
    let history = state.services.orders.order_history(&actor, id).await?;
    Ok(Json(ApiResponse::success(history)))
}

/// Move an order along the fulfilment chain, or cancel it
pub async fn update_order_status(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    request.validate().map_err(validation_error)?;

    let order = state
        .services
        .orders
        .update_status(&actor, id, request.status, request.note)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Cancel a pending or confirmed order
pub async fn cancel_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    request: Option<Json<ReasonRequest>>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let reason = request.and_then(|Json(r)| r.reason);
    let order = state.services.orders.cancel_order(&actor, id, reason).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Open a new checkout session for an unpaid order
pub async fn retry_payment(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PlaceOrderOutcome>>, ServiceError> {
    let outcome = state.services.checkout.retry_payment(&actor, id).await?;
    let message = outcome.message.clone();
    Ok(Json(ApiResponse::with_message(outcome, message)))
}

/// Refund a paid order through the payment gateway
pub async fn refund_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    request: Option<Json<ReasonRequest>>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let reason = request.and_then(|Json(r)| r.reason);
    let order = state.services.checkout.refund(&actor, id, reason).await?;
    Ok(Json(ApiResponse::success(order)))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub cart_id: Uuid,
    #[validate(length(min = 1, max = 500))]
    pub delivery_address: String,
    #[validate(length(max = 1000))]
    pub special_instructions: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    #[validate(length(max = 1000))]
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub customer_id: Option<Uuid>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

#[derive(Debug, Deserialize)]
pub struct RestaurantOrdersQuery {
    pub status: Option<String>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    DEFAULT_PAGE
}

fn default_per_page() -> u64 {
    DEFAULT_PER_PAGE
}
