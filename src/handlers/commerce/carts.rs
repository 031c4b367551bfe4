use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{
    auth::{AuthenticatedActor, MaybeActor, SESSION_HEADER},
    errors::{ApiError, ServiceError},
    models::ItemOptions,
    services::commerce::cart_service::{CartWithItems, NewCartLine},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    http::{HeaderName, HeaderValue},
    response::IntoResponse,
    routing::{post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(current_cart))
        .route("/login", post(login))
        .route("/:id", axum::routing::get(get_cart))
        .route("/:id/items", post(add_to_cart))
        .route(
            "/:id/items/:item_id",
            put(update_cart_item).delete(remove_cart_item),
        )
        .route("/:id/clear", post(clear_cart))
}

/// Returns the caller's active cart, creating one if needed.
///
/// Customers get their account cart. Guests get the cart bound to their
/// `X-Session-Token`, and a fresh token is issued when none was sent.
async fn current_cart(
    State(state): State<AppState>,
    caller: MaybeActor,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(actor) = caller.actor.filter(|a| a.is_customer()) {
        let cart = state
            .services
            .session_carts
            .resolve_customer_cart(actor.id)
            .await
            .map_err(map_service_error)?;
        return Ok(success_response(CartResponse::from(cart)));
    }

    let resolved = state
        .services
        .session_carts
        .resolve_session_cart(caller.session_token.as_deref())
        .await
        .map_err(map_service_error)?;

    let token = HeaderValue::from_str(&resolved.session_token)
        .map_err(|_| ApiError::BadRequest("session token is not a valid header value".into()))?;
    let mut response = success_response(CartResponse::from(resolved.cart));
    response
        .headers_mut()
        .insert(HeaderName::from_static(SESSION_HEADER), token);
    Ok(response)
}

/// Carries the guest cart of `X-Session-Token` over to the logged-in customer.
async fn login(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    caller: MaybeActor,
) -> Result<impl IntoResponse, ApiError> {
    if !actor.is_customer() {
        return Err(map_service_error(ServiceError::Forbidden(
            "only customers have carts".to_string(),
        )));
    }
    let token = caller
        .session_token
        .ok_or_else(|| ApiError::BadRequest(format!("{} header is required", SESSION_HEADER)))?;

    let outcome = state
        .services
        .session_carts
        .login(&token, actor.id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(LoginResponse {
        cart: outcome.cart.into(),
        guest_cart_id: outcome.guest_cart_id,
        discarded_guest_items: outcome.discarded_guest_items,
    }))
}

/// Get cart with items
async fn get_cart(
    State(state): State<AppState>,
    caller: MaybeActor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = authorize_cart(&state, &caller, id).await?;
    Ok(success_response(CartResponse::from(cart)))
}

/// Add item to cart
async fn add_to_cart(
    State(state): State<AppState>,
    caller: MaybeActor,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    authorize_cart(&state, &caller, cart_id).await?;

    let line = NewCartLine {
        menu_item_id: payload.menu_item_id,
        restaurant_id: payload.restaurant_id,
        name: payload.name,
        unit_price: payload.unit_price,
        quantity: payload.quantity,
        options: payload.options,
    };

    let cart = state
        .services
        .carts
        .add_item(cart_id, line)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartResponse::from(cart)))
}

/// Update cart item quantity
async fn update_cart_item(
    State(state): State<AppState>,
    caller: MaybeActor,
    Path((cart_id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    authorize_cart(&state, &caller, cart_id).await?;

    let cart = state
        .services
        .carts
        .update_item_quantity(cart_id, item_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartResponse::from(cart)))
}

/// Remove item from cart
async fn remove_cart_item(
    State(state): State<AppState>,
    caller: MaybeActor,
    Path((cart_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    authorize_cart(&state, &caller, cart_id).await?;

    let cart = state
        .services
        .carts
        .remove_item(cart_id, item_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartResponse::from(cart)))
}

/// Clear all items from cart
async fn clear_cart(
    State(state): State<AppState>,
    caller: MaybeActor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    authorize_cart(&state, &caller, id).await?;

    let cart = state
        .services
        .carts
        .clear_cart(id)
        .await
        .map_err(map_service_error)?
        .ok_or(ServiceError::CartNotFound(id))?;

    Ok(success_response(CartResponse::from(cart)))
}

/// Loads a cart the caller may touch: their own customer cart, the cart of
/// their session token, or any cart for admins.
async fn authorize_cart(
    state: &AppState,
    caller: &MaybeActor,
    cart_id: Uuid,
) -> Result<CartWithItems, ApiError> {
    let cart = state
        .services
        .carts
        .get_cart(cart_id)
        .await
        .map_err(map_service_error)?;

    let allowed = match &caller.actor {
        Some(actor) if actor.is_admin() => true,
        Some(actor) if actor.is_customer() && cart.cart.is_owned_by_customer(actor.id) => true,
        _ => {
            caller.session_token.is_some()
                && cart.cart.session_id.as_deref() == caller.session_token.as_deref()
        }
    };
    if !allowed {
        return Err(map_service_error(ServiceError::Forbidden(
            "cart belongs to someone else".to_string(),
        )));
    }
    Ok(cart)
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub menu_item_id: Uuid,
    pub restaurant_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub unit_price: Decimal,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
    #[serde(default)]
    pub options: ItemOptions,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 0, max = 999))]
    pub quantity: i32,
}

// Response DTOs

#[derive(Debug, Serialize)]
pub struct CartResponse {
    #[serde(flatten)]
    pub cart: CartWithItems,
    pub item_count: i32,
}

impl From<CartWithItems> for CartResponse {
    fn from(cart: CartWithItems) -> Self {
        Self {
            item_count: cart.item_count(),
            cart,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub cart: CartResponse,
    pub guest_cart_id: Option<Uuid>,
    pub discarded_guest_items: bool,
}
