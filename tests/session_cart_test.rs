mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{line, pizza, TestApp};
use orderflow_api::{
    auth::Actor,
    cache::{CacheError, SessionStore},
    services::commerce::{PlaceOrderRequest, SessionCartService},
};
use rust_decimal_macros::dec;
use uuid::Uuid;

/// A session store whose backend is down.
struct UnavailableStore;

#[async_trait]
impl SessionStore for UnavailableStore {
    async fn get_or_create_session(&self, _token: Option<&str>) -> Result<String, CacheError> {
        Err(CacheError::OperationFailed("connection reset".into()))
    }
    async fn get_cart_for_session(&self, _token: &str) -> Result<Option<Uuid>, CacheError> {
        Err(CacheError::OperationFailed("connection reset".into()))
    }
    async fn set_cart_for_session(&self, _token: &str, _cart_id: Uuid) -> Result<(), CacheError> {
        Err(CacheError::OperationFailed("connection reset".into()))
    }
    async fn clear_session_cart(&self, _token: &str) -> Result<(), CacheError> {
        Err(CacheError::OperationFailed("connection reset".into()))
    }
    async fn get_cart_for_customer(&self, _customer_id: Uuid) -> Result<Option<Uuid>, CacheError> {
        Err(CacheError::OperationFailed("connection reset".into()))
    }
    async fn set_cart_for_customer(
        &self,
        _customer_id: Uuid,
        _cart_id: Uuid,
    ) -> Result<(), CacheError> {
        Err(CacheError::OperationFailed("connection reset".into()))
    }
    async fn clear_customer_cart(&self, _customer_id: Uuid) -> Result<(), CacheError> {
        Err(CacheError::OperationFailed("connection reset".into()))
    }
}

#[tokio::test]
async fn test_session_cart_is_created_once_per_token() {
    let app = TestApp::new().await;
    let sessions = &app.state.services.session_carts;

    let first = sessions.resolve_session_cart(None).await.unwrap();
    assert!(!first.session_token.is_empty());
    assert_eq!(first.cart.cart.session_id.as_deref(), Some(first.session_token.as_str()));
    assert_eq!(first.cart.cart.customer_id, None);

    let again = sessions
        .resolve_session_cart(Some(&first.session_token))
        .await
        .unwrap();
    assert_eq!(again.session_token, first.session_token);
    assert_eq!(again.cart.cart.id, first.cart.cart.id);

    let other = sessions.resolve_session_cart(None).await.unwrap();
    assert_ne!(other.session_token, first.session_token);
    assert_ne!(other.cart.cart.id, first.cart.cart.id);
}

#[tokio::test]
async fn test_stale_or_foreign_binding_is_replaced() {
    let app = TestApp::new().await;
    let sessions = &app.state.services.session_carts;

    // Binding to a cart that does not exist.
    app.sessions
        .set_cart_for_session("tok-missing", Uuid::new_v4())
        .await
        .unwrap();
    let resolved = sessions
        .resolve_session_cart(Some("tok-missing"))
        .await
        .unwrap();
    assert_eq!(resolved.cart.cart.session_id.as_deref(), Some("tok-missing"));

    // Binding to a cart owned by someone else.
    let foreign = app
        .customer_cart_with_pizzas(Uuid::new_v4(), Uuid::new_v4())
        .await;
    app.sessions
        .set_cart_for_session("tok-foreign", foreign.cart.id)
        .await
        .unwrap();
    let resolved = sessions
        .resolve_session_cart(Some("tok-foreign"))
        .await
        .unwrap();
    assert_ne!(resolved.cart.cart.id, foreign.cart.id);
    assert_eq!(
        app.sessions.get_cart_for_session("tok-foreign").await.unwrap(),
        Some(resolved.cart.cart.id)
    );
}

#[tokio::test]
async fn test_customer_cart_is_replaced_after_checkout() {
    let app = TestApp::new().await;
    let sessions = &app.state.services.session_carts;
    let customer = Actor::customer(Uuid::new_v4());

    let cart = sessions.resolve_customer_cart(customer.id).await.unwrap();
    let same = sessions.resolve_customer_cart(customer.id).await.unwrap();
    assert_eq!(cart.cart.id, same.cart.id);
    assert_eq!(cart.cart.customer_id, Some(customer.id));

    app.state
        .services
        .carts
        .add_item(cart.cart.id, pizza(Uuid::new_v4(), 1))
        .await
        .unwrap();
    app.state
        .services
        .checkout
        .place_order(
            &customer,
            PlaceOrderRequest {
                cart_id: cart.cart.id,
                idempotency_key: "resolve-after-checkout".into(),
                delivery_address: "1 Elm Row".into(),
                special_instructions: None,
            },
        )
        .await
        .unwrap();

    let fresh = sessions.resolve_customer_cart(customer.id).await.unwrap();
    assert_ne!(fresh.cart.id, cart.cart.id);
    assert!(fresh.items.is_empty());
}

#[tokio::test]
async fn test_expired_customer_binding_finds_stored_cart() {
    let app = TestApp::new().await;
    let sessions = &app.state.services.session_carts;
    let customer_id = Uuid::new_v4();

    let cart = sessions.resolve_customer_cart(customer_id).await.unwrap();
    app.state
        .services
        .carts
        .add_item(cart.cart.id, pizza(Uuid::new_v4(), 2))
        .await
        .unwrap();

    app.sessions.clear_customer_cart(customer_id).await.unwrap();

    let resolved = sessions.resolve_customer_cart(customer_id).await.unwrap();
    assert_eq!(resolved.cart.id, cart.cart.id);
    assert_eq!(resolved.item_count(), 2);
    assert_eq!(
        app.sessions.get_cart_for_customer(customer_id).await.unwrap(),
        Some(cart.cart.id)
    );
}

#[tokio::test]
async fn test_login_merges_into_stored_cart_when_binding_expired() {
    let app = TestApp::new().await;
    let sessions = &app.state.services.session_carts;
    let carts = &app.state.services.carts;
    let customer_id = Uuid::new_v4();
    let restaurant = Uuid::new_v4();

    let user = sessions.resolve_customer_cart(customer_id).await.unwrap();
    carts.add_item(user.cart.id, pizza(restaurant, 1)).await.unwrap();
    app.sessions.clear_customer_cart(customer_id).await.unwrap();

    let guest = sessions.resolve_session_cart(None).await.unwrap();
    carts
        .add_item(guest.cart.cart.id, pizza(restaurant, 1))
        .await
        .unwrap();

    let outcome = sessions
        .login(&guest.session_token, customer_id)
        .await
        .unwrap();
    assert_eq!(outcome.cart.cart.id, user.cart.id);
    assert_eq!(outcome.cart.item_count(), 2);

    let guest_cart = carts.get_cart(guest.cart.cart.id).await.unwrap();
    assert!(!guest_cart.cart.is_active());
}

#[tokio::test]
async fn test_login_promotes_guest_cart() {
    let app = TestApp::new().await;
    let sessions = &app.state.services.session_carts;
    let customer_id = Uuid::new_v4();

    let guest = sessions.resolve_session_cart(None).await.unwrap();
    app.state
        .services
        .carts
        .add_item(guest.cart.cart.id, pizza(Uuid::new_v4(), 2))
        .await
        .unwrap();

    let outcome = sessions
        .login(&guest.session_token, customer_id)
        .await
        .unwrap();
    assert_eq!(outcome.cart.cart.id, guest.cart.cart.id);
    assert_eq!(outcome.cart.cart.customer_id, Some(customer_id));
    assert_eq!(outcome.cart.cart.session_id, None);
    assert_eq!(outcome.guest_cart_id, Some(guest.cart.cart.id));
    assert_eq!(outcome.cart.cart.subtotal, dec!(25.00));

    assert_eq!(
        app.sessions
            .get_cart_for_session(&guest.session_token)
            .await
            .unwrap(),
        None
    );
    let resolved = sessions.resolve_customer_cart(customer_id).await.unwrap();
    assert_eq!(resolved.cart.id, guest.cart.cart.id);
}

#[tokio::test]
async fn test_login_folds_guest_lines_into_customer_cart() {
    let app = TestApp::new().await;
    let sessions = &app.state.services.session_carts;
    let carts = &app.state.services.carts;
    let customer_id = Uuid::new_v4();
    let restaurant = Uuid::new_v4();

    let user = sessions.resolve_customer_cart(customer_id).await.unwrap();
    carts
        .add_item(user.cart.id, pizza(restaurant, 1))
        .await
        .unwrap();

    let guest = sessions.resolve_session_cart(None).await.unwrap();
    carts
        .add_item(guest.cart.cart.id, pizza(restaurant, 2))
        .await
        .unwrap();
    carts
        .add_item(
            guest.cart.cart.id,
            line(restaurant, Uuid::new_v4(), "Garlic bread", dec!(4.00), 1),
        )
        .await
        .unwrap();

    let outcome = sessions
        .login(&guest.session_token, customer_id)
        .await
        .unwrap();
    assert_eq!(outcome.cart.cart.id, user.cart.id);
    assert!(!outcome.discarded_guest_items);
    assert_eq!(outcome.cart.items.len(), 2);
    assert_eq!(outcome.cart.item_count(), 4);
    assert_eq!(outcome.cart.cart.subtotal, dec!(41.50));

    // Logging in again with the same token finds nothing to merge.
    let again = sessions
        .login(&guest.session_token, customer_id)
        .await
        .unwrap();
    assert_eq!(again.guest_cart_id, None);
    assert_eq!(again.cart.cart.id, user.cart.id);
    assert_eq!(again.cart.item_count(), 4);
}

#[tokio::test]
async fn test_login_without_guest_cart_returns_customer_cart() {
    let app = TestApp::new().await;
    let sessions = &app.state.services.session_carts;
    let customer_id = Uuid::new_v4();

    let outcome = sessions.login("never-used", customer_id).await.unwrap();
    assert_eq!(outcome.guest_cart_id, None);
    assert_eq!(outcome.cart.cart.customer_id, Some(customer_id));
    assert!(outcome.cart.items.is_empty());
}

#[tokio::test]
async fn test_session_store_outage_degrades_to_fresh_carts() {
    let app = TestApp::new().await;
    let sessions = SessionCartService::new(
        (*app.state.services.carts).clone(),
        Arc::new(UnavailableStore),
    );

    let guest = sessions.resolve_session_cart(Some("tok-1")).await.unwrap();
    assert_eq!(guest.session_token, "tok-1");
    assert_eq!(guest.cart.cart.session_id.as_deref(), Some("tok-1"));

    let issued = sessions.resolve_session_cart(None).await.unwrap();
    assert!(!issued.session_token.is_empty());

    let customer_id = Uuid::new_v4();
    let cart = sessions.resolve_customer_cart(customer_id).await.unwrap();
    assert_eq!(cart.cart.customer_id, Some(customer_id));
    let again = sessions.resolve_customer_cart(customer_id).await.unwrap();
    assert_eq!(again.cart.id, cart.cart.id);

    let outcome = sessions.login("tok-1", customer_id).await.unwrap();
    assert_eq!(outcome.cart.cart.id, cart.cart.id);

    // Carts created during the outage are ordinary rows.
    let reloaded = app
        .state
        .services
        .carts
        .get_cart(guest.cart.cart.id)
        .await
        .unwrap();
    assert_eq!(reloaded.cart.id, guest.cart.cart.id);
}
