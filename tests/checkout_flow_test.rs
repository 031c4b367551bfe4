mod common;

use std::sync::atomic::Ordering;

use common::{pizza, FakeGateway, TestApp};
use orderflow_api::{
    auth::Actor,
    entities::{
        commerce::CartStatus,
        order::{self, OrderStatus, PaymentStatus},
        order_status_history::ActorRole,
    },
    errors::ServiceError,
    repositories::OrderRepository,
    services::commerce::{CartOwner, PlaceOrderRequest},
};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

fn placement(cart_id: Uuid, key: &str) -> PlaceOrderRequest {
    PlaceOrderRequest {
        cart_id,
        idempotency_key: key.to_string(),
        delivery_address: "12 Harbour Road".to_string(),
        special_instructions: Some("  ring twice ".to_string()),
    }
}

async fn order_count(app: &TestApp, customer_id: Uuid) -> u64 {
    OrderRepository::new(app.state.db.clone())
        .find_by_customer(customer_id, 1, 100)
        .await
        .unwrap()
        .total
}

#[tokio::test]
async fn test_place_order_creates_pending_order_with_checkout() {
    let app = TestApp::new().await;
    let customer = Actor::customer(Uuid::new_v4());
    let restaurant = Uuid::new_v4();
    let cart = app.customer_cart_with_pizzas(customer.id, restaurant).await;
    assert_eq!(cart.cart.subtotal, dec!(25.00));
    assert_eq!(cart.cart.total, dec!(30.00));

    let outcome = app
        .state
        .services
        .checkout
        .place_order(&customer, placement(cart.cart.id, "key-1"))
        .await
        .expect("placement succeeds");

    let order = &outcome.order;
    assert!(!outcome.replayed);
    assert!(outcome.message.is_none());
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::SessionCreated);
    assert_eq!(order.customer_id, customer.id);
    assert_eq!(order.restaurant_id, restaurant);
    assert_eq!(order.subtotal, dec!(25.00));
    assert_eq!(order.tax_total, dec!(2.00));
    assert_eq!(order.delivery_fee, dec!(3.00));
    assert_eq!(order.total, dec!(30.00));
    assert_eq!(order.special_instructions.as_deref(), Some("ring twice"));

    let checkout = outcome.checkout.expect("checkout redirect");
    assert_eq!(checkout.payment_reference, FakeGateway::reference_for(order.id));
    assert_eq!(order.payment_reference.as_deref(), Some(checkout.payment_reference.as_str()));
    assert_eq!(app.gateway.session_calls(), 1);

    let sent = app.gateway.requests.lock().unwrap()[0].clone();
    assert_eq!(sent.amount, dec!(30.00));
    assert_eq!(sent.restaurant_id, restaurant);

    // Items are a snapshot of the cart lines.
    let repo = OrderRepository::new(app.state.db.clone());
    let items = repo.items(order.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 2);
    assert_eq!(items[0].unit_price, dec!(12.50));
    assert_eq!(items[0].line_total, dec!(25.00));

    let history = repo.history(order.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_status, None);
    assert_eq!(history[0].to_status, OrderStatus::Pending);
    assert_eq!(history[0].actor_role, ActorRole::Customer);

    // The cart is retired.
    let cart_after = app.state.services.carts.get_cart(cart.cart.id).await.unwrap();
    assert_eq!(cart_after.cart.status, CartStatus::Converted);
}

#[tokio::test]
async fn test_order_snapshot_is_independent_of_later_cart_changes() {
    let app = TestApp::new().await;
    let customer = Actor::customer(Uuid::new_v4());
    let restaurant = Uuid::new_v4();
    let cart = app.customer_cart_with_pizzas(customer.id, restaurant).await;

    let outcome = app
        .state
        .services
        .checkout
        .place_order(&customer, placement(cart.cart.id, "snap"))
        .await
        .unwrap();

    // A new cart for the same customer does not touch the placed order.
    let next = app.customer_cart_with_pizzas(customer.id, restaurant).await;
    app.state
        .services
        .carts
        .add_item(next.cart.id, pizza(restaurant, 4))
        .await
        .unwrap();

    let details = app
        .state
        .services
        .orders
        .get_order(&customer, outcome.order.id)
        .await
        .unwrap();
    assert_eq!(details.items.len(), 1);
    assert_eq!(details.items[0].quantity, 2);
    assert_eq!(details.order.total, dec!(30.00));
}

#[tokio::test]
async fn test_same_key_replays_without_new_side_effects() {
    let app = TestApp::new().await;
    let customer = Actor::customer(Uuid::new_v4());
    let cart = app
        .customer_cart_with_pizzas(customer.id, Uuid::new_v4())
        .await;
    let checkout = &app.state.services.checkout;

    let first = checkout
        .place_order(&customer, placement(cart.cart.id, "same-key"))
        .await
        .unwrap();
    let second = checkout
        .place_order(&customer, placement(cart.cart.id, "same-key"))
        .await
        .unwrap();

    assert!(second.replayed);
    assert_eq!(first.order.id, second.order.id);
    assert_eq!(first.checkout, second.checkout);
    assert_eq!(app.gateway.session_calls(), 1);
    assert_eq!(app.vendors.calls.load(Ordering::SeqCst), 1);
    assert_eq!(order_count(&app, customer.id).await, 1);
}

#[tokio::test]
async fn test_concurrent_placements_with_same_key_create_one_order() {
    let app = TestApp::new().await;
    let customer = Actor::customer(Uuid::new_v4());
    let cart = app
        .customer_cart_with_pizzas(customer.id, Uuid::new_v4())
        .await;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let checkout = app.state.services.checkout.clone();
        let customer = customer.clone();
        let request = placement(cart.cart.id, "race-key");
        handles.push(tokio::spawn(async move {
            checkout.place_order(&customer, request).await
        }));
    }

    let mut order_ids = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap().expect("every caller gets the order");
        order_ids.push(outcome.order.id);
    }
    order_ids.dedup();
    assert_eq!(order_ids.len(), 1);
    assert_eq!(order_count(&app, customer.id).await, 1);
    assert_eq!(app.gateway.session_calls(), 1);
}

#[tokio::test]
async fn test_key_owned_by_another_customer_conflicts() {
    let app = TestApp::new().await;
    let alice = Actor::customer(Uuid::new_v4());
    let bob = Actor::customer(Uuid::new_v4());
    let restaurant = Uuid::new_v4();
    let alice_cart = app.customer_cart_with_pizzas(alice.id, restaurant).await;
    let bob_cart = app.customer_cart_with_pizzas(bob.id, restaurant).await;
    let checkout = &app.state.services.checkout;

    checkout
        .place_order(&alice, placement(alice_cart.cart.id, "shared"))
        .await
        .unwrap();
    let result = checkout
        .place_order(&bob, placement(bob_cart.cart.id, "shared"))
        .await;
    assert!(matches!(result, Err(ServiceError::Conflict(_))));
}

#[tokio::test]
async fn test_vendor_not_ready_creates_no_order() {
    let app = TestApp::new().await;
    app.vendors.ready.store(false, Ordering::SeqCst);
    let customer = Actor::customer(Uuid::new_v4());
    let cart = app
        .customer_cart_with_pizzas(customer.id, Uuid::new_v4())
        .await;

    let result = app
        .state
        .services
        .checkout
        .place_order(&customer, placement(cart.cart.id, "not-ready"))
        .await;

    assert!(matches!(result, Err(ServiceError::VendorNotPaymentReady(_))));
    assert_eq!(order_count(&app, customer.id).await, 0);
    assert_eq!(app.gateway.session_calls(), 0);
    let cart_after = app.state.services.carts.get_cart(cart.cart.id).await.unwrap();
    assert_eq!(cart_after.cart.status, CartStatus::Active);
}

#[tokio::test]
async fn test_vendor_unreachable_is_upstream_unavailable() {
    let app = TestApp::new().await;
    app.vendors.unreachable.store(true, Ordering::SeqCst);
    let customer = Actor::customer(Uuid::new_v4());
    let cart = app
        .customer_cart_with_pizzas(customer.id, Uuid::new_v4())
        .await;

    let result = app
        .state
        .services
        .checkout
        .place_order(&customer, placement(cart.cart.id, "down"))
        .await;
    assert!(matches!(result, Err(ServiceError::UpstreamUnavailable(_))));
    assert_eq!(order_count(&app, customer.id).await, 0);
}

#[tokio::test]
async fn test_placement_input_and_cart_checks() {
    let app = TestApp::new().await;
    let customer = Actor::customer(Uuid::new_v4());
    let checkout = &app.state.services.checkout;
    let cart = app
        .customer_cart_with_pizzas(customer.id, Uuid::new_v4())
        .await;

    let mut blank_address = placement(cart.cart.id, "k1");
    blank_address.delivery_address = "  ".into();
    assert!(matches!(
        checkout.place_order(&customer, blank_address).await,
        Err(ServiceError::InvalidInput(_))
    ));

    assert!(matches!(
        checkout.place_order(&customer, placement(cart.cart.id, " ")).await,
        Err(ServiceError::InvalidInput(_))
    ));

    let vendor = Actor::vendor(Uuid::new_v4(), vec![]);
    assert!(matches!(
        checkout.place_order(&vendor, placement(cart.cart.id, "k2")).await,
        Err(ServiceError::Forbidden(_))
    ));

    let stranger = Actor::customer(Uuid::new_v4());
    assert!(matches!(
        checkout.place_order(&stranger, placement(cart.cart.id, "k3")).await,
        Err(ServiceError::Forbidden(_))
    ));

    assert!(matches!(
        checkout.place_order(&customer, placement(Uuid::new_v4(), "k4")).await,
        Err(ServiceError::CartNotFound(_))
    ));

    let empty = app
        .state
        .services
        .carts
        .create_cart(CartOwner::Customer(customer.id), None)
        .await
        .unwrap();
    assert!(matches!(
        checkout.place_order(&customer, placement(empty.cart.id, "k5")).await,
        Err(ServiceError::EmptyCart(_))
    ));

    // A converted cart cannot be ordered again under a new key.
    checkout
        .place_order(&customer, placement(cart.cart.id, "k6"))
        .await
        .unwrap();
    assert!(matches!(
        checkout.place_order(&customer, placement(cart.cart.id, "k7")).await,
        Err(ServiceError::CartNotActive(_))
    ));
    assert_eq!(order_count(&app, customer.id).await, 1);
}

#[tokio::test]
async fn test_gateway_failure_keeps_order_and_allows_retry() {
    let app = TestApp::new().await;
    app.gateway.fail_sessions.store(true, Ordering::SeqCst);
    let customer = Actor::customer(Uuid::new_v4());
    let cart = app
        .customer_cart_with_pizzas(customer.id, Uuid::new_v4())
        .await;
    let checkout = &app.state.services.checkout;

    let outcome = checkout
        .place_order(&customer, placement(cart.cart.id, "flaky"))
        .await
        .expect("order is kept even when payment cannot start");

    assert!(outcome.checkout.is_none());
    assert!(outcome.message.is_some());
    assert_eq!(outcome.order.status, OrderStatus::Pending);
    assert_eq!(outcome.order.payment_status, PaymentStatus::Unpaid);
    assert!(outcome.order.payment_failure_reason.is_some());

    app.gateway.fail_sessions.store(false, Ordering::SeqCst);
    let retried = checkout
        .retry_payment(&customer, outcome.order.id)
        .await
        .unwrap();

    assert!(retried.checkout.is_some());
    assert_eq!(retried.order.id, outcome.order.id);
    assert_eq!(retried.order.payment_status, PaymentStatus::SessionCreated);
    assert_eq!(retried.order.payment_failure_reason, None);
    assert_eq!(app.gateway.session_calls(), 2);

    let others = Actor::customer(Uuid::new_v4());
    assert!(matches!(
        checkout.retry_payment(&others, outcome.order.id).await,
        Err(ServiceError::Forbidden(_))
    ));
}

#[tokio::test]
async fn test_payment_webhook_outcomes() {
    let app = TestApp::new().await;
    let customer = Actor::customer(Uuid::new_v4());
    let cart = app
        .customer_cart_with_pizzas(customer.id, Uuid::new_v4())
        .await;
    let checkout = &app.state.services.checkout;
    let order = checkout
        .place_order(&customer, placement(cart.cart.id, "pay"))
        .await
        .unwrap()
        .order;

    let failed = checkout
        .record_payment_failed(order.id, "card declined".into())
        .await
        .unwrap();
    assert_eq!(failed.status, OrderStatus::PaymentFailed);
    assert_eq!(failed.payment_status, PaymentStatus::Failed);
    assert_eq!(failed.payment_failure_reason.as_deref(), Some("card declined"));

    // Repeated failure notice changes nothing.
    let again = checkout
        .record_payment_failed(order.id, "card declined".into())
        .await
        .unwrap();
    assert_eq!(again.version, failed.version);

    let retried = checkout.retry_payment(&customer, order.id).await.unwrap();
    assert_eq!(retried.order.status, OrderStatus::Pending);

    let paid = checkout
        .record_payment_succeeded(order.id, "pay_final".into())
        .await
        .unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.payment_reference.as_deref(), Some("pay_final"));

    let paid_again = checkout
        .record_payment_succeeded(order.id, "pay_final".into())
        .await
        .unwrap();
    assert_eq!(paid_again.version, paid.version);

    assert!(matches!(
        checkout.retry_payment(&customer, order.id).await,
        Err(ServiceError::Conflict(_))
    ));

    let history = OrderRepository::new(app.state.db.clone())
        .history(order.id)
        .await
        .unwrap();
    let path: Vec<_> = history.iter().map(|h| h.to_status).collect();
    assert_eq!(
        path,
        vec![
            OrderStatus::Pending,
            OrderStatus::PaymentFailed,
            OrderStatus::Pending
        ]
    );
    assert_eq!(history[1].actor_role, ActorRole::System);
    assert_eq!(history[1].actor_id, None);
}

#[tokio::test]
async fn test_refund_paid_order_then_second_refund_fails() {
    let app = TestApp::new().await;
    let customer = Actor::customer(Uuid::new_v4());
    let restaurant = Uuid::new_v4();
    let vendor = Actor::vendor(Uuid::new_v4(), vec![restaurant]);
    let cart = app.customer_cart_with_pizzas(customer.id, restaurant).await;
    let checkout = &app.state.services.checkout;

    let order = checkout
        .place_order(&customer, placement(cart.cart.id, "refund-me"))
        .await
        .unwrap()
        .order;
    let reference = order.payment_reference.clone().unwrap();
    checkout
        .record_payment_succeeded(order.id, reference.clone())
        .await
        .unwrap();

    let refunded = checkout
        .refund(&vendor, order.id, Some("cold food".into()))
        .await
        .unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    assert_eq!(app.gateway.refunded.lock().unwrap().as_slice(), &[reference]);

    let second = checkout.refund(&vendor, order.id, None).await;
    assert!(matches!(second, Err(ServiceError::NoPaymentToRefund(_))));
    assert_eq!(app.gateway.refund_calls(), 1);

    let history = OrderRepository::new(app.state.db.clone())
        .history(order.id)
        .await
        .unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.to_status, OrderStatus::Refunded);
    assert_eq!(last.actor_role, ActorRole::Vendor);
    assert_eq!(last.note.as_deref(), Some("cold food"));
}

#[tokio::test]
async fn test_refund_failure_restores_paid_state() {
    let app = TestApp::new().await;
    let customer = Actor::customer(Uuid::new_v4());
    let restaurant = Uuid::new_v4();
    let admin = Actor::admin(Uuid::new_v4());
    let cart = app.customer_cart_with_pizzas(customer.id, restaurant).await;
    let checkout = &app.state.services.checkout;

    let order = checkout
        .place_order(&customer, placement(cart.cart.id, "refund-fail"))
        .await
        .unwrap()
        .order;
    checkout
        .record_payment_succeeded(order.id, order.payment_reference.clone().unwrap())
        .await
        .unwrap();

    app.gateway.fail_refunds.store(true, Ordering::SeqCst);
    let result = checkout.refund(&admin, order.id, None).await;
    assert!(matches!(result, Err(ServiceError::UpstreamUnavailable(_))));

    let after = OrderRepository::new(app.state.db.clone())
        .find_by_id(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, OrderStatus::Pending);
    assert_eq!(after.payment_status, PaymentStatus::Paid);

    // Once the gateway recovers the refund goes through.
    app.gateway.fail_refunds.store(false, Ordering::SeqCst);
    let refunded = checkout.refund(&admin, order.id, None).await.unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
}

async fn mark_refund_pending(app: &TestApp, order_id: Uuid, age: chrono::Duration) {
    let stored = OrderRepository::new(app.state.db.clone())
        .find_by_id(order_id)
        .await
        .unwrap()
        .unwrap();
    let mut active: order::ActiveModel = stored.into();
    active.payment_status = Set(PaymentStatus::RefundPending);
    active.updated_at = Set(chrono::Utc::now() - age);
    active.update(&*app.state.db).await.unwrap();
}

#[tokio::test]
async fn test_abandoned_refund_is_taken_over() {
    let app = TestApp::new().await;
    let customer = Actor::customer(Uuid::new_v4());
    let restaurant = Uuid::new_v4();
    let vendor = Actor::vendor(Uuid::new_v4(), vec![restaurant]);
    let cart = app.customer_cart_with_pizzas(customer.id, restaurant).await;
    let checkout = &app.state.services.checkout;

    let order = checkout
        .place_order(&customer, placement(cart.cart.id, "refund-stuck"))
        .await
        .unwrap()
        .order;
    checkout
        .record_payment_succeeded(order.id, order.payment_reference.clone().unwrap())
        .await
        .unwrap();

    // A refund still within its gateway window blocks a second one.
    mark_refund_pending(&app, order.id, chrono::Duration::zero()).await;
    assert!(matches!(
        checkout.refund(&vendor, order.id, None).await,
        Err(ServiceError::Conflict(_))
    ));
    assert_eq!(app.gateway.refund_calls(), 0);

    // One whose request died long ago no longer does.
    mark_refund_pending(&app, order.id, chrono::Duration::minutes(10)).await;
    let refunded = checkout.refund(&vendor, order.id, None).await.unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    assert_eq!(app.gateway.refund_calls(), 1);
}

#[tokio::test]
async fn test_refund_guards() {
    let app = TestApp::new().await;
    let customer = Actor::customer(Uuid::new_v4());
    let restaurant = Uuid::new_v4();
    let cart = app.customer_cart_with_pizzas(customer.id, restaurant).await;
    let checkout = &app.state.services.checkout;
    let order = checkout
        .place_order(&customer, placement(cart.cart.id, "guards"))
        .await
        .unwrap()
        .order;

    // Customers and other restaurants' vendors may not refund.
    assert!(matches!(
        checkout.refund(&customer, order.id, None).await,
        Err(ServiceError::Forbidden(_))
    ));
    let other_vendor = Actor::vendor(Uuid::new_v4(), vec![Uuid::new_v4()]);
    assert!(matches!(
        checkout.refund(&other_vendor, order.id, None).await,
        Err(ServiceError::Forbidden(_))
    ));

    // Nothing paid yet.
    let vendor = Actor::vendor(Uuid::new_v4(), vec![restaurant]);
    assert!(matches!(
        checkout.refund(&vendor, order.id, None).await,
        Err(ServiceError::NoPaymentToRefund(_))
    ));
    assert_eq!(app.gateway.refund_calls(), 0);
}
