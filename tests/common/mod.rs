#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use rust_decimal_macros::dec;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use orderflow_api::{
    auth::{Actor, Claims, SESSION_HEADER},
    cache::{InMemorySessionStore, SessionStore},
    config::AppConfig,
    db,
    events::{self, EventSender},
    integrations::{
        CheckoutSession, CheckoutSessionRequest, IntegrationError, PaymentGateway,
        RefundConfirmation, VendorReadiness,
    },
    models::ItemOptions,
    services::commerce::{CartOwner, CartWithItems, NewCartLine},
    AppState,
};

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";

/// Payment gateway double that records calls and fails on demand.
#[derive(Default)]
pub struct FakeGateway {
    pub fail_sessions: AtomicBool,
    pub fail_refunds: AtomicBool,
    pub session_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
    pub requests: Mutex<Vec<CheckoutSessionRequest>>,
    pub refunded: Mutex<Vec<String>>,
    pub known_references: Mutex<HashMap<Uuid, String>>,
}

impl FakeGateway {
    pub fn reference_for(order_id: Uuid) -> String {
        format!("pay_{}", order_id.simple())
    }

    pub fn session_calls(&self) -> usize {
        self.session_calls.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, IntegrationError> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        let order_id = request.order_id;
        self.requests.lock().unwrap().push(request);
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(IntegrationError::Transport {
                service: "payment gateway",
                message: "connection refused".to_string(),
            });
        }
        let reference = Self::reference_for(order_id);
        self.known_references
            .lock()
            .unwrap()
            .insert(order_id, reference.clone());
        Ok(CheckoutSession {
            redirect_url: format!("https://pay.example.test/checkout/{}", reference),
            reference,
        })
    }

    async fn refund(&self, payment_reference: &str) -> Result<RefundConfirmation, IntegrationError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(IntegrationError::UnexpectedStatus {
                service: "payment gateway",
                status: 503,
                body: "try again later".to_string(),
            });
        }
        self.refunded
            .lock()
            .unwrap()
            .push(payment_reference.to_string());
        Ok(RefundConfirmation {
            refund_id: format!("re_{}", payment_reference),
        })
    }

    async fn find_payment_reference(
        &self,
        order_id: Uuid,
    ) -> Result<Option<String>, IntegrationError> {
        Ok(self.known_references.lock().unwrap().get(&order_id).cloned())
    }
}

/// Vendor service double.
pub struct FakeVendors {
    pub ready: AtomicBool,
    pub unreachable: AtomicBool,
    pub calls: AtomicUsize,
}

impl Default for FakeVendors {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
            unreachable: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VendorReadiness for FakeVendors {
    async fn is_payment_ready(&self, _restaurant_id: Uuid) -> Result<bool, IntegrationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(IntegrationError::Timeout {
                service: "vendor service",
            });
        }
        Ok(self.ready.load(Ordering::SeqCst))
    }
}

/// Application state over a throwaway SQLite file plus fake collaborators.
///
/// Default pricing is 8% tax and a 3.00 delivery fee, so a 25.00 subtotal
/// totals 30.00.
pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub vendors: Arc<FakeVendors>,
    pub sessions: Arc<dyn SessionStore>,
    router: Router,
    _dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("orderflow_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            TEST_JWT_SECRET.to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        cfg.payment_gateway_timeout_secs = 2;
        cfg.payment_webhook_secret = Some(TEST_WEBHOOK_SECRET.to_string());
        customize(&mut cfg);

        let pool = db::establish_connection(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::default());
        let vendors = Arc::new(FakeVendors::default());
        let sessions: Arc<dyn SessionStore> =
            Arc::new(InMemorySessionStore::in_memory(cfg.session_ttl()));

        let state = AppState::new(
            Arc::new(pool),
            cfg,
            event_sender,
            gateway.clone(),
            vendors.clone(),
            sessions.clone(),
        );
        let router = orderflow_api::app_router(state.clone());

        Self {
            state,
            gateway,
            vendors,
            sessions,
            router,
            _dir: dir,
            _event_task: event_task,
        }
    }

    pub fn token_for(&self, actor: &Actor) -> String {
        self.state
            .jwt
            .sign(&Claims {
                sub: actor.id,
                role: actor.role,
                restaurants: actor.restaurant_ids.clone(),
                exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
            })
            .expect("sign test token")
    }

    /// Sends one request through the full router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, headers, json)
    }

    pub async fn request_with_session(
        &self,
        method: Method,
        uri: &str,
        session_token: &str,
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, Value) {
        self.request(method, uri, None, &[(SESSION_HEADER, session_token)], body)
            .await
    }

    /// A customer cart holding two 12.50 pizzas from `restaurant_id`.
    pub async fn customer_cart_with_pizzas(
        &self,
        customer_id: Uuid,
        restaurant_id: Uuid,
    ) -> CartWithItems {
        let carts = &self.state.services.carts;
        let cart = carts
            .create_cart(CartOwner::Customer(customer_id), None)
            .await
            .expect("create cart");
        carts
            .add_item(cart.cart.id, pizza(restaurant_id, 2))
            .await
            .expect("add pizza")
    }
}

pub fn pizza(restaurant_id: Uuid, quantity: i32) -> NewCartLine {
    line(restaurant_id, Uuid::from_u128(0x5151), "Margherita", dec!(12.50), quantity)
}

pub fn line(
    restaurant_id: Uuid,
    menu_item_id: Uuid,
    name: &str,
    unit_price: rust_decimal::Decimal,
    quantity: i32,
) -> NewCartLine {
    NewCartLine {
        menu_item_id,
        restaurant_id,
        name: name.to_string(),
        unit_price,
        quantity,
        options: ItemOptions::new(),
    }
}
