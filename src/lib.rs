//! Orderflow API Library
//!
//! Cart and order orchestration core: carts with optimistic concurrency,
//! exactly-once order placement, a role-gated order lifecycle and
//! reconciliation with an external payment gateway.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod integrations;
pub mod models;
pub mod repositories;
pub mod services;

use axum::{
    extract::FromRef,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::JwtVerifier;
use crate::cache::SessionStore;
use crate::integrations::{PaymentGateway, VendorReadiness};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
    pub sessions: Arc<dyn SessionStore>,
    pub jwt: JwtVerifier,
}

impl AppState {
    /// Builds the state and every service from already constructed
    /// infrastructure.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Arc<events::EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        vendors: Arc<dyn VendorReadiness>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let services = handlers::AppServices::new(
            db.clone(),
            event_sender.clone(),
            &config,
            gateway,
            vendors,
            sessions.clone(),
        );
        let jwt = JwtVerifier::new(&config.jwt_secret);
        Self {
            db,
            config,
            event_sender,
            services,
            sessions,
            jwt,
        }
    }
}

impl FromRef<AppState> for JwtVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::with_message(data, None)
    }

    pub fn with_message(data: T, message: Option<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

pub fn api_v1_routes() -> Router<AppState> {
    let orders = Router::new()
        .route(
            "/",
            get(handlers::orders::list_orders).post(handlers::orders::create_order),
        )
        .route("/:id", get(handlers::orders::get_order))
        .route("/:id/history", get(handlers::orders::get_order_history))
        .route("/:id/status", put(handlers::orders::update_order_status))
        .route("/:id/cancel", post(handlers::orders::cancel_order))
        .route("/:id/retry-payment", post(handlers::orders::retry_payment))
        .route("/:id/refund", post(handlers::orders::refund_order));

    Router::new()
        .nest("/carts", handlers::commerce::carts_routes())
        .nest("/orders", orders)
        .route(
            "/restaurants/:id/orders",
            get(handlers::orders::list_restaurant_orders),
        )
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
}

/// Full application router with tracing.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .merge(handlers::health::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn success_response_carries_timestamp() {
        let response = ApiResponse::success("ok");
        assert!(response.success);
        assert!(response.message.is_none());
        DateTime::parse_from_rfc3339(&response.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn message_is_serialized_only_when_present() {
        let plain = serde_json::to_value(ApiResponse::success(1)).unwrap();
        assert!(plain.get("message").is_none());

        let with = serde_json::to_value(ApiResponse::with_message(1, Some("retry".into()))).unwrap();
        assert_eq!(with["message"], "retry");
    }
}
