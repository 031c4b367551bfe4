pub mod commerce;
pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;

use crate::cache::SessionStore;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::integrations::{PaymentGateway, VendorReadiness};
use crate::repositories::OrderRepository;
use crate::services::{
    commerce::{
        CartService, CheckoutService, CheckoutSettings, PricingService, SessionCartService,
    },
    order_status::OrderStatusService,
    orders::OrderService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub session_carts: Arc<SessionCartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    /// Wires every service over one pool, event channel and set of collaborators.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        vendors: Arc<dyn VendorReadiness>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let pricing = PricingService::new(
            Arc::new(config.pricing_policy()),
            config.service_fee_policy(),
        );
        let max_retries = config.cart_update_max_retries;

        let carts = CartService::new(
            db_pool.clone(),
            event_sender.clone(),
            pricing.clone(),
            max_retries,
        );
        let session_carts = SessionCartService::new(carts.clone(), sessions);

        let checkout = CheckoutService::new(
            db_pool.clone(),
            event_sender.clone(),
            pricing,
            gateway,
            vendors,
            CheckoutSettings {
                success_url: config.checkout_success_url.clone(),
                cancel_url: config.checkout_cancel_url.clone(),
                gateway_timeout: config.payment_gateway_timeout(),
                max_retries: max_retries.max(1),
            },
        );

        let status = OrderStatusService::new(db_pool.clone(), event_sender, max_retries);
        let orders = OrderService::new(OrderRepository::new(db_pool), status);

        Self {
            carts: Arc::new(carts),
            session_carts: Arc::new(session_carts),
            checkout: Arc::new(checkout),
            orders: Arc::new(orders),
        }
    }
}
