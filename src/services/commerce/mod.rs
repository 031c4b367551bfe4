//! Cart and checkout services.
pub mod cart_service;
pub mod checkout_service;
pub mod pricing_service;
pub mod session_cart;

// Re-export services for convenience
pub use cart_service::{CartOwner, CartService, CartWithItems, MergeOutcome, NewCartLine};
pub use checkout_service::{
    CheckoutRedirect, CheckoutService, CheckoutSettings, PlaceOrderOutcome, PlaceOrderRequest,
};
pub use pricing_service::{ConfiguredPricingPolicy, PricingService, ServiceFeePolicy};
pub use session_cart::{LoginOutcome, SessionCart, SessionCartService};
