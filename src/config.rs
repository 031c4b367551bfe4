use config::{Config, ConfigError, Environment, File};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

use crate::services::commerce::pricing_service::{ConfiguredPricingPolicy, ServiceFeePolicy};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";

/// Application configuration
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    // ========== Database ==========
    #[validate(length(min = 1))]
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1, max = 1000))]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Create missing tables on startup
    #[serde(default = "default_true_bool")]
    pub auto_migrate: bool,

    // ========== Sessions ==========
    /// Redis URL for session-to-cart bindings. Empty selects the in-memory store.
    #[serde(default)]
    pub redis_url: String,

    #[serde(default = "default_session_ttl_secs")]
    #[validate(range(min = 60))]
    pub session_ttl_secs: u64,

    // ========== Server ==========
    pub host: String,
    pub port: u16,
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    // ========== Pricing ==========
    /// Tax rate applied to the cart subtotal (0.08 = 8%)
    #[serde(default = "default_tax_rate")]
    #[validate(custom = "validate_rate")]
    pub default_tax_rate: f64,

    /// Flat delivery fee charged on non-empty carts
    #[serde(default = "default_delivery_fee")]
    #[validate(range(min = 0.0))]
    pub default_delivery_fee: f64,

    /// Platform fee rate applied to the subtotal at placement
    #[serde(default)]
    #[validate(custom = "validate_rate")]
    pub service_fee_rate: f64,

    /// Flat platform fee added at placement
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub service_fee_flat: f64,

    // ========== Payments / Vendors ==========
    #[serde(default = "default_payment_gateway_url")]
    pub payment_gateway_url: String,

    #[serde(default)]
    pub payment_gateway_secret: String,

    #[serde(default = "default_payment_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub payment_gateway_timeout_secs: u64,

    #[serde(default = "default_vendor_service_url")]
    pub vendor_service_url: String,

    #[serde(default = "default_checkout_success_url")]
    pub checkout_success_url: String,

    #[serde(default = "default_checkout_cancel_url")]
    pub checkout_cancel_url: String,

    /// Shared secret for HMAC-signed payment webhooks
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    // ========== Auth / Events ==========
    #[validate(custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// Attempts for a version-checked cart write before giving up
    #[serde(default = "default_cart_update_max_retries")]
    #[validate(range(min = 1, max = 50))]
    pub cart_update_max_retries: u32,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the database and JWT secret.
    pub fn new(database_url: String, jwt_secret: String) -> Self {
        Self {
            database_url,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            auto_migrate: true,
            redis_url: String::new(),
            session_ttl_secs: default_session_ttl_secs(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            default_tax_rate: default_tax_rate(),
            default_delivery_fee: default_delivery_fee(),
            service_fee_rate: 0.0,
            service_fee_flat: 0.0,
            payment_gateway_url: default_payment_gateway_url(),
            payment_gateway_secret: String::new(),
            payment_gateway_timeout_secs: default_payment_gateway_timeout_secs(),
            vendor_service_url: default_vendor_service_url(),
            checkout_success_url: default_checkout_success_url(),
            checkout_cancel_url: default_checkout_cancel_url(),
            payment_webhook_secret: None,
            jwt_secret,
            event_channel_capacity: default_event_channel_capacity(),
            cart_update_max_retries: default_cart_update_max_retries(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn uses_redis_sessions(&self) -> bool {
        !self.redis_url.trim().is_empty()
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn payment_gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_gateway_timeout_secs)
    }

    pub fn pricing_policy(&self) -> ConfiguredPricingPolicy {
        ConfiguredPricingPolicy::new(
            to_decimal(self.default_tax_rate),
            to_decimal(self.default_delivery_fee),
        )
    }

    pub fn service_fee_policy(&self) -> ServiceFeePolicy {
        ServiceFeePolicy {
            rate: to_decimal(self.service_fee_rate),
            flat: to_decimal(self.service_fee_flat),
        }
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(6).normalize())
        .unwrap_or(Decimal::ZERO)
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_acquire_timeout_secs() -> u64 {
    10
}
fn default_true_bool() -> bool {
    true
}
fn default_session_ttl_secs() -> u64 {
    60 * 60 * 24 * 7
}
fn default_tax_rate() -> f64 {
    0.08
}
fn default_delivery_fee() -> f64 {
    3.0
}
fn default_payment_gateway_url() -> String {
    "http://localhost:8089".to_string()
}
fn default_payment_gateway_timeout_secs() -> u64 {
    10
}
fn default_vendor_service_url() -> String {
    "http://localhost:8088".to_string()
}
fn default_checkout_success_url() -> String {
    "http://localhost:3000/checkout/success".to_string()
}
fn default_checkout_cancel_url() -> String {
    "http://localhost:3000/checkout/cancel".to_string()
}
fn default_event_channel_capacity() -> usize {
    1024
}
fn default_cart_update_max_retries() -> u32 {
    5
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        let mut err = ValidationError::new("rate");
        err.message = Some("rate must be a finite value between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();
    if trimmed.len() < 32 {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be at least 32 characters".into());
        return Err(err);
    }
    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("orderflow_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://orderflow.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET to a random string of at least 32 characters.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
