use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{CacheBackend, CacheError, InMemoryCache, RedisCache};

const KEY_PREFIX: &str = "orderflow";

/// Advisory mapping from session tokens and customers to their current cart.
///
/// Bindings expire; a missing or stale binding is never an error for callers,
/// who fall back to creating a fresh cart.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns `token` when given a non-blank one, otherwise issues a new token.
    async fn get_or_create_session(&self, token: Option<&str>) -> Result<String, CacheError>;

    async fn get_cart_for_session(&self, token: &str) -> Result<Option<Uuid>, CacheError>;
    async fn set_cart_for_session(&self, token: &str, cart_id: Uuid) -> Result<(), CacheError>;
    async fn clear_session_cart(&self, token: &str) -> Result<(), CacheError>;

    async fn get_cart_for_customer(&self, customer_id: Uuid) -> Result<Option<Uuid>, CacheError>;
    async fn set_cart_for_customer(&self, customer_id: Uuid, cart_id: Uuid)
        -> Result<(), CacheError>;
    async fn clear_customer_cart(&self, customer_id: Uuid) -> Result<(), CacheError>;
}

fn session_key(token: &str) -> String {
    format!("{}:session:{}", KEY_PREFIX, token)
}

fn customer_key(customer_id: Uuid) -> String {
    format!("{}:customer:{}:cart", KEY_PREFIX, customer_id)
}

/// [`SessionStore`] over any key/value [`CacheBackend`].
#[derive(Clone)]
pub struct CachedSessionStore<B> {
    backend: Arc<B>,
    ttl: Duration,
}

pub type RedisSessionStore = CachedSessionStore<RedisCache>;
pub type InMemorySessionStore = CachedSessionStore<InMemoryCache>;

impl<B: CacheBackend> CachedSessionStore<B> {
    pub fn new(backend: B, ttl: Duration) -> Self {
        Self {
            backend: Arc::new(backend),
            ttl,
        }
    }

    async fn read_cart_id(&self, key: &str) -> Result<Option<Uuid>, CacheError> {
        match self.backend.get(key).await? {
            Some(raw) => match Uuid::parse_str(&raw) {
                Ok(id) => Ok(Some(id)),
                Err(_) => {
                    debug!(key, "dropping unparseable cart binding");
                    self.backend.delete(key).await?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

impl InMemorySessionStore {
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(InMemoryCache::new(), ttl)
    }
}

impl RedisSessionStore {
    pub fn redis(redis_url: &str, ttl: Duration) -> Result<Self, CacheError> {
        Ok(Self::new(RedisCache::new(redis_url)?, ttl))
    }
}

#[async_trait]
impl<B: CacheBackend + 'static> SessionStore for CachedSessionStore<B> {
    async fn get_or_create_session(&self, token: Option<&str>) -> Result<String, CacheError> {
        match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => Ok(token.to_string()),
            None => Ok(Uuid::new_v4().simple().to_string()),
        }
    }

    async fn get_cart_for_session(&self, token: &str) -> Result<Option<Uuid>, CacheError> {
        self.read_cart_id(&session_key(token)).await
    }

    async fn set_cart_for_session(&self, token: &str, cart_id: Uuid) -> Result<(), CacheError> {
        self.backend
            .set(&session_key(token), &cart_id.to_string(), Some(self.ttl))
            .await
    }

    async fn clear_session_cart(&self, token: &str) -> Result<(), CacheError> {
        self.backend.delete(&session_key(token)).await
    }

    async fn get_cart_for_customer(&self, customer_id: Uuid) -> Result<Option<Uuid>, CacheError> {
        self.read_cart_id(&customer_key(customer_id)).await
    }

    async fn set_cart_for_customer(
        &self,
        customer_id: Uuid,
        cart_id: Uuid,
    ) -> Result<(), CacheError> {
        self.backend
            .set(&customer_key(customer_id), &cart_id.to_string(), Some(self.ttl))
            .await
    }

    async fn clear_customer_cart(&self, customer_id: Uuid) -> Result<(), CacheError> {
        self.backend.delete(&customer_key(customer_id)).await
    }
}
