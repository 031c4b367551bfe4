use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cache::SessionStore;
use crate::errors::ServiceError;
use crate::services::commerce::cart_service::{CartOwner, CartService, CartWithItems};

/// Finds, or creates, the cart a session or customer is currently using.
///
/// Bindings live in the [`SessionStore`] and are only hints: every lookup
/// is checked against the cart table, and cache failures are logged and
/// treated as a miss.
#[derive(Clone)]
pub struct SessionCartService {
    carts: CartService,
    sessions: Arc<dyn SessionStore>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionCart {
    pub session_token: String,
    pub cart: CartWithItems,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub cart: CartWithItems,
    /// Guest cart that was folded in or promoted during login.
    pub guest_cart_id: Option<Uuid>,
    pub discarded_guest_items: bool,
}

impl SessionCartService {
    pub fn new(carts: CartService, sessions: Arc<dyn SessionStore>) -> Self {
        Self { carts, sessions }
    }

    /// Resolves the guest cart for a session token, issuing a token if needed.
    #[instrument(skip(self, token))]
    pub async fn resolve_session_cart(
        &self,
        token: Option<&str>,
    ) -> Result<SessionCart, ServiceError> {
        let session_token = match self.sessions.get_or_create_session(token).await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "session store unavailable, issuing local token");
                token
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
            }
        };

        if let Some(cart) = self.bound_session_cart(&session_token).await? {
            return Ok(SessionCart {
                session_token,
                cart,
            });
        }

        let cart = self
            .carts
            .create_cart(CartOwner::Session(session_token.clone()), None)
            .await?;
        if let Err(e) = self
            .sessions
            .set_cart_for_session(&session_token, cart.cart.id)
            .await
        {
            warn!(error = %e, cart_id = %cart.cart.id, "failed to bind session cart");
        }

        Ok(SessionCart {
            session_token,
            cart,
        })
    }

    /// Resolves the active cart of a logged-in customer.
    #[instrument(skip(self))]
    pub async fn resolve_customer_cart(
        &self,
        customer_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        if let Some(cart) = self.bound_customer_cart(customer_id).await? {
            return Ok(cart);
        }

        let cart = self
            .carts
            .create_cart(CartOwner::Customer(customer_id), None)
            .await?;
        self.bind_customer(customer_id, cart.cart.id).await;
        Ok(cart)
    }

    /// Carries a guest's cart over to the customer who just logged in.
    ///
    /// The session's cart is merged into the customer's cart (or promoted if
    /// the customer has none), the customer binding is pointed at the result
    /// and the session binding is cleared.
    #[instrument(skip(self, session_token))]
    pub async fn login(
        &self,
        session_token: &str,
        customer_id: Uuid,
    ) -> Result<LoginOutcome, ServiceError> {
        let guest = self.bound_session_cart(session_token).await?;
        let user = self.bound_customer_cart(customer_id).await?;

        let outcome = match guest {
            None => LoginOutcome {
                cart: match user {
                    Some(cart) => cart,
                    None => self.resolve_customer_cart(customer_id).await?,
                },
                guest_cart_id: None,
                discarded_guest_items: false,
            },
            Some(guest) => {
                let guest_cart_id = guest.cart.id;
                let user_cart_id = user.map(|u| u.cart.id);
                match self
                    .carts
                    .merge_carts(guest_cart_id, user_cart_id, customer_id)
                    .await
                {
                    Ok(merge) => LoginOutcome {
                        cart: merge.cart,
                        guest_cart_id: Some(guest_cart_id),
                        discarded_guest_items: merge.discarded_guest_items,
                    },
                    // The guest cart was checked out or merged by a parallel request.
                    Err(ServiceError::CartNotActive(_)) => LoginOutcome {
                        cart: self.resolve_customer_cart(customer_id).await?,
                        guest_cart_id: None,
                        discarded_guest_items: false,
                    },
                    Err(e) => return Err(e),
                }
            }
        };

        self.bind_customer(customer_id, outcome.cart.cart.id).await;
        if let Err(e) = self.sessions.clear_session_cart(session_token).await {
            warn!(error = %e, "failed to clear session binding after login");
        }

        info!(%customer_id, cart_id = %outcome.cart.cart.id, merged = outcome.guest_cart_id.is_some(), "Session cart carried over on login");
        Ok(outcome)
    }

    async fn bound_session_cart(&self, token: &str) -> Result<Option<CartWithItems>, ServiceError> {
        let cart_id = match self.sessions.get_cart_for_session(token).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "session lookup failed, treating as miss");
                None
            }
        };
        let Some(cart_id) = cart_id else {
            return Ok(None);
        };

        let cart = self.load_usable(cart_id).await?;
        Ok(cart.filter(|c| c.cart.session_id.as_deref() == Some(token)))
    }

    /// The customer's active cart: the bound one if still usable, otherwise
    /// the newest active cart on record. Either way the binding is rewritten,
    /// which also renews its TTL.
    async fn bound_customer_cart(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<CartWithItems>, ServiceError> {
        let cart_id = match self.sessions.get_cart_for_customer(customer_id).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "customer cart lookup failed, treating as miss");
                None
            }
        };

        if let Some(cart_id) = cart_id {
            let bound = self
                .load_usable(cart_id)
                .await?
                .filter(|c| c.cart.is_owned_by_customer(customer_id));
            if let Some(cart) = bound {
                self.bind_customer(customer_id, cart.cart.id).await;
                return Ok(Some(cart));
            }
        }

        let stored = self.carts.find_active_customer_cart(customer_id).await?;
        if let Some(cart) = &stored {
            info!(%customer_id, cart_id = %cart.cart.id, "Re-bound customer to stored cart");
            self.bind_customer(customer_id, cart.cart.id).await;
        }
        Ok(stored)
    }

    /// Loads a bound cart, ignoring ones that are gone or retired.
    async fn load_usable(&self, cart_id: Uuid) -> Result<Option<CartWithItems>, ServiceError> {
        match self.carts.get_cart(cart_id).await {
            Ok(cart) if cart.cart.is_active() => Ok(Some(cart)),
            Ok(_) | Err(ServiceError::CartNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn bind_customer(&self, customer_id: Uuid, cart_id: Uuid) {
        if let Err(e) = self.sessions.set_cart_for_customer(customer_id, cart_id).await {
            warn!(error = %e, %cart_id, "failed to bind customer cart");
        }
    }
}
