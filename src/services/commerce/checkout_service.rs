use crate::{
    auth::Actor,
    entities::{
        commerce::{cart, cart_item, CartStatus},
        order::{self, Model as OrderModel, OrderStatus, PaymentStatus},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    integrations::{CheckoutSessionRequest, IntegrationError, PaymentGateway, VendorReadiness},
    repositories::{
        cart_repository::CartRepository,
        order_repository::{HistoryEntry, OrderRepository},
    },
    services::{
        commerce::pricing_service::PricingService,
        idempotency::{self, IdempotencyOutcome},
        order_status::{record_transition, transition_rule, TransitionPath},
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DatabaseTransaction, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Shown to the customer when the order exists but payment could not start.
pub const PAYMENT_START_FAILED_MESSAGE: &str =
    "Your order was placed, but we could not start the payment. Please retry payment or cancel the order.";

/// Gateway and redirect settings for the orchestrator.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub success_url: String,
    pub cancel_url: String,
    pub gateway_timeout: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderRequest {
    pub cart_id: Uuid,
    pub idempotency_key: String,
    pub delivery_address: String,
    #[serde(default)]
    pub special_instructions: Option<String>,
}

/// Where to send the customer to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutRedirect {
    pub payment_reference: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaceOrderOutcome {
    pub order: OrderModel,
    /// `None` when the payment session could not be opened.
    pub checkout: Option<CheckoutRedirect>,
    /// The idempotency key had already produced this order.
    pub replayed: bool,
    pub message: Option<String>,
}

enum Created {
    Order(OrderModel),
    /// A concurrent request with the same key won the race.
    Existing,
}

/// Payment orchestrator: turns carts into orders and keeps them in step with
/// the payment gateway.
///
/// No transaction is open while the gateway or vendor service is being
/// called; each local state change is its own short, version-checked
/// transaction.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    pricing: PricingService,
    gateway: Arc<dyn PaymentGateway>,
    vendors: Arc<dyn VendorReadiness>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        pricing: PricingService,
        gateway: Arc<dyn PaymentGateway>,
        vendors: Arc<dyn VendorReadiness>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            pricing,
            gateway,
            vendors,
            settings,
        }
    }

    /// Places an order from a customer's cart, exactly once per idempotency key.
    ///
    /// 1. Repeating a key returns the order it produced (`replayed = true`)
    ///    without contacting the gateway or the vendor service again.
    /// 2. The cart must belong to the caller, be active and hold items.
    /// 3. The restaurant must be able to take payments.
    /// 4. Order, items, first history row and key record are written and the
    ///    cart retired in one transaction.
    /// 5. A checkout session is opened. If that fails the order is kept and
    ///    the outcome carries a message instead of a redirect.
    ///
    /// # Errors
    ///
    /// * `Forbidden` - caller is not a customer or does not own the cart
    /// * `InvalidInput` - blank key or delivery address
    /// * `Conflict` - key already used by another customer
    /// * `CartNotFound`, `EmptyCart`, `CartNotActive`
    /// * `VendorNotPaymentReady` / `UpstreamUnavailable`
    #[instrument(skip(self, actor, request), fields(customer_id = %actor.id, cart_id = %request.cart_id))]
    pub async fn place_order(
        &self,
        actor: &Actor,
        request: PlaceOrderRequest,
    ) -> Result<PlaceOrderOutcome, ServiceError> {
        if !actor.is_customer() {
            return Err(ServiceError::Forbidden(
                "only customers can place orders".to_string(),
            ));
        }
        let key = idempotency::validate_key(&request.idempotency_key)?;
        let delivery_address = request.delivery_address.trim().to_string();
        if delivery_address.is_empty() {
            return Err(ServiceError::InvalidInput(
                "delivery address is required".to_string(),
            ));
        }
        let special_instructions = request
            .special_instructions
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if let Some(replay) = self.replay(actor, &key).await? {
            return Ok(replay);
        }

        let (cart, items) = CartRepository::new(self.db.clone())
            .find_with_items(request.cart_id)
            .await?
            .ok_or(ServiceError::CartNotFound(request.cart_id))?;
        if !cart.is_owned_by_customer(actor.id) {
            return Err(ServiceError::Forbidden(
                "cart does not belong to the customer".to_string(),
            ));
        }
        if cart.status.is_retired() || items.is_empty() {
            // A same-key request may have converted the cart a moment ago.
            if let Some(replay) = self.replay(actor, &key).await? {
                return Ok(replay);
            }
            if cart.status.is_retired() {
                return Err(ServiceError::CartNotActive(cart.id));
            }
            return Err(ServiceError::EmptyCart(cart.id));
        }

        let restaurant_id = cart
            .restaurant_id
            .unwrap_or(items[0].restaurant_id);
        let ready = self.vendors.is_payment_ready(restaurant_id).await?;
        if !ready {
            warn!(%restaurant_id, "Restaurant cannot accept payments, order rejected");
            return Err(ServiceError::VendorNotPaymentReady(restaurant_id));
        }

        let created = self
            .create_order(
                actor,
                &key,
                request.cart_id,
                delivery_address,
                special_instructions,
            )
            .await;

        let order = match created {
            Ok(Created::Order(order)) => order,
            Ok(Created::Existing) => {
                return self
                    .replay(actor, &key)
                    .await?
                    .ok_or_else(|| ServiceError::InternalError("idempotency record vanished".into()));
            }
            Err(e) => {
                if let Some(replay) = self.replay(actor, &key).await? {
                    return Ok(replay);
                }
                return Err(e);
            }
        };

        counter!("orderflow.orders.placed", 1);
        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id: order.id,
                customer_id: order.customer_id,
                restaurant_id: order.restaurant_id,
                total: order.total,
            })
            .await;
        info!(order_id = %order.id, total = %order.total, "Order placed");

        self.open_checkout_session(order).await
    }

    /// Opens a new checkout session for an order whose payment never
    /// started or failed.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn retry_payment(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<PlaceOrderOutcome, ServiceError> {
        let order = OrderRepository::find_in(&*self.db, order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let owner = actor.is_customer() && order.customer_id == actor.id;
        if !(owner || actor.is_admin()) {
            return Err(ServiceError::Forbidden(
                "only the ordering customer can retry payment".to_string(),
            ));
        }
        ensure_retryable(&order)?;

        let order = if order.status == OrderStatus::PaymentFailed {
            let (before, after) = self
                .update_order(order_id, &Actor::system(), Some("payment retry".to_string()), |o| {
                    ensure_retryable(o)?;
                    if o.status == OrderStatus::PaymentFailed {
                        o.status = OrderStatus::Pending;
                        o.payment_status = PaymentStatus::Unpaid;
                    }
                    Ok(())
                })
                .await?;
            self.publish_status_change(&before, &after).await;
            after
        } else {
            order
        };

        self.open_checkout_session(order).await
    }

    /// Applies a successful payment reported by the gateway. Repeated
    /// notifications are no-ops.
    #[instrument(skip(self))]
    pub async fn record_payment_succeeded(
        &self,
        order_id: Uuid,
        payment_reference: String,
    ) -> Result<OrderModel, ServiceError> {
        let (before, after) = self
            .update_order(order_id, &Actor::system(), Some("payment confirmed".to_string()), |o| {
                match o.payment_status {
                    PaymentStatus::Paid | PaymentStatus::RefundPending | PaymentStatus::Refunded => {
                        return Ok(())
                    }
                    _ => {}
                }
                if o.status == OrderStatus::PaymentFailed {
                    o.status = OrderStatus::Pending;
                }
                o.payment_status = PaymentStatus::Paid;
                o.payment_reference = Some(payment_reference.clone());
                o.payment_failure_reason = None;
                Ok(())
            })
            .await?;

        if before != after {
            if after.status.is_terminal() {
                warn!(%order_id, status = %after.status, "Payment received for an order that is already closed");
            }
            self.publish_status_change(&before, &after).await;
            self.event_sender
                .send_or_log(Event::PaymentSucceeded(order_id))
                .await;
            info!(%order_id, "Payment recorded");
        }
        Ok(after)
    }

    /// Applies a failed payment reported by the gateway. A pending order
    /// moves to `PaymentFailed`; repeated notifications are no-ops.
    #[instrument(skip(self))]
    pub async fn record_payment_failed(
        &self,
        order_id: Uuid,
        reason: String,
    ) -> Result<OrderModel, ServiceError> {
        let (before, after) = self
            .update_order(order_id, &Actor::system(), Some(reason.clone()), |o| {
                match o.payment_status {
                    PaymentStatus::Paid | PaymentStatus::RefundPending | PaymentStatus::Refunded => {
                        return Ok(())
                    }
                    _ => {}
                }
                if o.status == OrderStatus::PaymentFailed {
                    return Ok(());
                }
                if transition_rule(o.status, OrderStatus::PaymentFailed).is_some() {
                    o.status = OrderStatus::PaymentFailed;
                }
                o.payment_status = PaymentStatus::Failed;
                o.payment_failure_reason = Some(reason.clone());
                Ok(())
            })
            .await?;

        if before != after {
            self.publish_status_change(&before, &after).await;
            self.event_sender
                .send_or_log(Event::PaymentFailed { order_id, reason })
                .await;
        }
        Ok(after)
    }

    /// Refunds a paid order through the gateway.
    ///
    /// The order is first marked `RefundPending` so a second refund cannot
    /// start. On confirmation it becomes `Refunded`; on gateway failure the
    /// payment goes back to `Paid` and the error is returned.
    #[instrument(skip(self, actor, reason), fields(actor_id = %actor.id))]
    pub async fn refund(
        &self,
        actor: &Actor,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let order = OrderRepository::find_in(&*self.db, order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;
        if !(actor.is_admin() || actor.manages_restaurant(order.restaurant_id)) {
            return Err(ServiceError::Forbidden(
                "only the restaurant's vendor or an admin can refund".to_string(),
            ));
        }

        let stale_after = self.refund_stale_after();
        let (_, pending) = self
            .update_order(order_id, actor, None, |o| {
                ensure_refundable(o, Utc::now(), stale_after)?;
                o.payment_status = PaymentStatus::RefundPending;
                Ok(())
            })
            .await?;

        let reference = match pending.payment_reference.clone() {
            Some(reference) => Ok(reference),
            None => match self
                .call_gateway(self.gateway.find_payment_reference(order_id))
                .await
            {
                Ok(Some(reference)) => Ok(reference),
                Ok(None) => Err(ServiceError::UpstreamUnavailable(format!(
                    "payment gateway has no payment for order {}",
                    order_id
                ))),
                Err(e) => Err(e.into()),
            },
        };

        let confirmation = match reference {
            Ok(reference) => self
                .call_gateway(self.gateway.refund(&reference))
                .await
                .map_err(ServiceError::from),
            Err(e) => Err(e),
        };

        match confirmation {
            Ok(confirmation) => {
                let (before, after) = self
                    .update_order(order_id, actor, reason.clone(), |o| {
                        if transition_rule(o.status, OrderStatus::Refunded).is_some() {
                            o.status = OrderStatus::Refunded;
                        } else {
                            warn!(%order_id, status = %o.status, "Refund confirmed for an order that closed meanwhile");
                        }
                        o.payment_status = PaymentStatus::Refunded;
                        Ok(())
                    })
                    .await?;

                counter!("orderflow.payments.refunds", 1);
                self.publish_status_change(&before, &after).await;
                self.event_sender
                    .send_or_log(Event::OrderRefunded(order_id))
                    .await;
                info!(%order_id, refund_id = %confirmation.refund_id, "Order refunded");
                Ok(after)
            }
            Err(e) => {
                error!(%order_id, error = %e, "Refund failed, restoring paid state");
                let restored = self
                    .update_order(order_id, &Actor::system(), None, |o| {
                        if o.payment_status == PaymentStatus::RefundPending {
                            o.payment_status = PaymentStatus::Paid;
                        }
                        Ok(())
                    })
                    .await;
                if let Err(restore_err) = restored {
                    // The pending marker goes stale and a later refund reclaims it.
                    error!(%order_id, error = %restore_err, "Could not restore paid state after failed refund");
                }
                self.event_sender
                    .send_or_log(Event::RefundFailed {
                        order_id,
                        reason: e.to_string(),
                    })
                    .await;
                Err(match e {
                    ServiceError::UpstreamUnavailable(_) => e,
                    other => ServiceError::UpstreamUnavailable(other.to_string()),
                })
            }
        }
    }

    /// Returns the order a key already produced, if any.
    async fn replay(
        &self,
        actor: &Actor,
        key: &str,
    ) -> Result<Option<PlaceOrderOutcome>, ServiceError> {
        let Some(record) = idempotency::find(&*self.db, key).await? else {
            return Ok(None);
        };
        if record.customer_id != actor.id {
            return Err(ServiceError::Conflict(
                "idempotency key was already used for a different request".to_string(),
            ));
        }

        let order = OrderRepository::find_in(&*self.db, record.order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(record.order_id))?;

        counter!("orderflow.orders.idempotent_replays", 1);
        info!(order_id = %order.id, "Idempotent replay of order placement");

        let checkout = match (&order.payment_reference, &order.checkout_url) {
            (Some(reference), Some(url)) => Some(CheckoutRedirect {
                payment_reference: reference.clone(),
                redirect_url: url.clone(),
            }),
            _ => None,
        };
        let message = match (&checkout, order.payment_status) {
            (None, PaymentStatus::Unpaid | PaymentStatus::Failed) => {
                Some(PAYMENT_START_FAILED_MESSAGE.to_string())
            }
            _ => None,
        };

        Ok(Some(PlaceOrderOutcome {
            order,
            checkout,
            replayed: true,
            message,
        }))
    }

    /// The single multi-entity write of order placement.
    async fn create_order(
        &self,
        actor: &Actor,
        key: &str,
        cart_id: Uuid,
        delivery_address: String,
        special_instructions: Option<String>,
    ) -> Result<Created, ServiceError> {
        for attempt in 1..=self.settings.max_retries {
            let txn = self.db.begin().await?;

            if idempotency::find(&txn, key).await?.is_some() {
                txn.rollback().await?;
                return Ok(Created::Existing);
            }

            let cart = CartRepository::find_in(&txn, cart_id)
                .await?
                .ok_or(ServiceError::CartNotFound(cart_id))?;
            if !cart.is_owned_by_customer(actor.id) {
                return Err(ServiceError::Forbidden(
                    "cart does not belong to the customer".to_string(),
                ));
            }
            if cart.status.is_retired() {
                return Err(ServiceError::CartNotActive(cart_id));
            }
            let items = CartRepository::items_in(&txn, cart_id).await?;
            if items.is_empty() {
                return Err(ServiceError::EmptyCart(cart_id));
            }

            let order = self
                .insert_order(&txn, actor, key, &cart, &items, &delivery_address, &special_instructions)
                .await
                .map_err(|e| {
                    error!(error = %e, %cart_id, "Failed to insert order");
                    e
                })?;

            match idempotency::record(&txn, key, order.id, actor.id, order.created_at).await? {
                IdempotencyOutcome::Recorded => {}
                IdempotencyOutcome::Exists(_) => {
                    txn.rollback().await?;
                    return Ok(Created::Existing);
                }
            }

            let mut retired = cart.clone();
            retired.status = CartStatus::Converted;
            retired.version += 1;
            retired.updated_at = order.created_at;
            if !CartRepository::update_versioned(&txn, &retired, cart.version).await? {
                txn.rollback().await?;
                counter!("orderflow.carts.version_conflicts", 1);
                warn!(%cart_id, attempt, "Cart changed while placing order, retrying");
                continue;
            }

            txn.commit().await?;
            return Ok(Created::Order(order));
        }

        Err(ServiceError::ConcurrentModification(cart_id))
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_order(
        &self,
        txn: &DatabaseTransaction,
        actor: &Actor,
        key: &str,
        cart: &cart::Model,
        items: &[cart_item::Model],
        delivery_address: &str,
        special_instructions: &Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let now = Utc::now();
        let restaurant_id = cart.restaurant_id.unwrap_or(items[0].restaurant_id);
        let totals = self.pricing.cart_totals(Some(restaurant_id), items);
        let service_fee = self.pricing.service_fee(totals.subtotal);

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(actor.id),
            restaurant_id: Set(restaurant_id),
            source_cart_id: Set(cart.id),
            subtotal: Set(totals.subtotal),
            tax_total: Set(totals.tax),
            delivery_fee: Set(totals.delivery_fee),
            service_fee: Set(service_fee),
            total: Set(totals.total),
            delivery_address: Set(delivery_address.to_string()),
            special_instructions: Set(special_instructions.clone()),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Unpaid),
            payment_reference: Set(None),
            checkout_url: Set(None),
            payment_failure_reason: Set(None),
            idempotency_key: Set(key.to_string()),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await?;

        for item in items {
            order_item::ActiveModel::snapshot_from(order.id, item, now)
                .insert(txn)
                .await?;
        }

        OrderRepository::append_history(
            txn,
            HistoryEntry {
                order_id: order.id,
                from_status: None,
                to_status: OrderStatus::Pending,
                actor_role: actor.role,
                actor_id: actor.audit_id(),
                note: None,
                at: now,
            },
        )
        .await?;

        Ok(order)
    }

    /// Asks the gateway for a checkout session and records the result.
    async fn open_checkout_session(
        &self,
        order: OrderModel,
    ) -> Result<PlaceOrderOutcome, ServiceError> {
        let request = CheckoutSessionRequest {
            order_id: order.id,
            restaurant_id: order.restaurant_id,
            amount: order.total,
            service_fee: order.service_fee,
            success_url: self.settings.success_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
        };

        match self
            .call_gateway(self.gateway.create_checkout_session(request))
            .await
        {
            Ok(session) => {
                let (_, order) = self
                    .update_order(order.id, &Actor::system(), None, |o| {
                        o.payment_reference = Some(session.reference.clone());
                        o.checkout_url = Some(session.redirect_url.clone());
                        o.payment_failure_reason = None;
                        if matches!(o.payment_status, PaymentStatus::Unpaid | PaymentStatus::Failed) {
                            o.payment_status = PaymentStatus::SessionCreated;
                        }
                        Ok(())
                    })
                    .await?;

                self.event_sender
                    .send_or_log(Event::CheckoutSessionCreated {
                        order_id: order.id,
                        payment_reference: session.reference.clone(),
                    })
                    .await;

                Ok(PlaceOrderOutcome {
                    order,
                    checkout: Some(CheckoutRedirect {
                        payment_reference: session.reference,
                        redirect_url: session.redirect_url,
                    }),
                    replayed: false,
                    message: None,
                })
            }
            Err(e) => {
                counter!("orderflow.payments.session_failures", 1);
                warn!(order_id = %order.id, error = %e, "Checkout session could not be created");
                let reason = e.to_string();

                let (_, order) = self
                    .update_order(order.id, &Actor::system(), None, |o| {
                        o.payment_failure_reason = Some(reason.clone());
                        Ok(())
                    })
                    .await?;

                self.event_sender
                    .send_or_log(Event::CheckoutSessionFailed {
                        order_id: order.id,
                        reason,
                    })
                    .await;

                Ok(PlaceOrderOutcome {
                    order,
                    checkout: None,
                    replayed: false,
                    message: Some(PAYMENT_START_FAILED_MESSAGE.to_string()),
                })
            }
        }
    }

    /// Runs a gateway call under the configured timeout.
    async fn call_gateway<T, F>(&self, call: F) -> Result<T, IntegrationError>
    where
        F: Future<Output = Result<T, IntegrationError>>,
    {
        match tokio::time::timeout(self.settings.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(IntegrationError::Timeout {
                service: "payment gateway",
            }),
        }
    }

    /// Version-checked read-modify-write of one order. Returns the state
    /// before and after; when `apply` changes nothing no write happens.
    async fn update_order<F>(
        &self,
        order_id: Uuid,
        actor: &Actor,
        note: Option<String>,
        mut apply: F,
    ) -> Result<(OrderModel, OrderModel), ServiceError>
    where
        F: FnMut(&mut OrderModel) -> Result<(), ServiceError> + Send,
    {
        for attempt in 1..=self.settings.max_retries {
            let txn = self.db.begin().await?;
            let current = OrderRepository::find_in(&txn, order_id)
                .await?
                .ok_or(ServiceError::OrderNotFound(order_id))?;

            let mut next = current.clone();
            apply(&mut next)?;
            if next == current {
                txn.rollback().await?;
                return Ok((current.clone(), current));
            }
            next.version = current.version + 1;
            next.updated_at = Utc::now();

            if !record_transition(&txn, &current, &next, actor, note.clone()).await? {
                txn.rollback().await?;
                warn!(%order_id, attempt, "Order version changed underneath, retrying");
                continue;
            }
            txn.commit().await?;
            return Ok((current, next));
        }

        Err(ServiceError::ConcurrentModification(order_id))
    }

    /// How long a `RefundPending` marker may sit before it is treated as
    /// abandoned. A refund makes at most two bounded gateway calls.
    fn refund_stale_after(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.gateway_timeout * 2)
            .unwrap_or_else(|_| chrono::Duration::minutes(1))
    }

    async fn publish_status_change(&self, before: &OrderModel, after: &OrderModel) {
        if before.status != after.status {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id: after.id,
                    old_status: before.status,
                    new_status: after.status,
                })
                .await;
        }
    }
}

fn ensure_retryable(order: &OrderModel) -> Result<(), ServiceError> {
    if matches!(
        order.payment_status,
        PaymentStatus::Paid | PaymentStatus::RefundPending | PaymentStatus::Refunded
    ) {
        return Err(ServiceError::Conflict(format!(
            "order {} is already paid",
            order.id
        )));
    }
    match order.status {
        OrderStatus::Pending => Ok(()),
        OrderStatus::PaymentFailed => transition_rule(order.status, OrderStatus::Pending)
            .filter(|rule| rule.path == TransitionPath::PaymentRetry)
            .map(|_| ())
            .ok_or_else(|| ServiceError::invalid_transition(order.status, OrderStatus::Pending)),
        other => Err(ServiceError::invalid_transition(other, OrderStatus::Pending)),
    }
}

/// A refund may start from `Paid`, or take over a `RefundPending` marker
/// that has not moved for `stale_after` (its request died mid-call).
fn ensure_refundable(
    order: &OrderModel,
    now: chrono::DateTime<Utc>,
    stale_after: chrono::Duration,
) -> Result<(), ServiceError> {
    match order.payment_status {
        PaymentStatus::Paid => {}
        PaymentStatus::RefundPending if now - order.updated_at >= stale_after => {
            warn!(order_id = %order.id, since = %order.updated_at, "Taking over abandoned refund");
        }
        PaymentStatus::RefundPending => {
            return Err(ServiceError::Conflict(format!(
                "a refund for order {} is already in progress",
                order.id
            )))
        }
        _ => return Err(ServiceError::NoPaymentToRefund(order.id)),
    }
    transition_rule(order.status, OrderStatus::Refunded)
        .map(|_| ())
        .ok_or_else(|| ServiceError::invalid_transition(order.status, OrderStatus::Refunded))
}
