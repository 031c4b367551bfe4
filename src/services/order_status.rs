use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::Actor,
    entities::order::{Model as OrderModel, OrderStatus},
    entities::order_status_history::ActorRole,
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::order_repository::{HistoryEntry, OrderRepository},
};

/// Which operation a transition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPath {
    /// Kitchen and delivery progress.
    Fulfilment,
    Cancellation,
    /// Only reachable through the refund operation after gateway confirmation.
    Refund,
    PaymentFailure,
    PaymentRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub path: TransitionPath,
    pub allowed: &'static [ActorRole],
}

const FULFILMENT_ACTORS: &[ActorRole] = &[ActorRole::Vendor, ActorRole::Admin];
const CANCEL_ACTORS: &[ActorRole] = &[ActorRole::Customer, ActorRole::Admin];
const REFUND_ACTORS: &[ActorRole] = &[ActorRole::Vendor, ActorRole::Admin];
const SYSTEM_ONLY: &[ActorRole] = &[ActorRole::System];

/// Targets the human-facing status update accepts.
pub const STATUS_UPDATE_PATHS: &[TransitionPath] =
    &[TransitionPath::Fulfilment, TransitionPath::Cancellation];

/// The order lifecycle table. Pure: no I/O, no actor.
pub fn transition_rule(from: OrderStatus, to: OrderStatus) -> Option<TransitionRule> {
    use OrderStatus::*;

    let (path, allowed) = match (from, to) {
        (Pending, Confirmed)
        | (Confirmed, Preparing)
        | (Preparing, Ready)
        | (Ready, OutForDelivery)
        | (OutForDelivery, Delivered) => (TransitionPath::Fulfilment, FULFILMENT_ACTORS),
        (Pending, Cancelled) | (Confirmed, Cancelled) => {
            (TransitionPath::Cancellation, CANCEL_ACTORS)
        }
        (Pending, PaymentFailed) => (TransitionPath::PaymentFailure, SYSTEM_ONLY),
        (PaymentFailed, Pending) => (TransitionPath::PaymentRetry, SYSTEM_ONLY),
        (from, Refunded) if !from.is_terminal() => (TransitionPath::Refund, REFUND_ACTORS),
        _ => return None,
    };

    Some(TransitionRule {
        from,
        to,
        path,
        allowed,
    })
}

/// Statuses reachable from `from` along the given paths.
pub fn reachable(from: OrderStatus, paths: &[TransitionPath]) -> Vec<OrderStatus> {
    use sea_orm::Iterable;

    OrderStatus::iter()
        .filter(|to| {
            transition_rule(from, *to)
                .map(|rule| paths.contains(&rule.path))
                .unwrap_or(false)
        })
        .collect()
}

/// Checks that `actor` may perform `rule` on `order`.
///
/// Customers may only act on their own orders and vendors only on orders of
/// restaurants they manage.
pub fn authorize_transition(
    actor: &Actor,
    order: &OrderModel,
    rule: &TransitionRule,
) -> Result<(), ServiceError> {
    if !rule.allowed.contains(&actor.role) {
        return Err(ServiceError::Forbidden(format!(
            "{} may not move an order from {} to {}",
            actor.role, rule.from, rule.to
        )));
    }

    match actor.role {
        ActorRole::Customer if order.customer_id != actor.id => Err(ServiceError::Forbidden(
            "order belongs to another customer".to_string(),
        )),
        ActorRole::Vendor if !actor.manages_restaurant(order.restaurant_id) => Err(
            ServiceError::Forbidden("order belongs to another restaurant".to_string()),
        ),
        _ => Ok(()),
    }
}

/// Writes `next` over `current` (version-checked) and appends a history row
/// when the status changed. Returns `false` if the version moved.
pub async fn record_transition<C: ConnectionTrait>(
    conn: &C,
    current: &OrderModel,
    next: &OrderModel,
    actor: &Actor,
    note: Option<String>,
) -> Result<bool, ServiceError> {
    if !OrderRepository::update_versioned(conn, next, current.version).await? {
        return Ok(false);
    }

    if current.status != next.status {
        OrderRepository::append_history(
            conn,
            HistoryEntry {
                order_id: current.id,
                from_status: Some(current.status),
                to_status: next.status,
                actor_role: actor.role,
                actor_id: actor.audit_id(),
                note,
                at: next.updated_at,
            },
        )
        .await?;
    }
    Ok(true)
}

/// Applies single-order status transitions under an optimistic version check.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    max_retries: u32,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>, max_retries: u32) -> Self {
        Self {
            db,
            event_sender,
            max_retries: max_retries.max(1),
        }
    }

    /// Moves an order to `to` if the table allows it along one of `paths` and
    /// `actor` is authorized.
    #[instrument(skip(self, actor, note), fields(actor_role = %actor.role))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        to: OrderStatus,
        actor: &Actor,
        paths: &[TransitionPath],
        note: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        for attempt in 1..=self.max_retries {
            let txn = self.db.begin().await?;

            let order = OrderRepository::find_in(&txn, order_id)
                .await?
                .ok_or(ServiceError::OrderNotFound(order_id))?;

            let rule = transition_rule(order.status, to)
                .filter(|rule| paths.contains(&rule.path))
                .ok_or_else(|| ServiceError::invalid_transition(order.status, to))?;
            authorize_transition(actor, &order, &rule)?;

            let mut next = order.clone();
            next.status = to;
            next.version += 1;
            next.updated_at = Utc::now();

            if !record_transition(&txn, &order, &next, actor, note.clone()).await? {
                txn.rollback().await?;
                warn!(%order_id, attempt, "Order version changed underneath, retrying");
                continue;
            }
            txn.commit().await?;

            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: order.status,
                    new_status: to,
                })
                .await;
            info!(%order_id, from = %order.status, to = %to, "Order status updated");
            return Ok(next);
        }

        Err(ServiceError::ConcurrentModification(order_id))
    }
}
