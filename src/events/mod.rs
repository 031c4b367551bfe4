use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event dropped");
        }
    }
}

/// Domain events published after a state change has been committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CartCreated(Uuid),
    CartUpdated(Uuid),
    CartCleared(Uuid),
    CartMerged {
        guest_cart_id: Uuid,
        target_cart_id: Uuid,
        customer_id: Uuid,
        discarded_guest_items: bool,
    },
    OrderPlaced {
        order_id: Uuid,
        customer_id: Uuid,
        restaurant_id: Uuid,
        total: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    CheckoutSessionCreated {
        order_id: Uuid,
        payment_reference: String,
    },
    CheckoutSessionFailed {
        order_id: Uuid,
        reason: String,
    },
    PaymentSucceeded(Uuid),
    PaymentFailed {
        order_id: Uuid,
        reason: String,
    },
    OrderRefunded(Uuid),
    RefundFailed {
        order_id: Uuid,
        reason: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CartCreated(_) => "cart.created",
            Event::CartUpdated(_) => "cart.updated",
            Event::CartCleared(_) => "cart.cleared",
            Event::CartMerged { .. } => "cart.merged",
            Event::OrderPlaced { .. } => "order.placed",
            Event::OrderStatusChanged { .. } => "order.status_changed",
            Event::CheckoutSessionCreated { .. } => "payment.session_created",
            Event::CheckoutSessionFailed { .. } => "payment.session_failed",
            Event::PaymentSucceeded(_) => "payment.succeeded",
            Event::PaymentFailed { .. } => "payment.failed",
            Event::OrderRefunded(_) => "order.refunded",
            Event::RefundFailed { .. } => "payment.refund_failed",
        }
    }
}

/// Drains the event channel. Notification fan-out lives outside this service,
/// so events are only logged here.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(event = event.name(), %order_id, %old_status, %new_status, "order status changed");
            }
            Event::CheckoutSessionFailed { order_id, reason }
            | Event::PaymentFailed { order_id, reason }
            | Event::RefundFailed { order_id, reason } => {
                warn!(event = event.name(), %order_id, %reason, "payment problem");
            }
            other => {
                debug!(event = other.name(), payload = ?other, "event");
            }
        }
    }

    info!("Event channel closed, stopping event processing loop");
}
