use crate::{
    auth::Actor,
    entities::order::{Model as OrderModel, OrderStatus},
    entities::order_item::Model as OrderItemModel,
    entities::order_status_history::{ActorRole, Model as OrderStatusHistoryModel},
    errors::ServiceError,
    repositories::{OrderRepository, Page},
    services::order_status::{OrderStatusService, TransitionPath, STATUS_UPDATE_PATHS},
};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

pub const MAX_PAGE_SIZE: u64 = 100;

/// An order with its line items.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

/// Read access and human-driven status changes for orders.
#[derive(Clone)]
pub struct OrderService {
    repository: OrderRepository,
    status: OrderStatusService,
}

impl OrderService {
    pub fn new(repository: OrderRepository, status: OrderStatusService) -> Self {
        Self { repository, status }
    }

    #[instrument(skip(self, actor))]
    pub async fn get_order(&self, actor: &Actor, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = self.visible_order(actor, order_id).await?;
        let items = self.repository.items(order_id).await?;
        Ok(OrderDetails { order, items })
    }

    /// A customer's orders, newest first.
    #[instrument(skip(self, actor))]
    pub async fn list_customer_orders(
        &self,
        actor: &Actor,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<Page<OrderModel>, ServiceError> {
        validate_page(page, per_page)?;
        let allowed = actor.is_admin() || (actor.is_customer() && actor.id == customer_id);
        if !allowed {
            return Err(ServiceError::Forbidden(
                "cannot list another customer's orders".to_string(),
            ));
        }
        Ok(self
            .repository
            .find_by_customer(customer_id, page, per_page)
            .await?)
    }

    /// A restaurant's orders for its vendor, optionally filtered by status.
    #[instrument(skip(self, actor))]
    pub async fn list_restaurant_orders(
        &self,
        actor: &Actor,
        restaurant_id: Uuid,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<Page<OrderModel>, ServiceError> {
        validate_page(page, per_page)?;
        if !(actor.is_admin() || actor.manages_restaurant(restaurant_id)) {
            return Err(ServiceError::Forbidden(
                "restaurant is not managed by this vendor".to_string(),
            ));
        }
        Ok(self
            .repository
            .find_by_restaurant(restaurant_id, status, page, per_page)
            .await?)
    }

    #[instrument(skip(self, actor))]
    pub async fn order_history(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<Vec<OrderStatusHistoryModel>, ServiceError> {
        self.visible_order(actor, order_id).await?;
        Ok(self.repository.history(order_id).await?)
    }

    /// Moves an order along the fulfilment chain or cancels it.
    ///
    /// Refunds and payment-driven states are not reachable from here; any
    /// such target fails with `InvalidTransition` and leaves the order as is.
    #[instrument(skip(self, actor, note))]
    pub async fn update_status(
        &self,
        actor: &Actor,
        order_id: Uuid,
        to: OrderStatus,
        note: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        self.status
            .transition(order_id, to, actor, STATUS_UPDATE_PATHS, note)
            .await
    }

    /// Cancels a pending or confirmed order.
    #[instrument(skip(self, actor, reason))]
    pub async fn cancel_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        self.status
            .transition(
                order_id,
                OrderStatus::Cancelled,
                actor,
                &[TransitionPath::Cancellation],
                reason,
            )
            .await
    }

    async fn visible_order(&self, actor: &Actor, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = self
            .repository
            .find_by_id(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let visible = match actor.role {
            ActorRole::Admin | ActorRole::System => true,
            ActorRole::Customer => order.customer_id == actor.id,
            ActorRole::Vendor => actor.manages_restaurant(order.restaurant_id),
        };
        if !visible {
            // Do not reveal that the order exists.
            return Err(ServiceError::OrderNotFound(order_id));
        }
        Ok(order)
    }
}

fn validate_page(page: u64, per_page: u64) -> Result<(), ServiceError> {
    if page == 0 {
        return Err(ServiceError::InvalidInput("page starts at 1".to_string()));
    }
    if per_page == 0 || per_page > MAX_PAGE_SIZE {
        return Err(ServiceError::InvalidInput(format!(
            "per_page must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    Ok(())
}
