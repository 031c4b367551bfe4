use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::order::{self, Entity as Order, Model as OrderModel, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItem};
use crate::entities::order_status_history::{self, ActorRole, Entity as OrderStatusHistory};

use super::{BaseRepository, Page, Repository};

/// One history row to append.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub order_id: Uuid,
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub actor_role: ActorRole,
    pub actor_id: Option<Uuid>,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

/// Repository for order operations
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Find an order by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, DbErr> {
        Self::find_in(self.base.get_db(), id).await
    }

    pub async fn find_in<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<OrderModel>, DbErr> {
        Order::find_by_id(id).one(conn).await
    }

    pub async fn items(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, DbErr> {
        OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .order_by_asc(order_item::Column::Id)
            .all(self.base.get_db())
            .await
    }

    pub async fn history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_status_history::Model>, DbErr> {
        OrderStatusHistory::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::Sequence)
            .all(self.base.get_db())
            .await
    }

    /// Find orders by customer ID, newest first. `page` is 1-based.
    pub async fn find_by_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<Page<OrderModel>, DbErr> {
        let paginator = Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(self.base.get_db(), per_page);

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    /// Find a restaurant's orders, optionally narrowed to one status.
    pub async fn find_by_restaurant(
        &self,
        restaurant_id: Uuid,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<Page<OrderModel>, DbErr> {
        let mut query = Order::find().filter(order::Column::RestaurantId.eq(restaurant_id));
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(self.base.get_db(), per_page);

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    /// Writes the mutable columns of `next` if the row still has `expected_version`.
    pub async fn update_versioned<C: ConnectionTrait>(
        conn: &C,
        next: &OrderModel,
        expected_version: i32,
    ) -> Result<bool, DbErr> {
        let changes = order::ActiveModel {
            status: Set(next.status),
            payment_status: Set(next.payment_status),
            payment_reference: Set(next.payment_reference.clone()),
            checkout_url: Set(next.checkout_url.clone()),
            payment_failure_reason: Set(next.payment_failure_reason.clone()),
            version: Set(next.version),
            updated_at: Set(next.updated_at),
            ..Default::default()
        };

        let result = Order::update_many()
            .set(changes)
            .filter(order::Column::Id.eq(next.id))
            .filter(order::Column::Version.eq(expected_version))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    pub async fn append_history<C: ConnectionTrait>(
        conn: &C,
        entry: HistoryEntry,
    ) -> Result<order_status_history::Model, DbErr> {
        let existing = OrderStatusHistory::find()
            .filter(order_status_history::Column::OrderId.eq(entry.order_id))
            .count(conn)
            .await?;

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(entry.order_id),
            sequence: Set(existing as i32 + 1),
            from_status: Set(entry.from_status),
            to_status: Set(entry.to_status),
            actor_role: Set(entry.actor_role),
            actor_id: Set(entry.actor_id),
            note: Set(entry.note),
            created_at: Set(entry.at),
        }
        .insert(conn)
        .await
    }
}
