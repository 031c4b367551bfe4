use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::commerce::{cart, cart_item, Cart, CartItem};

use super::{BaseRepository, Repository};

/// A persisted change to one cart line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineChange {
    Insert(cart_item::Model),
    Update(cart_item::Model),
    Delete(Uuid),
}

/// Repository for carts and their lines
#[derive(Debug, Clone)]
pub struct CartRepository {
    base: BaseRepository,
}

impl CartRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<cart::Model>, DbErr> {
        Self::find_in(self.base.get_db(), id).await
    }

    pub async fn find_with_items(
        &self,
        id: Uuid,
    ) -> Result<Option<(cart::Model, Vec<cart_item::Model>)>, DbErr> {
        let db = self.base.get_db();
        match Self::find_in(db, id).await? {
            Some(cart) => {
                let items = Self::items_in(db, id).await?;
                Ok(Some((cart, items)))
            }
            None => Ok(None),
        }
    }

    /// The customer's most recently touched `Active` cart, if any.
    pub async fn find_active_by_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<cart::Model>, DbErr> {
        Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .order_by_desc(cart::Column::UpdatedAt)
            .one(self.base.get_db())
            .await
    }

    pub async fn find_in<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<cart::Model>, DbErr> {
        Cart::find_by_id(id).one(conn).await
    }

    /// Lines in insertion order.
    pub async fn items_in<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<cart_item::Model>, DbErr> {
        CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .order_by_asc(cart_item::Column::Id)
            .all(conn)
            .await
    }

    pub async fn insert<C: ConnectionTrait>(
        conn: &C,
        cart: cart::Model,
    ) -> Result<cart::Model, DbErr> {
        cart::ActiveModel {
            id: Set(cart.id),
            session_id: Set(cart.session_id),
            customer_id: Set(cart.customer_id),
            restaurant_id: Set(cart.restaurant_id),
            subtotal: Set(cart.subtotal),
            tax_total: Set(cart.tax_total),
            delivery_fee: Set(cart.delivery_fee),
            total: Set(cart.total),
            status: Set(cart.status),
            version: Set(cart.version),
            created_at: Set(cart.created_at),
            updated_at: Set(cart.updated_at),
        }
        .insert(conn)
        .await
    }

    /// Writes `next` only if the stored row still carries `expected_version`.
    /// Returns `false` when another writer got there first.
    pub async fn update_versioned<C: ConnectionTrait>(
        conn: &C,
        next: &cart::Model,
        expected_version: i32,
    ) -> Result<bool, DbErr> {
        let changes = cart::ActiveModel {
            session_id: Set(next.session_id.clone()),
            customer_id: Set(next.customer_id),
            restaurant_id: Set(next.restaurant_id),
            subtotal: Set(next.subtotal),
            tax_total: Set(next.tax_total),
            delivery_fee: Set(next.delivery_fee),
            total: Set(next.total),
            status: Set(next.status),
            version: Set(next.version),
            updated_at: Set(next.updated_at),
            ..Default::default()
        };

        let result = Cart::update_many()
            .set(changes)
            .filter(cart::Column::Id.eq(next.id))
            .filter(cart::Column::Version.eq(expected_version))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    pub async fn apply_line_changes<C: ConnectionTrait>(
        conn: &C,
        changes: &[LineChange],
    ) -> Result<(), DbErr> {
        for change in changes {
            match change {
                LineChange::Insert(line) => {
                    cart_item::ActiveModel {
                        id: Set(line.id),
                        cart_id: Set(line.cart_id),
                        menu_item_id: Set(line.menu_item_id),
                        restaurant_id: Set(line.restaurant_id),
                        name: Set(line.name.clone()),
                        unit_price: Set(line.unit_price),
                        quantity: Set(line.quantity),
                        options: Set(line.options.clone()),
                        line_total: Set(line.line_total),
                        created_at: Set(line.created_at),
                        updated_at: Set(line.updated_at),
                    }
                    .insert(conn)
                    .await?;
                }
                LineChange::Update(line) => {
                    CartItem::update_many()
                        .col_expr(cart_item::Column::Quantity, Expr::value(line.quantity))
                        .col_expr(cart_item::Column::LineTotal, Expr::value(line.line_total))
                        .col_expr(cart_item::Column::UpdatedAt, Expr::value(line.updated_at))
                        .filter(cart_item::Column::Id.eq(line.id))
                        .exec(conn)
                        .await?;
                }
                LineChange::Delete(id) => {
                    CartItem::delete_by_id(*id).exec(conn).await?;
                }
            }
        }
        Ok(())
    }
}
