use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::commerce::cart_item;
use crate::models::ItemOptions;

/// Order line, an owned copy of a cart line taken at placement.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub order_id: Uuid,
    /// Traceability only; carts may be purged independently of orders.
    pub source_cart_item_id: Uuid,
    pub menu_item_id: Uuid,
    pub name: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_price: Decimal,
    pub quantity: i32,
    #[sea_orm(column_type = "Json")]
    pub options: ItemOptions,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    /// Deep-copies a cart line into a new order line with a fresh id.
    pub fn snapshot_from(order_id: Uuid, line: &cart_item::Model, now: DateTime<Utc>) -> Self {
        ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            source_cart_item_id: Set(line.id),
            menu_item_id: Set(line.menu_item_id),
            name: Set(line.name.clone()),
            unit_price: Set(line.unit_price),
            quantity: Set(line.quantity),
            options: Set(line.options.clone()),
            line_total: Set(line.line_total),
            created_at: Set(now),
        }
    }
}
