use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Refund entity. Belongs to exactly one order/payment intent; the sum of an
/// intent's refund amounts never exceeds its captured amount.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "refunds")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_intent_id: Uuid,
    pub gateway_refund_id: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub amount: Decimal,
    #[sea_orm(nullable)]
    pub reason: Option<String>,
    /// True when this refund brought the refunded total up to the full
    /// captured amount.
    pub is_full: bool,
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
    #[sea_orm(
        belongs_to = "super::payment_intent::Entity",
        from = "Column::PaymentIntentId",
        to = "super::payment_intent::Column::Id"
    )]
    PaymentIntent,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::payment_intent::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentIntent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
