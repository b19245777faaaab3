use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        cart_item,
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentStatus},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
        PaymentMethod,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{carts::CartService, inventory::InventoryService},
};

/// Postal address captured on the order. Arrives already validated from
/// the request layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub full_name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country_code: String,
    pub phone: Option<String>,
}

/// Validated checkout payload handed to order creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutData {
    pub shipping_address: Address,
    pub billing_address: Address,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

/// The order engine.
///
/// Converts a validated cart into an order aggregate and owns the order
/// status state machine. Orders are never deleted; cancellation is a
/// status transition.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    carts: Arc<CartService>,
    inventory: Arc<InventoryService>,
    currency: String,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        carts: Arc<CartService>,
        inventory: Arc<InventoryService>,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            carts,
            inventory,
            currency,
        }
    }

    /// Creates an order from the user's cart.
    ///
    /// The sequence is: re-validate the cart, reserve stock for every line
    /// (all-or-nothing), snapshot authoritative prices, then persist the
    /// order and clear the cart in one transaction. If persistence fails
    /// after the reservation succeeded, every reserved unit is released
    /// before the error is returned — a reservation is never left dangling.
    ///
    /// Clearing the cart inside the same transaction doubles as the
    /// double-submit guard: a concurrent second checkout for the same user
    /// observes an empty cart and fails with `CartEmpty`.
    #[instrument(skip(self, data), fields(user_id = %user_id))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        data: CheckoutData,
    ) -> Result<OrderModel, ServiceError> {
        let lines = self.carts.validate_for_checkout(user_id).await?;

        let reservations: Vec<(Uuid, i32)> = lines
            .iter()
            .map(|(item, _)| (item.product_id, item.quantity))
            .collect();
        self.inventory.reserve_all(&reservations).await?;

        // Authoritative prices come from the products read during
        // validation, not from the cart's display snapshots.
        let total_amount: Decimal = lines
            .iter()
            .map(|(item, product)| product.unit_price * Decimal::from(item.quantity))
            .sum::<Decimal>()
            .round_dp(2);

        let order_id = Uuid::new_v4();
        let order_number = format!("ORD-{}", &order_id.simple().to_string()[..8].to_uppercase());
        let now = Utc::now();

        let persisted: Result<OrderModel, ServiceError> = async {
            let txn = self.db.begin().await?;

            let order = order::ActiveModel {
                id: Set(order_id),
                order_number: Set(order_number.clone()),
                user_id: Set(user_id),
                status: Set(OrderStatus::Pending),
                payment_status: Set(PaymentStatus::Pending),
                payment_method: Set(data.payment_method),
                total_amount: Set(total_amount),
                currency: Set(self.currency.clone()),
                shipping_address: Set(serde_json::to_value(&data.shipping_address)?),
                billing_address: Set(serde_json::to_value(&data.billing_address)?),
                notes: Set(data.notes.clone()),
                cancellation_reason: Set(None),
                created_at: Set(now),
                updated_at: Set(Some(now)),
                version: Set(1),
            };
            let order = order.insert(&txn).await?;

            for (item, product) in &lines {
                let line_total =
                    (product.unit_price * Decimal::from(item.quantity)).round_dp(2);
                let order_item = order_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order_id),
                    product_id: Set(item.product_id),
                    product_name: Set(product.name.clone()),
                    quantity: Set(item.quantity),
                    unit_price: Set(product.unit_price),
                    line_total: Set(line_total),
                    created_at: Set(now),
                };
                order_item.insert(&txn).await?;
            }

            // Clearing the cart here makes the clear atomic with the order.
            // A concurrent duplicate submit loses the race, deletes zero
            // rows, and rolls back with CartEmpty.
            let cleared = cart_item::Entity::delete_many()
                .filter(cart_item::Column::UserId.eq(user_id))
                .exec(&txn)
                .await?;
            if cleared.rows_affected == 0 {
                return Err(ServiceError::CartEmpty);
            }

            txn.commit().await?;
            Ok(order)
        }
        .await;

        let order = match persisted {
            Ok(order) => order,
            Err(err) => {
                error!(
                    user_id = %user_id,
                    error = %err,
                    "Order persistence failed; releasing reservations"
                );
                self.inventory.release_all(&reservations).await;
                return Err(err);
            }
        };

        self.event_sender.send_or_log(Event::OrderCreated(order_id)).await;
        self.event_sender.send_or_log(Event::CartCleared(user_id)).await;

        info!(
            order_id = %order_id,
            order_number = %order_number,
            user_id = %user_id,
            total = %total_amount,
            "Order created"
        );
        Ok(order)
    }

    /// Retrieves an order owned by `user_id`, with its lines.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn get_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        let order = OrderEntity::find_by_id(order_id).one(&*self.db).await?;

        // Someone else's order is reported as missing, not forbidden.
        let order = match order {
            Some(order) if order.user_id == user_id => order,
            _ => {
                return Err(ServiceError::NotFound(format!(
                    "Order {} not found",
                    order_id
                )))
            }
        };

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        Ok((order, items))
    }

    /// Internal lookup without the ownership check, for the payment paths.
    pub(crate) async fn get_order_by_id(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Advances the fulfilment status one legal step forward.
    #[instrument(skip(self), fields(order_id = %order_id, next = next.as_str()))]
    pub async fn advance_status(
        &self,
        order_id: Uuid,
        next: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.get_order_by_id(order_id).await?;
        let old_status = order.status;

        if !old_status.can_transition_to(next) {
            return Err(ServiceError::InvalidState(format!(
                "Order {} cannot move from {} to {}",
                order_id,
                old_status.as_str(),
                next.as_str()
            )));
        }

        let updated = self.write_status(order, next, None).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: next,
            })
            .await;

        info!(
            order_id = %order_id,
            old_status = old_status.as_str(),
            new_status = next.as_str(),
            "Order status advanced"
        );
        Ok(updated)
    }

    /// Cancels an order that has not shipped yet.
    ///
    /// Restocks the order's quantities (the reservation taken at creation
    /// is compensated) and records the reason. Fails with `InvalidState`
    /// once the order is shipped or delivered.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.get_order_by_id(order_id).await?;
        let old_status = order.status;

        if !old_status.is_cancellable() {
            return Err(ServiceError::InvalidState(format!(
                "Order {} in status {} cannot be cancelled",
                order_id,
                old_status.as_str()
            )));
        }

        let updated = self
            .write_status(order, OrderStatus::Cancelled, reason.clone())
            .await?;

        // Return the cancelled quantities to stock.
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        let lines: Vec<(Uuid, i32)> = items
            .iter()
            .map(|item| (item.product_id, item.quantity))
            .collect();
        self.inventory.release_all(&lines).await;

        self.event_sender
            .send_or_log(Event::OrderCancelled { order_id, reason })
            .await;
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: OrderStatus::Cancelled,
            })
            .await;

        info!(order_id = %order_id, "Order cancelled");
        Ok(updated)
    }

    /// Moves the payment status one legal step forward. Only the payment
    /// orchestration paths call this; nothing writes the column directly.
    pub(crate) async fn set_payment_status(
        &self,
        order_id: Uuid,
        next: PaymentStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.get_order_by_id(order_id).await?;
        let current = order.payment_status;

        if !current.can_transition_to(next) {
            return Err(ServiceError::InvalidState(format!(
                "Order {} payment status cannot move from {} to {}",
                order_id,
                current.as_str(),
                next.as_str()
            )));
        }

        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(next);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(&*self.db).await?;

        info!(
            order_id = %order_id,
            payment_status = next.as_str(),
            "Order payment status updated"
        );
        Ok(updated)
    }

    async fn write_status(
        &self,
        order: OrderModel,
        next: OrderStatus,
        cancellation_reason: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(next);
        if cancellation_reason.is_some() {
            active.cancellation_reason = Set(cancellation_reason);
        }
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        active.update(&*self.db).await.map_err(|e| {
            warn!(error = %e, "Failed to write order status");
            ServiceError::from(e)
        })
    }
}
