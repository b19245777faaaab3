use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        cart_item::{self, Entity as CartItemEntity, Model as CartItemModel},
        product::{self, Entity as ProductEntity, Model as ProductModel},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// The cart store.
///
/// A user's cart is their set of `cart_items` rows, one per product. The
/// store never mutates inventory; availability checks here are optimistic
/// reads — the inventory ledger's reservation at checkout is the final
/// authority.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    max_quantity_per_item: i32,
}

/// A cart as returned to callers: the lines plus a display subtotal
/// computed from the add-time price snapshots.
#[derive(Debug, Serialize)]
pub struct CartView {
    pub user_id: Uuid,
    pub items: Vec<CartItemModel>,
    pub subtotal: Decimal,
}

/// Result of a quantity update: a zero quantity removes the line, which
/// callers need to distinguish from an in-place update.
#[derive(Debug)]
pub enum CartUpdate {
    Updated(CartItemModel),
    Removed,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        max_quantity_per_item: i32,
    ) -> Self {
        Self {
            db,
            event_sender,
            max_quantity_per_item,
        }
    }

    /// Returns the user's cart. A user with no cart rows gets an empty one.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let items = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let subtotal: Decimal = items
            .iter()
            .map(|item| item.price_at_add * Decimal::from(item.quantity))
            .sum();

        Ok(CartView {
            user_id,
            items,
            subtotal: subtotal.round_dp(2),
        })
    }

    /// Adds a product to the cart, merging with an existing line.
    ///
    /// Fails with `NotFound` for a missing product, `ItemUnavailable` for a
    /// deactivated one, `InsufficientStock` when the merged quantity exceeds
    /// what is currently available, and `ValidationFailed` when it exceeds
    /// the per-line cap.
    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id, quantity = quantity))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartItemModel, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationFailed(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let product = self.load_sellable_product(product_id).await?;

        let existing = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?;

        let merged_quantity = existing.as_ref().map_or(0, |item| item.quantity) + quantity;
        self.check_quantity(&product, merged_quantity)?;

        let now = Utc::now();
        let item = match existing {
            Some(item) => {
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(merged_quantity);
                active.updated_at = Set(now);
                active.update(&*self.db).await?
            }
            None => {
                let active = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    price_at_add: Set(product.unit_price),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                active.insert(&*self.db).await?
            }
        };

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                user_id,
                product_id,
                quantity,
            })
            .await;

        info!(user_id = %user_id, product_id = %product_id, quantity = merged_quantity, "Cart item added");
        Ok(item)
    }

    /// Sets a cart line's quantity. A quantity of zero removes the line
    /// and reports [`CartUpdate::Removed`].
    #[instrument(skip(self), fields(user_id = %user_id, item_id = %item_id, quantity = quantity))]
    pub async fn update_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartUpdate, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationFailed(
                "Quantity cannot be negative".to_string(),
            ));
        }

        let item = self.load_owned_item(user_id, item_id).await?;

        if quantity == 0 {
            let product_id = item.product_id;
            CartItemEntity::delete_by_id(item.id).exec(&*self.db).await?;
            self.event_sender
                .send_or_log(Event::CartItemRemoved {
                    user_id,
                    product_id,
                })
                .await;
            return Ok(CartUpdate::Removed);
        }

        let product = self.load_sellable_product(item.product_id).await?;
        self.check_quantity(&product, quantity)?;

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        Ok(CartUpdate::Updated(updated))
    }

    /// Removes a cart line.
    #[instrument(skip(self), fields(user_id = %user_id, item_id = %item_id))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<(), ServiceError> {
        let item = self.load_owned_item(user_id, item_id).await?;
        let product_id = item.product_id;

        CartItemEntity::delete_by_id(item.id).exec(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                user_id,
                product_id,
            })
            .await;

        Ok(())
    }

    /// Empties the user's cart.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn clear(&self, user_id: Uuid) -> Result<(), ServiceError> {
        CartItemEntity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;

        self.event_sender.send_or_log(Event::CartCleared(user_id)).await;

        info!(user_id = %user_id, "Cart cleared");
        Ok(())
    }

    /// Runs the checkout-eligibility check over the whole cart and returns
    /// the validated lines paired with their current products, so order
    /// creation works from the same read.
    ///
    /// Fails with `CartEmpty`, `ItemUnavailable` (first inactive product) or
    /// `InsufficientStock` (first shortfall). Optimistic: the ledger's
    /// reservation is the final authority.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn validate_for_checkout(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(CartItemModel, ProductModel)>, ServiceError> {
        let items = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        if items.is_empty() {
            return Err(ServiceError::CartEmpty);
        }

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let product = ProductEntity::find_by_id(item.product_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::ItemUnavailable(format!(
                        "Product {} is no longer available",
                        item.product_id
                    ))
                })?;

            if !product.is_active {
                return Err(ServiceError::ItemUnavailable(format!(
                    "Product {} is not available",
                    product.name
                )));
            }

            if product.stock_quantity < item.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Requested {} of {} but only {} available",
                    item.quantity, product.name, product.stock_quantity
                )));
            }

            lines.push((item, product));
        }

        Ok(lines)
    }

    async fn load_owned_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartItemModel, ServiceError> {
        let item = CartItemEntity::find_by_id(item_id).one(&*self.db).await?;

        // A foreign user's item is indistinguishable from a missing one.
        match item {
            Some(item) if item.user_id == user_id => Ok(item),
            _ => Err(ServiceError::NotFound(format!(
                "Cart item {} not found",
                item_id
            ))),
        }
    }

    async fn load_sellable_product(&self, product_id: Uuid) -> Result<ProductModel, ServiceError> {
        let product = ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if !product.is_active {
            return Err(ServiceError::ItemUnavailable(format!(
                "Product {} is not available",
                product.name
            )));
        }

        Ok(product)
    }

    fn check_quantity(&self, product: &ProductModel, quantity: i32) -> Result<(), ServiceError> {
        if quantity > self.max_quantity_per_item {
            return Err(ServiceError::ValidationFailed(format!(
                "Quantity {} exceeds the per-item limit of {}",
                quantity, self.max_quantity_per_item
            )));
        }

        if quantity > product.stock_quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Requested {} of {} but only {} available",
                quantity, product.name, product.stock_quantity
            )));
        }

        Ok(())
    }
}
