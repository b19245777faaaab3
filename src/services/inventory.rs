use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// The inventory ledger.
///
/// Owns every product's available stock count. Reservations are atomic
/// per product: the decrement is a single conditional UPDATE guarded by
/// `stock_quantity >= qty`, so concurrent reservations against the same
/// product serialize on the row and the counter can never go negative.
/// Reservations against different products proceed in parallel.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    low_stock_threshold: i32,
}

impl InventoryService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        low_stock_threshold: i32,
    ) -> Self {
        Self {
            db,
            event_sender,
            low_stock_threshold,
        }
    }

    /// Reserves `quantity` units of a product by decrementing its stock.
    ///
    /// Returns `NotFound` for a missing product, `ItemUnavailable` for an
    /// inactive one, and `InsufficientStock` when fewer than `quantity`
    /// units remain. The caller owns the compensating
    /// [`release`](InventoryService::release) if the surrounding operation
    /// later fails.
    #[instrument(skip(self), fields(product_id = %product_id, quantity = quantity))]
    pub async fn reserve(&self, product_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationFailed(
                "Reservation quantity must be positive".to_string(),
            ));
        }

        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::IsActive.eq(true))
            .filter(product::Column::StockQuantity.gte(quantity))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            // The guarded update matched nothing; re-read to tell why.
            return Err(self.classify_reserve_failure(product_id, quantity).await?);
        }

        self.event_sender
            .send_or_log(Event::InventoryReserved {
                product_id,
                quantity,
            })
            .await;

        // Best-effort low-stock signal; a racing reservation may re-emit it.
        if let Some(remaining) = self.stock_after_mutation(product_id).await {
            if remaining <= self.low_stock_threshold {
                self.event_sender
                    .send_or_log(Event::InventoryLow {
                        product_id,
                        available: remaining,
                        threshold: self.low_stock_threshold,
                    })
                    .await;
            }
        }

        info!(product_id = %product_id, quantity = quantity, "Reserved stock");
        Ok(())
    }

    /// Reserves every line or none of them.
    ///
    /// On the first failure all reservations already taken by this call are
    /// released before the specific error is returned, so a failed
    /// multi-item reservation never leaves stock dangling.
    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub async fn reserve_all(&self, lines: &[(Uuid, i32)]) -> Result<(), ServiceError> {
        let mut reserved: Vec<(Uuid, i32)> = Vec::with_capacity(lines.len());

        for &(product_id, quantity) in lines {
            match self.reserve(product_id, quantity).await {
                Ok(()) => reserved.push((product_id, quantity)),
                Err(err) => {
                    self.release_all(&reserved).await;
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    /// Returns `quantity` units to a product's stock (compensating action).
    #[instrument(skip(self), fields(product_id = %product_id, quantity = quantity))]
    pub async fn release(&self, product_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationFailed(
                "Release quantity must be positive".to_string(),
            ));
        }

        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).add(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(product::Column::Id.eq(product_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }

        self.event_sender
            .send_or_log(Event::InventoryReleased {
                product_id,
                quantity,
            })
            .await;

        info!(product_id = %product_id, quantity = quantity, "Released stock");
        Ok(())
    }

    /// Releases a batch of reservations, logging rather than failing on
    /// individual errors — used on compensation paths where the original
    /// error must not be masked.
    pub async fn release_all(&self, lines: &[(Uuid, i32)]) {
        for &(product_id, quantity) in lines {
            if let Err(err) = self.release(product_id, quantity).await {
                warn!(
                    product_id = %product_id,
                    quantity = quantity,
                    error = %err,
                    "Failed to release reservation during compensation"
                );
            }
        }
    }

    /// Non-locking availability read for cart display. Best-effort
    /// freshness; the reservation at checkout is authoritative.
    pub async fn available(&self, product_id: Uuid) -> Result<i32, ServiceError> {
        let product = ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        Ok(product.stock_quantity)
    }

    async fn classify_reserve_failure(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<ServiceError, ServiceError> {
        let product = ProductEntity::find_by_id(product_id).one(&*self.db).await?;

        Ok(match product {
            None => ServiceError::NotFound(format!("Product {} not found", product_id)),
            Some(p) if !p.is_active => {
                ServiceError::ItemUnavailable(format!("Product {} is not available", p.name))
            }
            Some(p) => ServiceError::InsufficientStock(format!(
                "Requested {} of {} but only {} available",
                quantity, p.name, p.stock_quantity
            )),
        })
    }

    async fn stock_after_mutation(&self, product_id: Uuid) -> Option<i32> {
        match ProductEntity::find_by_id(product_id).one(&*self.db).await {
            Ok(Some(p)) => Some(p.stock_quantity),
            Ok(None) => None,
            Err(e) => {
                warn!(product_id = %product_id, error = %e, "Failed to read stock after mutation");
                None
            }
        }
    }
}
