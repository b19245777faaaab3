pub mod carts;
pub mod checkout;
pub mod gateway;
pub mod inventory;
pub mod orders;
pub mod payments;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{config::AppConfig, events::EventSender};

/// Wired-up service set for the checkout core.
#[derive(Clone)]
pub struct AppServices {
    pub inventory: Arc<inventory::InventoryService>,
    pub carts: Arc<carts::CartService>,
    pub orders: Arc<orders::OrderService>,
    pub payments: Arc<payments::PaymentService>,
    pub checkout: Arc<checkout::CheckoutService>,
}

impl AppServices {
    /// Builds the service graph over a shared connection pool and event
    /// channel. The gateway is injected so tests can substitute a mock.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        event_sender: EventSender,
        gateway: Arc<dyn gateway::PaymentGateway>,
    ) -> Self {
        let inventory = Arc::new(inventory::InventoryService::new(
            db.clone(),
            event_sender.clone(),
            config.low_stock_threshold,
        ));
        let carts = Arc::new(carts::CartService::new(
            db.clone(),
            event_sender.clone(),
            config.max_quantity_per_item,
        ));
        let orders = Arc::new(orders::OrderService::new(
            db.clone(),
            event_sender.clone(),
            carts.clone(),
            inventory.clone(),
            config.currency.clone(),
        ));
        let payments = Arc::new(payments::PaymentService::new(
            db,
            event_sender.clone(),
            gateway,
            orders.clone(),
            config.currency.clone(),
            config.refund.partial_marks_refunded,
        ));
        let checkout = Arc::new(checkout::CheckoutService::new(
            orders.clone(),
            payments.clone(),
            event_sender,
        ));

        Self {
            inventory,
            carts,
            orders,
            payments,
            checkout,
        }
    }
}
