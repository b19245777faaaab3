use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::OrderStatus;

/// Domain events emitted by the checkout core.
///
/// Consumers (notification senders, realtime order-update pushers) are
/// best-effort collaborators: delivery failure never affects the outcome of
/// the operation that emitted the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartItemAdded {
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        user_id: Uuid,
        product_id: Uuid,
    },
    CartCleared(Uuid),

    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: Option<String>,
    },

    // Payment events
    PaymentIntentCreated {
        order_id: Uuid,
        intent_id: Uuid,
    },
    PaymentCaptured {
        order_id: Uuid,
        amount: Decimal,
    },
    PaymentFailed(Uuid),
    PaymentRefunded {
        order_id: Uuid,
        amount: Decimal,
        full: bool,
    },

    // Inventory events
    InventoryReserved {
        product_id: Uuid,
        quantity: i32,
    },
    InventoryReleased {
        product_id: Uuid,
        quantity: i32,
    },
    InventoryLow {
        product_id: Uuid,
        available: i32,
        threshold: i32,
    },

    // Checkout events
    CheckoutCompleted {
        user_id: Uuid,
        order_id: Uuid,
    },
}

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

    /// Sends an event, logging instead of failing when the consumer is gone.
    /// This is the path for best-effort side effects.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropped domain event");
        }
    }
}

/// Background consumer for domain events.
///
/// Spawned once at startup; downstream collaborators (email, realtime push)
/// hang off this loop so their latency and failures stay out of request
/// handling.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "Order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    order_id = %order_id,
                    old_status = old_status.as_str(),
                    new_status = new_status.as_str(),
                    "Order status changed"
                );
            }
            Event::OrderCancelled { order_id, .. } => {
                info!(order_id = %order_id, "Order cancelled");
            }
            Event::PaymentCaptured { order_id, amount } => {
                info!(order_id = %order_id, amount = %amount, "Payment captured");
            }
            Event::PaymentRefunded {
                order_id,
                amount,
                full,
            } => {
                info!(order_id = %order_id, amount = %amount, full = full, "Payment refunded");
            }
            Event::InventoryLow {
                product_id,
                available,
                threshold,
            } => {
                warn!(
                    product_id = %product_id,
                    available = available,
                    threshold = threshold,
                    "Inventory low"
                );
            }
            other => {
                debug!(event = ?other, "Domain event");
            }
        }
    }
    debug!("Event channel closed; consumer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_consumer() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        let order_id = Uuid::new_v4();
        sender.send(Event::OrderCreated(order_id)).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderCreated(id)) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        // Must not panic or error
        sender.send_or_log(Event::CartCleared(Uuid::new_v4())).await;
    }

    #[test]
    fn events_serialize() {
        let event = Event::PaymentRefunded {
            order_id: Uuid::new_v4(),
            amount: Decimal::new(1999, 2),
            full: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("PaymentRefunded"));
    }
}
