use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{order::Model as OrderModel, payment_intent::Model as PaymentIntentModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        orders::{Address, CheckoutData, OrderService},
        payments::PaymentService,
    },
};

/// Validated checkout request from the request layer.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub shipping_address: Address,
    pub billing_address: Address,
    pub payment_method: crate::entities::PaymentMethod,
    pub notes: Option<String>,
    pub payment_metadata: Option<serde_json::Value>,
}

/// Outcome of a checkout.
///
/// A payment-intent failure does not fail the checkout: the order stays
/// pending awaiting a payment retry, and the failure is surfaced in
/// `payment_error` for the caller to render.
#[derive(Debug, Serialize)]
pub struct CheckoutOutcome {
    pub order: OrderModel,
    pub payment_intent: Option<PaymentIntentModel>,
    pub payment_error: Option<ServiceError>,
}

/// The checkout façade: the single entry point that sequences cart
/// validation, stock reservation, order creation, payment-intent creation,
/// and best-effort notifications.
#[derive(Clone)]
pub struct CheckoutService {
    orders: Arc<OrderService>,
    payments: Arc<PaymentService>,
    event_sender: EventSender,
}

impl CheckoutService {
    pub fn new(
        orders: Arc<OrderService>,
        payments: Arc<PaymentService>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            orders,
            payments,
            event_sender,
        }
    }

    /// Runs the combined "create order + optionally create payment intent"
    /// flow.
    ///
    /// Order creation (which validates the cart and reserves stock) is the
    /// only step that can fail the checkout. Everything after it degrades:
    /// an intent failure is reported in the outcome, and notification side
    /// effects are logged and swallowed.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn checkout(
        &self,
        user_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let payment_method = request.payment_method;

        let order = self
            .orders
            .create_order(
                user_id,
                CheckoutData {
                    shipping_address: request.shipping_address,
                    billing_address: request.billing_address,
                    payment_method,
                    notes: request.notes,
                },
            )
            .await?;

        let (payment_intent, payment_error) = if payment_method.requires_upfront_intent() {
            match self
                .payments
                .create_intent(order.id, request.payment_metadata)
                .await
            {
                Ok(intent) => (Some(intent), None),
                Err(err) => {
                    // The order is NOT rolled back: a pending unpaid order
                    // is valid state awaiting a payment retry.
                    warn!(
                        order_id = %order.id,
                        error = %err,
                        "Payment intent creation failed; order left pending"
                    );
                    (None, Some(err))
                }
            }
        } else {
            (None, None)
        };

        self.event_sender
            .send_or_log(Event::CheckoutCompleted {
                user_id,
                order_id: order.id,
            })
            .await;

        info!(
            order_id = %order.id,
            user_id = %user_id,
            with_intent = payment_intent.is_some(),
            "Checkout completed"
        );

        Ok(CheckoutOutcome {
            order,
            payment_intent,
            payment_error,
        })
    }
}
