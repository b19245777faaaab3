use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        order::{OrderStatus, PaymentStatus},
        payment_intent::{
            self, Entity as PaymentIntentEntity, Model as PaymentIntentModel, PaymentIntentStatus,
        },
        refund::{self, Entity as RefundEntity, Model as RefundModel},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{gateway::PaymentGateway, orders::OrderService},
};

/// Settlement outcome reported by the gateway, either synchronously from a
/// confirm call or asynchronously from a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Succeeded,
    Failed,
}

/// What applying a settlement did. `Ignored` covers every transition that
/// is not an exact forward path — webhook callers log it and acknowledge.
#[derive(Debug)]
pub enum SettlementResult {
    Applied,
    Ignored(String),
}

/// The payment orchestrator.
///
/// Owns the payment-intent lifecycle (create, confirm, settle, refund) for
/// exactly one intent per order, and is the only writer of the order's
/// `payment_status` column.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<OrderService>,
    currency: String,
    partial_refund_marks_refunded: bool,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<OrderService>,
        currency: String,
        partial_refund_marks_refunded: bool,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            orders,
            currency,
            partial_refund_marks_refunded,
        }
    }

    /// Creates (or re-issues) the payment intent for an order.
    ///
    /// Rejected with `InvalidState` when the order is already paid or
    /// cancelled. An existing intent still awaiting action is returned
    /// as-is so a payment retry does not mint a second intent; a failed
    /// one is re-issued against the gateway and updated in place, keeping
    /// the intent 1:1 with its order.
    #[instrument(skip(self, metadata), fields(order_id = %order_id))]
    pub async fn create_intent(
        &self,
        order_id: Uuid,
        metadata: Option<serde_json::Value>,
    ) -> Result<PaymentIntentModel, ServiceError> {
        let order = self.orders.get_order_by_id(order_id).await?;

        if order.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::InvalidState(format!(
                "Order {} is already paid",
                order_id
            )));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::InvalidState(format!(
                "Order {} is cancelled",
                order_id
            )));
        }

        if let Some(existing) = self.find_intent_by_order(order_id).await? {
            match existing.status {
                PaymentIntentStatus::RequiresAction => {
                    debug!(order_id = %order_id, "Reusing pending payment intent");
                    return Ok(existing);
                }
                PaymentIntentStatus::Succeeded => {
                    // Settled intent on an unpaid order should not happen;
                    // refuse rather than mint a duplicate.
                    return Err(ServiceError::AlreadyExists(format!(
                        "Order {} already has a settled payment intent",
                        order_id
                    )));
                }
                PaymentIntentStatus::Failed => {
                    let gateway_intent = self
                        .gateway
                        .create_intent(order.total_amount, &self.currency, &order.order_number)
                        .await?;

                    let mut active: payment_intent::ActiveModel = existing.into();
                    active.gateway_intent_id = Set(gateway_intent.id);
                    active.amount = Set(order.total_amount);
                    active.currency = Set(self.currency.clone());
                    active.status = Set(gateway_intent.status);
                    active.metadata = Set(metadata);
                    active.updated_at = Set(Some(Utc::now()));
                    let updated = active.update(&*self.db).await?;

                    info!(order_id = %order_id, "Re-issued failed payment intent");
                    return Ok(updated);
                }
            }
        }

        let gateway_intent = self
            .gateway
            .create_intent(order.total_amount, &self.currency, &order.order_number)
            .await?;

        let intent_id = Uuid::new_v4();
        let now = Utc::now();
        let intent = payment_intent::ActiveModel {
            id: Set(intent_id),
            order_id: Set(order_id),
            gateway_intent_id: Set(gateway_intent.id),
            amount: Set(order.total_amount),
            currency: Set(self.currency.clone()),
            status: Set(gateway_intent.status),
            metadata: Set(metadata),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };
        let intent = intent.insert(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                order_id,
                intent_id,
            })
            .await;

        info!(order_id = %order_id, intent_id = %intent_id, "Payment intent created");
        Ok(intent)
    }

    /// Confirms an intent with the gateway using the shopper's payment
    /// method token.
    ///
    /// A synchronously settled confirm applies the settlement immediately;
    /// the later webhook replay then no-ops. A `GatewayTimeout` means the
    /// outcome is unknown — call [`reconcile_intent`] before retrying.
    ///
    /// [`reconcile_intent`]: PaymentService::reconcile_intent
    #[instrument(skip(self, payment_method_token), fields(intent_id = %intent_id))]
    pub async fn confirm(
        &self,
        intent_id: Uuid,
        payment_method_token: &str,
    ) -> Result<PaymentIntentModel, ServiceError> {
        let intent = self.load_intent(intent_id).await?;

        if intent.status == PaymentIntentStatus::Succeeded {
            debug!(intent_id = %intent_id, "Confirm on settled intent is a no-op");
            return Ok(intent);
        }

        let gateway_intent = self
            .gateway
            .confirm_intent(&intent.gateway_intent_id, payment_method_token)
            .await?;

        self.absorb_gateway_state(&intent, gateway_intent.status).await?;
        self.load_intent(intent_id).await
    }

    /// Re-reads the gateway's view of an intent and applies it locally.
    ///
    /// This is the recovery path after a `GatewayTimeout`: the caller must
    /// learn the true outcome before retrying, or risk a double charge.
    #[instrument(skip(self), fields(intent_id = %intent_id))]
    pub async fn reconcile_intent(
        &self,
        intent_id: Uuid,
    ) -> Result<PaymentIntentModel, ServiceError> {
        let intent = self.load_intent(intent_id).await?;
        let gateway_intent = self.gateway.fetch_intent(&intent.gateway_intent_id).await?;

        self.absorb_gateway_state(&intent, gateway_intent.status).await?;
        self.load_intent(intent_id).await
    }

    /// Refunds a paid order, fully (no amount) or partially.
    ///
    /// The refundable balance is the captured amount minus all prior
    /// refunds. `payment_status` moves to refunded when the balance reaches
    /// zero — or on any refund if `partial_refund_marks_refunded` is
    /// configured. A second full refund fails with `InvalidState` because
    /// the order is no longer paid.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn refund(
        &self,
        order_id: Uuid,
        amount: Option<Decimal>,
        reason: Option<String>,
    ) -> Result<RefundModel, ServiceError> {
        let order = self.orders.get_order_by_id(order_id).await?;

        if order.payment_status != PaymentStatus::Paid {
            return Err(ServiceError::InvalidState(format!(
                "Order {} is not paid (payment status: {})",
                order_id,
                order.payment_status.as_str()
            )));
        }

        let intent = self
            .find_intent_by_order(order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} has no payment intent", order_id))
            })?;

        let captured = intent.amount;
        let refunded_so_far = self.refunded_total(order_id).await?;
        let remaining = remaining_refundable(captured, refunded_so_far);

        let amount = amount.unwrap_or(remaining);
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationFailed(
                "Refund amount must be positive".to_string(),
            ));
        }
        if amount > remaining {
            return Err(ServiceError::ValidationFailed(format!(
                "Refund of {} exceeds the refundable balance of {}",
                amount, remaining
            )));
        }

        let gateway_refund = self
            .gateway
            .refund(&intent.gateway_intent_id, amount, reason.clone())
            .await?;

        let is_full = refunded_so_far + amount == captured;
        let now = Utc::now();
        let refund = refund::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            payment_intent_id: Set(intent.id),
            gateway_refund_id: Set(gateway_refund.id),
            amount: Set(amount),
            reason: Set(reason),
            is_full: Set(is_full),
            created_at: Set(now),
        };
        let refund = refund.insert(&*self.db).await?;

        if is_full || self.partial_refund_marks_refunded {
            self.orders
                .set_payment_status(order_id, PaymentStatus::Refunded)
                .await?;
        }

        self.event_sender
            .send_or_log(Event::PaymentRefunded {
                order_id,
                amount,
                full: is_full,
            })
            .await;

        info!(order_id = %order_id, amount = %amount, full = is_full, "Refund recorded");
        Ok(refund)
    }

    /// Applies a settlement outcome to the order and its intent.
    ///
    /// Only the exact forward paths change anything: payment pending→paid
    /// on success, pending→failed on failure. Every other current state is
    /// reported as `Ignored` with the reason — callers on the webhook path
    /// log it and acknowledge, never error.
    #[instrument(skip(self), fields(order_id = %order_id, outcome = ?outcome))]
    pub async fn apply_settlement(
        &self,
        order_id: Uuid,
        outcome: SettlementOutcome,
    ) -> Result<SettlementResult, ServiceError> {
        let order = self.orders.get_order_by_id(order_id).await?;

        if order.payment_status != PaymentStatus::Pending {
            return Ok(SettlementResult::Ignored(format!(
                "payment status is already {}",
                order.payment_status.as_str()
            )));
        }

        let intent = self.find_intent_by_order(order_id).await?;

        match outcome {
            SettlementOutcome::Succeeded => {
                self.orders
                    .set_payment_status(order_id, PaymentStatus::Paid)
                    .await?;
                if let Some(intent) = intent {
                    self.write_intent_status(intent, PaymentIntentStatus::Succeeded)
                        .await?;
                }

                // Paid orders move into fulfilment; tolerate a status that
                // already moved on.
                if let Err(e) = self
                    .orders
                    .advance_status(order_id, OrderStatus::Confirmed)
                    .await
                {
                    debug!(order_id = %order_id, error = %e, "Order status not advanced on settlement");
                }

                self.event_sender
                    .send_or_log(Event::PaymentCaptured {
                        order_id,
                        amount: order.total_amount,
                    })
                    .await;
            }
            SettlementOutcome::Failed => {
                self.orders
                    .set_payment_status(order_id, PaymentStatus::Failed)
                    .await?;
                if let Some(intent) = intent {
                    self.write_intent_status(intent, PaymentIntentStatus::Failed)
                        .await?;
                }

                self.event_sender
                    .send_or_log(Event::PaymentFailed(order_id))
                    .await;
            }
        }

        info!(order_id = %order_id, outcome = ?outcome, "Settlement applied");
        Ok(SettlementResult::Applied)
    }

    /// Looks up the intent for an order, if any.
    pub async fn find_intent_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<PaymentIntentModel>, ServiceError> {
        Ok(PaymentIntentEntity::find()
            .filter(payment_intent::Column::OrderId.eq(order_id))
            .one(&*self.db)
            .await?)
    }

    async fn load_intent(&self, intent_id: Uuid) -> Result<PaymentIntentModel, ServiceError> {
        PaymentIntentEntity::find_by_id(intent_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment intent {} not found", intent_id))
            })
    }

    async fn refunded_total(&self, order_id: Uuid) -> Result<Decimal, ServiceError> {
        let refunds = RefundEntity::find()
            .filter(refund::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        Ok(refunds.iter().map(|r| r.amount).sum())
    }

    /// Maps a gateway-reported intent state onto the local order/intent.
    async fn absorb_gateway_state(
        &self,
        intent: &PaymentIntentModel,
        gateway_status: PaymentIntentStatus,
    ) -> Result<(), ServiceError> {
        match gateway_status {
            PaymentIntentStatus::Succeeded => {
                if let SettlementResult::Ignored(reason) = self
                    .apply_settlement(intent.order_id, SettlementOutcome::Succeeded)
                    .await?
                {
                    debug!(order_id = %intent.order_id, reason = %reason, "Settlement ignored");
                }
            }
            PaymentIntentStatus::Failed => {
                if let SettlementResult::Ignored(reason) = self
                    .apply_settlement(intent.order_id, SettlementOutcome::Failed)
                    .await?
                {
                    debug!(order_id = %intent.order_id, reason = %reason, "Settlement ignored");
                }
            }
            PaymentIntentStatus::RequiresAction => {
                warn!(
                    intent_id = %intent.id,
                    "Gateway still reports requires_action; no state change"
                );
            }
        }
        Ok(())
    }

    async fn write_intent_status(
        &self,
        intent: PaymentIntentModel,
        status: PaymentIntentStatus,
    ) -> Result<(), ServiceError> {
        if intent.status == status {
            return Ok(());
        }
        let mut active: payment_intent::ActiveModel = intent.into();
        active.status = Set(status);
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;
        Ok(())
    }
}

/// Refundable balance: captured amount minus everything already refunded,
/// floored at zero.
fn remaining_refundable(captured: Decimal, refunded: Decimal) -> Decimal {
    (captured - refunded).max(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    use crate::{
        db,
        entities::order::{self, OrderStatus, PaymentMethod},
        services::{
            carts::CartService,
            gateway::{GatewayIntent, MockPaymentGateway},
            inventory::InventoryService,
        },
    };

    #[test]
    fn refundable_balance_tracks_prior_refunds() {
        assert_eq!(remaining_refundable(dec!(100.00), dec!(0)), dec!(100.00));
        assert_eq!(remaining_refundable(dec!(100.00), dec!(30.00)), dec!(70.00));
        assert_eq!(remaining_refundable(dec!(100.00), dec!(100.00)), dec!(0.00));
    }

    #[test]
    fn refundable_balance_never_negative() {
        assert_eq!(remaining_refundable(dec!(50.00), dec!(60.00)), Decimal::ZERO);
    }

    async fn service_with(
        gateway: MockPaymentGateway,
    ) -> (PaymentService, Arc<DatabaseConnection>) {
        let pool = db::establish_connection("sqlite::memory:").await.unwrap();
        db::create_schema(&pool).await.unwrap();
        let db = Arc::new(pool);

        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let sender = EventSender::new(tx);

        let carts = Arc::new(CartService::new(db.clone(), sender.clone(), 100));
        let inventory = Arc::new(InventoryService::new(db.clone(), sender.clone(), 5));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            sender.clone(),
            carts,
            inventory,
            "USD".to_string(),
        ));
        let payments = PaymentService::new(
            db.clone(),
            sender,
            Arc::new(gateway),
            orders,
            "USD".to_string(),
            false,
        );
        (payments, db)
    }

    async fn seed_order(
        db: &DatabaseConnection,
        total: Decimal,
        payment_status: PaymentStatus,
    ) -> Uuid {
        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let address = serde_json::json!({"city": "Testville"});
        let model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!("ORD-{}", &order_id.simple().to_string()[..8])),
            user_id: Set(Uuid::new_v4()),
            status: Set(OrderStatus::Pending),
            payment_status: Set(payment_status),
            payment_method: Set(PaymentMethod::CreditCard),
            total_amount: Set(total),
            currency: Set("USD".to_string()),
            shipping_address: Set(address.clone()),
            billing_address: Set(address),
            notes: Set(None),
            cancellation_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };
        model.insert(db).await.unwrap();
        order_id
    }

    #[tokio::test]
    async fn create_intent_forwards_order_total_and_currency() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_intent()
            .withf(|amount, currency, _| *amount == dec!(59.99) && currency == "USD")
            .times(1)
            .returning(|amount, currency, _| {
                Ok(GatewayIntent {
                    id: "pi_unit".to_string(),
                    status: PaymentIntentStatus::RequiresAction,
                    amount,
                    currency: currency.to_string(),
                })
            });

        let (payments, db) = service_with(gateway).await;
        let order_id = seed_order(&db, dec!(59.99), PaymentStatus::Pending).await;

        let intent = payments.create_intent(order_id, None).await.unwrap();
        assert_eq!(intent.amount, dec!(59.99));
        assert_eq!(intent.gateway_intent_id, "pi_unit");
    }

    #[tokio::test]
    async fn create_intent_on_paid_order_never_reaches_the_gateway() {
        // No expectation set: any gateway call would panic the mock.
        let gateway = MockPaymentGateway::new();
        let (payments, db) = service_with(gateway).await;
        let order_id = seed_order(&db, dec!(10.00), PaymentStatus::Paid).await;

        let result = payments.create_intent(order_id, None).await;
        assert!(matches!(result, Err(ServiceError::InvalidState(_))));
    }

    #[tokio::test]
    async fn gateway_timeout_propagates_as_unknown_outcome() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_intent()
            .times(1)
            .returning(|_, _, _| Err(ServiceError::GatewayTimeout("deadline".to_string())));

        let (payments, db) = service_with(gateway).await;
        let order_id = seed_order(&db, dec!(20.00), PaymentStatus::Pending).await;

        let result = payments.create_intent(order_id, None).await;
        match result {
            Err(err @ ServiceError::GatewayTimeout(_)) => assert!(err.is_retryable()),
            other => panic!("expected GatewayTimeout, got {:?}", other.map(|i| i.id)),
        }

        // Nothing was persisted for the unknown outcome.
        assert!(payments.find_intent_by_order(order_id).await.unwrap().is_none());
    }
}
