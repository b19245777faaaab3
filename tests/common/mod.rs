#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use checkout_api::{
    config::AppConfig,
    db,
    entities::{product, PaymentIntentStatus, PaymentMethod},
    errors::ServiceError,
    events::{self, EventSender},
    services::{
        checkout::CheckoutRequest,
        gateway::{GatewayIntent, GatewayRefund, PaymentGateway},
        orders::Address,
        AppServices,
    },
    webhooks::{SignatureVerifier, WebhookProcessor},
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Scriptable in-process stand-in for the payment gateway.
///
/// Succeeds by default; individual failure modes are flipped per test.
pub struct TestGateway {
    pub fail_create: AtomicBool,
    pub confirm_fails_payment: AtomicBool,
    pub create_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
}

impl TestGateway {
    pub fn new() -> Self {
        Self {
            fail_create: AtomicBool::new(false),
            confirm_fails_payment: AtomicBool::new(false),
            create_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PaymentGateway for TestGateway {
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        _order_ref: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError("gateway unavailable".to_string()));
        }
        Ok(GatewayIntent {
            id: format!("pi_{}", Uuid::new_v4().simple()),
            status: PaymentIntentStatus::RequiresAction,
            amount,
            currency: currency.to_string(),
        })
    }

    async fn confirm_intent(
        &self,
        gateway_intent_id: &str,
        _payment_method_token: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        let status = if self.confirm_fails_payment.load(Ordering::SeqCst) {
            PaymentIntentStatus::Failed
        } else {
            PaymentIntentStatus::Succeeded
        };
        Ok(GatewayIntent {
            id: gateway_intent_id.to_string(),
            status,
            amount: Decimal::ZERO,
            currency: "USD".to_string(),
        })
    }

    async fn refund(
        &self,
        _gateway_intent_id: &str,
        amount: Decimal,
        _reason: Option<String>,
    ) -> Result<GatewayRefund, ServiceError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayRefund {
            id: format!("re_{}", Uuid::new_v4().simple()),
            amount,
        })
    }

    async fn fetch_intent(&self, gateway_intent_id: &str) -> Result<GatewayIntent, ServiceError> {
        Ok(GatewayIntent {
            id: gateway_intent_id.to_string(),
            status: PaymentIntentStatus::Succeeded,
            amount: Decimal::ZERO,
            currency: "USD".to_string(),
        })
    }
}

/// Test harness: in-memory SQLite with the schema created from the
/// entities, the full service graph, and a scriptable gateway.
pub struct TestHarness {
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub config: AppConfig,
    pub event_sender: EventSender,
    pub services: AppServices,
    pub gateway: Arc<TestGateway>,
    pub webhooks: WebhookProcessor,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestHarness {
    pub async fn new() -> Self {
        let config = AppConfig::for_tests("sqlite::memory:");

        let pool = db::establish_connection_from_app_config(&config)
            .await
            .expect("failed to create test database");
        db::create_schema(&pool).await.expect("failed to create schema");
        let db = Arc::new(pool);

        let (tx, rx) = mpsc::channel(64);
        let event_sender = EventSender::new(tx);
        let event_task = tokio::spawn(events::process_events(rx));

        let gateway = Arc::new(TestGateway::new());
        let services = AppServices::build(
            db.clone(),
            &config,
            event_sender.clone(),
            gateway.clone(),
        );
        let webhooks = WebhookProcessor::new(services.payments.clone(), &config.webhook);

        Self {
            db,
            config,
            event_sender,
            services,
            gateway,
            webhooks,
            _event_task: event_task,
        }
    }

    /// Inserts an active product and returns its id.
    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> Uuid {
        self.seed_product_with(name, price, stock, true).await
    }

    pub async fn seed_product_with(
        &self,
        name: &str,
        price: Decimal,
        stock: i32,
        is_active: bool,
    ) -> Uuid {
        let product_id = Uuid::new_v4();
        let model = product::ActiveModel {
            id: Set(product_id),
            name: Set(name.to_string()),
            sku: Set(format!("SKU-{}", &product_id.simple().to_string()[..8])),
            unit_price: Set(price),
            stock_quantity: Set(stock),
            is_active: Set(is_active),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        model
            .insert(&*self.db)
            .await
            .expect("failed to seed product");
        product_id
    }

    /// Current stock for a product, read straight from the table.
    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        self.services
            .inventory
            .available(product_id)
            .await
            .expect("product must exist")
    }

    /// Signs a webhook body the way the gateway would.
    pub fn sign_webhook(&self, timestamp: &str, body: &[u8]) -> String {
        SignatureVerifier::new(self.config.webhook.signing_secret.clone()).sign(timestamp, body)
    }
}

pub fn test_address() -> Address {
    Address {
        full_name: "Jordan Avery".to_string(),
        line1: "42 Harbor Lane".to_string(),
        line2: None,
        city: "Portsmouth".to_string(),
        postal_code: "03801".to_string(),
        country_code: "US".to_string(),
        phone: None,
    }
}

pub fn checkout_request(payment_method: PaymentMethod) -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: test_address(),
        billing_address: test_address(),
        payment_method,
        notes: None,
        payment_metadata: None,
    }
}
