use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    config::GatewayConfig, entities::PaymentIntentStatus, errors::ServiceError,
};

/// Gateway-side view of a payment intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayIntent {
    pub id: String,
    pub status: PaymentIntentStatus,
    pub amount: Decimal,
    pub currency: String,
}

/// Gateway-side view of a refund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub amount: Decimal,
}

/// The external payment gateway, as seen by the payment orchestrator.
///
/// Every call can fail two ways: `GatewayError` (the gateway answered and
/// said no) and `GatewayTimeout` (no answer — the outcome is unknown and
/// callers must re-query via `fetch_intent` before retrying a charge).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        order_ref: &str,
    ) -> Result<GatewayIntent, ServiceError>;

    async fn confirm_intent(
        &self,
        gateway_intent_id: &str,
        payment_method_token: &str,
    ) -> Result<GatewayIntent, ServiceError>;

    async fn refund(
        &self,
        gateway_intent_id: &str,
        amount: Decimal,
        reason: Option<String>,
    ) -> Result<GatewayRefund, ServiceError>;

    async fn fetch_intent(&self, gateway_intent_id: &str) -> Result<GatewayIntent, ServiceError>;
}

#[derive(Serialize)]
struct CreateIntentBody<'a> {
    amount: Decimal,
    currency: &'a str,
    order_ref: &'a str,
}

#[derive(Serialize)]
struct ConfirmBody<'a> {
    payment_method: &'a str,
}

#[derive(Serialize)]
struct RefundBody<'a> {
    payment_intent: &'a str,
    amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// HTTP client for the payment gateway's REST API.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, ServiceError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!(
            "Bearer {}",
            config.api_key
        ))
        .map_err(|e| ServiceError::InternalError(format!("Invalid gateway API key: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("Failed to build gateway client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn map_transport_error(err: reqwest::Error) -> ServiceError {
        if err.is_timeout() {
            ServiceError::GatewayTimeout(err.to_string())
        } else {
            ServiceError::GatewayError(err.to_string())
        }
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::GatewayError(format!(
                "Gateway responded {}: {}",
                status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("Malformed gateway response: {}", e)))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self), fields(order_ref = %order_ref, amount = %amount))]
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        order_ref: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .json(&CreateIntentBody {
                amount,
                currency,
                order_ref,
            })
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        Self::parse_response(response).await
    }

    #[instrument(skip(self, payment_method_token), fields(gateway_intent_id = %gateway_intent_id))]
    async fn confirm_intent(
        &self,
        gateway_intent_id: &str,
        payment_method_token: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        let response = self
            .client
            .post(format!(
                "{}/v1/payment_intents/{}/confirm",
                self.base_url, gateway_intent_id
            ))
            .json(&ConfirmBody {
                payment_method: payment_method_token,
            })
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        Self::parse_response(response).await
    }

    #[instrument(skip(self), fields(gateway_intent_id = %gateway_intent_id, amount = %amount))]
    async fn refund(
        &self,
        gateway_intent_id: &str,
        amount: Decimal,
        reason: Option<String>,
    ) -> Result<GatewayRefund, ServiceError> {
        let response = self
            .client
            .post(format!("{}/v1/refunds", self.base_url))
            .json(&RefundBody {
                payment_intent: gateway_intent_id,
                amount,
                reason,
            })
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        Self::parse_response(response).await
    }

    #[instrument(skip(self), fields(gateway_intent_id = %gateway_intent_id))]
    async fn fetch_intent(&self, gateway_intent_id: &str) -> Result<GatewayIntent, ServiceError> {
        let response = self
            .client
            .get(format!(
                "{}/v1/payment_intents/{}",
                self.base_url, gateway_intent_id
            ))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        Self::parse_response(response).await
    }
}
