use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::WebhookConfig,
    errors::ServiceError,
    services::payments::{PaymentService, SettlementOutcome, SettlementResult},
};

type HmacSha256 = Hmac<Sha256>;

/// Inbound gateway event, parsed only after the signature verifies.
#[derive(Debug, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: GatewayEventData,
}

#[derive(Debug, Deserialize)]
pub struct GatewayEventData {
    pub order_id: Uuid,
    pub gateway_intent_id: Option<String>,
}

/// How a webhook was handled. Everything except a signature failure is an
/// acknowledgement — gateways retry on error responses, so processing
/// problems must not bounce.
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookAck {
    /// Settlement applied.
    Processed,
    /// Event id seen before; no side effects.
    Duplicate,
    /// Verified but not applied (unknown type, malformed payload, or a
    /// state transition that is not an exact forward path). Logged.
    Ignored(String),
}

/// Verifies the gateway's HMAC-SHA256 signature over `"{timestamp}.{body}"`.
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    pub fn verify(&self, timestamp: &str, body: &[u8], signature_hex: &str) -> bool {
        let Ok(expected) = hex::decode(signature_hex) else {
            return false;
        };

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);

        // Constant-time comparison.
        mac.verify_slice(&expected).is_ok()
    }

    /// Produces the signature for a payload; the counterpart of `verify`,
    /// used by tests and outbound tooling.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Short-lived set of processed gateway event ids.
///
/// Entries expire after the configured TTL; expired entries are pruned on
/// insert once the map reaches capacity. Lookups are lock-free reads and
/// never block indefinitely.
pub struct DedupWindow {
    seen: DashMap<String, Instant>,
    capacity: usize,
    ttl: Duration,
}

impl DedupWindow {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Records `event_id` if unseen. Returns false for a replay.
    pub fn insert(&self, event_id: &str) -> bool {
        if self.seen.len() >= self.capacity {
            self.prune();
        }

        match self.seen.entry(event_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if entry.get().elapsed() > self.ttl {
                    entry.insert(Instant::now());
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Instant::now());
                true
            }
        }
    }

    /// Forgets an event id, re-opening it for a later retry. Used when
    /// processing failed after the id was claimed.
    pub fn forget(&self, event_id: &str) {
        self.seen.remove(event_id);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn prune(&self) {
        let ttl = self.ttl;
        self.seen.retain(|_, seen_at| seen_at.elapsed() <= ttl);
    }
}

/// Applies asynchronous payment-gateway events to the matching order.
pub struct WebhookProcessor {
    payments: Arc<PaymentService>,
    verifier: SignatureVerifier,
    dedup: DedupWindow,
}

impl WebhookProcessor {
    pub fn new(payments: Arc<PaymentService>, config: &WebhookConfig) -> Self {
        Self {
            payments,
            verifier: SignatureVerifier::new(config.signing_secret.clone()),
            dedup: DedupWindow::new(
                config.dedup_capacity,
                Duration::from_secs(config.dedup_ttl_secs),
            ),
        }
    }

    /// Handles one raw webhook delivery.
    ///
    /// Signature verification comes before any payload parsing; a missing
    /// or bad signature is the only rejection (`SignatureInvalid`, no side
    /// effects). Every verified delivery is acknowledged: duplicates no-op,
    /// unknown or out-of-order events are logged and ignored, and a
    /// settlement that fails on infrastructure is recorded for follow-up
    /// while its event id is re-opened for the gateway's next retry.
    #[instrument(skip(self, raw_body, timestamp, signature))]
    pub async fn handle_event(
        &self,
        raw_body: &[u8],
        timestamp: &str,
        signature: Option<&str>,
    ) -> Result<WebhookAck, ServiceError> {
        let signature = signature.ok_or(ServiceError::SignatureInvalid)?;
        if !self.verifier.verify(timestamp, raw_body, signature) {
            return Err(ServiceError::SignatureInvalid);
        }

        let event: GatewayEvent = match serde_json::from_slice(raw_body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Verified webhook payload failed to parse");
                return Ok(WebhookAck::Ignored("malformed payload".to_string()));
            }
        };

        let outcome = match event.event_type.as_str() {
            "payment_succeeded" => SettlementOutcome::Succeeded,
            "payment_failed" => SettlementOutcome::Failed,
            other => {
                info!(event_id = %event.id, event_type = %other, "Unhandled webhook event type");
                self.dedup.insert(&event.id);
                return Ok(WebhookAck::Ignored(format!("unhandled event type {}", other)));
            }
        };

        // Claim the id before applying so a concurrent replay of the same
        // event observes it as a duplicate.
        if !self.dedup.insert(&event.id) {
            info!(event_id = %event.id, "Duplicate webhook event");
            return Ok(WebhookAck::Duplicate);
        }

        match self
            .payments
            .apply_settlement(event.data.order_id, outcome)
            .await
        {
            Ok(SettlementResult::Applied) => {
                info!(event_id = %event.id, order_id = %event.data.order_id, "Webhook settlement applied");
                Ok(WebhookAck::Processed)
            }
            Ok(SettlementResult::Ignored(reason)) => {
                info!(
                    event_id = %event.id,
                    order_id = %event.data.order_id,
                    reason = %reason,
                    "Webhook settlement ignored"
                );
                Ok(WebhookAck::Ignored(reason))
            }
            Err(err) => {
                // Acknowledge anyway — erroring makes the gateway hammer us
                // with retries. The id is re-opened so a later redelivery
                // can succeed once the underlying trouble clears.
                self.dedup.forget(&event.id);
                error!(
                    event_id = %event.id,
                    order_id = %event.data.order_id,
                    error = %err,
                    "Webhook settlement failed; acknowledged for manual follow-up"
                );
                Ok(WebhookAck::Ignored(format!(
                    "settlement failed: {}",
                    err.kind()
                )))
            }
        }
    }
}
