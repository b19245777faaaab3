use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Standardized error payload handed to the request layer.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Unprocessable Entity")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Machine-readable error kind (see [`ServiceError::kind`])
    pub kind: String,
    /// Whether retrying the same request might succeed
    pub retryable: bool,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

/// Error taxonomy for the checkout core.
///
/// Every operation returns a tagged kind; the request layer maps kinds to
/// transport status codes via [`ServiceError::status_code`] and never
/// inspects message text.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    /// Entity missing, or not owned by the caller.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not legal in the entity's current state (cancel a shipped
    /// order, re-pay a paid order, refund an unpaid one).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    /// Product is inactive or has been withdrawn.
    #[error("Item unavailable: {0}")]
    ItemUnavailable(String),

    #[error("Cart is empty")]
    CartEmpty,

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Business-rule rejection, distinct from transport-level schema checks.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The payment gateway rejected or failed the call.
    #[error("Gateway error: {0}")]
    GatewayError(String),

    /// The gateway call timed out. Outcome unknown — callers must re-query
    /// before retrying to avoid double charges.
    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    #[error("Webhook signature invalid")]
    SignatureInvalid,

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Machine-readable kind tag, stable across message changes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::ItemUnavailable(_) => "item_unavailable",
            Self::CartEmpty => "cart_empty",
            Self::AlreadyExists(_) => "already_exists",
            Self::ValidationFailed(_) => "validation_failed",
            Self::GatewayError(_) => "gateway_error",
            Self::GatewayTimeout(_) => "gateway_timeout",
            Self::SignatureInvalid => "signature_invalid",
            Self::EventError(_) => "event_error",
            Self::SerializationError(_) => "serialization_error",
            Self::InternalError(_) => "internal_error",
            Self::Other(_) => "internal_error",
        }
    }

    /// Whether retrying the same request might succeed. Domain rejections
    /// are final; infrastructure and gateway trouble is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_)
                | Self::GatewayError(_)
                | Self::GatewayTimeout(_)
                | Self::EventError(_)
                | Self::InternalError(_)
                | Self::Other(_)
        )
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::AlreadyExists(_) => StatusCode::CONFLICT,
            Self::InsufficientStock(_) | Self::ItemUnavailable(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::CartEmpty | Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Self::SignatureInvalid => StatusCode::BAD_REQUEST,
            Self::GatewayError(_) | Self::GatewayTimeout(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::EventError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            kind: self.kind().to_string(),
            retryable: self.is_retryable(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
