use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_MAX_QUANTITY_PER_ITEM: i32 = 100;
const DEFAULT_LOW_STOCK_THRESHOLD: i32 = 5;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_WEBHOOK_DEDUP_CAPACITY: usize = 1000;
const DEFAULT_WEBHOOK_DEDUP_TTL_SECS: u64 = 3600;
const CONFIG_DIR: &str = "config";

/// Payment gateway client configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Base URL of the gateway API
    pub base_url: String,

    /// API key presented as a bearer token
    pub api_key: String,

    /// Hard timeout for gateway calls, in seconds. A timed-out call is an
    /// unknown outcome, not a failure.
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9400".to_string(),
            api_key: String::new(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

/// Inbound webhook configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Shared secret for HMAC signature verification
    pub signing_secret: String,

    /// Maximum number of gateway event ids retained for dedup
    #[serde(default = "default_webhook_dedup_capacity")]
    pub dedup_capacity: usize,

    /// How long a processed event id stays in the dedup window
    #[serde(default = "default_webhook_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            dedup_capacity: default_webhook_dedup_capacity(),
            dedup_ttl_secs: default_webhook_dedup_ttl_secs(),
        }
    }
}

/// Refund policy knobs
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefundConfig {
    /// When true, any refund (even partial) moves the order's payment
    /// status to refunded. Default false: only a full refund does.
    #[serde(default)]
    pub partial_marks_refunded: bool,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Currency used for new payment intents
    #[validate(length(min = 3, max = 3))]
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Per-line quantity cap for cart items
    #[validate(range(min = 1))]
    #[serde(default = "default_max_quantity_per_item")]
    pub max_quantity_per_item: i32,

    /// Stock level at or below which an inventory-low event is emitted
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: i32,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub refund: RefundConfig,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_max_quantity_per_item() -> i32 {
    DEFAULT_MAX_QUANTITY_PER_ITEM
}

fn default_low_stock_threshold() -> i32 {
    DEFAULT_LOW_STOCK_THRESHOLD
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_webhook_dedup_capacity() -> usize {
    DEFAULT_WEBHOOK_DEDUP_CAPACITY
}

fn default_webhook_dedup_ttl_secs() -> u64 {
    DEFAULT_WEBHOOK_DEDUP_TTL_SECS
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

impl AppConfig {
    /// Loads configuration from `config/default.toml`, an environment
    /// overlay (`config/<env>.toml`), and `CHECKOUT_`-prefixed environment
    /// variables, in that order of precedence.
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("CHECKOUT_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let config = Config::builder()
            .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
            .add_source(
                File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false),
            )
            .add_source(Environment::with_prefix("CHECKOUT").separator("__"))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config
            .validate()
            .map_err(|e| ConfigError::Message(format!("Invalid configuration: {}", e)))?;

        info!(environment = %app_config.environment, "Configuration loaded");
        Ok(app_config)
    }

    /// Minimal configuration for tests and local tooling.
    pub fn for_tests(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            environment: "test".to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            currency: DEFAULT_CURRENCY.to_string(),
            max_quantity_per_item: DEFAULT_MAX_QUANTITY_PER_ITEM,
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            db_max_connections: 1,
            db_min_connections: 1,
            gateway: GatewayConfig {
                base_url: "http://localhost:9400".to_string(),
                api_key: "test_key".to_string(),
                timeout_secs: 1,
            },
            webhook: WebhookConfig {
                signing_secret: "test_webhook_secret".to_string(),
                ..WebhookConfig::default()
            },
            refund: RefundConfig::default(),
        }
    }
}

/// Convenience helper mirroring [`AppConfig::load`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::load()
}
