//! Checkout core
//!
//! Turns a shopper's mutable cart into an immutable, paid order while
//! guaranteeing that no item is sold past its available stock and that
//! payment state stays consistent with order state. The request layer
//! (routing, auth, schema validation) lives outside this crate and talks
//! to it through [`AppState`] and the typed results in [`errors`].
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod services;
pub mod tracing;
pub mod webhooks;

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tokio::sync::mpsc;

use crate::services::gateway::HttpPaymentGateway;
use crate::webhooks::WebhookProcessor;

/// Capacity of the domain-event channel feeding best-effort consumers.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: services::AppServices,
    pub webhooks: Arc<WebhookProcessor>,
}

impl AppState {
    /// Connects to the database, wires the service graph against the real
    /// payment gateway, and spawns the background event consumer.
    pub async fn init(config: config::AppConfig) -> Result<AppState, errors::ServiceError> {
        let db = Arc::new(db::establish_connection_from_app_config(&config).await?);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let event_sender = events::EventSender::new(tx);
        tokio::spawn(events::process_events(rx));

        let gateway = Arc::new(HttpPaymentGateway::new(&config.gateway)?);
        let services =
            services::AppServices::build(db.clone(), &config, event_sender.clone(), gateway);
        let webhooks = Arc::new(WebhookProcessor::new(
            services.payments.clone(),
            &config.webhook,
        ));

        Ok(AppState {
            db,
            config,
            event_sender,
            services,
            webhooks,
        })
    }
}
