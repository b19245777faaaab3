use std::time::Duration;

use sea_orm::sea_query::{Alias, Index};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::entities;
use crate::errors::ServiceError;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            ..Default::default()
        }
    }
}

/// Establishes a connection pool to the database.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };

    establish_connection_with_config(&config).await
}

/// Establishes a connection pool with custom pool settings.
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    // An in-memory SQLite database exists per connection; a pool of more
    // than one would hand out empty databases.
    let max_connections = if config.url.starts_with("sqlite::memory:") {
        1
    } else {
        config.max_connections
    };

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(max_connections)
        .min_connections(config.min_connections.min(max_connections))
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .sqlx_logging(false);

    let pool = Database::connect(opt).await?;

    info!(max_connections, "Database connection pool established");
    Ok(pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Creates the checkout schema from the entity definitions.
///
/// Intended for SQLite development/test databases; production deployments
/// run managed migrations out of band.
pub async fn create_schema(db: &DbPool) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut tables = vec![
        schema.create_table_from_entity(entities::Product),
        schema.create_table_from_entity(entities::CartItem),
        schema.create_table_from_entity(entities::Order),
        schema.create_table_from_entity(entities::OrderItem),
        schema.create_table_from_entity(entities::PaymentIntent),
        schema.create_table_from_entity(entities::Refund),
    ];
    for stmt in &mut tables {
        stmt.if_not_exists();
        db.execute(backend.build(&*stmt)).await?;
    }

    // One cart line per (user, product)
    let cart_line_unique = Index::create()
        .name("idx_cart_items_user_product")
        .table(Alias::new("cart_items"))
        .col(Alias::new("user_id"))
        .col(Alias::new("product_id"))
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&cart_line_unique)).await?;

    info!("Checkout schema ready");
    Ok(())
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    pool.ping().await?;
    Ok(())
}

/// Closes the database connection pool
pub async fn close_pool(pool: DbPool) -> Result<(), ServiceError> {
    info!("Closing database connection pool");
    pool.close().await?;
    Ok(())
}
