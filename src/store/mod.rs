//! SQLite persistence layer.
//!
//! Row models are plain structs with static async query methods over a
//! [`SqlitePool`], one module per table. The schema is embedded and applied
//! on connect, so a fresh database (including `:memory:` in tests) is ready
//! to use immediately.

pub mod delivery;
pub mod delivery_log;
pub mod endpoint;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

pub use delivery::{CreateDelivery, DeliveryRow};
pub use delivery_log::{AppendLog, DeliveryLogRow, EndpointStats, LogOutcome};
pub use endpoint::{CreateEndpoint, EndpointRow, UpdateEndpoint};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS webhook_endpoints (
    id                   BLOB PRIMARY KEY,
    url                  TEXT NOT NULL,
    secret_encrypted     TEXT NOT NULL,
    subscribed_events    TEXT NOT NULL,
    timeout_secs         INTEGER NOT NULL,
    max_retries          INTEGER NOT NULL,
    custom_headers       TEXT NOT NULL,
    rate_limit_per_hour  INTEGER,
    status               TEXT NOT NULL DEFAULT 'active',
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS webhook_deliveries (
    id               BLOB PRIMARY KEY,
    endpoint_id      BLOB NOT NULL REFERENCES webhook_endpoints(id),
    event_id         BLOB NOT NULL,
    event_type       TEXT NOT NULL,
    payload          TEXT NOT NULL,
    status           TEXT NOT NULL DEFAULT 'pending',
    attempt_count    INTEGER NOT NULL DEFAULT 0,
    max_attempts     INTEGER NOT NULL,
    response_code    INTEGER,
    response_time_ms INTEGER,
    error_message    TEXT,
    next_attempt_at  TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_deliveries_endpoint_status
    ON webhook_deliveries(endpoint_id, status);
CREATE INDEX IF NOT EXISTS idx_deliveries_status
    ON webhook_deliveries(status);

CREATE TABLE IF NOT EXISTS webhook_delivery_log (
    id               BLOB PRIMARY KEY,
    delivery_id      BLOB NOT NULL,
    endpoint_id      BLOB NOT NULL,
    attempt_number   INTEGER NOT NULL,
    outcome          TEXT NOT NULL,
    response_code    INTEGER,
    response_time_ms INTEGER,
    error_message    TEXT,
    retry_delay_ms   INTEGER,
    created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_log_delivery ON webhook_delivery_log(delivery_id);
CREATE INDEX IF NOT EXISTS idx_log_endpoint ON webhook_delivery_log(endpoint_id, created_at);
"#;

/// Open a pool against the given SQLite URL and apply the schema.
pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .connect_with(options)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Open an in-memory database (used by tests and local development).
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    connect("sqlite::memory:").await
}

/// Apply the embedded schema. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
