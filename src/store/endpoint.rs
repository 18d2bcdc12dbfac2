//! Endpoint row model and queries.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::models::{CustomHeader, EndpointStatus};

/// A registered webhook endpoint as stored.
#[derive(Debug, Clone, FromRow)]
pub struct EndpointRow {
    pub id: Uuid,
    pub url: String,
    /// AES-256-GCM encrypted signing secret (base64).
    pub secret_encrypted: String,
    pub subscribed_events: Json<Vec<String>>,
    pub timeout_secs: i64,
    pub max_retries: i64,
    pub custom_headers: Json<Vec<CustomHeader>>,
    /// Hourly delivery budget override; NULL means the engine default.
    pub rate_limit_per_hour: Option<i64>,
    pub status: EndpointStatus,
    pub consecutive_failures: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new endpoint.
#[derive(Debug, Clone)]
pub struct CreateEndpoint {
    pub id: Uuid,
    pub url: String,
    pub secret_encrypted: String,
    pub subscribed_events: Vec<String>,
    pub timeout_secs: i64,
    pub max_retries: i64,
    pub custom_headers: Vec<CustomHeader>,
    pub rate_limit_per_hour: Option<i64>,
}

/// Optional field updates for an endpoint.
#[derive(Debug, Clone, Default)]
pub struct UpdateEndpoint {
    pub url: Option<String>,
    pub secret_encrypted: Option<String>,
    pub subscribed_events: Option<Vec<String>>,
    pub timeout_secs: Option<i64>,
    pub max_retries: Option<i64>,
    pub custom_headers: Option<Vec<CustomHeader>>,
    pub rate_limit_per_hour: Option<i64>,
}

impl EndpointRow {
    /// Insert a new endpoint row.
    pub async fn create(pool: &SqlitePool, input: CreateEndpoint) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as(
            r#"
            INSERT INTO webhook_endpoints
                (id, url, secret_encrypted, subscribed_events, timeout_secs,
                 max_retries, custom_headers, rate_limit_per_hour, status,
                 consecutive_failures, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', 0, ?9, ?9)
            RETURNING *
            "#,
        )
        .bind(input.id)
        .bind(input.url)
        .bind(input.secret_encrypted)
        .bind(Json(input.subscribed_events))
        .bind(input.timeout_secs)
        .bind(input.max_retries)
        .bind(Json(input.custom_headers))
        .bind(input.rate_limit_per_hour)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    /// Find an endpoint by id.
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM webhook_endpoints WHERE id = ?1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List endpoints, newest first, optionally filtered by status.
    pub async fn list(
        pool: &SqlitePool,
        status: Option<EndpointStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhook_endpoints
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    /// Count endpoints, optionally filtered by status.
    pub async fn count(
        pool: &SqlitePool,
        status: Option<EndpointStatus>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM webhook_endpoints WHERE (?1 IS NULL OR status = ?1)",
        )
        .bind(status)
        .fetch_one(pool)
        .await
    }

    /// Active endpoints subscribed to the given event type, in
    /// registration order.
    pub async fn find_active_by_event_type(
        pool: &SqlitePool,
        event_type: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhook_endpoints e
            WHERE e.status = 'active'
              AND EXISTS (
                  SELECT 1 FROM json_each(e.subscribed_events)
                  WHERE json_each.value = ?1
              )
            ORDER BY e.rowid
            "#,
        )
        .bind(event_type)
        .fetch_all(pool)
        .await
    }

    /// Apply a partial update; unset fields keep their current value.
    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        input: UpdateEndpoint,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhook_endpoints SET
                url               = COALESCE(?2, url),
                secret_encrypted  = COALESCE(?3, secret_encrypted),
                subscribed_events = COALESCE(?4, subscribed_events),
                timeout_secs      = COALESCE(?5, timeout_secs),
                max_retries       = COALESCE(?6, max_retries),
                custom_headers    = COALESCE(?7, custom_headers),
                rate_limit_per_hour = COALESCE(?8, rate_limit_per_hour),
                updated_at        = ?9
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.url)
        .bind(input.secret_encrypted)
        .bind(input.subscribed_events.map(Json))
        .bind(input.timeout_secs)
        .bind(input.max_retries)
        .bind(input.custom_headers.map(Json))
        .bind(input.rate_limit_per_hour)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
    }

    /// Set the endpoint status. Returns the updated row.
    pub async fn set_status(
        pool: &SqlitePool,
        id: Uuid,
        status: EndpointStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhook_endpoints
            SET status = ?2, updated_at = ?3
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
    }

    /// Increment the consecutive-failure counter, returning the new count.
    pub async fn increment_consecutive_failures(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            UPDATE webhook_endpoints
            SET consecutive_failures = consecutive_failures + 1, updated_at = ?2
            WHERE id = ?1
            RETURNING consecutive_failures
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    /// Reset the consecutive-failure counter to zero.
    pub async fn reset_consecutive_failures(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_endpoints
            SET consecutive_failures = 0, updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }
}
