//! Append-only per-attempt delivery log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

/// Outcome recorded for one attempt (or queue event) of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    Succeeded,
    RetryableFailure,
    PermanentFailure,
    /// Dispatch deferred by the endpoint's token bucket; not an attempt.
    RateLimited,
    /// Dead-lettered delivery re-queued by an operator.
    Replayed,
}

impl LogOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::RetryableFailure => "retryable_failure",
            Self::PermanentFailure => "permanent_failure",
            Self::RateLimited => "rate_limited",
            Self::Replayed => "replayed",
        }
    }
}

/// One row of the append-only attempt history.
#[derive(Debug, Clone, FromRow)]
pub struct DeliveryLogRow {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub endpoint_id: Uuid,
    pub attempt_number: i64,
    pub outcome: LogOutcome,
    pub response_code: Option<i64>,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
    /// Backoff chosen after this attempt, when one was scheduled.
    pub retry_delay_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for one log row.
#[derive(Debug, Clone)]
pub struct AppendLog {
    pub delivery_id: Uuid,
    pub endpoint_id: Uuid,
    pub attempt_number: i64,
    pub outcome: LogOutcome,
    pub response_code: Option<i64>,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub retry_delay_ms: Option<i64>,
}

/// Success/failure totals for an endpoint, derived from the log.
#[derive(Debug, Clone, Default, FromRow)]
pub struct EndpointStats {
    pub success_count: i64,
    pub failure_count: i64,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl DeliveryLogRow {
    /// Append one attempt record. Rows are never updated or deleted except
    /// by retention purging.
    pub async fn append(pool: &SqlitePool, entry: AppendLog) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO webhook_delivery_log
                (id, delivery_id, endpoint_id, attempt_number, outcome,
                 response_code, response_time_ms, error_message, retry_delay_ms,
                 created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.delivery_id)
        .bind(entry.endpoint_id)
        .bind(entry.attempt_number)
        .bind(entry.outcome)
        .bind(entry.response_code)
        .bind(entry.response_time_ms)
        .bind(entry.error_message)
        .bind(entry.retry_delay_ms)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    /// Full attempt history for one delivery, oldest first.
    pub async fn history_for_delivery(
        pool: &SqlitePool,
        delivery_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhook_delivery_log
            WHERE delivery_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(delivery_id)
        .fetch_all(pool)
        .await
    }

    /// Recent attempts across an endpoint, newest first.
    pub async fn recent_for_endpoint(
        pool: &SqlitePool,
        endpoint_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhook_delivery_log
            WHERE endpoint_id = ?1
            ORDER BY rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(endpoint_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Aggregate success/failure counts for an endpoint. Rate-limit
    /// deferrals and replays count as neither.
    pub async fn endpoint_stats(
        pool: &SqlitePool,
        endpoint_id: Uuid,
    ) -> Result<EndpointStats, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE outcome = 'succeeded') AS success_count,
                COUNT(*) FILTER (WHERE outcome IN ('retryable_failure', 'permanent_failure'))
                    AS failure_count,
                MAX(created_at) AS last_triggered_at
            FROM webhook_delivery_log
            WHERE endpoint_id = ?1
            "#,
        )
        .bind(endpoint_id)
        .fetch_one(pool)
        .await
    }

    /// Delete log rows older than the cutoff.
    pub async fn purge_before(
        pool: &SqlitePool,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM webhook_delivery_log WHERE created_at < ?1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
