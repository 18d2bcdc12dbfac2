//! Delivery row model and queries.
//!
//! Deliveries move through `pending -> in_flight -> succeeded`, with
//! `retry_wait` between failed attempts and `dead_lettered` as the terminal
//! failure state. Claiming is the only transition into `in_flight` and is
//! written so that at most one delivery per endpoint is in flight and the
//! oldest queued delivery is always taken first.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::models::DeliveryStatus;

/// A queued or completed delivery.
#[derive(Debug, Clone, FromRow)]
pub struct DeliveryRow {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    /// Serialized event envelope, sent verbatim as the request body.
    pub payload: String,
    pub status: DeliveryStatus,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub response_code: Option<i64>,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new delivery.
#[derive(Debug, Clone)]
pub struct CreateDelivery {
    pub endpoint_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: String,
    pub max_attempts: i64,
}

impl DeliveryRow {
    /// Enqueue a new pending delivery. Takes any executor so fan-out can
    /// run inside a transaction.
    pub async fn create(
        executor: impl SqliteExecutor<'_>,
        input: CreateDelivery,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as(
            r#"
            INSERT INTO webhook_deliveries
                (id, endpoint_id, event_id, event_type, payload, status,
                 attempt_count, max_attempts, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?7, ?7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.endpoint_id)
        .bind(input.event_id)
        .bind(input.event_type)
        .bind(input.payload)
        .bind(input.max_attempts)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM webhook_deliveries WHERE id = ?1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List deliveries, newest first, with optional endpoint/status filters.
    pub async fn list(
        pool: &SqlitePool,
        endpoint_id: Option<Uuid>,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE (?1 IS NULL OR endpoint_id = ?1)
              AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(endpoint_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn count(
        pool: &SqlitePool,
        endpoint_id: Option<Uuid>,
        status: Option<DeliveryStatus>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM webhook_deliveries
            WHERE (?1 IS NULL OR endpoint_id = ?1)
              AND (?2 IS NULL OR status = ?2)
            "#,
        )
        .bind(endpoint_id)
        .bind(status)
        .fetch_one(pool)
        .await
    }

    /// Claim due deliveries for dispatch, marking them `in_flight`.
    ///
    /// For each endpoint only the head of its queue (lowest rowid among
    /// `pending`/`retry_wait` rows) is eligible, and only when the endpoint
    /// is active, has nothing already in flight, and the delivery's
    /// `next_attempt_at` has passed. This enforces per-endpoint FIFO order
    /// and single-in-flight in one atomic statement; head-of-line blocking
    /// is intentional.
    pub async fn claim_due(
        pool: &SqlitePool,
        now: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhook_deliveries
            SET status = 'in_flight', next_attempt_at = NULL, updated_at = ?1
            WHERE id IN (
                SELECT d.id FROM webhook_deliveries d
                JOIN webhook_endpoints e ON e.id = d.endpoint_id
                WHERE e.status = 'active'
                  AND d.status IN ('pending', 'retry_wait')
                  AND d.rowid = (
                      SELECT MIN(d2.rowid) FROM webhook_deliveries d2
                      WHERE d2.endpoint_id = d.endpoint_id
                        AND d2.status IN ('pending', 'retry_wait')
                  )
                  AND (d.next_attempt_at IS NULL OR d.next_attempt_at <= ?1)
                  AND NOT EXISTS (
                      SELECT 1 FROM webhook_deliveries f
                      WHERE f.endpoint_id = d.endpoint_id
                        AND f.status = 'in_flight'
                  )
                LIMIT ?2
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(batch)
        .fetch_all(pool)
        .await
    }

    /// Record a successful attempt and finish the delivery.
    pub async fn mark_succeeded(
        pool: &SqlitePool,
        id: Uuid,
        response_code: i64,
        response_time_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'succeeded',
                attempt_count = attempt_count + 1,
                response_code = ?2,
                response_time_ms = ?3,
                error_message = NULL,
                next_attempt_at = NULL,
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(response_code)
        .bind(response_time_ms)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt and park the delivery until `next_attempt_at`.
    /// Returns the updated row (callers need the new attempt count).
    pub async fn mark_retry_wait(
        pool: &SqlitePool,
        id: Uuid,
        response_code: Option<i64>,
        response_time_ms: Option<i64>,
        error_message: Option<&str>,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhook_deliveries
            SET status = 'retry_wait',
                attempt_count = attempt_count + 1,
                response_code = ?2,
                response_time_ms = ?3,
                error_message = ?4,
                next_attempt_at = ?5,
                updated_at = ?6
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(response_code)
        .bind(response_time_ms)
        .bind(error_message)
        .bind(next_attempt_at)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
    }

    /// Record a final failed attempt and dead-letter the delivery.
    pub async fn mark_dead_lettered(
        pool: &SqlitePool,
        id: Uuid,
        response_code: Option<i64>,
        response_time_ms: Option<i64>,
        error_message: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhook_deliveries
            SET status = 'dead_lettered',
                attempt_count = attempt_count + 1,
                response_code = ?2,
                response_time_ms = ?3,
                error_message = ?4,
                next_attempt_at = NULL,
                updated_at = ?5
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(response_code)
        .bind(response_time_ms)
        .bind(error_message)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
    }

    /// Return a claimed delivery to `pending` with a wake-up time, without
    /// counting an attempt. Used when dispatch is deferred by rate limiting.
    pub async fn defer(
        pool: &SqlitePool,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'pending', next_attempt_at = ?2, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Return a claimed delivery to `pending` immediately, without counting
    /// an attempt. Used when an in-flight dispatch is cancelled.
    pub async fn revert_to_pending(pool: &SqlitePool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'pending', next_attempt_at = NULL, updated_at = ?2
            WHERE id = ?1 AND status = 'in_flight'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Move an endpoint's `retry_wait` deliveries back to `pending` with no
    /// scheduled time. Applied when the endpoint is disabled so the queue is
    /// frozen in a resumable state.
    pub async fn revert_queued_for_endpoint(
        pool: &SqlitePool,
        endpoint_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'pending', next_attempt_at = NULL, updated_at = ?2
            WHERE endpoint_id = ?1 AND status = 'retry_wait'
            "#,
        )
        .bind(endpoint_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Release `in_flight` deliveries that have not been touched since
    /// `older_than` back to `pending`. Covers workers that died mid-dispatch.
    pub async fn release_stale(
        pool: &SqlitePool,
        older_than: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'pending', next_attempt_at = NULL, updated_at = ?2
            WHERE status = 'in_flight' AND updated_at < ?1
            "#,
        )
        .bind(older_than)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete terminal deliveries older than the cutoff.
    pub async fn purge_terminal_before(
        pool: &SqlitePool,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_deliveries
            WHERE status IN ('succeeded', 'dead_lettered') AND updated_at < ?1
            "#,
        )
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_in_flight_for_endpoint(
        pool: &SqlitePool,
        endpoint_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM webhook_deliveries WHERE endpoint_id = ?1 AND status = 'in_flight'",
        )
        .bind(endpoint_id)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EndpointStatus;
    use crate::store::{CreateEndpoint, EndpointRow};
    use chrono::Duration;

    async fn seed_endpoint(pool: &SqlitePool) -> Uuid {
        let id = Uuid::new_v4();
        EndpointRow::create(
            pool,
            CreateEndpoint {
                id,
                url: "https://hooks.example.com/cb".to_string(),
                secret_encrypted: "opaque".to_string(),
                subscribed_events: vec!["member.created".to_string()],
                timeout_secs: 10,
                max_retries: 5,
                custom_headers: Vec::new(),
                rate_limit_per_hour: None,
            },
        )
        .await
        .unwrap();
        id
    }

    fn enqueue(endpoint_id: Uuid) -> CreateDelivery {
        CreateDelivery {
            endpoint_id,
            event_id: Uuid::new_v4(),
            event_type: "member.created".to_string(),
            payload: r#"{"k":"v"}"#.to_string(),
            max_attempts: 6,
        }
    }

    #[tokio::test]
    async fn create_starts_pending_with_zero_attempts() {
        let pool = crate::store::connect_in_memory().await.unwrap();
        let ep = seed_endpoint(&pool).await;
        let d = DeliveryRow::create(&pool, enqueue(ep)).await.unwrap();
        assert_eq!(d.status, DeliveryStatus::Pending);
        assert_eq!(d.attempt_count, 0);
        assert!(d.next_attempt_at.is_none());
    }

    #[tokio::test]
    async fn claim_takes_oldest_first_and_one_per_endpoint() {
        let pool = crate::store::connect_in_memory().await.unwrap();
        let ep = seed_endpoint(&pool).await;
        let first = DeliveryRow::create(&pool, enqueue(ep)).await.unwrap();
        let _second = DeliveryRow::create(&pool, enqueue(ep)).await.unwrap();

        let claimed = DeliveryRow::claim_due(&pool, Utc::now(), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, first.id);
        assert_eq!(claimed[0].status, DeliveryStatus::InFlight);

        // Second stays queued while the first is in flight.
        let again = DeliveryRow::claim_due(&pool, Utc::now(), 10).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn claim_skips_future_retry_wait() {
        let pool = crate::store::connect_in_memory().await.unwrap();
        let ep = seed_endpoint(&pool).await;
        let d = DeliveryRow::create(&pool, enqueue(ep)).await.unwrap();

        let future = Utc::now() + Duration::hours(1);
        DeliveryRow::mark_retry_wait(&pool, d.id, Some(500), Some(12), Some("boom"), future)
            .await
            .unwrap();

        let claimed = DeliveryRow::claim_due(&pool, Utc::now(), 10).await.unwrap();
        assert!(claimed.is_empty());

        // Due once the clock passes next_attempt_at.
        let claimed = DeliveryRow::claim_due(&pool, future + Duration::seconds(1), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn claim_skips_inactive_endpoints() {
        let pool = crate::store::connect_in_memory().await.unwrap();
        let ep = seed_endpoint(&pool).await;
        DeliveryRow::create(&pool, enqueue(ep)).await.unwrap();
        EndpointRow::set_status(&pool, ep, EndpointStatus::Disabled)
            .await
            .unwrap();

        let claimed = DeliveryRow::claim_due(&pool, Utc::now(), 10).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn claim_covers_multiple_endpoints_in_one_batch() {
        let pool = crate::store::connect_in_memory().await.unwrap();
        let a = seed_endpoint(&pool).await;
        let b = seed_endpoint(&pool).await;
        DeliveryRow::create(&pool, enqueue(a)).await.unwrap();
        DeliveryRow::create(&pool, enqueue(b)).await.unwrap();

        let claimed = DeliveryRow::claim_due(&pool, Utc::now(), 10).await.unwrap();
        assert_eq!(claimed.len(), 2);
    }

    #[tokio::test]
    async fn defer_keeps_attempt_count() {
        let pool = crate::store::connect_in_memory().await.unwrap();
        let ep = seed_endpoint(&pool).await;
        let d = DeliveryRow::create(&pool, enqueue(ep)).await.unwrap();

        let claimed = DeliveryRow::claim_due(&pool, Utc::now(), 1).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let later = Utc::now() + Duration::seconds(30);
        DeliveryRow::defer(&pool, d.id, later).await.unwrap();

        let row = DeliveryRow::find_by_id(&pool, d.id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Pending);
        assert_eq!(row.attempt_count, 0);
        assert!(row.next_attempt_at.is_some());
    }

    #[tokio::test]
    async fn revert_to_pending_only_touches_in_flight() {
        let pool = crate::store::connect_in_memory().await.unwrap();
        let ep = seed_endpoint(&pool).await;
        let d = DeliveryRow::create(&pool, enqueue(ep)).await.unwrap();

        // Not in flight: no-op.
        DeliveryRow::revert_to_pending(&pool, d.id).await.unwrap();
        DeliveryRow::mark_succeeded(&pool, d.id, 200, 5).await.unwrap();
        DeliveryRow::revert_to_pending(&pool, d.id).await.unwrap();

        let row = DeliveryRow::find_by_id(&pool, d.id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Succeeded);
    }

    #[tokio::test]
    async fn disable_revert_moves_retry_wait_back_to_pending() {
        let pool = crate::store::connect_in_memory().await.unwrap();
        let ep = seed_endpoint(&pool).await;
        let d = DeliveryRow::create(&pool, enqueue(ep)).await.unwrap();
        DeliveryRow::mark_retry_wait(
            &pool,
            d.id,
            Some(503),
            Some(9),
            Some("unavailable"),
            Utc::now() + Duration::hours(1),
        )
        .await
        .unwrap();

        let reverted = DeliveryRow::revert_queued_for_endpoint(&pool, ep).await.unwrap();
        assert_eq!(reverted, 1);

        let row = DeliveryRow::find_by_id(&pool, d.id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Pending);
        assert!(row.next_attempt_at.is_none());
        assert_eq!(row.attempt_count, 1);
    }

    #[tokio::test]
    async fn stale_in_flight_released() {
        let pool = crate::store::connect_in_memory().await.unwrap();
        let ep = seed_endpoint(&pool).await;
        let d = DeliveryRow::create(&pool, enqueue(ep)).await.unwrap();
        DeliveryRow::claim_due(&pool, Utc::now(), 1).await.unwrap();

        // Nothing is stale yet.
        let released = DeliveryRow::release_stale(&pool, Utc::now() - Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(released, 0);

        let released = DeliveryRow::release_stale(&pool, Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(released, 1);
        let row = DeliveryRow::find_by_id(&pool, d.id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Pending);
    }

    #[tokio::test]
    async fn purge_removes_only_old_terminal_rows() {
        let pool = crate::store::connect_in_memory().await.unwrap();
        let ep = seed_endpoint(&pool).await;
        let done = DeliveryRow::create(&pool, enqueue(ep)).await.unwrap();
        let queued = DeliveryRow::create(&pool, enqueue(ep)).await.unwrap();
        DeliveryRow::mark_succeeded(&pool, done.id, 200, 3).await.unwrap();

        let purged = DeliveryRow::purge_terminal_before(&pool, Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(DeliveryRow::find_by_id(&pool, done.id).await.unwrap().is_none());
        assert!(DeliveryRow::find_by_id(&pool, queued.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_filters_by_endpoint_and_status() {
        let pool = crate::store::connect_in_memory().await.unwrap();
        let a = seed_endpoint(&pool).await;
        let b = seed_endpoint(&pool).await;
        DeliveryRow::create(&pool, enqueue(a)).await.unwrap();
        let db = DeliveryRow::create(&pool, enqueue(b)).await.unwrap();
        DeliveryRow::mark_succeeded(&pool, db.id, 200, 4).await.unwrap();

        let all = DeliveryRow::list(&pool, None, None, 50, 0).await.unwrap();
        assert_eq!(all.len(), 2);

        let only_a = DeliveryRow::list(&pool, Some(a), None, 50, 0).await.unwrap();
        assert_eq!(only_a.len(), 1);

        let succeeded = DeliveryRow::list(&pool, None, Some(DeliveryStatus::Succeeded), 50, 0)
            .await
            .unwrap();
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0].id, db.id);

        assert_eq!(DeliveryRow::count(&pool, Some(a), None).await.unwrap(), 1);
        assert_eq!(
            DeliveryRow::count(&pool, None, Some(DeliveryStatus::Pending))
                .await
                .unwrap(),
            1
        );
    }
}
