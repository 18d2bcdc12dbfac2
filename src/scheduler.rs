//! Retry scheduling: applies a classified dispatch outcome to the delivery
//! record, the audit log, and the endpoint failure counter.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::dispatcher::Outcome;
use crate::error::EngineError;
use crate::registry::EndpointRegistry;
use crate::store::{AppendLog, DeliveryLogRow, DeliveryRow, LogOutcome};

/// Exponential backoff with jitter.
///
/// `n` is the zero-based retry index: retry 0 waits roughly `base`, each
/// subsequent retry doubles, capped at `max`, then scaled by a uniform
/// jitter in [0.8, 1.2].
#[must_use]
pub fn backoff_delay(base: Duration, max: Duration, n: u32) -> Duration {
    let exp = base.as_secs_f64() * 2f64.powi(n.min(63) as i32);
    let capped = exp.min(max.as_secs_f64());
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_secs_f64(capped * jitter)
}

/// Applies dispatch outcomes: state transitions, log rows, backoff.
pub struct RetryScheduler {
    registry: EndpointRegistry,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl RetryScheduler {
    pub fn new(registry: EndpointRegistry, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            registry,
            base_backoff,
            max_backoff,
        }
    }

    /// Record the outcome of one claimed (`in_flight`) delivery.
    pub async fn apply(
        &self,
        pool: &SqlitePool,
        delivery: &DeliveryRow,
        outcome: Outcome,
    ) -> Result<(), EngineError> {
        let attempt_number = delivery.attempt_count + 1;
        match outcome {
            Outcome::Success { code, latency_ms } => {
                DeliveryRow::mark_succeeded(pool, delivery.id, code, latency_ms).await?;
                DeliveryLogRow::append(
                    pool,
                    AppendLog {
                        delivery_id: delivery.id,
                        endpoint_id: delivery.endpoint_id,
                        attempt_number,
                        outcome: LogOutcome::Succeeded,
                        response_code: Some(code),
                        response_time_ms: Some(latency_ms),
                        error_message: None,
                        retry_delay_ms: None,
                    },
                )
                .await?;
                self.registry.record_outcome(delivery.endpoint_id, true).await?;
                info!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    endpoint_id = %delivery.endpoint_id,
                    attempt = attempt_number,
                    code,
                    "delivery succeeded"
                );
            }

            Outcome::PermanentFailure {
                code,
                latency_ms,
                error,
            } => {
                DeliveryRow::mark_dead_lettered(
                    pool,
                    delivery.id,
                    Some(code),
                    Some(latency_ms),
                    Some(&error),
                )
                .await?;
                DeliveryLogRow::append(
                    pool,
                    AppendLog {
                        delivery_id: delivery.id,
                        endpoint_id: delivery.endpoint_id,
                        attempt_number,
                        outcome: LogOutcome::PermanentFailure,
                        response_code: Some(code),
                        response_time_ms: Some(latency_ms),
                        error_message: Some(error),
                        retry_delay_ms: None,
                    },
                )
                .await?;
                self.registry
                    .record_outcome(delivery.endpoint_id, false)
                    .await?;
                warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    endpoint_id = %delivery.endpoint_id,
                    attempt = attempt_number,
                    code,
                    "delivery dead-lettered (permanent failure)"
                );
            }

            Outcome::RetryableFailure {
                code,
                latency_ms,
                error,
            } => {
                let exhausted = attempt_number >= delivery.max_attempts;
                let retry_delay_ms = if exhausted {
                    DeliveryRow::mark_dead_lettered(
                        pool,
                        delivery.id,
                        code,
                        latency_ms,
                        Some(&error),
                    )
                    .await?;
                    warn!(
                        target: "webhook_delivery",
                        delivery_id = %delivery.id,
                        endpoint_id = %delivery.endpoint_id,
                        attempt = attempt_number,
                        "delivery dead-lettered (retries exhausted)"
                    );
                    None
                } else {
                    // Zero-based retry index equals the pre-attempt count.
                    let delay = backoff_delay(
                        self.base_backoff,
                        self.max_backoff,
                        delivery.attempt_count.max(0) as u32,
                    );
                    let next = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(3600));
                    DeliveryRow::mark_retry_wait(
                        pool,
                        delivery.id,
                        code,
                        latency_ms,
                        Some(&error),
                        next,
                    )
                    .await?;
                    info!(
                        target: "webhook_delivery",
                        delivery_id = %delivery.id,
                        endpoint_id = %delivery.endpoint_id,
                        attempt = attempt_number,
                        retry_in_ms = delay.as_millis() as u64,
                        "delivery scheduled for retry"
                    );
                    Some(delay.as_millis() as i64)
                };

                DeliveryLogRow::append(
                    pool,
                    AppendLog {
                        delivery_id: delivery.id,
                        endpoint_id: delivery.endpoint_id,
                        attempt_number,
                        outcome: LogOutcome::RetryableFailure,
                        response_code: code,
                        response_time_ms: latency_ms,
                        error_message: Some(error),
                        retry_delay_ms,
                    },
                )
                .await?;
                self.registry
                    .record_outcome(delivery.endpoint_id, false)
                    .await?;
            }

            Outcome::RateLimitDeferred { retry_after } => {
                // Not an attempt: the count stays, the failure streak stays.
                let next = Utc::now()
                    + chrono::Duration::from_std(retry_after)
                        .unwrap_or_else(|_| chrono::Duration::seconds(3600));
                DeliveryRow::defer(pool, delivery.id, next).await?;
                DeliveryLogRow::append(
                    pool,
                    AppendLog {
                        delivery_id: delivery.id,
                        endpoint_id: delivery.endpoint_id,
                        attempt_number: delivery.attempt_count,
                        outcome: LogOutcome::RateLimited,
                        response_code: None,
                        response_time_ms: None,
                        error_message: None,
                        retry_delay_ms: Some(retry_after.as_millis() as i64),
                    },
                )
                .await?;
            }

            Outcome::EndpointInactive => {
                // Not an attempt: the delivery returns to the frozen queue
                // and waits for the endpoint to be re-enabled.
                DeliveryRow::revert_to_pending(pool, delivery.id).await?;
                info!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    endpoint_id = %delivery.endpoint_id,
                    "endpoint no longer active; delivery returned to queue"
                );
            }
        }
        Ok(())
    }
}
