//! Background dispatch worker.
//!
//! A single polling loop claims due deliveries and hands each to a spawned
//! task, bounded by a semaphore. Per-endpoint ordering is enforced by the
//! claim query, not here; the worker only bounds global concurrency. Two
//! slower timers release stale in-flight rows and purge old records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatcher::{Dispatcher, Outcome};
use crate::scheduler::RetryScheduler;
use crate::store::DeliveryRow;

/// Worker loop tunables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrently dispatching deliveries across all endpoints.
    pub concurrency: usize,
    /// Queue poll interval.
    pub poll_interval: Duration,
    /// How often stale in-flight rows are swept.
    pub stale_release_interval: Duration,
    /// Age after which an in-flight row is considered orphaned.
    pub stale_after: Duration,
    /// How often the retention purge runs.
    pub retention_sweep_interval: Duration,
    /// Maximum deliveries claimed per poll.
    pub batch_size: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            poll_interval: Duration::from_millis(500),
            stale_release_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
            retention_sweep_interval: Duration::from_secs(3600),
            batch_size: 32,
        }
    }
}

/// Cancellation tokens for in-flight dispatches, keyed by endpoint.
///
/// Disabling an endpoint cancels its token, which aborts the dispatch task
/// mid-request; the task reverts its delivery to `pending`.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl CancelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token guarding the endpoint's current dispatch. Created on demand.
    pub async fn token_for(&self, endpoint_id: Uuid) -> CancellationToken {
        let mut tokens = self.tokens.write().await;
        tokens
            .entry(endpoint_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Cancel and drop the endpoint's token. Subsequent dispatches get a
    /// fresh, uncancelled token.
    pub async fn cancel(&self, endpoint_id: Uuid) {
        if let Some(token) = self.tokens.write().await.remove(&endpoint_id) {
            token.cancel();
        }
    }

    /// Drop the token without cancelling (dispatch finished normally).
    pub async fn release(&self, endpoint_id: Uuid) {
        self.tokens.write().await.remove(&endpoint_id);
    }
}

/// The background loop driving dispatch, retry, and housekeeping.
pub struct DispatchWorker {
    pool: SqlitePool,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<RetryScheduler>,
    cancels: CancelRegistry,
    config: WorkerConfig,
    retention: Duration,
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicBool>,
}

impl DispatchWorker {
    pub fn new(
        pool: SqlitePool,
        dispatcher: Arc<Dispatcher>,
        scheduler: Arc<RetryScheduler>,
        cancels: CancelRegistry,
        config: WorkerConfig,
        retention: Duration,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Self {
            pool,
            dispatcher,
            scheduler,
            cancels,
            config,
            retention,
            semaphore,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle used to stop the worker loop.
    #[must_use]
    pub fn shutdown_handle(&self) -> WorkerShutdown {
        WorkerShutdown {
            running: Arc::clone(&self.running),
        }
    }

    /// Run until shut down. Intended to be spawned.
    pub async fn run(self) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            target: "webhook_worker",
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "dispatch worker started"
        );

        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut stale = tokio::time::interval(self.config.stale_release_interval);
        let mut retention = tokio::time::interval(self.config.retention_sweep_interval);
        // The first tick of an interval fires immediately; skip the
        // housekeeping ones so startup stays cheap.
        stale.tick().await;
        retention.tick().await;

        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.dispatch_due().await {
                        error!(target: "webhook_worker", error = %e, "dispatch poll failed");
                    }
                }
                _ = stale.tick() => {
                    self.release_stale().await;
                }
                _ = retention.tick() => {
                    self.purge_expired().await;
                }
            }
        }

        // Drain: wait for all in-flight tasks to finish.
        let _ = self
            .semaphore
            .acquire_many(self.config.concurrency as u32)
            .await;
        info!(target: "webhook_worker", "dispatch worker stopped");
    }

    /// Claim due deliveries (never more than we hold permits for) and spawn
    /// a dispatch task per claim.
    async fn dispatch_due(&self) -> Result<(), sqlx::Error> {
        let available = self.semaphore.available_permits() as i64;
        if available == 0 {
            return Ok(());
        }
        let batch = available.min(self.config.batch_size);
        let claimed = DeliveryRow::claim_due(&self.pool, Utc::now(), batch).await?;
        if claimed.is_empty() {
            return Ok(());
        }
        debug!(target: "webhook_worker", count = claimed.len(), "claimed deliveries");

        for delivery in claimed {
            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(p) => p,
                // Semaphore closed; shutting down.
                Err(_) => return Ok(()),
            };
            let pool = self.pool.clone();
            let dispatcher = Arc::clone(&self.dispatcher);
            let scheduler = Arc::clone(&self.scheduler);
            let cancels = self.cancels.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let endpoint_id = delivery.endpoint_id;
                let delivery_id = delivery.id;
                let token = cancels.token_for(endpoint_id).await;

                tokio::select! {
                    result = dispatcher.attempt(&pool, &delivery) => {
                        cancels.release(endpoint_id).await;
                        match result {
                            Ok(outcome) => {
                                if let Err(e) = scheduler.apply(&pool, &delivery, outcome).await {
                                    error!(
                                        target: "webhook_worker",
                                        delivery_id = %delivery_id,
                                        error = %e,
                                        "failed to record dispatch outcome"
                                    );
                                }
                            }
                            Err(e) => {
                                error!(
                                    target: "webhook_worker",
                                    delivery_id = %delivery_id,
                                    error = %e,
                                    "dispatch attempt failed internally"
                                );
                                // Internal failures take the normal retry
                                // path so the delivery backs off, shows up
                                // in the audit log, and eventually
                                // dead-letters instead of being re-claimed
                                // on the next poll tick.
                                let outcome = Outcome::RetryableFailure {
                                    code: None,
                                    latency_ms: None,
                                    error: format!("internal dispatch error: {e}"),
                                };
                                if scheduler.apply(&pool, &delivery, outcome).await.is_err() {
                                    let _ =
                                        DeliveryRow::revert_to_pending(&pool, delivery_id).await;
                                }
                            }
                        }
                    }
                    _ = token.cancelled() => {
                        warn!(
                            target: "webhook_worker",
                            delivery_id = %delivery_id,
                            endpoint_id = %endpoint_id,
                            "dispatch cancelled; delivery returned to queue"
                        );
                        let _ = DeliveryRow::revert_to_pending(&pool, delivery_id).await;
                    }
                }
            });
        }
        Ok(())
    }

    async fn release_stale(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        match DeliveryRow::release_stale(&self.pool, cutoff).await {
            Ok(0) => {}
            Ok(n) => {
                warn!(target: "webhook_worker", released = n, "released stale in-flight deliveries")
            }
            Err(e) => error!(target: "webhook_worker", error = %e, "stale release failed"),
        }
    }

    async fn purge_expired(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.retention)
                .unwrap_or_else(|_| chrono::Duration::days(30));
        let deliveries = DeliveryRow::purge_terminal_before(&self.pool, cutoff).await;
        let log_rows = crate::store::DeliveryLogRow::purge_before(&self.pool, cutoff).await;
        match (deliveries, log_rows) {
            (Ok(d), Ok(l)) if d > 0 || l > 0 => {
                info!(target: "webhook_worker", deliveries = d, log_rows = l, "retention purge")
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(target: "webhook_worker", error = %e, "retention purge failed")
            }
            _ => {}
        }
    }
}

/// Cloneable handle that stops a running [`DispatchWorker`].
#[derive(Clone)]
pub struct WorkerShutdown {
    running: Arc<AtomicBool>,
}

impl WorkerShutdown {
    /// Request the worker loop to exit after its current iteration.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_registry_reuses_token_until_cancelled() {
        let cancels = CancelRegistry::new();
        let id = Uuid::new_v4();

        let a = cancels.token_for(id).await;
        let b = cancels.token_for(id).await;
        assert!(!a.is_cancelled());

        cancels.cancel(id).await;
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());

        // Fresh token after cancellation.
        let c = cancels.token_for(id).await;
        assert!(!c.is_cancelled());
    }

    #[tokio::test]
    async fn release_does_not_cancel() {
        let cancels = CancelRegistry::new();
        let id = Uuid::new_v4();
        let token = cancels.token_for(id).await;
        cancels.release(id).await;
        assert!(!token.is_cancelled());
    }

    #[test]
    fn default_worker_config_is_sane() {
        let config = WorkerConfig::default();
        assert!(config.concurrency > 0);
        assert!(config.batch_size > 0);
        assert!(config.stale_after > config.poll_interval);
    }
}
