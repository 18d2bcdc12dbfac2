//! Engine assembly: wires the store, services, dispatcher, scheduler, and
//! background worker together behind one handle.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::handlers::ApiState;
use crate::models::WebhookEvent;
use crate::publisher::EventRouter;
use crate::rate_limit::RateLimiterRegistry;
use crate::registry::EndpointRegistry;
use crate::scheduler::RetryScheduler;
use crate::store::DeliveryRow;
use crate::worker::{CancelRegistry, DispatchWorker, WorkerConfig, WorkerShutdown};

/// A running webhook engine.
///
/// Owns the background dispatch worker; dropping the handle does not stop
/// it, call [`shutdown`](Self::shutdown) for a graceful stop.
pub struct Engine {
    pool: SqlitePool,
    registry: EndpointRegistry,
    events: EventRouter,
    limiter: RateLimiterRegistry,
    worker_shutdown: WorkerShutdown,
    worker_handle: JoinHandle<()>,
}

impl Engine {
    /// Assemble and start an engine on the given pool.
    pub fn start(
        pool: SqlitePool,
        config: EngineConfig,
        worker_config: WorkerConfig,
    ) -> Result<Self, EngineError> {
        let limiter = RateLimiterRegistry::new(config.rate_limit);
        let cancels = CancelRegistry::new();
        let registry = EndpointRegistry::new(
            pool.clone(),
            config.clone(),
            cancels.clone(),
            limiter.clone(),
        );
        let events = EventRouter::new(pool.clone(), config.clone());

        let dispatcher = Arc::new(Dispatcher::new(
            limiter.clone(),
            config.encryption_key.clone(),
        )?);
        let scheduler = Arc::new(RetryScheduler::new(
            registry.clone(),
            config.base_backoff,
            config.max_backoff,
        ));

        let worker = DispatchWorker::new(
            pool.clone(),
            dispatcher,
            scheduler,
            cancels,
            worker_config,
            config.retention,
        );
        let worker_shutdown = worker.shutdown_handle();
        let worker_handle = tokio::spawn(worker.run());

        info!(target: "webhook_engine", "engine started");
        Ok(Self {
            pool,
            registry,
            events,
            limiter,
            worker_shutdown,
            worker_handle,
        })
    }

    /// Publish an event into the engine for fan-out.
    pub async fn publish(&self, event: &WebhookEvent) -> Result<Vec<DeliveryRow>, EngineError> {
        self.events.publish(event).await
    }

    /// Endpoint registry service.
    #[must_use]
    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Event router (publish, test, replay).
    #[must_use]
    pub fn events(&self) -> &EventRouter {
        &self.events
    }

    /// Per-endpoint rate-limiter registry.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiterRegistry {
        &self.limiter
    }

    /// Database pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// State for the management API router.
    #[must_use]
    pub fn api_state(&self) -> ApiState {
        ApiState {
            pool: self.pool.clone(),
            registry: self.registry.clone(),
            events: self.events.clone(),
        }
    }

    /// Management API router bound to this engine.
    #[must_use]
    pub fn api_router(&self) -> axum::Router {
        crate::http::api_router(self.api_state())
    }

    /// Stop the worker loop and wait for in-flight dispatches to finish.
    pub async fn shutdown(self) {
        self.worker_shutdown.shutdown();
        let _ = self.worker_handle.await;
        info!(target: "webhook_engine", "engine stopped");
    }
}
