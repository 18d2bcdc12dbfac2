//! Webhook dispatch and retry engine.
//!
//! Receives domain events, fans them out to registered HTTP endpoints with
//! HMAC-signed payloads, and drives retries with exponential backoff until
//! each delivery succeeds or is dead-lettered. Per-endpoint guarantees: at
//! most one delivery in flight, submission-order dispatch, token-bucket
//! rate limiting, and auto-disable after sustained failure.
//!
//! [`Engine::start`] wires everything together; the management API in
//! [`http`] exposes registration, inspection, and replay.

pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod http;
pub mod models;
pub mod publisher;
pub mod rate_limit;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod validation;
pub mod worker;

pub use config::EngineConfig;
pub use dispatcher::{Dispatcher, Outcome};
pub use engine::Engine;
pub use error::{ApiResult, EngineError};
pub use models::{
    DeliveryStatus, EndpointStatus, WebhookEvent, WebhookEventType,
};
pub use publisher::EventRouter;
pub use rate_limit::{RateLimitConfig, RateLimiterRegistry};
pub use registry::EndpointRegistry;
pub use scheduler::{backoff_delay, RetryScheduler};
pub use worker::{CancelRegistry, DispatchWorker, WorkerConfig};
