//! Management API handlers.

pub mod deliveries;
pub mod endpoints;

use sqlx::SqlitePool;

use crate::publisher::EventRouter;
use crate::registry::EndpointRegistry;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub registry: EndpointRegistry,
    pub events: EventRouter,
}
