//! Event intake and fan-out.
//!
//! One domain event becomes one delivery per matching active endpoint. The
//! event envelope is serialized once; every endpoint receives byte-identical
//! payloads (and therefore stable signatures per secret).

use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{
    DeliveryStatus, EndpointStatus, ReplayResponse, TestEndpointResponse, WebhookEvent,
    WebhookEventType,
};
use crate::store::{AppendLog, CreateDelivery, DeliveryLogRow, DeliveryRow, EndpointRow};

/// Routes events to endpoint delivery queues.
#[derive(Clone)]
pub struct EventRouter {
    pool: SqlitePool,
    config: EngineConfig,
}

impl EventRouter {
    pub fn new(pool: SqlitePool, config: EngineConfig) -> Self {
        Self { pool, config }
    }

    /// Fan an event out to every active endpoint subscribed to its type.
    /// Returns the created deliveries; an event matching nothing is dropped.
    pub async fn publish(&self, event: &WebhookEvent) -> Result<Vec<DeliveryRow>, EngineError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| EngineError::Internal(format!("event serialization failed: {e}")))?;

        let endpoints = EndpointRow::find_active_by_event_type(&self.pool, &event.event_type).await?;
        if endpoints.is_empty() {
            info!(
                target: "webhook_events",
                event_id = %event.event_id,
                event_type = %event.event_type,
                "event matched no active endpoints"
            );
            return Ok(Vec::new());
        }

        // All-or-nothing: a failed insert rolls back the whole fan-out.
        let mut tx = self.pool.begin().await?;
        let mut deliveries = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            let delivery = DeliveryRow::create(
                &mut *tx,
                CreateDelivery {
                    endpoint_id: endpoint.id,
                    event_id: event.event_id,
                    event_type: event.event_type.clone(),
                    payload: payload.clone(),
                    max_attempts: endpoint.max_retries + 1,
                },
            )
            .await?;
            deliveries.push(delivery);
        }
        tx.commit().await?;

        info!(
            target: "webhook_events",
            event_id = %event.event_id,
            event_type = %event.event_type,
            deliveries = deliveries.len(),
            "event fanned out"
        );
        Ok(deliveries)
    }

    /// Queue a synthetic `test.ping` delivery to one endpoint, regardless of
    /// its subscriptions. The endpoint must be active.
    pub async fn test_endpoint(
        &self,
        endpoint_id: Uuid,
    ) -> Result<TestEndpointResponse, EngineError> {
        let endpoint = EndpointRow::find_by_id(&self.pool, endpoint_id)
            .await?
            .ok_or(EngineError::EndpointNotFound)?;
        if endpoint.status != EndpointStatus::Active {
            return Err(EngineError::Validation(format!(
                "Endpoint is {}; enable it before testing",
                endpoint.status.as_str()
            )));
        }

        let event = WebhookEvent::new(
            WebhookEventType::TestPing.as_str(),
            serde_json::json!({
                "endpoint_id": endpoint_id,
                "message": "test delivery",
            }),
        );
        let payload = serde_json::to_string(&event)
            .map_err(|e| EngineError::Internal(format!("event serialization failed: {e}")))?;

        let delivery = DeliveryRow::create(
            &self.pool,
            CreateDelivery {
                endpoint_id,
                event_id: event.event_id,
                event_type: event.event_type,
                payload,
                max_attempts: endpoint.max_retries + 1,
            },
        )
        .await?;

        info!(
            target: "webhook_events",
            endpoint_id = %endpoint_id,
            delivery_id = %delivery.id,
            "test delivery queued"
        );
        Ok(TestEndpointResponse {
            delivery_id: delivery.id,
            message: "Test delivery queued".to_string(),
        })
    }

    /// Re-queue a dead-lettered delivery as a fresh pending delivery with a
    /// full retry budget. The original record stays immutable; the replay is
    /// noted in its log.
    pub async fn replay(&self, delivery_id: Uuid) -> Result<ReplayResponse, EngineError> {
        let original = DeliveryRow::find_by_id(&self.pool, delivery_id)
            .await?
            .ok_or(EngineError::DeliveryNotFound)?;
        if original.status != DeliveryStatus::DeadLettered {
            return Err(EngineError::Validation(format!(
                "Only dead-lettered deliveries can be replayed; this one is {}",
                original.status.as_str()
            )));
        }

        let endpoint = EndpointRow::find_by_id(&self.pool, original.endpoint_id)
            .await?
            .ok_or(EngineError::EndpointNotFound)?;
        if endpoint.status != EndpointStatus::Active {
            warn!(
                target: "webhook_events",
                delivery_id = %delivery_id,
                endpoint_id = %endpoint.id,
                "replay refused: endpoint not active"
            );
            return Err(EngineError::Validation(format!(
                "Endpoint is {}; enable it before replaying",
                endpoint.status.as_str()
            )));
        }

        let replay = DeliveryRow::create(
            &self.pool,
            CreateDelivery {
                endpoint_id: original.endpoint_id,
                event_id: original.event_id,
                event_type: original.event_type.clone(),
                payload: original.payload.clone(),
                max_attempts: endpoint.max_retries + 1,
            },
        )
        .await?;

        DeliveryLogRow::append(
            &self.pool,
            AppendLog {
                delivery_id: original.id,
                endpoint_id: original.endpoint_id,
                attempt_number: original.attempt_count,
                outcome: crate::store::LogOutcome::Replayed,
                response_code: None,
                response_time_ms: None,
                error_message: None,
                retry_delay_ms: None,
            },
        )
        .await?;

        info!(
            target: "webhook_events",
            original_delivery_id = %delivery_id,
            replay_delivery_id = %replay.id,
            "dead-lettered delivery replayed"
        );
        Ok(ReplayResponse {
            delivery_id: replay.id,
            status: replay.status,
            message: format!("Replay of delivery {delivery_id} queued"),
        })
    }
}
