//! Endpoint registry: registration, updates, enable/disable, auto-disable.

use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{
    EndpointListResponse, EndpointResponse, EndpointStatsResponse, EndpointStatus,
    ListEndpointsQuery, RegisterEndpointRequest, UpdateEndpointRequest,
};
use crate::rate_limit::{RateLimitConfig, RateLimiterRegistry};
use crate::store::{CreateEndpoint, DeliveryLogRow, DeliveryRow, EndpointRow, UpdateEndpoint};
use crate::validation;
use crate::worker::CancelRegistry;

/// Manages the endpoint table and its lifecycle rules.
#[derive(Clone)]
pub struct EndpointRegistry {
    pool: SqlitePool,
    config: EngineConfig,
    cancels: CancelRegistry,
    limiter: RateLimiterRegistry,
}

impl EndpointRegistry {
    pub fn new(
        pool: SqlitePool,
        config: EngineConfig,
        cancels: CancelRegistry,
        limiter: RateLimiterRegistry,
    ) -> Self {
        Self {
            pool,
            config,
            cancels,
            limiter,
        }
    }

    /// Register a new endpoint. Generates an id and signing secret when the
    /// caller does not provide them; the secret is returned exactly once, in
    /// this response.
    pub async fn register(
        &self,
        request: RegisterEndpointRequest,
    ) -> Result<EndpointResponse, EngineError> {
        validation::validate_endpoint_url(
            &request.url,
            self.config.require_https,
            self.config.allow_internal_hosts,
        )?;
        validation::validate_event_types(&request.subscribed_events)?;
        validation::validate_custom_headers(&request.custom_headers)?;
        validation::validate_limits(
            request.timeout_secs,
            request.max_retries,
            request.rate_limit_per_hour,
        )?;

        let id = request.id.unwrap_or_else(Uuid::new_v4);
        let secret = match request.secret {
            Some(s) if !s.trim().is_empty() => s,
            _ => crate::crypto::generate_secret(),
        };
        let secret_encrypted = crate::crypto::encrypt_secret(&secret, &self.config.encryption_key)?;

        let row = EndpointRow::create(
            &self.pool,
            CreateEndpoint {
                id,
                url: request.url,
                secret_encrypted,
                subscribed_events: request.subscribed_events,
                timeout_secs: request
                    .timeout_secs
                    .unwrap_or(self.config.default_timeout_secs) as i64,
                max_retries: request.max_retries.unwrap_or(self.config.default_max_retries),
                custom_headers: request.custom_headers,
                rate_limit_per_hour: request.rate_limit_per_hour.map(i64::from),
            },
        )
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                EngineError::DuplicateEndpoint(id)
            } else {
                EngineError::Database(e)
            }
        })?;

        if let Some(per_hour) = request.rate_limit_per_hour {
            self.limiter
                .set_config(id, RateLimitConfig::per_hour(per_hour))
                .await;
        }

        info!(
            target: "webhook_endpoints",
            endpoint_id = %row.id,
            url = %row.url,
            events = row.subscribed_events.0.len(),
            "endpoint registered"
        );

        Ok(to_response(row, Some(secret)))
    }

    pub async fn get(&self, id: Uuid) -> Result<EndpointResponse, EngineError> {
        let row = EndpointRow::find_by_id(&self.pool, id)
            .await?
            .ok_or(EngineError::EndpointNotFound)?;
        Ok(to_response(row, None))
    }

    pub async fn list(
        &self,
        query: ListEndpointsQuery,
    ) -> Result<EndpointListResponse, EngineError> {
        let limit = query.limit.clamp(1, 500);
        let offset = query.offset.max(0);
        let rows = EndpointRow::list(&self.pool, query.status, limit, offset).await?;
        let total = EndpointRow::count(&self.pool, query.status).await?;
        Ok(EndpointListResponse {
            items: rows.into_iter().map(|r| to_response(r, None)).collect(),
            total,
            limit,
            offset,
        })
    }

    /// Apply a partial update. A new secret, when provided, is re-encrypted;
    /// it is not echoed back.
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateEndpointRequest,
    ) -> Result<EndpointResponse, EngineError> {
        if let Some(url) = &request.url {
            validation::validate_endpoint_url(
                url,
                self.config.require_https,
                self.config.allow_internal_hosts,
            )?;
        }
        if let Some(events) = &request.subscribed_events {
            validation::validate_event_types(events)?;
        }
        if let Some(headers) = &request.custom_headers {
            validation::validate_custom_headers(headers)?;
        }
        validation::validate_limits(
            request.timeout_secs,
            request.max_retries,
            request.rate_limit_per_hour,
        )?;

        let secret_encrypted = match request.secret {
            Some(s) if !s.trim().is_empty() => {
                Some(crate::crypto::encrypt_secret(&s, &self.config.encryption_key)?)
            }
            _ => None,
        };

        let row = EndpointRow::update(
            &self.pool,
            id,
            UpdateEndpoint {
                url: request.url,
                secret_encrypted,
                subscribed_events: request.subscribed_events,
                timeout_secs: request.timeout_secs.map(|t| t as i64),
                max_retries: request.max_retries,
                custom_headers: request.custom_headers,
                rate_limit_per_hour: request.rate_limit_per_hour.map(i64::from),
            },
        )
        .await?
        .ok_or(EngineError::EndpointNotFound)?;

        // Replace the live bucket so the new budget takes effect now
        // rather than on restart.
        if let Some(per_hour) = request.rate_limit_per_hour {
            self.limiter
                .set_config(id, RateLimitConfig::per_hour(per_hour))
                .await;
        }

        info!(target: "webhook_endpoints", endpoint_id = %id, "endpoint updated");
        Ok(to_response(row, None))
    }

    /// Re-enable a disabled (or auto-disabled) endpoint. The failure counter
    /// resets so a single new failure cannot immediately re-disable it, and
    /// queued deliveries become eligible for dispatch again.
    pub async fn enable(&self, id: Uuid) -> Result<EndpointResponse, EngineError> {
        let row = EndpointRow::set_status(&self.pool, id, EndpointStatus::Active)
            .await?
            .ok_or(EngineError::EndpointNotFound)?;
        EndpointRow::reset_consecutive_failures(&self.pool, id).await?;

        info!(target: "webhook_endpoints", endpoint_id = %id, "endpoint enabled");
        Ok(to_response(
            EndpointRow {
                consecutive_failures: 0,
                ..row
            },
            None,
        ))
    }

    /// Disable an endpoint by operator request. Any in-flight dispatch is
    /// cancelled and its delivery returns to the queue; scheduled retries
    /// are frozen as `pending` so nothing fires while disabled.
    pub async fn disable(&self, id: Uuid) -> Result<EndpointResponse, EngineError> {
        let row = EndpointRow::set_status(&self.pool, id, EndpointStatus::Disabled)
            .await?
            .ok_or(EngineError::EndpointNotFound)?;

        self.cancels.cancel(id).await;
        let reverted = DeliveryRow::revert_queued_for_endpoint(&self.pool, id).await?;

        info!(
            target: "webhook_endpoints",
            endpoint_id = %id,
            reverted_retries = reverted,
            "endpoint disabled"
        );
        Ok(to_response(row, None))
    }

    /// Record a delivery attempt outcome against the endpoint's consecutive
    /// failure counter. Crossing the threshold auto-disables the endpoint.
    pub async fn record_outcome(&self, id: Uuid, success: bool) -> Result<(), EngineError> {
        if success {
            EndpointRow::reset_consecutive_failures(&self.pool, id).await?;
            return Ok(());
        }

        let failures = EndpointRow::increment_consecutive_failures(&self.pool, id).await?;
        if failures >= self.config.disable_threshold {
            let row = EndpointRow::find_by_id(&self.pool, id).await?;
            if row.is_some_and(|r| r.status == EndpointStatus::Active) {
                EndpointRow::set_status(&self.pool, id, EndpointStatus::AutoDisabled).await?;
                self.cancels.cancel(id).await;
                DeliveryRow::revert_queued_for_endpoint(&self.pool, id).await?;
                warn!(
                    target: "webhook_endpoints",
                    endpoint_id = %id,
                    consecutive_failures = failures,
                    "endpoint auto-disabled after repeated failures"
                );
            }
        }
        Ok(())
    }

    /// Aggregate delivery-log counters for one endpoint.
    pub async fn stats(&self, id: Uuid) -> Result<EndpointStatsResponse, EngineError> {
        // 404 on unknown endpoints rather than empty stats.
        EndpointRow::find_by_id(&self.pool, id)
            .await?
            .ok_or(EngineError::EndpointNotFound)?;

        let stats = DeliveryLogRow::endpoint_stats(&self.pool, id).await?;
        Ok(EndpointStatsResponse {
            endpoint_id: id,
            success_count: stats.success_count,
            failure_count: stats.failure_count,
            last_triggered_at: stats.last_triggered_at,
        })
    }
}

fn to_response(row: EndpointRow, secret: Option<String>) -> EndpointResponse {
    EndpointResponse {
        id: row.id,
        url: row.url,
        secret,
        subscribed_events: row.subscribed_events.0,
        status: row.status,
        timeout_secs: row.timeout_secs.max(0) as u64,
        max_retries: row.max_retries,
        rate_limit_per_hour: row.rate_limit_per_hour.and_then(|n| u32::try_from(n).ok()),
        custom_headers: row.custom_headers.0,
        consecutive_failures: row.consecutive_failures,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}
