//! HTTP dispatch: one delivery attempt per call, classified for the
//! retry scheduler.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::EngineError;
use crate::models::EndpointStatus;
use crate::rate_limit::{RateLimitConfig, RateLimiterRegistry};
use crate::store::{DeliveryRow, EndpointRow};

/// Signature of the delivery body, hex HMAC-SHA256 over timestamp+payload.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
/// Unix timestamp covered by the signature.
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
/// The delivery's event type.
pub const EVENT_HEADER: &str = "x-webhook-event";

/// Classified result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 2xx response.
    Success { code: i64, latency_ms: i64 },
    /// 429, 5xx, timeout, or network failure; worth retrying.
    RetryableFailure {
        code: Option<i64>,
        latency_ms: Option<i64>,
        error: String,
    },
    /// Any other response (3xx, non-429 4xx); retrying will not help.
    PermanentFailure {
        code: i64,
        latency_ms: i64,
        error: String,
    },
    /// The endpoint's token bucket is empty. No request was made and no
    /// attempt is counted.
    RateLimitDeferred { retry_after: Duration },
    /// The endpoint was disabled between claim and dispatch. No request was
    /// made and no attempt is counted.
    EndpointInactive,
}

/// Signs and sends deliveries.
pub struct Dispatcher {
    client: reqwest::Client,
    limiter: RateLimiterRegistry,
    encryption_key: Vec<u8>,
}

impl Dispatcher {
    /// Build a dispatcher. The HTTP client never follows redirects: a 3xx
    /// from a receiver is classified as a permanent failure, not chased.
    pub fn new(limiter: RateLimiterRegistry, encryption_key: Vec<u8>) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| EngineError::Internal(format!("HTTP client build failed: {e}")))?;
        Ok(Self {
            client,
            limiter,
            encryption_key,
        })
    }

    /// Attempt one delivery. Consumes a rate-limit token first; when the
    /// bucket is empty, returns [`Outcome::RateLimitDeferred`] without
    /// touching the network.
    pub async fn attempt(
        &self,
        pool: &SqlitePool,
        delivery: &DeliveryRow,
    ) -> Result<Outcome, EngineError> {
        let endpoint = EndpointRow::find_by_id(pool, delivery.endpoint_id)
            .await?
            .ok_or(EngineError::EndpointNotFound)?;

        // The endpoint may have been disabled since the claim; its
        // cancellation token only covers dispatches registered before the
        // disable, so the status is checked again here.
        if endpoint.status != EndpointStatus::Active {
            debug!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                endpoint_id = %endpoint.id,
                "endpoint no longer active; dispatch skipped"
            );
            return Ok(Outcome::EndpointInactive);
        }

        let bucket_config = endpoint
            .rate_limit_per_hour
            .and_then(|n| u32::try_from(n).ok())
            .map(RateLimitConfig::per_hour);
        if !self.limiter.try_acquire_with(endpoint.id, bucket_config).await {
            let retry_after = self.limiter.time_until_available(endpoint.id).await;
            debug!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                endpoint_id = %endpoint.id,
                retry_after_ms = retry_after.as_millis() as u64,
                "dispatch deferred by rate limit"
            );
            return Ok(Outcome::RateLimitDeferred { retry_after });
        }

        let secret = crate::crypto::decrypt_secret(&endpoint.secret_encrypted, &self.encryption_key)?;
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = crate::crypto::sign(&secret, &timestamp, delivery.payload.as_bytes());

        let headers = build_headers(&endpoint, &timestamp, &signature, &delivery.event_type)?;
        let timeout = Duration::from_secs(endpoint.timeout_secs.max(1) as u64);

        let started = Instant::now();
        let result = self
            .client
            .post(&endpoint.url)
            .headers(headers)
            .timeout(timeout)
            .body(delivery.payload.clone())
            .send()
            .await;
        let latency_ms = started.elapsed().as_millis() as i64;

        let outcome = match result {
            Ok(response) => classify(response.status(), latency_ms),
            Err(e) if e.is_timeout() => Outcome::RetryableFailure {
                code: None,
                latency_ms: Some(latency_ms),
                error: format!("request timed out after {}s", timeout.as_secs()),
            },
            Err(e) => Outcome::RetryableFailure {
                code: None,
                latency_ms: Some(latency_ms),
                error: format!("request failed: {e}"),
            },
        };

        debug!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            endpoint_id = %endpoint.id,
            attempt = delivery.attempt_count + 1,
            outcome = ?outcome_kind(&outcome),
            latency_ms,
            "dispatch attempt finished"
        );
        Ok(outcome)
    }
}

/// Map a response status to an outcome. 2xx succeeds; 429 and 5xx are
/// retryable; everything else is permanent.
fn classify(status: reqwest::StatusCode, latency_ms: i64) -> Outcome {
    let code = i64::from(status.as_u16());
    if status.is_success() {
        Outcome::Success { code, latency_ms }
    } else if status.as_u16() == 429 || status.is_server_error() {
        Outcome::RetryableFailure {
            code: Some(code),
            latency_ms: Some(latency_ms),
            error: format!("received status {code}"),
        }
    } else {
        Outcome::PermanentFailure {
            code,
            latency_ms,
            error: format!("received status {code}"),
        }
    }
}

fn build_headers(
    endpoint: &EndpointRow,
    timestamp: &str,
    signature: &str,
    event_type: &str,
) -> Result<HeaderMap, EngineError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static(SIGNATURE_HEADER),
        header_value(signature)?,
    );
    headers.insert(
        HeaderName::from_static(TIMESTAMP_HEADER),
        header_value(timestamp)?,
    );
    headers.insert(HeaderName::from_static(EVENT_HEADER), header_value(event_type)?);

    // Custom headers were validated at registration time.
    for custom in &endpoint.custom_headers.0 {
        let name = HeaderName::from_bytes(custom.name.as_bytes())
            .map_err(|e| EngineError::Internal(format!("bad custom header name: {e}")))?;
        headers.insert(name, header_value(&custom.value)?);
    }
    Ok(headers)
}

fn header_value(value: &str) -> Result<HeaderValue, EngineError> {
    HeaderValue::from_str(value)
        .map_err(|e| EngineError::Internal(format!("bad header value: {e}")))
}

fn outcome_kind(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Success { .. } => "success",
        Outcome::RetryableFailure { .. } => "retryable_failure",
        Outcome::PermanentFailure { .. } => "permanent_failure",
        Outcome::RateLimitDeferred { .. } => "rate_limit_deferred",
        Outcome::EndpointInactive => "endpoint_inactive",
    }
}
