//! Domain model: status enums, the event-type catalogue, and the request and
//! response types of the management API.
//!
//! Status values are closed enums so illegal state transitions are
//! unrepresentable; the persistence layer stores their snake_case form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Endpoint status
// ---------------------------------------------------------------------------

/// Lifecycle status of a registered endpoint.
///
/// Only `Active` endpoints receive new delivery attempts. `AutoDisabled` is
/// set by the engine after the consecutive-failure threshold is exceeded;
/// both disabled states require an explicit operator enable to leave.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, sqlx::Type, ToSchema,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    #[default]
    Active,
    Disabled,
    AutoDisabled,
}

impl EndpointStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::AutoDisabled => "auto_disabled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "disabled" => Some(Self::Disabled),
            "auto_disabled" => Some(Self::AutoDisabled),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery status
// ---------------------------------------------------------------------------

/// State machine position of a delivery attempt record.
///
/// `Pending -> InFlight -> {Succeeded | RetryWait -> InFlight | DeadLettered}`.
/// `Succeeded` and `DeadLettered` are terminal; such records never mutate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, sqlx::Type, ToSchema,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    InFlight,
    Succeeded,
    RetryWait,
    DeadLettered,
}

impl DeliveryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::RetryWait => "retry_wait",
            Self::DeadLettered => "dead_lettered",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "succeeded" => Some(Self::Succeeded),
            "retry_wait" => Some(Self::RetryWait),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }

    /// Terminal records are immutable.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::DeadLettered)
    }
}

// ---------------------------------------------------------------------------
// Event type catalogue
// ---------------------------------------------------------------------------

/// Known domain event types that endpoints may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    MemberCreated,
    MemberUpdated,
    MemberDeleted,
    DonationReceived,
    EventPublished,
    FeedbackSubmitted,
    TestPing,
}

impl WebhookEventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemberCreated => "member.created",
            Self::MemberUpdated => "member.updated",
            Self::MemberDeleted => "member.deleted",
            Self::DonationReceived => "donation.received",
            Self::EventPublished => "event.published",
            Self::FeedbackSubmitted => "feedback.submitted",
            Self::TestPing => "test.ping",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "member.created" => Some(Self::MemberCreated),
            "member.updated" => Some(Self::MemberUpdated),
            "member.deleted" => Some(Self::MemberDeleted),
            "donation.received" => Some(Self::DonationReceived),
            "event.published" => Some(Self::EventPublished),
            "feedback.submitted" => Some(Self::FeedbackSubmitted),
            "test.ping" => Some(Self::TestPing),
            _ => None,
        }
    }

    /// All known event types.
    #[must_use]
    pub fn all() -> &'static [WebhookEventType] {
        &[
            Self::MemberCreated,
            Self::MemberUpdated,
            Self::MemberDeleted,
            Self::DonationReceived,
            Self::EventPublished,
            Self::FeedbackSubmitted,
            Self::TestPing,
        ]
    }

    /// Human-readable description for the event-type listing.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::MemberCreated => "A member record was created",
            Self::MemberUpdated => "A member record was updated",
            Self::MemberDeleted => "A member record was deleted",
            Self::DonationReceived => "A donation was recorded",
            Self::EventPublished => "A calendar event was published",
            Self::FeedbackSubmitted => "Feedback was submitted",
            Self::TestPing => "Synthetic event emitted by endpoint tests",
        }
    }
}

// ---------------------------------------------------------------------------
// Domain event
// ---------------------------------------------------------------------------

/// A domain event entering the engine for fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl WebhookEvent {
    /// Create a new event with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(event_type: &str, data: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// A single custom header attached to every delivery for an endpoint.
///
/// Kept as a sequence rather than a map so header order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CustomHeader {
    pub name: String,
    pub value: String,
}

// ---------------------------------------------------------------------------
// Management API: endpoint requests/responses
// ---------------------------------------------------------------------------

/// Request body for endpoint registration.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegisterEndpointRequest {
    /// Client-supplied id; generated when absent.
    pub id: Option<Uuid>,
    pub url: String,
    /// Signing secret; generated when absent or blank.
    pub secret: Option<String>,
    pub subscribed_events: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<i64>,
    /// Hourly delivery budget override; the engine default applies when absent.
    pub rate_limit_per_hour: Option<u32>,
    #[serde(default)]
    pub custom_headers: Vec<CustomHeader>,
}

/// Request body for endpoint updates. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateEndpointRequest {
    pub url: Option<String>,
    pub secret: Option<String>,
    pub subscribed_events: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<i64>,
    pub rate_limit_per_hour: Option<u32>,
    pub custom_headers: Option<Vec<CustomHeader>>,
}

/// API view of a registered endpoint. The secret is returned only once,
/// in the registration response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EndpointResponse {
    pub id: Uuid,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub subscribed_events: Vec<String>,
    pub status: EndpointStatus,
    pub timeout_secs: u64,
    pub max_retries: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_hour: Option<u32>,
    pub custom_headers: Vec<CustomHeader>,
    pub consecutive_failures: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Query parameters for endpoint listing.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ListEndpointsQuery {
    pub status: Option<EndpointStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Default for ListEndpointsQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// Paginated endpoint list.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EndpointListResponse {
    pub items: Vec<EndpointResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Per-endpoint delivery-log counters.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EndpointStatsResponse {
    pub endpoint_id: Uuid,
    pub success_count: i64,
    pub failure_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// Event-type catalogue entry.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventTypeInfo {
    pub name: String,
    pub description: String,
}

/// Event-type catalogue response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventTypeListResponse {
    pub event_types: Vec<EventTypeInfo>,
}

// ---------------------------------------------------------------------------
// Management API: delivery requests/responses
// ---------------------------------------------------------------------------

/// Query parameters for delivery listing.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ListDeliveriesQuery {
    pub endpoint_id: Option<Uuid>,
    pub status: Option<DeliveryStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Default for ListDeliveriesQuery {
    fn default() -> Self {
        Self {
            endpoint_id: None,
            status: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// API view of a delivery record.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeliveryResponse {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub status: DeliveryStatus,
    pub attempt_count: i64,
    pub max_attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of a delivery's audit history.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeliveryLogEntryResponse {
    pub attempt_number: i64,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Full view of a single delivery: record, payload, and attempt history.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeliveryDetailResponse {
    #[serde(flatten)]
    pub delivery: DeliveryResponse,
    pub payload: serde_json::Value,
    pub history: Vec<DeliveryLogEntryResponse>,
}

/// Response from the replay operation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReplayResponse {
    pub delivery_id: Uuid,
    pub status: DeliveryStatus,
    pub message: String,
}

/// Response from the endpoint test operation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TestEndpointResponse {
    pub delivery_id: Uuid,
    pub message: String,
}

fn default_limit() -> i64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_status_round_trip() {
        for status in [
            EndpointStatus::Active,
            EndpointStatus::Disabled,
            EndpointStatus::AutoDisabled,
        ] {
            assert_eq!(EndpointStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EndpointStatus::parse("bogus"), None);
    }

    #[test]
    fn delivery_status_round_trip() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::InFlight,
            DeliveryStatus::Succeeded,
            DeliveryStatus::RetryWait,
            DeliveryStatus::DeadLettered,
        ] {
            assert_eq!(DeliveryStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(DeliveryStatus::Succeeded.is_terminal());
        assert!(DeliveryStatus::DeadLettered.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::InFlight.is_terminal());
        assert!(!DeliveryStatus::RetryWait.is_terminal());
    }

    #[test]
    fn event_type_round_trip() {
        for et in WebhookEventType::all() {
            assert_eq!(WebhookEventType::parse(et.as_str()), Some(*et));
        }
        assert_eq!(WebhookEventType::parse("unknown.event"), None);
    }

    #[test]
    fn webhook_event_new_fills_metadata() {
        let event = WebhookEvent::new("member.created", serde_json::json!({"id": 7}));
        assert_eq!(event.event_type, "member.created");
        assert_eq!(event.data["id"], 7);
    }
}
