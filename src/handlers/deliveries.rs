//! Delivery inspection and replay handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::error::{ApiResult, EngineError};
use crate::models::{
    DeliveryDetailResponse, DeliveryLogEntryResponse, DeliveryResponse, ListDeliveriesQuery,
    ReplayResponse,
};
use crate::store::{DeliveryLogRow, DeliveryRow};

use super::ApiState;

/// Paginated list of deliveries.
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct DeliveryListResponse {
    pub items: Vec<DeliveryResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// List deliveries, optionally filtered by endpoint and status.
#[utoipa::path(
    get,
    path = "/webhooks/deliveries",
    params(ListDeliveriesQuery),
    responses(
        (status = 200, description = "Delivery list", body = DeliveryListResponse),
    ),
    tag = "webhook-deliveries"
)]
pub async fn list_deliveries(
    State(state): State<ApiState>,
    Query(query): Query<ListDeliveriesQuery>,
) -> ApiResult<Json<DeliveryListResponse>> {
    let limit = query.limit.clamp(1, 500);
    let offset = query.offset.max(0);
    let rows =
        DeliveryRow::list(&state.pool, query.endpoint_id, query.status, limit, offset).await?;
    let total = DeliveryRow::count(&state.pool, query.endpoint_id, query.status).await?;
    Ok(Json(DeliveryListResponse {
        items: rows.into_iter().map(to_response).collect(),
        total,
        limit,
        offset,
    }))
}

/// Fetch one delivery with its payload and full attempt history.
#[utoipa::path(
    get,
    path = "/webhooks/deliveries/{id}",
    params(("id" = Uuid, Path, description = "Delivery id")),
    responses(
        (status = 200, description = "Delivery detail", body = DeliveryDetailResponse),
        (status = 404, description = "Unknown delivery", body = crate::error::ErrorResponse),
    ),
    tag = "webhook-deliveries"
)]
pub async fn get_delivery(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeliveryDetailResponse>> {
    let row = DeliveryRow::find_by_id(&state.pool, id)
        .await?
        .ok_or(EngineError::DeliveryNotFound)?;
    let history = DeliveryLogRow::history_for_delivery(&state.pool, id).await?;

    let payload = serde_json::from_str(&row.payload)
        .unwrap_or_else(|_| serde_json::Value::String(row.payload.clone()));

    Ok(Json(DeliveryDetailResponse {
        delivery: to_response(row),
        payload,
        history: history
            .into_iter()
            .map(|log| DeliveryLogEntryResponse {
                attempt_number: log.attempt_number,
                outcome: log.outcome.as_str().to_string(),
                response_code: log.response_code,
                response_time_ms: log.response_time_ms,
                error_message: log.error_message,
                retry_delay_ms: log.retry_delay_ms,
                created_at: log.created_at,
            })
            .collect(),
    }))
}

/// Replay a dead-lettered delivery as a fresh queued delivery.
#[utoipa::path(
    post,
    path = "/webhooks/deliveries/{id}/replay",
    params(("id" = Uuid, Path, description = "Delivery id")),
    responses(
        (status = 202, description = "Replay queued", body = ReplayResponse),
        (status = 400, description = "Delivery not dead-lettered or endpoint not active", body = crate::error::ErrorResponse),
        (status = 404, description = "Unknown delivery", body = crate::error::ErrorResponse),
    ),
    tag = "webhook-deliveries"
)]
pub async fn replay_delivery(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<ReplayResponse>)> {
    let response = state.events.replay(id).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

pub(crate) fn to_response(row: DeliveryRow) -> DeliveryResponse {
    DeliveryResponse {
        id: row.id,
        endpoint_id: row.endpoint_id,
        event_id: row.event_id,
        event_type: row.event_type,
        status: row.status,
        attempt_count: row.attempt_count,
        max_attempts: row.max_attempts,
        response_code: row.response_code,
        response_time_ms: row.response_time_ms,
        error_message: row.error_message,
        next_attempt_at: row.next_attempt_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}
