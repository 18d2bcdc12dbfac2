//! Endpoint management handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{
    EndpointListResponse, EndpointResponse, EndpointStatsResponse, EventTypeInfo,
    EventTypeListResponse, ListEndpointsQuery, RegisterEndpointRequest, TestEndpointResponse,
    UpdateEndpointRequest, WebhookEventType,
};

use super::ApiState;

/// Register a new webhook endpoint.
///
/// The signing secret is returned only in this response; store it.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints",
    request_body = RegisterEndpointRequest,
    responses(
        (status = 201, description = "Endpoint registered", body = EndpointResponse),
        (status = 400, description = "Invalid URL, event type, or header", body = crate::error::ErrorResponse),
        (status = 409, description = "Endpoint id already registered", body = crate::error::ErrorResponse),
    ),
    tag = "webhook-endpoints"
)]
pub async fn register_endpoint(
    State(state): State<ApiState>,
    Json(request): Json<RegisterEndpointRequest>,
) -> ApiResult<(StatusCode, Json<EndpointResponse>)> {
    let response = state.registry.register(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// List registered endpoints.
#[utoipa::path(
    get,
    path = "/webhooks/endpoints",
    params(ListEndpointsQuery),
    responses(
        (status = 200, description = "Endpoint list", body = EndpointListResponse),
    ),
    tag = "webhook-endpoints"
)]
pub async fn list_endpoints(
    State(state): State<ApiState>,
    Query(query): Query<ListEndpointsQuery>,
) -> ApiResult<Json<EndpointListResponse>> {
    Ok(Json(state.registry.list(query).await?))
}

/// Fetch one endpoint.
#[utoipa::path(
    get,
    path = "/webhooks/endpoints/{id}",
    params(("id" = Uuid, Path, description = "Endpoint id")),
    responses(
        (status = 200, description = "Endpoint", body = EndpointResponse),
        (status = 404, description = "Unknown endpoint", body = crate::error::ErrorResponse),
    ),
    tag = "webhook-endpoints"
)]
pub async fn get_endpoint(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EndpointResponse>> {
    Ok(Json(state.registry.get(id).await?))
}

/// Update endpoint fields. Absent fields are left unchanged.
#[utoipa::path(
    patch,
    path = "/webhooks/endpoints/{id}",
    params(("id" = Uuid, Path, description = "Endpoint id")),
    request_body = UpdateEndpointRequest,
    responses(
        (status = 200, description = "Updated endpoint", body = EndpointResponse),
        (status = 400, description = "Invalid field", body = crate::error::ErrorResponse),
        (status = 404, description = "Unknown endpoint", body = crate::error::ErrorResponse),
    ),
    tag = "webhook-endpoints"
)]
pub async fn update_endpoint(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateEndpointRequest>,
) -> ApiResult<Json<EndpointResponse>> {
    Ok(Json(state.registry.update(id, request).await?))
}

/// Enable a disabled or auto-disabled endpoint.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints/{id}/enable",
    params(("id" = Uuid, Path, description = "Endpoint id")),
    responses(
        (status = 200, description = "Endpoint enabled", body = EndpointResponse),
        (status = 404, description = "Unknown endpoint", body = crate::error::ErrorResponse),
    ),
    tag = "webhook-endpoints"
)]
pub async fn enable_endpoint(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EndpointResponse>> {
    Ok(Json(state.registry.enable(id).await?))
}

/// Disable an endpoint. Cancels any in-flight dispatch and freezes its queue.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints/{id}/disable",
    params(("id" = Uuid, Path, description = "Endpoint id")),
    responses(
        (status = 200, description = "Endpoint disabled", body = EndpointResponse),
        (status = 404, description = "Unknown endpoint", body = crate::error::ErrorResponse),
    ),
    tag = "webhook-endpoints"
)]
pub async fn disable_endpoint(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EndpointResponse>> {
    Ok(Json(state.registry.disable(id).await?))
}

/// Queue a synthetic test delivery to an endpoint.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints/{id}/test",
    params(("id" = Uuid, Path, description = "Endpoint id")),
    responses(
        (status = 202, description = "Test delivery queued", body = TestEndpointResponse),
        (status = 400, description = "Endpoint not active", body = crate::error::ErrorResponse),
        (status = 404, description = "Unknown endpoint", body = crate::error::ErrorResponse),
    ),
    tag = "webhook-endpoints"
)]
pub async fn test_endpoint(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<TestEndpointResponse>)> {
    let response = state.events.test_endpoint(id).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Delivery statistics for one endpoint.
#[utoipa::path(
    get,
    path = "/webhooks/endpoints/{id}/stats",
    params(("id" = Uuid, Path, description = "Endpoint id")),
    responses(
        (status = 200, description = "Endpoint statistics", body = EndpointStatsResponse),
        (status = 404, description = "Unknown endpoint", body = crate::error::ErrorResponse),
    ),
    tag = "webhook-endpoints"
)]
pub async fn endpoint_stats(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EndpointStatsResponse>> {
    Ok(Json(state.registry.stats(id).await?))
}

/// List the event types endpoints may subscribe to.
#[utoipa::path(
    get,
    path = "/webhooks/event-types",
    responses(
        (status = 200, description = "Event type catalogue", body = EventTypeListResponse),
    ),
    tag = "webhook-endpoints"
)]
pub async fn list_event_types() -> Json<EventTypeListResponse> {
    Json(EventTypeListResponse {
        event_types: WebhookEventType::all()
            .iter()
            .map(|et| EventTypeInfo {
                name: et.as_str().to_string(),
                description: et.description().to_string(),
            })
            .collect(),
    })
}
