//! Management API router and OpenAPI document.

use axum::routing::{get, patch, post};
use axum::Router;
use utoipa::OpenApi;

use crate::handlers::{deliveries, endpoints, ApiState};

/// OpenAPI document for the management API.
#[derive(OpenApi)]
#[openapi(
    paths(
        endpoints::register_endpoint,
        endpoints::list_endpoints,
        endpoints::get_endpoint,
        endpoints::update_endpoint,
        endpoints::enable_endpoint,
        endpoints::disable_endpoint,
        endpoints::test_endpoint,
        endpoints::endpoint_stats,
        endpoints::list_event_types,
        deliveries::list_deliveries,
        deliveries::get_delivery,
        deliveries::replay_delivery,
    ),
    components(schemas(
        crate::error::ErrorResponse,
        crate::models::CustomHeader,
        crate::models::DeliveryDetailResponse,
        crate::models::DeliveryLogEntryResponse,
        crate::models::DeliveryResponse,
        crate::models::DeliveryStatus,
        crate::models::EndpointListResponse,
        crate::models::EndpointResponse,
        crate::models::EndpointStatsResponse,
        crate::models::EndpointStatus,
        crate::models::EventTypeInfo,
        crate::models::EventTypeListResponse,
        crate::models::RegisterEndpointRequest,
        crate::models::ReplayResponse,
        crate::models::TestEndpointResponse,
        crate::models::UpdateEndpointRequest,
        crate::models::WebhookEventType,
        deliveries::DeliveryListResponse,
    )),
    tags(
        (name = "webhook-endpoints", description = "Endpoint registration and lifecycle"),
        (name = "webhook-deliveries", description = "Delivery inspection and replay"),
    )
)]
pub struct ApiDoc;

/// Build the management API router.
pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/webhooks/endpoints",
            post(endpoints::register_endpoint).get(endpoints::list_endpoints),
        )
        .route(
            "/webhooks/endpoints/{id}",
            patch(endpoints::update_endpoint).get(endpoints::get_endpoint),
        )
        .route(
            "/webhooks/endpoints/{id}/enable",
            post(endpoints::enable_endpoint),
        )
        .route(
            "/webhooks/endpoints/{id}/disable",
            post(endpoints::disable_endpoint),
        )
        .route("/webhooks/endpoints/{id}/test", post(endpoints::test_endpoint))
        .route("/webhooks/endpoints/{id}/stats", get(endpoints::endpoint_stats))
        .route("/webhooks/event-types", get(endpoints::list_event_types))
        .route("/webhooks/deliveries", get(deliveries::list_deliveries))
        .route("/webhooks/deliveries/{id}", get(deliveries::get_delivery))
        .route(
            "/webhooks/deliveries/{id}/replay",
            post(deliveries::replay_delivery),
        )
        .with_state(state)
}
