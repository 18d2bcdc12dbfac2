//! Per-endpoint ordering, single-in-flight, cancellation on disable, and
//! cross-endpoint independence.

mod common;

use std::time::Duration;

use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{fast_config, register_endpoint, start_engine, wait_for_status, DelayedResponder};
use hookrelay::models::{DeliveryStatus, WebhookEvent};
use hookrelay::store::{DeliveryLogRow, DeliveryRow};

#[tokio::test]
async fn deliveries_arrive_in_submission_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = start_engine(fast_config()).await;
    register_endpoint(&harness.engine, &server.uri(), &["member.created"], 1).await;

    let mut event_ids = Vec::new();
    let mut delivery_ids = Vec::new();
    for n in 0..5 {
        let event = WebhookEvent::new("member.created", serde_json::json!({"n": n}));
        event_ids.push(event.event_id.to_string());
        let deliveries = harness.engine.publish(&event).await.unwrap();
        delivery_ids.push(deliveries[0].id);
    }

    for id in &delivery_ids {
        wait_for_status(&harness.pool, *id, DeliveryStatus::Succeeded, Duration::from_secs(10))
            .await;
    }

    let requests = server.received_requests().await.unwrap();
    let received: Vec<String> = requests
        .iter()
        .map(|r| {
            let envelope: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            envelope["event_id"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(received, event_ids);
}

#[tokio::test]
async fn at_most_one_delivery_in_flight_per_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(DelayedResponder::new(Duration::from_millis(200)))
        .mount(&server)
        .await;

    let harness = start_engine(fast_config()).await;
    let endpoint = register_endpoint(&harness.engine, &server.uri(), &["member.created"], 1).await;

    let mut delivery_ids = Vec::new();
    for n in 0..3 {
        let event = WebhookEvent::new("member.created", serde_json::json!({"n": n}));
        delivery_ids.push(harness.engine.publish(&event).await.unwrap()[0].id);
    }

    // Sample the in-flight count while the queue drains.
    let sampler = {
        let pool = harness.pool.clone();
        let endpoint_id = endpoint.id;
        tokio::spawn(async move {
            let mut max_in_flight = 0i64;
            for _ in 0..80 {
                let n = DeliveryRow::count_in_flight_for_endpoint(&pool, endpoint_id)
                    .await
                    .unwrap();
                max_in_flight = max_in_flight.max(n);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            max_in_flight
        })
    };

    for id in &delivery_ids {
        wait_for_status(&harness.pool, *id, DeliveryStatus::Succeeded, Duration::from_secs(10))
            .await;
    }
    let max_in_flight = sampler.await.unwrap();
    assert!(max_in_flight <= 1, "saw {max_in_flight} concurrent dispatches");
}

#[tokio::test]
async fn endpoints_do_not_block_each_other() {
    let slow_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(DelayedResponder::new(Duration::from_secs(2)))
        .mount(&slow_server)
        .await;
    let fast_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&fast_server)
        .await;

    let harness = start_engine(fast_config()).await;
    register_endpoint(&harness.engine, &slow_server.uri(), &["member.created"], 1).await;
    let fast = register_endpoint(&harness.engine, &fast_server.uri(), &["member.created"], 1).await;

    let event = WebhookEvent::new("member.created", serde_json::json!({}));
    let deliveries = harness.engine.publish(&event).await.unwrap();
    assert_eq!(deliveries.len(), 2);

    let fast_delivery = deliveries
        .iter()
        .find(|d| d.endpoint_id == fast.id)
        .unwrap();
    let slow_delivery = deliveries
        .iter()
        .find(|d| d.endpoint_id != fast.id)
        .unwrap();

    // The fast endpoint finishes while the slow one is still mid-request.
    wait_for_status(
        &harness.pool,
        fast_delivery.id,
        DeliveryStatus::Succeeded,
        Duration::from_secs(1),
    )
    .await;
    let slow_row = DeliveryRow::find_by_id(&harness.pool, slow_delivery.id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(slow_row.status, DeliveryStatus::Succeeded);

    wait_for_status(
        &harness.pool,
        slow_delivery.id,
        DeliveryStatus::Succeeded,
        Duration::from_secs(10),
    )
    .await;
}

#[tokio::test]
async fn disabling_cancels_in_flight_and_preserves_the_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(DelayedResponder::new(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let harness = start_engine(fast_config()).await;
    let endpoint = register_endpoint(&harness.engine, &server.uri(), &["member.created"], 2).await;

    let event = WebhookEvent::new("member.created", serde_json::json!({}));
    let delivery_id = harness.engine.publish(&event).await.unwrap()[0].id;

    // Wait until the dispatch is actually in flight.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let row = DeliveryRow::find_by_id(&harness.pool, delivery_id)
            .await
            .unwrap()
            .unwrap();
        if row.status == DeliveryStatus::InFlight {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "dispatch never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    harness.engine.registry().disable(endpoint.id).await.unwrap();

    // The cancelled dispatch returns the delivery to pending, uncounted.
    let row = wait_for_status(
        &harness.pool,
        delivery_id,
        DeliveryStatus::Pending,
        Duration::from_secs(2),
    )
    .await;
    assert_eq!(row.attempt_count, 0);

    // No attempt was recorded for the aborted request.
    let history = DeliveryLogRow::history_for_delivery(&harness.pool, delivery_id)
        .await
        .unwrap();
    assert!(history.is_empty());

    // It stays parked while the endpoint is disabled.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let row = DeliveryRow::find_by_id(&harness.pool, delivery_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, DeliveryStatus::Pending);

    // Re-enabling resumes it; the receiver eventually answers.
    harness.engine.registry().enable(endpoint.id).await.unwrap();
    let row = wait_for_status(
        &harness.pool,
        delivery_id,
        DeliveryStatus::Succeeded,
        Duration::from_secs(10),
    )
    .await;
    assert_eq!(row.attempt_count, 1);
}
