//! Shared harness for integration tests: a fast-polling engine over an
//! in-memory database, plus wiremock responders for receiver behaviors.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use sqlx::SqlitePool;
use uuid::Uuid;
use wiremock::{Request, Respond, ResponseTemplate};

use hookrelay::models::{DeliveryStatus, EndpointResponse, RegisterEndpointRequest};
use hookrelay::store::{self, DeliveryRow};
use hookrelay::{Engine, EngineConfig, WorkerConfig};

/// A running engine with direct pool access for assertions.
pub struct TestEngine {
    pub engine: Engine,
    pub pool: SqlitePool,
}

static LOG_INIT: Once = Once::new();

/// Initialize tracing output for tests (once, only when RUST_LOG is set).
pub fn init_test_logging() {
    LOG_INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// Engine config suitable for fast tests: plain HTTP to loopback receivers
/// and a backoff schedule measured in milliseconds.
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_allow_http(true)
        .with_allow_internal_hosts(true)
        .with_backoff(Duration::from_millis(50), Duration::from_secs(2))
}

/// Start an engine with a tight poll interval over a fresh in-memory store.
pub async fn start_engine(config: EngineConfig) -> TestEngine {
    init_test_logging();
    let pool = store::connect_in_memory().await.expect("in-memory store");
    let worker = WorkerConfig {
        concurrency: 8,
        poll_interval: Duration::from_millis(25),
        batch_size: 16,
        ..WorkerConfig::default()
    };
    let engine = Engine::start(pool.clone(), config, worker).expect("engine start");
    TestEngine { engine, pool }
}

/// Register an endpoint against a mock receiver.
pub async fn register_endpoint(
    engine: &Engine,
    url: &str,
    events: &[&str],
    max_retries: i64,
) -> EndpointResponse {
    engine
        .registry()
        .register(RegisterEndpointRequest {
            id: None,
            url: url.to_string(),
            secret: None,
            subscribed_events: events.iter().map(|s| s.to_string()).collect(),
            timeout_secs: Some(5),
            max_retries: Some(max_retries),
            rate_limit_per_hour: None,
            custom_headers: Vec::new(),
        })
        .await
        .expect("endpoint registration")
}

/// Poll until the delivery reaches the wanted status, panicking after the
/// timeout with the row's actual state.
pub async fn wait_for_status(
    pool: &SqlitePool,
    delivery_id: Uuid,
    wanted: DeliveryStatus,
    timeout: Duration,
) -> DeliveryRow {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let row = DeliveryRow::find_by_id(pool, delivery_id)
            .await
            .expect("delivery lookup")
            .expect("delivery exists");
        if row.status == wanted {
            return row;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "delivery {delivery_id} stuck in {:?} (wanted {wanted:?}): {row:?}",
                row.status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Responds with a fixed sequence of status codes, repeating the last one
/// once the sequence is exhausted. Counts hits.
pub struct SequenceResponder {
    codes: Vec<u16>,
    hits: Arc<AtomicUsize>,
}

impl SequenceResponder {
    pub fn new(codes: &[u16]) -> Self {
        assert!(!codes.is_empty());
        Self {
            codes: codes.to_vec(),
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn hits(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.hits)
    }
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.hits.fetch_add(1, Ordering::SeqCst);
        let code = self.codes.get(n).copied().unwrap_or(
            *self.codes.last().expect("non-empty sequence"),
        );
        ResponseTemplate::new(code)
    }
}

/// Responds with one status code and counts hits.
pub struct CountingResponder {
    status: u16,
    hits: Arc<AtomicUsize>,
}

impl CountingResponder {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn hits(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.hits)
    }
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.hits.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.status)
    }
}

/// Responds 200 after a fixed delay; used to hold deliveries in flight.
pub struct DelayedResponder {
    delay: Duration,
    hits: Arc<AtomicUsize>,
}

impl DelayedResponder {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn hits(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.hits)
    }
}

impl Respond for DelayedResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.hits.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_delay(self.delay)
    }
}
