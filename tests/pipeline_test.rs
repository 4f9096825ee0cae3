//! Integration tests for the collection pipeline.
//!
//! These tests drive the real processor and sender against a mock
//! ingestion endpoint and verify batching, retry accounting,
//! cancellation and lifecycle behavior end to end.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sysflow_collector::collector::{Collector, LoopState};
use sysflow_collector::config::Config;
use sysflow_collector::error::SenderError;
use sysflow_collector::metrics::RuntimeMetrics;
use sysflow_collector::processor::Processor;
use sysflow_collector::schema::{ProcessedItem, RawItem};
use sysflow_collector::sender::Sender;
use sysflow_collector::source::CollectionSource;

const INGEST_PATH: &str = "/api/v1/metrics";

fn test_config(endpoint: &str, batch_size: usize, retries: u32) -> Config {
    Config::from_json(&format!(
        r#"{{
            "api": {{ "endpoint": "{endpoint}", "timeout_ms": 2000, "retries": {retries} }},
            "collection": {{ "interval_ms": 100, "batch_size": {batch_size}, "workers": 4, "queue_depth": 64 }}
        }}"#
    ))
    .expect("test config must parse")
}

fn numbered_items(count: usize, kind: &str) -> Vec<RawItem> {
    (0..count)
        .map(|seq| {
            let mut fields = Map::new();
            fields.insert("seq".to_string(), json!(seq));
            RawItem::new(kind, fields)
        })
        .collect()
}

fn build_sender(config: &Config, cancel: CancellationToken) -> Sender {
    Sender::new(config, Arc::new(RuntimeMetrics::default()), cancel)
        .expect("sender must build")
}

async fn processed_items(config: &Config, count: usize) -> Vec<ProcessedItem> {
    let processor = Processor::new(
        config,
        Arc::new(RuntimeMetrics::default()),
        CancellationToken::new(),
    );
    processor.start().expect("processor must start");
    let output = processor
        .process(numbered_items(count, "system"))
        .await
        .expect("processing must succeed");
    processor.shutdown().await;
    output
}

/// A deterministic in-memory source for lifecycle tests.
struct CountingSource {
    items_per_cycle: usize,
    collects: AtomicUsize,
}

#[async_trait]
impl CollectionSource for CountingSource {
    async fn collect(&self) -> anyhow::Result<Vec<RawItem>> {
        self.collects.fetch_add(1, Ordering::SeqCst);
        Ok(numbered_items(self.items_per_cycle, "system"))
    }
}

/// A source that fails every other collect call.
struct FlakySource {
    collects: AtomicUsize,
}

#[async_trait]
impl CollectionSource for FlakySource {
    async fn collect(&self) -> anyhow::Result<Vec<RawItem>> {
        let call = self.collects.fetch_add(1, Ordering::SeqCst);
        if call % 2 == 0 {
            anyhow::bail!("transient source failure");
        }
        Ok(numbered_items(2, "system"))
    }
}

/// A source that stalls long enough to pin a cycle in flight.
struct StallingSource;

#[async_trait]
impl CollectionSource for StallingSource {
    async fn collect(&self) -> anyhow::Result<Vec<RawItem>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

// ------------------------------------------------------------
// End-to-end: 250 items, batch size 100
// ------------------------------------------------------------

#[tokio::test]
async fn two_hundred_fifty_items_ship_as_three_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let config = test_config(&server.uri(), 100, 3);
    let metrics = Arc::new(RuntimeMetrics::default());

    let processed = processed_items(&config, 250).await;
    assert_eq!(processed.len(), 250, "identity transform keeps all items");

    let sender = Sender::new(&config, metrics.clone(), CancellationToken::new()).unwrap();
    sender.send(processed).await.expect("no batch may fail");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);

    let mut batch_ids = HashSet::new();
    let mut sizes = Vec::new();
    for request in &requests {
        let body: Value = request.body_json().unwrap();
        batch_ids.insert(body["batch_id"].as_str().unwrap().to_string());
        sizes.push(body["data"].as_array().unwrap().len());
        assert!(body["timestamp"].is_i64());
        assert_eq!(
            request
                .headers
                .get("content-type")
                .unwrap()
                .to_str()
                .unwrap(),
            "application/json"
        );
        assert!(
            request
                .headers
                .get("user-agent")
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("sysflow-collector/")
        );
    }

    assert_eq!(batch_ids.len(), 3, "batch ids must be distinct");
    sizes.sort_unstable();
    assert_eq!(sizes, vec![50, 100, 100]);

    assert_eq!(metrics.batches_sent.load(Ordering::Relaxed), 3);
    assert_eq!(metrics.batches_failed.load(Ordering::Relaxed), 0);
}

// ------------------------------------------------------------
// Retry protocol
// ------------------------------------------------------------

#[tokio::test]
async fn always_failing_sink_exhausts_exactly_retries_plus_one_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let config = test_config(&server.uri(), 100, 2);
    let metrics = Arc::new(RuntimeMetrics::default());
    let sender = Sender::new(&config, metrics.clone(), CancellationToken::new()).unwrap();

    let items = processed_items(&config, 5).await;
    let started = Instant::now();
    let result = sender.send(items).await;

    // Linear backoff sleeps 1s then 2s between the three attempts.
    assert!(
        started.elapsed() >= Duration::from_secs(3),
        "backoff schedule was shorter than 1s + 2s"
    );

    match result {
        Err(SenderError::BatchesFailed { failed, total }) => {
            assert_eq!(failed, 1);
            assert_eq!(total, 1);
        }
        other => panic!("expected BatchesFailed, got {other:?}"),
    }

    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert_eq!(metrics.send_retries.load(Ordering::Relaxed), 2);
    assert_eq!(metrics.batches_failed.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn successful_delivery_never_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri(), 100, 5);
    let metrics = Arc::new(RuntimeMetrics::default());
    let sender = Sender::new(&config, metrics.clone(), CancellationToken::new()).unwrap();

    let items = processed_items(&config, 5).await;
    sender.send(items).await.unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(metrics.send_retries.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn batch_outcomes_are_independent() {
    let server = MockServer::start().await;

    // Two delivery batches of one item each, told apart by their
    // type tag: "alpha" items are rejected, "beta" items accepted.
    Mock::given(method("POST"))
        .and(path(INGEST_PATH))
        .and(body_string_contains("alpha"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(INGEST_PATH))
        .and(body_string_contains("beta"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = test_config(&server.uri(), 1, 0);
    let metrics = Arc::new(RuntimeMetrics::default());
    let sender = Sender::new(&config, metrics.clone(), CancellationToken::new()).unwrap();

    let mut items = numbered_items(1, "alpha");
    items.extend(numbered_items(1, "beta"));
    let processed: Vec<ProcessedItem> =
        items.into_iter().map(ProcessedItem::from_raw).collect();

    let result = sender.send(processed).await;
    match result {
        Err(SenderError::BatchesFailed { failed, total }) => {
            assert_eq!(failed, 1, "only the alpha batch may fail");
            assert_eq!(total, 2);
        }
        other => panic!("expected BatchesFailed, got {other:?}"),
    }

    assert_eq!(metrics.batches_sent.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.batches_failed.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn cancellation_interrupts_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    // Ten retries would mean 55 seconds of backoff if the sleep
    // ignored cancellation.
    let config = test_config(&server.uri(), 100, 10);
    let cancel = CancellationToken::new();
    let sender = build_sender(&config, cancel.clone());

    let items = processed_items(&config, 5).await;

    let started = Instant::now();
    let send = tokio::spawn(async move { sender.send(items).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    let result = send.await.unwrap();
    assert!(result.is_err(), "cancelled delivery must count as failed");
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancellation must not wait out the retry ceiling"
    );

    // Only the pre-backoff attempt reached the wire.
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

// ------------------------------------------------------------
// Lifecycle
// ------------------------------------------------------------

#[tokio::test]
async fn collector_runs_cycles_and_stops_cleanly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = Arc::new(test_config(&server.uri(), 100, 0));
    let metrics = Arc::new(RuntimeMetrics::default());
    let source = Arc::new(CountingSource {
        items_per_cycle: 3,
        collects: AtomicUsize::new(0),
    });

    let mut collector = Collector::new(config, source.clone(), metrics.clone()).unwrap();
    assert_eq!(collector.state(), LoopState::Idle);

    collector.start().await.unwrap();
    assert_eq!(collector.state(), LoopState::Running);

    // Interval is 100ms; let a few cycles run.
    tokio::time::sleep(Duration::from_millis(450)).await;
    collector.shutdown(Duration::from_secs(2)).await;

    assert_eq!(collector.state(), LoopState::Stopped);
    assert!(source.collects.load(Ordering::SeqCst) >= 2);
    assert!(metrics.cycles_completed.load(Ordering::Relaxed) >= 2);
    assert_eq!(metrics.cycles_failed.load(Ordering::Relaxed), 0);
    assert!(!server.received_requests().await.unwrap().is_empty());

    let cycles = source.collects.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(
        source.collects.load(Ordering::SeqCst),
        cycles,
        "no cycle may start after shutdown"
    );
}

#[tokio::test]
async fn failed_cycles_do_not_stop_the_loop() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = Arc::new(test_config(&server.uri(), 100, 0));
    let metrics = Arc::new(RuntimeMetrics::default());
    let source = Arc::new(FlakySource {
        collects: AtomicUsize::new(0),
    });

    let mut collector = Collector::new(config, source.clone(), metrics.clone()).unwrap();
    collector.start().await.unwrap();

    // Interval is 100ms and the source fails every other collect;
    // give the loop room for a handful of cycles of each outcome.
    tokio::time::sleep(Duration::from_millis(650)).await;
    collector.shutdown(Duration::from_secs(2)).await;

    assert_eq!(collector.state(), LoopState::Stopped);
    assert!(
        metrics.cycles_failed.load(Ordering::Relaxed) >= 2,
        "the flaky source must have failed some cycles"
    );
    assert!(
        metrics.cycles_completed.load(Ordering::Relaxed) >= 2,
        "cycles after a failure must keep running"
    );
    assert!(
        !server.received_requests().await.unwrap().is_empty(),
        "successful cycles must still reach the sink"
    );
}

#[tokio::test]
async fn shutdown_never_hangs_past_the_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = Arc::new(test_config(&server.uri(), 100, 0));
    let metrics = Arc::new(RuntimeMetrics::default());

    let mut collector =
        Collector::new(config, Arc::new(StallingSource), metrics).unwrap();
    collector.start().await.unwrap();

    // Let the loop enter a cycle that stalls inside the source.
    tokio::time::sleep(Duration::from_millis(250)).await;

    let started = Instant::now();
    collector.shutdown(Duration::from_millis(300)).await;

    assert!(
        started.elapsed() < Duration::from_secs(2),
        "shutdown exceeded its deadline"
    );
    assert_eq!(collector.state(), LoopState::Stopped);
}

#[tokio::test]
async fn start_is_single_shot() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = Arc::new(test_config(&server.uri(), 100, 0));
    let metrics = Arc::new(RuntimeMetrics::default());
    let source = Arc::new(CountingSource {
        items_per_cycle: 1,
        collects: AtomicUsize::new(0),
    });

    let mut collector = Collector::new(config, source, metrics.clone()).unwrap();
    collector.start().await.unwrap();

    // A second start must fail at the processor and propagate
    // without disturbing the running pipeline.
    assert!(collector.start().await.is_err());

    tokio::time::sleep(Duration::from_millis(250)).await;
    collector.shutdown(Duration::from_secs(2)).await;

    assert_eq!(collector.state(), LoopState::Stopped);
    assert!(metrics.cycles_completed.load(Ordering::Relaxed) >= 1);
}

#[tokio::test]
async fn invalid_endpoint_aborts_startup() {
    // An unparseable endpoint passes from_json's emptiness check
    // but must fail URL parsing when the sender is built.
    let mut broken = test_config("http://localhost:9", 100, 0);
    broken.api.endpoint = "not a url at all".to_string();

    let result = Collector::new(
        Arc::new(broken),
        Arc::new(StallingSource),
        Arc::new(RuntimeMetrics::default()),
    );
    assert!(result.is_err(), "startup must fail fast on a bad endpoint");
}
