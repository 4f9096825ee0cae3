use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures_util::future::join_all;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{DeliveryError, SenderError};
use crate::metrics::RuntimeMetrics;
use crate::schema::{DeliveryEnvelope, ProcessedItem, PRODUCER};

/// ============================================================
/// Sender
/// ============================================================
///
/// Ships processed items to the remote ingestion endpoint.
///
/// Responsibilities:
/// - Split a processed batch into bounded delivery batches
/// - Dispatch all delivery batches concurrently
/// - Retry failed deliveries with linear backoff
/// - Aggregate per-batch failures into one result
///
/// Design constraints:
/// - `send` joins every delivery before returning; there is no
///   partial return and no delivery outliving the call
/// - A backoff sleep races the shutdown signal, so a retry
///   sequence never pins shutdown to the full retry ceiling
/// - The in-flight HTTP request itself is bounded only by the
///   configured request timeout
pub struct Sender {
    endpoint: String,
    retries: u32,
    batch_size: usize,
    client: reqwest::Client,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,
}

impl Sender {
    /// Builds the sender and its HTTP client.
    ///
    /// Fails on an invalid endpoint URL or client construction
    /// failure; both abort startup.
    pub fn new(
        config: &Config,
        metrics: Arc<RuntimeMetrics>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        reqwest::Url::parse(&config.api.endpoint)
            .with_context(|| format!("invalid ingestion endpoint {:?}", config.api.endpoint))?;

        let client = reqwest::Client::builder()
            .timeout(config.api.timeout())
            .user_agent(format!("{}/{}", PRODUCER, env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            endpoint: config.api.endpoint.trim_end_matches('/').to_string(),
            retries: config.api.retries,
            batch_size: config.collection.batch_size,
            client,
            metrics,
            cancel,
        })
    }

    pub fn start(&self) -> anyhow::Result<()> {
        log::info!(
            "sender ready: endpoint {}, {} retries per batch",
            self.endpoint,
            self.retries,
        );
        Ok(())
    }

    /// Sends one cycle's processed items.
    ///
    /// All delivery batches are dispatched concurrently and joined
    /// before returning. Relative ordering between batches on the
    /// wire is not guaranteed.
    ///
    /// Returns the aggregate failure count as an error; the caller
    /// treats it as a logged, non-fatal cycle error.
    pub async fn send(&self, items: Vec<ProcessedItem>) -> Result<(), SenderError> {
        if items.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let item_count = items.len();

        let batches = split_into_deliveries(items, self.batch_size);
        let total = batches.len();

        let results = join_all(
            batches
                .into_iter()
                .enumerate()
                .map(|(index, batch)| self.deliver(index, batch)),
        )
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        self.metrics
            .batches_sent
            .fetch_add(total - failed, Ordering::Relaxed);
        self.metrics.batches_failed.fetch_add(failed, Ordering::Relaxed);

        if failed > 0 {
            log::error!("{failed} of {total} delivery batches failed");
            return Err(SenderError::BatchesFailed { failed, total });
        }

        log::debug!(
            "sent {item_count} items in {total} batches ({:?})",
            started.elapsed(),
        );
        Ok(())
    }

    /// Runs the retry sequence for one delivery batch.
    ///
    /// Protocol:
    /// - Build the envelope once; retries reuse it
    /// - At most `retries + 1` attempts, stopping on the first 2xx
    /// - Sleep `attempt x 1s` before each retry (linear backoff)
    /// - A backoff interrupted by shutdown abandons the sequence
    ///   with `DeliveryError::Cancelled`
    async fn deliver(
        &self,
        index: usize,
        batch: Vec<ProcessedItem>,
    ) -> Result<(), DeliveryError> {
        let envelope = DeliveryEnvelope::new(batch);
        let url = format!("{}/api/v1/metrics", self.endpoint);

        let mut last = String::new();

        for attempt in 0..=self.retries {
            if attempt > 0 {
                self.metrics.send_retries.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "retrying batch {index} ({}): attempt {}/{}",
                    envelope.batch_id,
                    attempt + 1,
                    self.retries + 1,
                );

                let backoff = Duration::from_secs(u64::from(attempt));
                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = self.cancel.cancelled() => {
                        log::warn!(
                            "batch {index} ({}) abandoned during backoff: shutdown",
                            envelope.batch_id,
                        );
                        return Err(DeliveryError::Cancelled);
                    }
                }
            }

            match self.client.post(&url).json(&envelope).send().await {
                Ok(response) if response.status().is_success() => {
                    log::debug!(
                        "batch {index} ({}) delivered: {} items, status {}",
                        envelope.batch_id,
                        envelope.data.len(),
                        response.status(),
                    );
                    return Ok(());
                }
                Ok(response) => {
                    last = format!("unexpected status {}", response.status());
                }
                Err(e) => {
                    last = format!("request failed: {e}");
                }
            }
        }

        let attempts = self.retries + 1;
        log::error!(
            "batch {index} ({}) exhausted {attempts} attempts: {last}",
            envelope.batch_id,
        );
        Err(DeliveryError::Exhausted { attempts, last })
    }

    pub async fn shutdown(&self) {
        // In-flight deliveries are joined by the cycle that issued
        // them; by the time the coordinator gets here there is
        // nothing to wait for.
        log::info!("sender stopped");
    }
}

/// Splits processed items into delivery batches.
///
/// Thin wrapper so the sender and its tests name the operation
/// the way the wire protocol does.
fn split_into_deliveries(
    items: Vec<ProcessedItem>,
    batch_size: usize,
) -> Vec<Vec<ProcessedItem>> {
    crate::util::split_batches(items, batch_size)
}
