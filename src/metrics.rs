use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runtime metrics for the collection pipeline.
///
/// Purpose:
/// - Track cycle outcomes
/// - Track item throughput (collected / processed / dropped)
/// - Track delivery outcomes and retry pressure
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
///
/// The registry is passed to each component as an `Arc` dependency
/// rather than living in a process-wide singleton, so components can
/// be constructed in isolation and tests can run in parallel.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    // Cycles
    pub cycles_completed: AtomicUsize,
    pub cycles_failed: AtomicUsize,

    // Items
    pub items_collected: AtomicUsize,
    pub items_processed: AtomicUsize,
    pub items_dropped: AtomicUsize,

    // Deliveries
    pub batches_sent: AtomicUsize,
    pub batches_failed: AtomicUsize,
    pub send_retries: AtomicUsize,
}

/// Spawns the periodic metrics reporter.
///
/// Emits one low-noise summary line per period until the
/// cancellation token fires.
pub fn spawn_reporter(
    metrics: Arc<RuntimeMetrics>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick of a tokio interval fires immediately;
        // skip it so the first report carries a full period of data.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    log::info!(
                        "[METRICS] cycles_ok={} cycles_err={} collected={} processed={} dropped={} batches_ok={} batches_err={} retries={}",
                        metrics.cycles_completed.load(Ordering::Relaxed),
                        metrics.cycles_failed.load(Ordering::Relaxed),
                        metrics.items_collected.load(Ordering::Relaxed),
                        metrics.items_processed.load(Ordering::Relaxed),
                        metrics.items_dropped.load(Ordering::Relaxed),
                        metrics.batches_sent.load(Ordering::Relaxed),
                        metrics.batches_failed.load(Ordering::Relaxed),
                        metrics.send_retries.load(Ordering::Relaxed),
                    );
                }
            }
        }
    })
}
