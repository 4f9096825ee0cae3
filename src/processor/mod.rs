//! Processor module
//!
//! Owns the bounded pool of transform workers and fans sub-batches
//! out to it:
//!
//! - `start` spawns a fixed set of long-lived worker tasks, all
//!   consuming from one shared bounded job queue
//! - `process` splits an input batch into sub-batches, enqueues
//!   one job per sub-batch and awaits the completion signals
//! - `shutdown` cancels the workers and joins them
//!
//! DESIGN:
//! - Concurrency is bounded by the configured worker count, not by
//!   the number of sub-batches; excess jobs wait in the queue.
//! - Order is preserved: replies are collected in enqueue order,
//!   and each worker keeps item order within its sub-batch.
//! - No I/O happens here or in the workers.

mod worker;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::ProcessError;
use crate::metrics::RuntimeMetrics;
use crate::schema::{ProcessedItem, RawItem};
use crate::util::split_batches;

use worker::Job;

pub struct Processor {
    batch_size: usize,
    worker_count: usize,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,

    /// Producer side of the shared job queue
    job_tx: mpsc::Sender<Job>,

    /// Consumer side, handed to the workers on `start`
    job_rx: std::sync::Mutex<Option<mpsc::Receiver<Job>>>,

    /// Worker task handles, joined on `shutdown`
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Processor {
    pub fn new(config: &Config, metrics: Arc<RuntimeMetrics>, cancel: CancellationToken) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.collection.queue_depth);

        Self {
            batch_size: config.collection.batch_size,
            worker_count: config.collection.workers,
            metrics,
            cancel,
            job_tx,
            job_rx: std::sync::Mutex::new(Some(job_rx)),
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Spawns the worker pool.
    ///
    /// CONTRACT:
    /// - Must be called exactly once before `process`.
    pub fn start(&self) -> anyhow::Result<()> {
        let job_rx = self
            .job_rx
            .lock()
            .expect("processor receiver lock poisoned")
            .take()
            .ok_or_else(|| anyhow::anyhow!("processor already started"))?;

        let queue = Arc::new(Mutex::new(job_rx));
        let mut handles = self.handles.lock().expect("processor handle lock poisoned");

        for id in 0..self.worker_count {
            handles.push(tokio::spawn(worker::run(
                id,
                queue.clone(),
                self.metrics.clone(),
                self.cancel.clone(),
            )));
        }

        log::info!(
            "processor started: {} workers, sub-batch size {}",
            self.worker_count,
            self.batch_size,
        );
        Ok(())
    }

    /// Processes one batch of raw items through the worker pool.
    ///
    /// Fails only if the pool is gone or every sub-batch was
    /// abandoned. Per-item transform failures inside a sub-batch
    /// only shrink the output.
    ///
    /// GUARANTEES:
    /// - Output order follows input order: sub-batches are merged
    ///   in split order and never reordered internally.
    /// - Output length is at most the input length.
    pub async fn process(&self, items: Vec<RawItem>) -> Result<Vec<ProcessedItem>, ProcessError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let input_count = items.len();

        let sub_batches = split_batches(items, self.batch_size);
        let total = sub_batches.len();

        // Enqueue everything first; workers never block on replies,
        // so a full queue drains without our help.
        let mut pending = Vec::with_capacity(total);
        for sub_batch in sub_batches {
            let (reply, done) = oneshot::channel();
            self.job_tx
                .send(Job { items: sub_batch, reply })
                .await
                .map_err(|_| ProcessError::PoolClosed)?;
            pending.push(done);
        }

        // Collect replies in enqueue order to preserve global order.
        let mut output = Vec::with_capacity(input_count);
        let mut failed = 0usize;
        for (index, done) in pending.into_iter().enumerate() {
            match done.await {
                Ok(items) => output.extend(items),
                Err(_) => {
                    failed += 1;
                    log::error!("sub-batch {index} of {total} was abandoned by the pool");
                }
            }
        }

        if failed == total {
            return Err(ProcessError::AllSubBatchesFailed { total });
        }

        self.metrics
            .items_processed
            .fetch_add(output.len(), Ordering::Relaxed);

        log::debug!(
            "processed {} of {} items in {} sub-batches ({:?})",
            output.len(),
            input_count,
            total,
            started.elapsed(),
        );

        Ok(output)
    }

    /// Stops the worker pool and joins all workers.
    ///
    /// Workers observe the cancellation at job pickup, so shutdown
    /// does not wait for queued-but-unstarted jobs.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self
            .handles
            .lock()
            .expect("processor handle lock poisoned")
            .drain(..)
            .collect();

        for handle in handles {
            let _ = handle.await;
        }

        log::info!("processor stopped");
    }
}
