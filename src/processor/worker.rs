use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::TransformError;
use crate::metrics::RuntimeMetrics;
use crate::schema::{ProcessedItem, RawItem};

/// One unit of work for the pool: a sub-batch of raw items plus
/// the channel the result is reported on.
pub(crate) struct Job {
    pub items: Vec<RawItem>,
    pub reply: oneshot::Sender<Vec<ProcessedItem>>,
}

/// Transforms one raw item into a processed item.
///
/// This is a pure function: stateless, no I/O. It attaches the
/// processing metadata and applies the enrichment step, which is
/// currently the identity transform apart from rejecting items
/// without a type discriminator.
///
/// TODO:
/// - Unit normalization for counter fields once the ingestion
///   service defines canonical units.
pub(crate) fn transform(item: RawItem) -> Result<ProcessedItem, TransformError> {
    if item.kind.is_empty() {
        return Err(TransformError::EmptyKind);
    }

    Ok(ProcessedItem::from_raw(item))
}

/// Long-lived worker task.
///
/// Pulls jobs from the shared bounded queue until the queue closes
/// or the cancellation token fires. Cancellation is checked at job
/// pickup; a job already picked up is finished.
///
/// Per-item transform failures are dropped and logged, never
/// retried. A partially transformed sub-batch is still reported as
/// a success carrying the surviving items.
pub(crate) async fn run(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Job>>>,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) {
    log::debug!("worker {id} started");

    loop {
        // Hold the queue lock only while waiting for the next job,
        // so the remaining workers can keep pulling work.
        let job = {
            let mut rx = queue.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };

        let Some(job) = job else {
            break;
        };

        let mut output = Vec::with_capacity(job.items.len());
        for item in job.items {
            match transform(item) {
                Ok(processed) => output.push(processed),
                Err(e) => {
                    metrics.items_dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!("worker {id}: dropping item: {e}");
                }
            }
        }

        // The processor may have given up on this sub-batch
        // (e.g. shutdown mid-cycle); a closed reply channel is fine.
        let _ = job.reply.send(output);
    }

    log::debug!("worker {id} stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn transform_is_identity_plus_metadata() {
        let mut fields = Map::new();
        fields.insert("cpu_usage".to_string(), serde_json::json!(45.2));
        let raw = RawItem::new("system", fields.clone());
        let timestamp = raw.timestamp;

        let processed = transform(raw).unwrap();
        assert_eq!(processed.item.kind, "system");
        assert_eq!(processed.item.timestamp, timestamp);
        assert_eq!(processed.item.fields, fields);
    }

    #[test]
    fn transform_rejects_missing_discriminator() {
        let raw = RawItem::new("", Map::new());
        assert!(matches!(transform(raw), Err(TransformError::EmptyKind)));
    }
}
