//! Error types at the pipeline's component boundaries.
//!
//! Transient, per-item and per-batch errors never escalate to
//! process-level failure. Only startup errors (surfaced as `anyhow`
//! at the application boundary) are fatal.

use thiserror::Error;

/// Errors returned by a transform worker for a single item.
///
/// A failed item is dropped from the output and logged; it is
/// never retried and never fails the batch.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The item carries no type discriminator and cannot be routed
    /// by the ingestion service
    #[error("item has an empty type discriminator")]
    EmptyKind,
}

/// Errors returned by `Processor::process`.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The worker pool is not running (not started, or shut down)
    #[error("worker pool is not running")]
    PoolClosed,

    /// Every sub-batch was abandoned before completion
    #[error("all {total} sub-batches failed")]
    AllSubBatchesFailed { total: usize },
}

/// Outcome of one delivery batch's retry sequence.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The retry ceiling was reached without a 2xx response
    #[error("delivery exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    /// Shutdown was signalled during a backoff sleep and the retry
    /// sequence was abandoned
    #[error("delivery cancelled by shutdown")]
    Cancelled,
}

/// Aggregate failure returned by `Sender::send`.
///
/// The caller treats any failure count as a logged, non-fatal
/// cycle error.
#[derive(Debug, Error)]
pub enum SenderError {
    #[error("{failed} of {total} delivery batches failed")]
    BatchesFailed { failed: usize, total: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProcessError::AllSubBatchesFailed { total: 3 };
        assert!(err.to_string().contains("all 3 sub-batches"));

        let err = DeliveryError::Exhausted {
            attempts: 4,
            last: "unexpected status 500".to_string(),
        };
        assert!(err.to_string().contains("4 attempts"));
        assert!(err.to_string().contains("500"));

        let err = SenderError::BatchesFailed { failed: 1, total: 3 };
        assert!(err.to_string().contains("1 of 3"));
    }
}
