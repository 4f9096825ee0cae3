//! Utility helpers shared across the pipeline.
//!
//! This module contains:
//! - Time helpers
//! - Batch splitting
//! - Batch id generation
//!
//! IMPORTANT:
//! - No component-specific business logic should live here.
//! - This module must remain lightweight and deterministic
//!   (batch id generation excepted).

use chrono::Utc;

/// Returns the current Unix timestamp in seconds.
///
/// Used for item timestamps, processing metadata and delivery
/// envelope capture times.
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Splits a list of items into consecutive batches of at most
/// `batch_size` items.
///
/// GUARANTEES:
/// - `ceil(n / batch_size)` batches for `n` input items
/// - Every batch except possibly the last has exactly `batch_size` items
/// - No batch is empty
/// - Item order is preserved within and across batches
///
/// PANIC:
/// - Panics if `batch_size` is zero. Configuration validation
///   rejects a zero batch size before the pipeline is built.
pub fn split_batches<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    assert!(batch_size > 0, "batch_size must be positive");

    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut iter = items.into_iter();

    loop {
        let batch: Vec<T> = iter.by_ref().take(batch_size).collect();
        if batch.is_empty() {
            break;
        }
        batches.push(batch);
    }

    batches
}

/// Generates a unique identifier for one delivery batch.
///
/// Format: `batch_<nanos>_<hex suffix>`
///
/// The random suffix guards against collisions when several
/// batches are enveloped within the same nanosecond under
/// concurrent dispatch.
pub fn generate_batch_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("batch_{}_{:04x}", nanos, rand::random::<u16>())
}
