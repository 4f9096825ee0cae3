use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from a
// JSON file at process start.
//
// It defines:
// - Ingestion API settings (endpoint, timeout, retries)
// - Collection settings (interval, batching, worker pool)
//
// IMPORTANT:
// - Configuration is immutable after load. There is no runtime
//   reconfiguration; any change requires a restart.
// - Every field has a documented default, so an empty or missing
//   file yields a working configuration.
//
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Settings for the remote ingestion service
    pub api: ApiConfig,

    /// Settings for the collection pipeline
    pub collection: CollectionConfig,
}

// ------------------------------------------------------------
// Ingestion API configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the ingestion service.
    /// Batches are POSTed to `<endpoint>/api/v1/metrics`.
    pub endpoint: String,

    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,

    /// Maximum number of retries per delivery batch.
    /// A batch is attempted at most `retries + 1` times.
    pub retries: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            timeout_ms: 30_000,
            retries: 3,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ------------------------------------------------------------
// Collection configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectionConfig {
    /// Interval between collection cycles in milliseconds.
    ///
    /// A cycle that overruns the interval delays the next tick;
    /// cycles never overlap.
    pub interval_ms: u64,

    /// Maximum items per sub-batch (processing) and per delivery
    /// batch (sending)
    pub batch_size: usize,

    /// Number of long-lived transform workers.
    ///
    /// This is the real upper bound on concurrent transforms.
    pub workers: usize,

    /// Depth of the shared worker job queue
    pub queue_depth: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            batch_size: 100,
            workers: 4,
            queue_depth: 1000,
        }
    }
}

impl CollectionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Loads configuration from a JSON file.
    ///
    /// Behavior:
    /// - Missing file: fall back to pure defaults (logged)
    /// - Unreadable or invalid file: error (startup is aborted)
    ///
    /// TODO:
    /// - Support environment variable overrides per field
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!(
                "config file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        Self::from_json(&data)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Parses configuration from a JSON string and validates it.
    pub fn from_json(data: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.collection.interval_ms > 0, "collection.interval_ms must be positive");
        anyhow::ensure!(self.collection.batch_size > 0, "collection.batch_size must be positive");
        anyhow::ensure!(self.collection.workers > 0, "collection.workers must be positive");
        anyhow::ensure!(self.collection.queue_depth > 0, "collection.queue_depth must be positive");
        anyhow::ensure!(!self.api.endpoint.is_empty(), "api.endpoint must not be empty");
        Ok(())
    }
}
