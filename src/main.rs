use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use sysflow_collector::collector::Collector;
use sysflow_collector::config::Config;
use sysflow_collector::metrics::{self, RuntimeMetrics};
use sysflow_collector::source::HostStatsSource;

/// Overall shutdown deadline once a signal is received.
///
/// Exceeding it forces termination regardless of in-flight sends.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// How often the metrics reporter emits its summary line.
const METRICS_PERIOD: Duration = Duration::from_secs(10);

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// This is the main runtime for the host telemetry collector.
//
// Responsibilities:
// - Initialize logging
// - Load configuration
// - Build and start the collection pipeline
// - Wait for an interrupt/terminate signal
// - Run the bounded graceful shutdown
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    // Optional config path as the first argument; every field has
    // a default, so a missing file still yields a working setup.
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = Arc::new(Config::load(&config_path)?);

    let metrics = Arc::new(RuntimeMetrics::default());
    let source = Arc::new(HostStatsSource::new());

    let mut collector = Collector::new(config.clone(), source, metrics.clone())
        .context("failed to create collector")?;
    collector
        .start()
        .await
        .context("failed to start collector")?;

    let reporter_cancel = CancellationToken::new();
    let reporter = metrics::spawn_reporter(
        metrics.clone(),
        METRICS_PERIOD,
        reporter_cancel.clone(),
    );

    log::info!(
        "sysflow collector started: endpoint {}, interval {:?}",
        config.api.endpoint,
        config.collection.interval(),
    );

    wait_for_signal().await?;
    log::info!("received shutdown signal");

    collector.shutdown(SHUTDOWN_DEADLINE).await;

    reporter_cancel.cancel();
    let _ = reporter.await;

    log::info!("sysflow collector stopped");
    Ok(())
}

/// Blocks until SIGINT or SIGTERM is delivered.
#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for SIGINT")?;
        }
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")
}
