//! Collector module
//!
//! This module groups the two control-plane pieces of the pipeline:
//!
//! - The collection loop: one cycle of collect -> process -> send
//!   per interval tick, cycles strictly sequential
//! - The lifecycle coordinator: ordered startup of processor,
//!   sender and loop, and bounded, ordered shutdown
//!
//! Design notes:
//! - Measurement-specific logic MUST NOT live here; it belongs to
//!   the source, the transform workers and the sender
//! - A failed cycle is logged and the loop continues; only startup
//!   failures are fatal

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::metrics::RuntimeMetrics;
use crate::processor::Processor;
use crate::sender::Sender;
use crate::source::CollectionSource;

// ------------------------------------------------------------
// Loop state
// ------------------------------------------------------------
//
// Observable lifecycle of the collection loop:
//
//     Idle -> Running -> Stopping -> Stopped
//
// `Stopping` begins the moment shutdown is requested; no new
// cycle starts after that point. `Stopped` is reached once the
// loop task has exited (or was abandoned at the deadline).
//
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl LoopState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// ============================================================
/// Collector
/// ============================================================
///
/// The lifecycle coordinator. Owns the processor, the sender and
/// the collection loop task, and supervises their start and stop
/// order.
///
/// CONTRACT:
/// - `start` brings up processor, then sender, then the loop;
///   any failure aborts the whole sequence with nothing running
/// - `shutdown` signals stop, waits for the loop up to a deadline,
///   then stops sender and processor regardless
/// - `shutdown` is single-shot; calling it twice is undefined
pub struct Collector {
    config: Arc<Config>,
    metrics: Arc<RuntimeMetrics>,
    source: Arc<dyn CollectionSource>,
    processor: Arc<Processor>,
    sender: Arc<Sender>,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
    loop_handle: Option<JoinHandle<()>>,
}

impl Collector {
    /// Builds the pipeline components.
    ///
    /// Construction failures (e.g. an invalid endpoint) are
    /// startup failures: nothing has been spawned yet.
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn CollectionSource>,
        metrics: Arc<RuntimeMetrics>,
    ) -> anyhow::Result<Self> {
        let cancel = CancellationToken::new();

        let processor = Arc::new(Processor::new(
            &config,
            metrics.clone(),
            cancel.child_token(),
        ));
        let sender = Arc::new(
            Sender::new(&config, metrics.clone(), cancel.child_token())
                .context("failed to create sender")?,
        );

        Ok(Self {
            config,
            metrics,
            source,
            processor,
            sender,
            cancel,
            state: Arc::new(AtomicU8::new(LoopState::Idle as u8)),
            loop_handle: None,
        })
    }

    /// Current state of the collection loop.
    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Starts the pipeline: processor, sender, then the loop.
    ///
    /// Any failure aborts the whole sequence with nothing left
    /// running: a component that came up before the failing one is
    /// shut down again before the error propagates.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        self.processor
            .start()
            .context("failed to start processor")?;

        if let Err(e) = self.sender.start() {
            self.processor.shutdown().await;
            return Err(e.context("failed to start sender"));
        }

        let interval = self.config.collection.interval();
        let source = self.source.clone();
        let processor = self.processor.clone();
        let sender = self.sender.clone();
        let metrics = self.metrics.clone();
        let cancel = self.cancel.clone();
        let state = self.state.clone();

        self.state
            .store(LoopState::Running as u8, Ordering::SeqCst);
        self.loop_handle = Some(tokio::spawn(run_loop(
            interval, source, processor, sender, metrics, cancel, state,
        )));

        log::info!(
            "collector started: interval {:?}, batch size {}",
            interval,
            self.config.collection.batch_size,
        );
        Ok(())
    }

    /// Shuts the pipeline down, bounded by `deadline`.
    ///
    /// The loop is signalled first and waited for; hitting the
    /// deadline logs a warning and abandons it. Sender and
    /// processor are stopped either way.
    pub async fn shutdown(&mut self, deadline: Duration) {
        log::info!("shutting down collector");

        if self.state() == LoopState::Running {
            self.state
                .store(LoopState::Stopping as u8, Ordering::SeqCst);
        }
        self.cancel.cancel();

        if let Some(handle) = self.loop_handle.take() {
            match tokio::time::timeout(deadline, handle).await {
                Ok(_) => log::info!("collection loop stopped"),
                Err(_) => log::warn!("shutdown deadline exceeded, forcing stop"),
            }
        }

        self.sender.shutdown().await;
        self.processor.shutdown().await;

        self.state
            .store(LoopState::Stopped as u8, Ordering::SeqCst);
        log::info!("collector shutdown complete");
    }
}

// ------------------------------------------------------------
// Collection loop
// ------------------------------------------------------------
//
// Ticks on a fixed interval. A cycle that overruns the interval
// delays the next tick (MissedTickBehavior::Delay); cycles never
// overlap. Cancellation is observed between cycles only, so a
// cycle in flight runs to completion.
//
async fn run_loop(
    interval: Duration,
    source: Arc<dyn CollectionSource>,
    processor: Arc<Processor>,
    sender: Arc<Sender>,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // A tokio interval fires immediately; consume that tick so the
    // first cycle runs one full interval after start.
    ticker.tick().await;

    log::info!("collection loop started: interval {:?}", interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                state.store(LoopState::Stopping as u8, Ordering::SeqCst);
                log::info!("collection loop stop signal received");
                break;
            }
            _ = ticker.tick() => {
                match run_cycle(&*source, &processor, &sender, &metrics).await {
                    Ok(()) => {
                        metrics.cycles_completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        metrics.cycles_failed.fetch_add(1, Ordering::Relaxed);
                        log::error!("collection cycle failed: {e:#}");
                    }
                }
            }
        }
    }

    state.store(LoopState::Stopped as u8, Ordering::SeqCst);
    log::info!("collection loop stopped");
}

/// One collection cycle: collect, process, send, strictly in that
/// order. Any step failing aborts the cycle; the loop logs it and
/// carries on with the next tick.
async fn run_cycle(
    source: &dyn CollectionSource,
    processor: &Processor,
    sender: &Sender,
    metrics: &RuntimeMetrics,
) -> anyhow::Result<()> {
    let started = Instant::now();

    let raw = source.collect().await.context("source collection failed")?;
    let collected = raw.len();
    metrics.items_collected.fetch_add(collected, Ordering::Relaxed);

    let processed = processor.process(raw).await.context("processing failed")?;
    let processed_count = processed.len();

    sender.send(processed).await.context("delivery failed")?;

    log::debug!(
        "cycle completed in {:?}: {collected} collected, {processed_count} processed",
        started.elapsed(),
    );
    Ok(())
}
