//! Continuous ingestion from configured sources.
//!
//! Each source runs on its own task and feeds a bounded channel; a
//! single consumer drains it through [`LogPipeline::ingest_line`], so
//! lines from one source are ingested in the order they were read.
//! A full channel applies backpressure to the sources.
//!
//! When inline enrichment is disabled, embeddings are computed on
//! spawned tasks after the line has been stored and indexed. At most
//! `max_pending_enrichments` of them run at once; the consumer waits
//! for one to finish before starting another, and drains them all
//! before it exits.
//!
//! A pruning task drops index entries older than
//! `rebuild_window_minutes` every `prune_interval_secs`.

use anyhow::{bail, Result};
use chrono::Duration;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use logsift_core::error::SiftError;
use logsift_core::models::TimeWindow;
use logsift_core::pipeline::LogPipeline;

use crate::config::IngestConfig;
use crate::sources::{run_source, SourceLine};

#[derive(Debug, Default)]
struct Counters {
    read: AtomicU64,
    ingested: AtomicU64,
    skipped: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    pruned: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> IngestStats {
        IngestStats {
            read: self.read.load(Ordering::Relaxed),
            ingested: self.ingested.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
        }
    }
}

/// Line counts since the service started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Lines received from sources.
    pub read: u64,
    pub ingested: u64,
    /// Empty lines.
    pub skipped: u64,
    /// Lines refused as invalid input.
    pub rejected: u64,
    /// Lines lost to a storage failure.
    pub failed: u64,
    /// Entries dropped from the keyword index by pruning.
    pub pruned: u64,
}

/// Running ingestion. Dropping the handle does not stop the tasks; call
/// [`shutdown`](Self::shutdown).
pub struct IngestHandle {
    shutdown: watch::Sender<bool>,
    sources: Vec<(String, JoinHandle<Result<()>>)>,
    consumer: JoinHandle<()>,
    pruner: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl IngestHandle {
    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }

    /// Signal every source to stop, then wait for the consumer to drain
    /// what was already read, including deferred embeddings.
    pub async fn shutdown(self) -> IngestStats {
        let _ = self.shutdown.send(true);
        for (name, task) in self.sources {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(source = %name, error = %e, "source stopped with error"),
                Err(e) => tracing::warn!(source = %name, error = %e, "source task panicked"),
            }
        }
        if let Err(e) = self.consumer.await {
            tracing::warn!(error = %e, "ingest consumer panicked");
        }
        if let Some(pruner) = self.pruner {
            if let Err(e) = pruner.await {
                tracing::warn!(error = %e, "index pruner panicked");
            }
        }
        self.counters.snapshot()
    }
}

/// Start one task per configured source plus the consumer.
pub fn start(
    config: &IngestConfig,
    pipeline: Arc<LogPipeline>,
    inline_enrichment: bool,
) -> Result<IngestHandle> {
    if config.sources.is_empty() {
        bail!("No ingest sources configured. Add [[ingest.sources]] to the config file.");
    }

    let (tx, rx) = mpsc::channel::<SourceLine>(config.channel_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let counters = Arc::new(Counters::default());

    let sources = config
        .sources
        .iter()
        .map(|source| {
            let name = source.name();
            let task = tokio::spawn(run_source(source.clone(), tx.clone(), shutdown_rx.clone()));
            (name, task)
        })
        .collect();
    // The consumer ends once every source has dropped its sender.
    drop(tx);

    let pruner = (config.rebuild_window_minutes > 0 && config.prune_interval_secs > 0).then(|| {
        tokio::spawn(prune_loop(
            pipeline.clone(),
            Duration::minutes(config.rebuild_window_minutes),
            std::time::Duration::from_secs(config.prune_interval_secs),
            shutdown_rx.clone(),
            counters.clone(),
        ))
    });

    let deferred = (!inline_enrichment && pipeline.has_embedder())
        .then_some(config.max_pending_enrichments.max(1));
    let consumer = tokio::spawn(consume(rx, pipeline, deferred, counters.clone()));

    tracing::info!(sources = config.sources.len(), "ingestion started");
    Ok(IngestHandle {
        shutdown: shutdown_tx,
        sources,
        consumer,
        pruner,
        counters,
    })
}

async fn prune_loop(
    pipeline: Arc<LogPipeline>,
    retention: Duration,
    every: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<Counters>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let pruned = pipeline.prune_indexes(TimeWindow::last(retention).since);
                counters.pruned.fetch_add(pruned.lexical as u64, Ordering::Relaxed);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Drain `rx` through the pipeline. With `deferred_cap` set, embeddings
/// run on background tasks, at most that many at a time.
async fn consume(
    mut rx: mpsc::Receiver<SourceLine>,
    pipeline: Arc<LogPipeline>,
    deferred_cap: Option<usize>,
    counters: Arc<Counters>,
) {
    let mut pending: JoinSet<()> = JoinSet::new();

    while let Some(line) = rx.recv().await {
        counters.read.fetch_add(1, Ordering::Relaxed);
        match pipeline.ingest_line(&line.text, line.received_at).await {
            Ok(Some(ingested)) => {
                counters.ingested.fetch_add(1, Ordering::Relaxed);
                if let Some(cap) = deferred_cap {
                    while pending.len() >= cap {
                        match pending.join_next().await {
                            Some(done) => reap(done),
                            None => break,
                        }
                    }
                    let pipeline = pipeline.clone();
                    pending.spawn(async move {
                        pipeline.enrich(&ingested.entry).await;
                    });
                }
            }
            Ok(None) => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e @ SiftError::Input(_)) => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(source = %line.source, error = %e, "line rejected");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(source = %line.source, error = %e, "line not ingested");
            }
        }
        while let Some(done) = pending.try_join_next() {
            reap(done);
        }
    }

    if !pending.is_empty() {
        tracing::debug!(pending = pending.len(), "waiting for deferred embeddings");
    }
    while let Some(done) = pending.join_next().await {
        reap(done);
    }
    tracing::info!("ingestion stopped");
}

fn reap(done: Result<(), JoinError>) {
    if let Err(e) = done {
        tracing::warn!(error = %e, "deferred embedding task failed");
    }
}
