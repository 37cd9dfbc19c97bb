use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::batcher::Batcher;
use crate::config::Config;
use crate::embed::Embedder;
use crate::error::Error;
use crate::ingest::{ingest_queue, run_source_reader, IngestQueue, IngestReceiver};
use crate::model::FlushedEntry;
use crate::normalize::normalize;
use crate::repeat::RepeatCache;
use crate::LogStore;

/// Shared counters, cheap to bump from any stage.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub lines_ingested: AtomicU64,
    pub batches_embedded: AtomicU64,
    pub batches_dropped: AtomicU64,
}

/// Point-in-time view for the STATS command.
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub records: usize,
    pub max_records: usize,
    pub pending_window: usize,
    pub lines_ingested: u64,
    pub lines_dropped: u64,
    pub batches_embedded: u64,
    pub batches_dropped: u64,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "records indexed:   {} / {}", self.records, self.max_records)?;
        writeln!(f, "window pending:    {}", self.pending_window)?;
        writeln!(f, "lines ingested:    {}", self.lines_ingested)?;
        writeln!(f, "lines dropped:     {}", self.lines_dropped)?;
        writeln!(f, "batches embedded:  {}", self.batches_embedded)?;
        write!(f, "batches dropped:   {}", self.batches_dropped)
    }
}

/// The running ingestion pipeline: source reader, flush timer, and the
/// normalize/dedup/batch consumer, all tied to one shutdown signal.
pub struct Pipeline {
    store: Arc<LogStore>,
    queue: Arc<IngestQueue>,
    cache: Arc<RepeatCache>,
    metrics: Arc<PipelineMetrics>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl Pipeline {
    /// Spawn every stage. An empty `source_command` starts no reader; lines
    /// can still be fed through `queue()` directly, which is how the tests
    /// drive the pipeline.
    pub fn start(config: &Config, store: Arc<LogStore>, embedder: Arc<dyn Embedder>) -> Self {
        let (queue, receiver) = ingest_queue(config.queue_capacity);
        let queue = Arc::new(queue);
        let cache = Arc::new(RepeatCache::new());
        let metrics = Arc::new(PipelineMetrics::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // Flush output is already dedup-bounded per window, so the feed to
        // the batcher can stay unbounded without risking runaway growth.
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();

        let mut tasks = Vec::new();

        if !config.source_command.is_empty() {
            tasks.push(tokio::spawn(run_source_reader(
                config.source_command.clone(),
                queue.clone(),
                config.queue_policy,
                shutdown_rx.clone(),
            )));
        }

        tasks.push(tokio::spawn(run_flush_timer(
            cache.clone(),
            feed_tx,
            Duration::from_secs(config.flush_interval_secs.max(1)),
            shutdown_rx.clone(),
        )));

        let batcher = Batcher::new(store.clone(), embedder, metrics.clone(), config.batch_size);
        tasks.push(tokio::spawn(run_consumer(
            receiver,
            cache.clone(),
            feed_rx,
            batcher,
            Duration::from_millis(config.queue_timeout_ms.max(1)),
            metrics.clone(),
            shutdown_rx,
        )));

        Self {
            store,
            queue,
            cache,
            metrics,
            shutdown_tx,
            tasks,
            grace: Duration::from_secs(config.shutdown_grace_secs),
        }
    }

    pub fn queue(&self) -> &Arc<IngestQueue> {
        &self.queue
    }

    pub fn stats(&self) -> StatsReport {
        StatsReport {
            records: self.store.len(),
            max_records: self.store.max_records(),
            pending_window: self.cache.pending(),
            lines_ingested: self.metrics.lines_ingested.load(Ordering::Relaxed),
            lines_dropped: self.queue.dropped(),
            batches_embedded: self.metrics.batches_embedded.load(Ordering::Relaxed),
            batches_dropped: self.metrics.batches_dropped.load(Ordering::Relaxed),
        }
    }

    /// Signal every stage, then wait out the grace period. Stages that
    /// ignore it get aborted; the source reader reaps its child before
    /// returning, so a clean join means no orphaned process either.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let deadline = Instant::now() + self.grace;

        for mut handle in self.tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "pipeline stage ended abnormally"),
                Err(_) => {
                    handle.abort();
                    tracing::warn!("pipeline stage exceeded shutdown grace, aborted");
                }
            }
        }
        tracing::info!("pipeline stopped");
    }
}

/// Every `interval`, move the window's accumulated counts to the batch
/// feed. One timestamp (and one formatted annotation for the log line) is
/// computed per flush, however many entries the window held.
async fn run_flush_timer(
    cache: Arc<RepeatCache>,
    feed_tx: mpsc::UnboundedSender<FlushedEntry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if !flush_window(&cache, &feed_tx) {
                    return; // consumer is gone
                }
            }
        }
    }
    // Last chance for lines observed since the previous tick.
    flush_window(&cache, &feed_tx);
}

/// Returns false when the feed has no receiver anymore.
fn flush_window(cache: &RepeatCache, feed_tx: &mpsc::UnboundedSender<FlushedEntry>) -> bool {
    let flushed = cache.flush();
    if flushed.is_empty() {
        return true;
    }

    let timestamp = unix_now();
    let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    tracing::info!(window = %stamp, distinct = flushed.len(), "flushed repeat window");

    for (text, repeat_count) in flushed {
        let entry = FlushedEntry {
            text,
            repeat_count,
            timestamp,
        };
        if feed_tx.send(entry).is_err() {
            return false;
        }
    }
    true
}

/// The normalizer/cache consumer: pops raw lines with a timeout, feeds the
/// repeat cache, and drains flushed entries into the batcher. Partial
/// batches ride on idle wake-ups; an idle tick with nothing accumulated
/// does no work at all.
async fn run_consumer(
    mut receiver: IngestReceiver,
    cache: Arc<RepeatCache>,
    mut feed_rx: mpsc::UnboundedReceiver<FlushedEntry>,
    mut batcher: Batcher,
    queue_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let idle = tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
            popped = receiver.pop(queue_timeout) => match popped {
                Ok(Some(line)) => {
                    metrics.lines_ingested.fetch_add(1, Ordering::Relaxed);
                    let message = normalize(&line);
                    if !message.is_empty() {
                        cache.observe(&message);
                    }
                    false
                }
                Ok(None) => true,
                Err(Error::QueueClosed) => break,
                Err(e) => {
                    // Stage-boundary catch: log and keep the loop alive.
                    tracing::warn!(error = %e, "consumer error");
                    continue;
                }
            }
        };

        while let Ok(entry) = feed_rx.try_recv() {
            batcher.add(entry);
        }

        if batcher.is_full() || (idle && batcher.pending() > 0) {
            drive_batch(&mut batcher).await;
        }
    }

    // Shutdown: the timer drops its sender after the final flush, so
    // recv() returning None means every last entry has been handed over.
    while let Some(entry) = feed_rx.recv().await {
        batcher.add(entry);
    }
    if batcher.pending() > 0 {
        drive_batch(&mut batcher).await;
    }
}

async fn drive_batch(batcher: &mut Batcher) {
    if let Err(e) = batcher.process_batch().await {
        // Only alignment failures escape the batcher, and serving wrong
        // records silently is worse than dying loudly.
        tracing::error!(error = %e, "store integrity violated, aborting");
        std::process::abort();
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;

    #[tokio::test]
    async fn flush_window_carries_one_timestamp_for_all_entries() {
        let cache = RepeatCache::new();
        cache.observe("disk error");
        cache.observe("disk error");
        cache.observe("network timeout");

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(flush_window(&cache, &tx));

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(a.repeat_count + b.repeat_count, 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn flush_window_on_empty_cache_sends_nothing() {
        let cache = RepeatCache::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(flush_window(&cache, &tx));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_finishes_within_grace() {
        let config = Config {
            source_command: vec![],
            flush_interval_secs: 1,
            queue_timeout_ms: 20,
            shutdown_grace_secs: 5,
            ..Config::default()
        };
        let store = Arc::new(LogStore::new(100, 16));
        let pipeline = Pipeline::start(&config, store, Arc::new(HashEmbedder::new(16)));

        let started = Instant::now();
        pipeline.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
