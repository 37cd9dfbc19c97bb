use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::manager::PipelineMetrics;
use crate::model::FlushedEntry;
use crate::LogStore;

/// Accumulates flushed messages and turns them into store appends, one
/// embedding call per batch. Owned by the consumer task; not shared.
pub struct Batcher {
    store: Arc<LogStore>,
    embedder: Arc<dyn Embedder>,
    metrics: Arc<PipelineMetrics>,
    pending: Vec<FlushedEntry>,
    batch_size: usize,
}

impl Batcher {
    pub fn new(
        store: Arc<LogStore>,
        embedder: Arc<dyn Embedder>,
        metrics: Arc<PipelineMetrics>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            metrics,
            pending: Vec::new(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn add(&mut self, entry: FlushedEntry) {
        self.pending.push(entry);
    }

    /// Whether the size threshold has been reached.
    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.batch_size
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Embed everything accumulated and append it to the store as one
    /// aligned batch. The embedding call runs on the blocking pool with no
    /// lock held; the store lock is taken only for the append+trim step.
    ///
    /// An embedding failure drops the batch (at-most-once delivery, logged)
    /// and the pipeline moves on. A store alignment failure is fatal and
    /// propagates to the caller.
    pub async fn process_batch(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        let texts: Vec<String> = batch.iter().map(|e| e.text.clone()).collect();

        let embedder = self.embedder.clone();
        let embedded = tokio::task::spawn_blocking(move || embedder.embed(&texts))
            .await
            .map_err(|e| Error::EmbeddingFailure(format!("embedding task panicked: {e}")));

        let vectors = match embedded {
            Ok(Ok(vectors)) => vectors,
            Ok(Err(e)) | Err(e) => {
                self.metrics.batches_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, size = batch.len(), "dropping batch");
                return Ok(());
            }
        };

        let size = batch.len();
        match self.store.append_aligned(batch, vectors) {
            Ok(()) => {
                self.metrics.batches_embedded.fetch_add(1, Ordering::Relaxed);
                tracing::info!(size, stored = self.store.len(), "batch indexed");
                Ok(())
            }
            Err(e @ Error::IndexInconsistency { .. }) => Err(e),
            Err(e) => {
                self.metrics.batches_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, size, "store rejected batch");
                Ok(())
            }
        }
    }
}
