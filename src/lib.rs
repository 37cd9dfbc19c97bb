pub mod batcher;
pub mod config;
pub mod embed;
pub mod error;
pub mod index;
pub mod ingest;
pub mod manager;
pub mod model;
pub mod normalize;
pub mod parser;
pub mod query;
pub mod repeat;
pub mod vector;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::model::Record;
use crate::vector::Metric;

/// The metadata sequence and its vector index, kept in lockstep.
///
/// Position `i` in the index always belongs to `records[i]`, so both live
/// behind one Mutex and the public surface offers only joint operations.
/// Appends and capacity trimming happen in a single critical section; reads
/// take the same lock so a search never observes a half-applied batch.
struct StoreInner {
    records: VecDeque<Record>,
    index: VectorIndex,
    next_id: u64,
}

pub struct LogStore {
    inner: Mutex<StoreInner>,
    max_records: usize,
}

impl fmt::Debug for LogStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("LogStore")
            .field("records", &inner.records.len())
            .field("max_records", &self.max_records)
            .finish()
    }
}

impl LogStore {
    pub fn new(max_records: usize, dim: usize) -> Self {
        assert!(max_records > 0, "store capacity must be non-zero");
        Self {
            inner: Mutex::new(StoreInner {
                records: VecDeque::new(),
                index: VectorIndex::new(dim, Metric::Cosine),
                next_id: 1,
            }),
            max_records,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Append one batch of summarized messages with their embeddings, then
    /// trim back to capacity, all under one lock acquisition. Ids are
    /// assigned here, monotonically, in batch order.
    ///
    /// `texts[i]` pairs with `vectors[i]`; a length mismatch between the two
    /// input slices rejects the batch before anything is touched, so the
    /// store either absorbs the whole batch or none of it.
    pub fn append_aligned(
        &self,
        entries: Vec<crate::model::FlushedEntry>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<()> {
        if entries.len() != vectors.len() {
            return Err(Error::EmbeddingFailure(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                entries.len()
            )));
        }
        if entries.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.lock().unwrap();
        inner.index.append(vectors)?;
        for entry in entries {
            let id = inner.next_id;
            inner.next_id += 1;
            inner
                .records
                .push_back(Record::new(id, entry.text, entry.timestamp, entry.repeat_count));
        }

        // Oldest-first trim, both sides in the same critical section.
        if inner.records.len() > self.max_records {
            let overflow = inner.records.len() - self.max_records;
            for _ in 0..overflow {
                inner.records.pop_front();
            }
            inner.index.evict_oldest(overflow);
            tracing::debug!(evicted = overflow, retained = inner.records.len(), "trimmed store");
        }

        Self::check_aligned(&inner)
    }

    /// Nearest-neighbor lookup mapped back to records. Hits are cloned out
    /// under the lock so callers can format them after it is released.
    pub fn search_mapped(&self, query: &[f32], k: usize) -> Result<Vec<(Record, f32)>> {
        let inner = self.inner.lock().unwrap();
        Self::check_aligned(&inner)?;
        let hits = inner.index.search(query, k)?;
        hits.into_iter()
            .map(|(position, dist)| {
                inner
                    .records
                    .get(position)
                    .cloned()
                    .map(|record| (record, dist))
                    .ok_or(Error::IndexInconsistency {
                        records: inner.records.len(),
                        vectors: position + 1,
                    })
            })
            .collect()
    }

    fn check_aligned(inner: &StoreInner) -> Result<()> {
        let records = inner.records.len();
        let vectors = inner.index.count();
        if records != vectors {
            return Err(Error::IndexInconsistency { records, vectors });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{Embedder, HashEmbedder};
    use crate::model::FlushedEntry;

    fn entry(text: &str) -> FlushedEntry {
        FlushedEntry {
            text: text.to_string(),
            repeat_count: 1,
            timestamp: 1_700_000_000.0,
        }
    }

    fn embed_all(embedder: &HashEmbedder, texts: &[&str]) -> (Vec<FlushedEntry>, Vec<Vec<f32>>) {
        let entries: Vec<FlushedEntry> = texts.iter().map(|t| entry(t)).collect();
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let vectors = embedder.embed(&owned).unwrap();
        (entries, vectors)
    }

    #[test]
    fn lengths_stay_aligned_across_appends() {
        let embedder = HashEmbedder::new(32);
        let store = LogStore::new(10, 32);

        for batch in [&["a", "b"][..], &["c"][..], &["d", "e", "f"][..]] {
            let (entries, vectors) = embed_all(&embedder, batch);
            store.append_aligned(entries, vectors).unwrap();
        }
        assert_eq!(store.len(), 6);

        let q = embedder.embed(&["a".to_string()]).unwrap().remove(0);
        assert_eq!(store.search_mapped(&q, 100).unwrap().len(), 6);
    }

    #[test]
    fn ids_are_monotonic_across_batches() {
        let embedder = HashEmbedder::new(32);
        let store = LogStore::new(10, 32);
        let (entries, vectors) = embed_all(&embedder, &["one", "two"]);
        store.append_aligned(entries, vectors).unwrap();
        let (entries, vectors) = embed_all(&embedder, &["three"]);
        store.append_aligned(entries, vectors).unwrap();

        let q = embedder.embed(&["one".to_string()]).unwrap().remove(0);
        let mut ids: Vec<u64> = store
            .search_mapped(&q, 10)
            .unwrap()
            .into_iter()
            .map(|(r, _)| r.id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn oldest_records_are_evicted_first() {
        let embedder = HashEmbedder::new(64);
        let store = LogStore::new(3, 64);
        let (entries, vectors) =
            embed_all(&embedder, &["alpha failure", "beta failure", "gamma failure", "delta failure"]);
        store.append_aligned(entries, vectors).unwrap();

        assert_eq!(store.len(), 3);
        let q = embedder.embed(&["beta failure".to_string()]).unwrap().remove(0);
        let hits = store.search_mapped(&q, 3).unwrap();
        let texts: Vec<&str> = hits.iter().map(|(r, _)| r.text.as_str()).collect();
        assert!(texts.contains(&"beta failure"));
        assert!(texts.contains(&"gamma failure"));
        assert!(texts.contains(&"delta failure"));
        assert!(!texts.contains(&"alpha failure"));

        // The evicted record is gone for good: its exact text no longer
        // produces an exact-distance hit.
        let q = embedder.embed(&["alpha failure".to_string()]).unwrap().remove(0);
        let hits = store.search_mapped(&q, 3).unwrap();
        assert!(hits.iter().all(|(r, _)| r.text != "alpha failure"));
    }

    #[test]
    fn mismatched_batch_is_rejected_whole() {
        let embedder = HashEmbedder::new(32);
        let store = LogStore::new(10, 32);
        let (entries, mut vectors) = embed_all(&embedder, &["x", "y"]);
        vectors.pop();
        assert!(store.append_aligned(entries, vectors).is_err());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let store = LogStore::new(10, 32);
        store.append_aligned(vec![], vec![]).unwrap();
        assert!(store.is_empty());
    }
}
