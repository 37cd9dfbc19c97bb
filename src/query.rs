use std::sync::Arc;

use chrono::{Local, TimeZone};
use serde_json::json;

use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::model::Record;
use crate::LogStore;

/// How search hits are rendered back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Message text only.
    Raw,
    /// Timestamp, distance, repeat annotation.
    Pretty,
    /// One JSON object per hit.
    Json,
}

impl DisplayMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Some(Self::Raw),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub struct QueryEngine {
    store: Arc<LogStore>,
    embedder: Arc<dyn Embedder>,
}

impl QueryEngine {
    pub fn new(store: Arc<LogStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Validate, embed once, look up under the store lock, render.
    ///
    /// Validation rejects bad input before the embedder is ever touched.
    /// A k beyond the stored count is clamped by the index, not an error.
    pub fn search(&self, query: &str, k: usize, display: DisplayMode) -> Result<Vec<String>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidQuery);
        }
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".to_string()));
        }

        if self.store.is_empty() {
            return Ok(vec!["no log data indexed yet".to_string()]);
        }

        let mut vectors = self.embedder.embed(&[query.to_string()])?;
        let query_vector = vectors
            .pop()
            .ok_or_else(|| Error::EmbeddingFailure("embedder returned no vector".to_string()))?;

        let hits = self.store.search_mapped(&query_vector, k)?;
        Ok(hits
            .iter()
            .map(|(record, dist)| render(record, *dist, display))
            .collect())
    }
}

fn render(record: &Record, dist: f32, display: DisplayMode) -> String {
    match display {
        DisplayMode::Raw => record.text.clone(),
        DisplayMode::Pretty => {
            let when = Local
                .timestamp_opt(record.timestamp as i64, 0)
                .single()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| format!("@{:.0}", record.timestamp));
            let repeat = if record.repeat_count > 1 {
                format!(" (x{})", record.repeat_count)
            } else {
                String::new()
            };
            format!("[{when}] {:.4} | {}{repeat}", dist, record.text)
        }
        DisplayMode::Json => json!({
            "id": record.id,
            "text": record.text,
            "timestamp": record.timestamp,
            "repeat_count": record.repeat_count,
            "distance": dist,
        })
        .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::model::FlushedEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
        inner: HashEmbedder,
    }

    impl CountingEmbedder {
        fn new(dim: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                inner: HashEmbedder::new(dim),
            })
        }
    }

    impl Embedder for CountingEmbedder {
        fn id(&self) -> &str {
            "counting"
        }
        fn dim(&self) -> usize {
            self.inner.dim()
        }
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(texts)
        }
    }

    fn seeded_engine() -> (QueryEngine, Arc<LogStore>, Arc<CountingEmbedder>) {
        let embedder = CountingEmbedder::new(64);
        let store = Arc::new(LogStore::new(100, 64));
        let texts = ["disk error on sda", "network timeout", "service restarted"];
        let entries: Vec<FlushedEntry> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| FlushedEntry {
                text: t.to_string(),
                repeat_count: if i == 0 { 5 } else { 1 },
                timestamp: 1_700_000_000.0,
            })
            .collect();
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let vectors = embedder.inner.embed(&owned).unwrap();
        store.append_aligned(entries, vectors).unwrap();
        (
            QueryEngine::new(store.clone(), embedder.clone()),
            store,
            embedder,
        )
    }

    #[test]
    fn blank_queries_fail_before_embedding() {
        let (engine, _store, embedder) = seeded_engine();
        assert!(matches!(engine.search("", 5, DisplayMode::Raw), Err(Error::InvalidQuery)));
        assert!(matches!(
            engine.search("   ", 5, DisplayMode::Raw),
            Err(Error::InvalidQuery)
        ));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn zero_k_fails_before_embedding() {
        let (engine, _store, embedder) = seeded_engine();
        assert!(matches!(
            engine.search("x", 0, DisplayMode::Raw),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_index_answers_with_a_notice() {
        let embedder = CountingEmbedder::new(16);
        let store = Arc::new(LogStore::new(10, 16));
        let engine = QueryEngine::new(store, embedder.clone());

        let out = engine.search("anything", 5, DisplayMode::Pretty).unwrap();
        assert_eq!(out, vec!["no log data indexed yet".to_string()]);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn oversized_k_returns_all_hits() {
        let (engine, _store, _embedder) = seeded_engine();
        let out = engine.search("disk error", 50, DisplayMode::Raw).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], "disk error on sda");
    }

    #[test]
    fn pretty_mode_annotates_repeats() {
        let (engine, _store, _embedder) = seeded_engine();
        let out = engine.search("disk error on sda", 1, DisplayMode::Pretty).unwrap();
        assert!(out[0].contains("(x5)"), "missing repeat annotation: {}", out[0]);
        assert!(out[0].contains("disk error on sda"));
    }

    #[test]
    fn json_mode_emits_parseable_objects() {
        let (engine, _store, _embedder) = seeded_engine();
        let out = engine.search("network timeout", 1, DisplayMode::Json).unwrap();
        let v: serde_json::Value = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(v["text"], "network timeout");
        assert_eq!(v["repeat_count"], 1);
    }

    #[test]
    fn display_mode_parsing_is_case_insensitive() {
        assert_eq!(DisplayMode::parse("PRETTY"), Some(DisplayMode::Pretty));
        assert_eq!(DisplayMode::parse("raw"), Some(DisplayMode::Raw));
        assert_eq!(DisplayMode::parse("Json"), Some(DisplayMode::Json));
        assert_eq!(DisplayMode::parse("fancy"), None);
    }
}
