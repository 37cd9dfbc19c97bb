use crate::error::Result;

/// Batch embedding seam. Implementations map each text to one fixed-width
/// vector, preserving order, and fail as a unit.
///
/// Calls may be CPU-bound and are treated as blocking; the pipeline runs
/// them off the async runtime and never holds a lock across them.
pub trait Embedder: Send + Sync {
    /// Stable identifier, for logs and stats.
    fn id(&self) -> &str;

    /// Width of every produced vector.
    fn dim(&self) -> usize;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic token-hashing embedder: every whitespace token is hashed
/// into one of `dim` buckets, the bucket histogram is L2-normalized.
///
/// No model download, no I/O, stable across runs. Crude as semantics go,
/// but lines sharing tokens land near each other, which is what log
/// triage needs. A model-backed `Embedder` drops in behind the same trait.
pub struct HashEmbedder {
    dim: usize,
}

pub const DEFAULT_EMBEDDING_DIM: usize = 256;

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        assert!(dim > 0, "embedding dimension must be non-zero");
        Self { dim }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0.0f32; self.dim];
        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            let h = seahash::hash(token.as_bytes());
            let bucket = (h % self.dim as u64) as usize;
            // Second hash decides the sign, so unrelated tokens sharing a
            // bucket cancel instead of piling up (feature-hashing trick).
            let sign = if h.rotate_left(32) & 1 == 0 { 1.0 } else { -1.0 };
            buckets[bucket] += sign;
        }

        let norm: f32 = buckets.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut buckets {
                *x /= norm;
            }
        }
        buckets
    }
}

impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        "hash/seahash"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
