use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use ordered_float::OrderedFloat;

use crate::error::{Error, Result};
use crate::vector::Metric;

/// Heap entry for top-k selection. Ordered by distance so BinaryHeap keeps
/// the worst of the current k on top, ready to be displaced when a closer
/// vector shows up.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    dist: OrderedFloat<f32>,
    position: usize,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .cmp(&other.dist)
            .then_with(|| self.position.cmp(&other.position))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Positional vector index: vector at position `i` belongs to the i-th
/// currently retained record. Eviction pops from the front so positions
/// stay dense and aligned with the metadata sequence that owns this index.
pub struct VectorIndex {
    vectors: VecDeque<Vec<f32>>,
    dim: usize,
    metric: Metric,
}

impl VectorIndex {
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self {
            vectors: VecDeque::new(),
            dim,
            metric,
        }
    }

    pub fn count(&self) -> usize {
        self.vectors.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Append a batch, preserving order. Rejects the whole batch if any
    /// vector has the wrong width, leaving the index untouched.
    pub fn append(&mut self, vectors: Vec<Vec<f32>>) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(Error::InvalidDimension {
                expected: self.dim,
                got: bad.len(),
            });
        }
        self.vectors.extend(vectors);
        Ok(())
    }

    /// Drop the `n` oldest vectors.
    pub fn evict_oldest(&mut self, n: usize) {
        for _ in 0..n.min(self.vectors.len()) {
            self.vectors.pop_front();
        }
    }

    /// Brute-force k-nearest-neighbor scan. Returns up to `k`
    /// (position, distance) pairs, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dim {
            return Err(Error::InvalidDimension {
                expected: self.dim,
                got: query.len(),
            });
        }
        if k == 0 || self.vectors.is_empty() {
            return Ok(vec![]);
        }

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
        for (position, vector) in self.vectors.iter().enumerate() {
            let dist = self.metric.distance(query, vector);
            heap.push(Candidate {
                dist: OrderedFloat(dist),
                position,
            });
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut results: Vec<(usize, f32)> = heap
            .into_iter()
            .map(|c| (c.position, c.dist.into_inner()))
            .collect();
        results.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn search_returns_closest_first() {
        let mut idx = VectorIndex::new(4, Metric::Cosine);
        idx.append(vec![unit(4, 0), unit(4, 1), unit(4, 2)]).unwrap();

        let hits = idx.search(&unit(4, 1), 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1);
        assert!(hits[0].1 < hits[1].1);
    }

    #[test]
    fn k_larger_than_index_returns_everything() {
        let mut idx = VectorIndex::new(4, Metric::Cosine);
        idx.append(vec![unit(4, 0), unit(4, 3)]).unwrap();
        let hits = idx.search(&unit(4, 0), 50).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn eviction_shifts_positions_down() {
        let mut idx = VectorIndex::new(4, Metric::Cosine);
        idx.append(vec![unit(4, 0), unit(4, 1), unit(4, 2)]).unwrap();
        idx.evict_oldest(1);

        assert_eq!(idx.count(), 2);
        // The vector that was at position 1 now answers at position 0.
        let hits = idx.search(&unit(4, 1), 1).unwrap();
        assert_eq!(hits[0].0, 0);
    }

    #[test]
    fn wrong_dimension_is_rejected_atomically() {
        let mut idx = VectorIndex::new(4, Metric::Cosine);
        let err = idx.append(vec![unit(4, 0), vec![1.0; 3]]).unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { expected: 4, got: 3 }));
        assert_eq!(idx.count(), 0);

        assert!(idx.search(&[1.0; 5], 1).is_err());
    }

    #[test]
    fn empty_index_searches_empty() {
        let idx = VectorIndex::new(8, Metric::Cosine);
        assert!(idx.search(&[0.0; 8], 3).unwrap().is_empty());
    }
}
