//! Dense-vector index over entry embeddings.
//!
//! [`VectorIndex`] is the seam the retriever and pipeline talk to.
//! [`BruteForceIndex`] is the shipped implementation: it takes the most
//! recent in-window entries (up to a candidate cap) and scores each with
//! [`cosine_similarity`].

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::embedding::cosine_similarity;
use crate::models::{EntryId, TimeWindow};

/// Default number of recent entries scored per query.
pub const DEFAULT_CANDIDATE_CAP: usize = 100;

pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector of an entry.
    fn upsert(&self, entry_id: EntryId, timestamp: DateTime<Utc>, vector: Vec<f32>);

    /// Up to `k` entries most similar to `query` inside `window`, best
    /// first, with the timestamp each was indexed under.
    fn top_k_similar(
        &self,
        query: &[f32],
        window: &TimeWindow,
        k: usize,
    ) -> Vec<(EntryId, DateTime<Utc>, f32)>;

    /// Drop vectors stamped before `before`; returns how many went.
    fn prune_before(&self, before: DateTime<Utc>) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct Stored {
    timestamp: DateTime<Utc>,
    vector: Vec<f32>,
}

#[derive(Debug)]
pub struct BruteForceIndex {
    candidate_cap: usize,
    vectors: RwLock<HashMap<EntryId, Stored>>,
}

impl Default for BruteForceIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CANDIDATE_CAP)
    }
}

impl BruteForceIndex {
    pub fn new(candidate_cap: usize) -> Self {
        Self {
            candidate_cap,
            vectors: RwLock::new(HashMap::new()),
        }
    }
}

impl VectorIndex for BruteForceIndex {
    fn upsert(&self, entry_id: EntryId, timestamp: DateTime<Utc>, vector: Vec<f32>) {
        self.vectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry_id, Stored { timestamp, vector });
    }

    fn top_k_similar(
        &self,
        query: &[f32],
        window: &TimeWindow,
        k: usize,
    ) -> Vec<(EntryId, DateTime<Utc>, f32)> {
        if k == 0 || query.is_empty() {
            return Vec::new();
        }
        let vectors = self.vectors.read().unwrap_or_else(PoisonError::into_inner);

        let mut candidates: Vec<(EntryId, &Stored)> = vectors
            .iter()
            .filter(|(_, s)| window.contains(s.timestamp))
            .map(|(&id, s)| (id, s))
            .collect();
        candidates.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp).then(b.0.cmp(&a.0)));
        candidates.truncate(self.candidate_cap);

        let mut scored: Vec<(EntryId, DateTime<Utc>, f32)> = candidates
            .into_iter()
            .map(|(id, s)| (id, s.timestamp, cosine_similarity(query, &s.vector)))
            .collect();
        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(Ordering::Equal)
                .then(b.1.cmp(&a.1))
                .then(b.0.cmp(&a.0))
        });
        scored.truncate(k);
        scored
    }

    fn prune_before(&self, before: DateTime<Utc>) -> usize {
        let mut vectors = self.vectors.write().unwrap_or_else(PoisonError::into_inner);
        let n = vectors.len();
        vectors.retain(|_, s| s.timestamp >= before);
        n - vectors.len()
    }

    fn len(&self) -> usize {
        self.vectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_ranks_by_cosine() {
        let index = BruteForceIndex::default();
        let now = Utc::now();
        index.upsert(1, now, vec![1.0, 0.0]);
        index.upsert(2, now, vec![0.7, 0.7]);
        index.upsert(3, now, vec![0.0, 1.0]);

        let hits = index.top_k_similar(&[1.0, 0.0], &TimeWindow::last(Duration::hours(1)), 2);
        let ids: Vec<EntryId> = hits.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!((hits[0].2 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_window_and_upsert_replace() {
        let index = BruteForceIndex::default();
        let now = Utc::now();
        index.upsert(1, now - Duration::days(2), vec![1.0, 0.0]);
        index.upsert(2, now, vec![0.0, 1.0]);
        index.upsert(2, now, vec![1.0, 0.0]);
        assert_eq!(index.len(), 2);

        let hits = index.top_k_similar(&[1.0, 0.0], &TimeWindow::last(Duration::hours(1)), 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 2);
        assert_eq!(hits[0].1, now);
        assert!((hits[0].2 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_candidate_cap_keeps_most_recent() {
        let index = BruteForceIndex::new(2);
        let now = Utc::now();
        // The best match is the oldest entry and falls outside the cap.
        index.upsert(1, now - Duration::minutes(3), vec![1.0, 0.0]);
        index.upsert(2, now - Duration::minutes(2), vec![0.5, 0.5]);
        index.upsert(3, now - Duration::minutes(1), vec![0.0, 1.0]);

        let hits = index.top_k_similar(&[1.0, 0.0], &TimeWindow::last(Duration::hours(1)), 10);
        let ids: Vec<EntryId> = hits.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_prune_before() {
        let index = BruteForceIndex::default();
        let now = Utc::now();
        index.upsert(1, now - Duration::hours(2), vec![1.0, 0.0]);
        index.upsert(2, now, vec![1.0, 0.0]);

        assert_eq!(index.prune_before(now - Duration::hours(1)), 1);
        assert_eq!(index.len(), 1);
        let hits = index.top_k_similar(&[1.0, 0.0], &TimeWindow::last(Duration::days(1)), 10);
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![2]);
        assert_eq!(index.prune_before(now - Duration::hours(1)), 0);
    }

    #[test]
    fn test_empty_query_or_k() {
        let index = BruteForceIndex::default();
        index.upsert(1, Utc::now(), vec![1.0]);
        let w = TimeWindow::last(Duration::hours(1));
        assert!(index.top_k_similar(&[], &w, 5).is_empty());
        assert!(index.top_k_similar(&[1.0], &w, 0).is_empty());
    }
}
