//! Inverted keyword index with a raw-text fallback scan.
//!
//! Each indexed entry contributes up to `max_keywords` keywords (see
//! [`tokenize::keywords`](crate::tokenize::keywords)) as postings of
//! `(entry id, token position)`. The entry's timestamp and raw text are
//! kept alongside so searches can filter by time window and fall back
//! to substring matching.
//!
//! | Query shape | Path |
//! |-------------|------|
//! | single run of ASCII alphanumerics | keyword postings, exact or substring on the keyword |
//! | anything else | case-insensitive substring scan over raw text |
//!
//! Results are ordered newest first, higher id first on equal timestamps.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use crate::models::{EntryId, TimeWindow};
use crate::tokenize::{keywords, DEFAULT_MAX_KEYWORDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub entry_id: EntryId,
    pub position: usize,
}

#[derive(Debug)]
struct IndexedEntry {
    timestamp: DateTime<Utc>,
    raw_text: String,
    /// Keywords posted for this entry, at most a few dozen.
    keywords: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    postings: HashMap<String, Vec<Posting>>,
    entries: HashMap<EntryId, IndexedEntry>,
}

#[derive(Debug)]
pub struct LexicalIndex {
    max_keywords: usize,
    inner: RwLock<Inner>,
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KEYWORDS)
    }
}

impl LexicalIndex {
    pub fn new(max_keywords: usize) -> Self {
        Self {
            max_keywords,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Index one entry. Re-indexing an id keeps its existing postings
    /// and only posts keywords not yet recorded for it.
    pub fn index(&self, entry_id: EntryId, timestamp: DateTime<Utc>, text: &str) {
        let kws = keywords(text, self.max_keywords);
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Inner { postings, entries } = &mut *guard;

        let entry = entries.entry(entry_id).or_insert_with(|| IndexedEntry {
            timestamp,
            raw_text: String::new(),
            keywords: Vec::new(),
        });
        entry.timestamp = timestamp;
        entry.raw_text = text.to_string();

        for (keyword, position) in kws {
            if entry.keywords.contains(&keyword) {
                continue;
            }
            postings
                .entry(keyword.clone())
                .or_default()
                .push(Posting { entry_id, position });
            entry.keywords.push(keyword);
        }
    }

    /// Forget every entry stamped before `before`. Returns how many
    /// entries were removed.
    pub fn prune_before(&self, before: DateTime<Utc>) -> usize {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Inner { postings, entries } = &mut *guard;

        let stale: HashSet<EntryId> = entries
            .iter()
            .filter(|(_, e)| e.timestamp < before)
            .map(|(&id, _)| id)
            .collect();
        if stale.is_empty() {
            return 0;
        }

        let mut touched: HashSet<String> = HashSet::new();
        for id in &stale {
            if let Some(e) = entries.remove(id) {
                touched.extend(e.keywords);
            }
        }
        for keyword in touched {
            if let Some(list) = postings.get_mut(&keyword) {
                list.retain(|p| !stale.contains(&p.entry_id));
                if list.is_empty() {
                    postings.remove(&keyword);
                }
            }
        }
        stale.len()
    }

    /// Entries matching `query` inside `window`, newest first.
    pub fn search(&self, query: &str, window: &TimeWindow) -> Vec<EntryId> {
        self.search_limited(query, window, usize::MAX)
    }

    pub fn search_limited(&self, query: &str, window: &TimeWindow, limit: usize) -> Vec<EntryId> {
        self.search_hits(query, window, limit)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    /// Like [`search_limited`](Self::search_limited), with each hit's timestamp.
    pub fn search_hits(
        &self,
        query: &str,
        window: &TimeWindow,
        limit: usize,
    ) -> Vec<(EntryId, DateTime<Utc>)> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let needle = query.to_lowercase();
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        let ids: HashSet<EntryId> = if is_single_token(query) {
            inner
                .postings
                .iter()
                .filter(|(keyword, _)| keyword.contains(needle.as_str()))
                .flat_map(|(_, list)| list.iter().map(|p| p.entry_id))
                .collect()
        } else {
            inner
                .entries
                .iter()
                .filter(|(_, e)| e.raw_text.to_lowercase().contains(needle.as_str()))
                .map(|(&id, _)| id)
                .collect()
        };

        let mut hits: Vec<(DateTime<Utc>, EntryId)> = ids
            .into_iter()
            .filter_map(|id| {
                let e = inner.entries.get(&id)?;
                window.contains(e.timestamp).then_some((e.timestamp, id))
            })
            .collect();
        hits.sort_by(|a, b| b.cmp(a));
        hits.into_iter().take(limit).map(|(ts, id)| (id, ts)).collect()
    }

    /// Postings recorded for `keyword`, in insertion order.
    pub fn postings(&self, keyword: &str) -> Vec<Posting> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.postings.get(keyword).cloned().unwrap_or_default()
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct keywords.
    pub fn keyword_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .postings
            .len()
    }
}

fn is_single_token(query: &str) -> bool {
    query.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn window() -> TimeWindow {
        TimeWindow::last(Duration::hours(1))
    }

    #[test]
    fn test_postings_record_positions() {
        let index = LexicalIndex::default();
        index.index(1, Utc::now(), "ERROR: disk quota exceeded on /dev/sda1");
        let postings = index.postings("quota");
        assert_eq!(postings, vec![Posting { entry_id: 1, position: 2 }]);
        assert!(index.postings("on").is_empty());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_fast_path_exact_and_substring() {
        let index = LexicalIndex::default();
        let now = Utc::now();
        index.index(1, now - Duration::minutes(2), "Connection refused by upstream");
        index.index(2, now - Duration::minutes(1), "reconnecting to upstream");
        index.index(3, now, "all good");

        assert_eq!(index.search("upstream", &window()), vec![2, 1]);
        // Case-folded, and "connect" is a substring of both keywords.
        assert_eq!(index.search("CONNECT", &window()), vec![2, 1]);
        assert!(index.search("missing", &window()).is_empty());
    }

    #[test]
    fn test_slow_path_scans_raw_text() {
        let index = LexicalIndex::default();
        let now = Utc::now();
        index.index(1, now - Duration::minutes(1), "Connection failed to 10.0.0.1");
        index.index(2, now, "connection FAILED twice");
        index.index(3, now, "connection ok");

        assert_eq!(index.search("connection failed", &window()), vec![2, 1]);
        assert_eq!(index.search("10.0.0.1", &window()), vec![1]);
    }

    #[test]
    fn test_window_filter_and_tie_break() {
        let index = LexicalIndex::default();
        let now = Utc::now();
        index.index(1, now - Duration::hours(5), "timeout waiting");
        index.index(2, now, "timeout waiting");
        index.index(3, now, "timeout waiting");

        assert_eq!(index.search("timeout", &window()), vec![3, 2]);
        assert_eq!(index.search_limited("timeout", &window(), 1), vec![3]);
        assert_eq!(index.search("timeout", &TimeWindow::since(now - Duration::days(1))).len(), 3);
    }

    #[test]
    fn test_reindex_does_not_duplicate_postings() {
        let index = LexicalIndex::default();
        let now = Utc::now();
        for id in 1..=500 {
            index.index(id, now, "error writing block");
        }
        index.index(250, now, "error writing block again");
        assert_eq!(index.postings("error").len(), 500);
        assert_eq!(index.postings("again"), vec![Posting { entry_id: 250, position: 3 }]);
        assert_eq!(index.len(), 500);
    }

    #[test]
    fn test_prune_before_drops_entries_and_postings() {
        let index = LexicalIndex::default();
        let now = Utc::now();
        index.index(1, now - Duration::hours(3), "disk quota exceeded");
        index.index(2, now - Duration::hours(2), "disk unmounted");
        index.index(3, now, "disk quota restored");

        assert_eq!(index.prune_before(now - Duration::hours(1)), 2);
        assert_eq!(index.len(), 1);
        assert_eq!(index.postings("disk"), vec![Posting { entry_id: 3, position: 0 }]);
        assert!(index.postings("unmounted").is_empty());
        assert!(index.postings("exceeded").is_empty());
        let all_time = TimeWindow::since(now - Duration::days(1));
        assert_eq!(index.search("quota", &all_time), vec![3]);
        assert_eq!(index.search("disk quota", &all_time), vec![3]);
        assert_eq!(index.prune_before(now - Duration::hours(1)), 0);
    }

    #[test]
    fn test_keyword_cap_and_empty_query() {
        let index = LexicalIndex::new(2);
        index.index(1, Utc::now(), "alpha beta gamma delta");
        assert_eq!(index.keyword_count(), 2);
        assert!(index.search("gamma", &window()).is_empty());
        assert!(index.search("   ", &window()).is_empty());
    }
}
