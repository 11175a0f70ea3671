//! Retrieval orchestrator fusing template, semantic and keyword signals.
//!
//! # Algorithm
//!
//! 1. **Template**: with a source entry, every other entry of its
//!    template inside the window scores `template_score`.
//! 2. **Semantic**: with an embedding provider, the query is embedded
//!    and the vector index returns the `top_k` nearest entries, scored
//!    by cosine clamped to `[0, 1]`. A failed embedding skips this step.
//! 3. **Keyword**: only when 1 and 2 found nothing. Up to
//!    `query_keywords` keywords from the query, `hits_per_keyword`
//!    lexical hits each, scored `keyword_score`.
//! 4. Deduplicate by entry id keeping the highest score (an earlier
//!    step keeps the entry on a tie).
//! 5. Sort by score (desc), timestamp (desc), id (desc). Truncate to `top_k`.
//!
//! Retrieval never fails. Collaborator errors are logged and the
//! affected step contributes nothing.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::embedding::{embed_input, EmbeddingProvider};
use crate::lexical::LexicalIndex;
use crate::models::{EntryId, LogEntry, RetrievalMethod, RetrievalResult, TemplateId, TimeWindow};
use crate::semantic::VectorIndex;
use crate::store::Store;
use crate::tokenize::query_keywords;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Score of every template-correlated hit.
    pub template_score: f64,
    /// Score of every keyword-fallback hit.
    pub keyword_score: f64,
    /// Keywords taken from the query for the fallback.
    pub query_keywords: usize,
    /// Lexical hits kept per fallback keyword.
    pub hits_per_keyword: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            template_score: 0.9,
            keyword_score: 0.5,
            query_keywords: 3,
            hits_per_keyword: 5,
        }
    }
}

/// A result together with the stored entry it points at.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedEntry {
    #[serde(flatten)]
    pub result: RetrievalResult,
    pub raw_text: String,
    pub template_id: Option<TemplateId>,
}

pub struct Retriever {
    store: Arc<dyn Store>,
    lexical: Arc<LexicalIndex>,
    semantic: Arc<dyn VectorIndex>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn Store>,
        lexical: Arc<LexicalIndex>,
        semantic: Arc<dyn VectorIndex>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            store,
            lexical,
            semantic,
            embedder,
            params,
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    pub async fn retrieve(
        &self,
        query: &str,
        window: &TimeWindow,
        top_k: usize,
        source_entry_id: Option<EntryId>,
    ) -> Vec<RetrievalResult> {
        if top_k == 0 {
            return Vec::new();
        }

        let by_template = match source_entry_id {
            Some(id) => self.template_hits(id, window).await,
            None => Vec::new(),
        };
        let by_semantic = self.semantic_hits(query, window, top_k).await;
        let by_keyword = if by_template.is_empty() && by_semantic.is_empty() {
            self.keyword_hits(query, window)
        } else {
            Vec::new()
        };

        tracing::debug!(
            template = by_template.len(),
            semantic = by_semantic.len(),
            keyword = by_keyword.len(),
            "retrieval candidates"
        );

        merge_results(vec![by_template, by_semantic, by_keyword], top_k)
    }

    /// Fetch the stored entries behind `results`, in order. Results whose
    /// entry cannot be read are dropped.
    pub async fn hydrate(&self, results: &[RetrievalResult]) -> Vec<RetrievedEntry> {
        let mut out = Vec::with_capacity(results.len());
        for r in results {
            match self.store.get_log_entry(r.log_entry_id).await {
                Ok(Some(entry)) => out.push(RetrievedEntry {
                    result: r.clone(),
                    raw_text: entry.raw_text,
                    template_id: entry.template_id,
                }),
                Ok(None) => {
                    tracing::warn!(entry_id = r.log_entry_id, "retrieved entry no longer stored")
                }
                Err(e) => {
                    tracing::warn!(entry_id = r.log_entry_id, error = %e, "failed to load entry")
                }
            }
        }
        out
    }

    async fn template_hits(&self, source: EntryId, window: &TimeWindow) -> Vec<RetrievalResult> {
        let template_id = match self.store.get_log_entry(source).await {
            Ok(Some(LogEntry {
                template_id: Some(t),
                ..
            })) => t,
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!(entry_id = source, error = %e, "failed to load source entry");
                return Vec::new();
            }
        };

        match self.store.query_by_template(template_id, window.since).await {
            Ok(entries) => entries
                .into_iter()
                .filter(|e| e.id != source && window.contains(e.timestamp))
                .map(|e| RetrievalResult {
                    log_entry_id: e.id,
                    score: self.params.template_score,
                    method: RetrievalMethod::Template,
                    timestamp: e.timestamp,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(template_id, error = %e, "template correlation skipped");
                Vec::new()
            }
        }
    }

    async fn semantic_hits(
        &self,
        query: &str,
        window: &TimeWindow,
        top_k: usize,
    ) -> Vec<RetrievalResult> {
        let Some(embedder) = &self.embedder else {
            return Vec::new();
        };
        if query.trim().is_empty() {
            return Vec::new();
        }
        let vector = match embedder.embed(embed_input(query)).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(model = embedder.model_name(), error = %e, "query embedding failed");
                return Vec::new();
            }
        };

        self.semantic
            .top_k_similar(&vector, window, top_k)
            .into_iter()
            .map(|(id, timestamp, score)| RetrievalResult {
                log_entry_id: id,
                score: f64::from(score).clamp(0.0, 1.0),
                method: RetrievalMethod::Semantic,
                timestamp,
            })
            .collect()
    }

    fn keyword_hits(&self, query: &str, window: &TimeWindow) -> Vec<RetrievalResult> {
        let mut out = Vec::new();
        for keyword in query_keywords(query, self.params.query_keywords) {
            for (id, timestamp) in
                self.lexical
                    .search_hits(&keyword, window, self.params.hits_per_keyword)
            {
                out.push(RetrievalResult {
                    log_entry_id: id,
                    score: self.params.keyword_score,
                    method: RetrievalMethod::Keyword,
                    timestamp,
                });
            }
        }
        out
    }
}

/// Merge result batches given in precedence order.
///
/// Per entry the highest score wins; on equal scores the batch listed
/// first keeps the entry.
pub fn merge_results(batches: Vec<Vec<RetrievalResult>>, top_k: usize) -> Vec<RetrievalResult> {
    let mut best: HashMap<EntryId, RetrievalResult> = HashMap::new();
    for result in batches.into_iter().flatten() {
        match best.get(&result.log_entry_id) {
            Some(existing) if existing.score >= result.score => {}
            _ => {
                best.insert(result.log_entry_id, result);
            }
        }
    }

    let mut results: Vec<RetrievalResult> = best.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(b.timestamp.cmp(&a.timestamp))
            .then(b.log_entry_id.cmp(&a.log_entry_id))
    });
    results.truncate(top_k);
    results
}
