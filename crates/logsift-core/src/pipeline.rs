//! Per-line ingestion: store, template, index, embed.
//!
//! ```text
//! raw ─▶ normalize ─▶ append_log_entry ─▶ miner.insert ─▶ attach_template
//!                                     └─▶ lexical.index
//!                                     └─▶ enrich: embed ─▶ attach_embedding ─▶ vector upsert
//! ```
//!
//! Only the append is allowed to fail a line: without an entry id there
//! is nothing to index. Every later step logs its failure and moves on.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::embedding::{embed_input, vec_to_blob, EmbeddingProvider};
use crate::error::{SiftError, SiftResult};
use crate::lexical::LexicalIndex;
use crate::miner::TemplateMiner;
use crate::models::{LogEntry, TimeWindow};
use crate::semantic::VectorIndex;
use crate::store::Store;
use crate::tokenize::{is_anomalous, normalize};

/// Default cap on the byte length of one line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Outcome of ingesting one line.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub entry: LogEntry,
    /// Whether the entry got an embedding during this call.
    pub embedded: bool,
}

pub struct LogPipeline {
    store: Arc<dyn Store>,
    miner: Arc<TemplateMiner>,
    lexical: Arc<LexicalIndex>,
    semantic: Arc<dyn VectorIndex>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    inline_enrichment: bool,
    max_line_bytes: usize,
}

impl LogPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        miner: Arc<TemplateMiner>,
        lexical: Arc<LexicalIndex>,
        semantic: Arc<dyn VectorIndex>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self {
            store,
            miner,
            lexical,
            semantic,
            embedder,
            inline_enrichment: true,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// When off, [`ingest_line`](Self::ingest_line) never embeds and the
    /// caller is expected to schedule [`enrich`](Self::enrich) itself.
    pub fn with_inline_enrichment(mut self, inline: bool) -> Self {
        self.inline_enrichment = inline;
        self
    }

    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn miner(&self) -> &Arc<TemplateMiner> {
        &self.miner
    }

    /// Ingest one raw line stamped `timestamp`.
    ///
    /// Returns `Ok(None)` for empty or whitespace-only lines and
    /// [`SiftError::Input`] for lines longer than the configured cap.
    pub async fn ingest_line(
        &self,
        raw_text: &str,
        timestamp: DateTime<Utc>,
    ) -> SiftResult<Option<Ingested>> {
        let raw_text = raw_text.trim_end_matches(['\r', '\n']);
        if raw_text.trim().is_empty() {
            tracing::trace!("skipping empty line");
            return Ok(None);
        }
        if raw_text.len() > self.max_line_bytes {
            return Err(SiftError::Input(format!(
                "line of {} bytes exceeds the {} byte limit",
                raw_text.len(),
                self.max_line_bytes
            )));
        }

        let tokens = normalize(raw_text);
        let is_anomaly = is_anomalous(raw_text);
        let entry_id = self
            .store
            .append_log_entry(raw_text, timestamp)
            .await
            .map_err(|e| SiftError::storage("append_log_entry", e))?;

        let template_id = match self.miner.insert(entry_id, &tokens, raw_text).await {
            Ok(template_id) => match self.store.attach_template(entry_id, template_id).await {
                Ok(()) => Some(template_id),
                Err(e) => {
                    let err = SiftError::IndexInconsistency {
                        entry_id,
                        template_id: Some(template_id),
                        detail: e.to_string(),
                    };
                    tracing::warn!(error = %err, "template not attached");
                    None
                }
            },
            // Already logged by the miner.
            Err(_) => None,
        };

        self.lexical.index(entry_id, timestamp, raw_text);

        let mut entry = LogEntry {
            id: entry_id,
            timestamp,
            raw_text: raw_text.to_string(),
            normalized_tokens: tokens,
            template_id,
            is_anomaly,
            embedding: None,
        };
        if is_anomaly {
            tracing::debug!(entry_id, "anomaly flagged");
        }

        let embedded = if self.inline_enrichment && self.embedder.is_some() {
            entry.embedding = self.enrich(&entry).await;
            entry.embedding.is_some()
        } else {
            false
        };

        Ok(Some(Ingested { entry, embedded }))
    }

    /// Embed an entry, persist the vector and add it to the vector index.
    ///
    /// Returns the vector, or `None` when there is no provider or a step
    /// failed (logged). A vector that fails to persist is still indexed.
    pub async fn enrich(&self, entry: &LogEntry) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        let vector = match embedder.embed(embed_input(&entry.raw_text)).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => {
                tracing::warn!(entry_id = entry.id, "embedding provider returned an empty vector");
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    entry_id = entry.id,
                    model = embedder.model_name(),
                    error = %e,
                    "embedding failed"
                );
                return None;
            }
        };

        if let Err(e) = self
            .store
            .attach_embedding(entry.id, &vec_to_blob(&vector))
            .await
        {
            tracing::warn!(entry_id = entry.id, error = %e, "embedding not persisted");
        }
        self.semantic.upsert(entry.id, entry.timestamp, vector.clone());
        Some(vector)
    }

    /// Replay stored entries of `window` into the lexical and vector
    /// indexes, e.g. after a restart. Returns the number of entries seen.
    pub async fn rebuild_indexes(&self, window: &TimeWindow) -> SiftResult<usize> {
        let entries = self
            .store
            .query_by_time_window(window.since)
            .await
            .map_err(|e| SiftError::storage("query_by_time_window", e))?;

        let mut count = 0;
        let mut vectors = 0;
        for entry in entries.into_iter().filter(|e| window.contains(e.timestamp)) {
            self.lexical.index(entry.id, entry.timestamp, &entry.raw_text);
            if let Some(vector) = entry.embedding {
                self.semantic.upsert(entry.id, entry.timestamp, vector);
                vectors += 1;
            }
            count += 1;
        }
        tracing::info!(entries = count, vectors, "indexes rebuilt from store");
        Ok(count)
    }

    /// Drop index entries older than `before`. Stored entries are kept.
    pub fn prune_indexes(&self, before: DateTime<Utc>) -> Pruned {
        let pruned = Pruned {
            lexical: self.lexical.prune_before(before),
            vectors: self.semantic.prune_before(before),
        };
        if pruned.lexical > 0 || pruned.vectors > 0 {
            tracing::debug!(
                lexical = pruned.lexical,
                vectors = pruned.vectors,
                %before,
                "pruned in-memory indexes"
            );
        }
        pruned
    }
}

/// Index entries removed by [`LogPipeline::prune_indexes`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pruned {
    pub lexical: usize,
    pub vectors: usize,
}
