//! Assembled logsift instance.
//!
//! [`LogSift::open`] connects the database, warms the template catalog,
//! replays recent entries into the in-memory indexes and wires the
//! pipeline and retriever around one shared set of components.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

use logsift_core::catalog::{CatalogStats, TemplateCatalog};
use logsift_core::embedding::EmbeddingProvider;
use logsift_core::error::SiftResult;
use logsift_core::lexical::LexicalIndex;
use logsift_core::miner::TemplateMiner;
use logsift_core::models::{EntryId, LogEntry, RetrievalResult, Template, TimeWindow};
use logsift_core::pipeline::{Ingested, LogPipeline};
use logsift_core::retrieve::{RetrievedEntry, Retriever};
use logsift_core::semantic::{BruteForceIndex, VectorIndex};
use logsift_core::store::Store;
use logsift_core::tree::TreeStats;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::ingest::{self, IngestHandle};
use crate::migrate;
use crate::sources::{source_info, SourceInfo};
use crate::sqlite_store::SqliteStore;

/// Snapshot of the instance's state.
#[derive(Debug, Clone, Serialize)]
pub struct SiftStats {
    pub stored_entries: i64,
    pub catalog: CatalogStats,
    pub tree: TreeStats,
    pub unbound_groups: usize,
    pub lexical_entries: usize,
    pub lexical_keywords: usize,
    pub vectors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

pub struct LogSift {
    config: Config,
    store: Arc<SqliteStore>,
    miner: Arc<TemplateMiner>,
    lexical: Arc<LexicalIndex>,
    semantic: Arc<dyn VectorIndex>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    pipeline: Arc<LogPipeline>,
    retriever: Retriever,
}

impl LogSift {
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;

        let store = Arc::new(SqliteStore::new(pool));
        let dyn_store: Arc<dyn Store> = store.clone();

        let catalog = Arc::new(TemplateCatalog::warm(dyn_store.clone()).await?);
        let miner = Arc::new(TemplateMiner::new(config.tree.to_tree_config(), catalog));
        let lexical = Arc::new(LexicalIndex::new(config.lexical.max_keywords));
        let semantic: Arc<dyn VectorIndex> =
            Arc::new(BruteForceIndex::new(config.retrieval.semantic_candidates));
        let embedder = create_provider(&config.embedding)?;

        let pipeline = Arc::new(
            LogPipeline::new(
                dyn_store.clone(),
                miner.clone(),
                lexical.clone(),
                semantic.clone(),
                embedder.clone(),
            )
            .with_inline_enrichment(config.embedding.inline)
            .with_max_line_bytes(config.ingest.max_line_bytes),
        );
        let retriever = Retriever::new(
            dyn_store,
            lexical.clone(),
            semantic.clone(),
            embedder.clone(),
            config.retrieval.to_params(),
        );

        if config.ingest.rebuild_window_minutes > 0 {
            let window =
                TimeWindow::last(Duration::minutes(config.ingest.rebuild_window_minutes));
            pipeline.rebuild_indexes(&window).await?;
        }

        tracing::info!(
            db = %config.db.path.display(),
            templates = miner.catalog().len(),
            embedding = embedder.as_ref().map(|e| e.model_name()).unwrap_or("disabled"),
            "logsift ready"
        );

        Ok(Self {
            config,
            store,
            miner,
            lexical,
            semantic,
            embedder,
            pipeline,
            retriever,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<LogPipeline> {
        &self.pipeline
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub async fn ingest_line(
        &self,
        raw_text: &str,
        timestamp: DateTime<Utc>,
    ) -> SiftResult<Option<Ingested>> {
        self.pipeline.ingest_line(raw_text, timestamp).await
    }

    pub async fn retrieve(
        &self,
        query: &str,
        window: &TimeWindow,
        top_k: usize,
        source_entry_id: Option<EntryId>,
    ) -> Vec<RetrievalResult> {
        self.retriever
            .retrieve(query, window, top_k, source_entry_id)
            .await
    }

    /// Retrieve with the configured default window and result count.
    pub async fn retrieve_default(
        &self,
        query: &str,
        source_entry_id: Option<EntryId>,
    ) -> Vec<RetrievalResult> {
        let r = &self.config.retrieval;
        let window = TimeWindow::last(Duration::minutes(r.default_window_minutes));
        self.retrieve(query, &window, r.default_top_k, source_entry_id)
            .await
    }

    pub async fn hydrate(&self, results: &[RetrievalResult]) -> Vec<RetrievedEntry> {
        self.retriever.hydrate(results).await
    }

    /// Stored entries flagged as anomalies inside `window`, newest first.
    pub async fn anomalies(&self, window: &TimeWindow) -> Result<Vec<LogEntry>> {
        let entries = self.store.query_anomalies(window.since).await?;
        Ok(entries
            .into_iter()
            .filter(|e| window.contains(e.timestamp))
            .collect())
    }

    /// Catalog templates, most frequent first.
    pub fn templates(&self) -> Vec<Template> {
        self.miner.catalog().templates()
    }

    pub fn source_info(&self) -> Vec<SourceInfo> {
        self.config.ingest.sources.iter().map(source_info).collect()
    }

    pub async fn stats(&self) -> Result<SiftStats> {
        Ok(SiftStats {
            stored_entries: self.store.count_log_entries().await?,
            catalog: self.miner.catalog().stats(),
            tree: self.miner.tree_stats(),
            unbound_groups: self.miner.unbound_groups(),
            lexical_entries: self.lexical.len(),
            lexical_keywords: self.lexical.keyword_count(),
            vectors: self.semantic.len(),
            embedding_model: self.embedder.as_ref().map(|e| e.model_name().to_string()),
        })
    }

    /// Start tailing every configured source.
    pub fn start_ingestion(&self) -> Result<IngestHandle> {
        ingest::start(
            &self.config.ingest,
            self.pipeline.clone(),
            self.config.embedding.inline,
        )
    }

    /// Close the database pool.
    pub async fn close(&self) {
        self.store.pool().close().await;
    }
}
