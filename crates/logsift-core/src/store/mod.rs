//! Storage abstraction for logsift.
//!
//! The [`Store`] trait defines every durable operation the ingestion
//! pipeline, template catalog and retrieval orchestrator need, so that
//! backends (SQLite, in-memory, anything else) are pluggable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{EntryId, LogEntry, Template, TemplateId};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`append_log_entry`](Store::append_log_entry) | Persist a raw line, returning its id |
/// | [`attach_template`](Store::attach_template) | Record the template an entry belongs to |
/// | [`attach_embedding`](Store::attach_embedding) | Record an entry's vector (little-endian f32 bytes) |
/// | [`get_log_entry`](Store::get_log_entry) | Fetch one entry |
/// | [`query_by_time_window`](Store::query_by_time_window) | Entries at or after a time, newest first |
/// | [`query_by_template`](Store::query_by_template) | Entries of one template at or after a time, newest first |
/// | [`query_anomalies`](Store::query_anomalies) | Flagged entries at or after a time, newest first |
/// | [`catalog_get_or_create`](Store::catalog_get_or_create) | Resolve a template pattern to its id, bumping frequency |
/// | [`catalog_entries`](Store::catalog_entries) | All persisted templates |
///
/// Backends derive `normalized_tokens` and `is_anomaly` from the raw
/// text on append, with [`normalize`](crate::tokenize::normalize) and
/// [`is_anomalous`](crate::tokenize::is_anomalous).
#[async_trait]
pub trait Store: Send + Sync {
    async fn append_log_entry(&self, raw_text: &str, timestamp: DateTime<Utc>) -> Result<EntryId>;

    async fn attach_template(&self, id: EntryId, template_id: TemplateId) -> Result<()>;

    async fn attach_embedding(&self, id: EntryId, vector_bytes: &[u8]) -> Result<()>;

    async fn get_log_entry(&self, id: EntryId) -> Result<Option<LogEntry>>;

    async fn query_by_time_window(&self, since: DateTime<Utc>) -> Result<Vec<LogEntry>>;

    async fn query_by_template(
        &self,
        template_id: TemplateId,
        since: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>>;

    /// Entries flagged as anomalies at or after `since`, newest first.
    async fn query_anomalies(&self, since: DateTime<Utc>) -> Result<Vec<LogEntry>> {
        let entries = self.query_by_time_window(since).await?;
        Ok(entries.into_iter().filter(|e| e.is_anomaly).collect())
    }

    /// Return the id of `pattern`, creating it with frequency 1 if new
    /// and incrementing its frequency otherwise. `example` is stored
    /// only on creation.
    async fn catalog_get_or_create(&self, pattern: &str, example: &str) -> Result<TemplateId>;

    async fn catalog_entries(&self) -> Result<Vec<Template>>;
}
