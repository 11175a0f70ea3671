//! In-memory [`Store`] implementation for tests and embedding callers.
//!
//! Uses `Vec` and `HashMap` behind `std::sync::RwLock`. Entry ids are
//! assigned sequentially from 1. Nothing survives the process.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::blob_to_vec;
use crate::models::{EntryId, LogEntry, Template, TemplateId};
use crate::tokenize::{is_anomalous, normalize};

use super::Store;

#[derive(Default)]
struct Catalog {
    templates: Vec<Template>,
    by_pattern: HashMap<String, usize>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<Vec<LogEntry>>,
    catalog: RwLock<Catalog>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn index_of(id: EntryId) -> Option<usize> {
    usize::try_from(id).ok()?.checked_sub(1)
}

fn newest_first(mut entries: Vec<LogEntry>) -> Vec<LogEntry> {
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    entries
}

#[async_trait]
impl Store for InMemoryStore {
    async fn append_log_entry(&self, raw_text: &str, timestamp: DateTime<Utc>) -> Result<EntryId> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let id = entries.len() as EntryId + 1;
        entries.push(LogEntry {
            id,
            timestamp,
            raw_text: raw_text.to_string(),
            normalized_tokens: normalize(raw_text),
            template_id: None,
            is_anomaly: is_anomalous(raw_text),
            embedding: None,
        });
        Ok(id)
    }

    async fn attach_template(&self, id: EntryId, template_id: TemplateId) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match index_of(id).and_then(|i| entries.get_mut(i)) {
            Some(entry) => {
                entry.template_id = Some(template_id);
                Ok(())
            }
            None => bail!("log entry {} not found", id),
        }
    }

    async fn attach_embedding(&self, id: EntryId, vector_bytes: &[u8]) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match index_of(id).and_then(|i| entries.get_mut(i)) {
            Some(entry) => {
                entry.embedding = Some(blob_to_vec(vector_bytes));
                Ok(())
            }
            None => bail!("log entry {} not found", id),
        }
    }

    async fn get_log_entry(&self, id: EntryId) -> Result<Option<LogEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(index_of(id).and_then(|i| entries.get(i)).cloned())
    }

    async fn query_by_time_window(&self, since: DateTime<Utc>) -> Result<Vec<LogEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(newest_first(
            entries
                .iter()
                .filter(|e| e.timestamp >= since)
                .cloned()
                .collect(),
        ))
    }

    async fn query_by_template(
        &self,
        template_id: TemplateId,
        since: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(newest_first(
            entries
                .iter()
                .filter(|e| e.template_id == Some(template_id) && e.timestamp >= since)
                .cloned()
                .collect(),
        ))
    }

    async fn catalog_get_or_create(&self, pattern: &str, example: &str) -> Result<TemplateId> {
        let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(&i) = catalog.by_pattern.get(pattern) {
            let template = &mut catalog.templates[i];
            template.frequency += 1;
            return Ok(template.id);
        }
        let i = catalog.templates.len();
        let id = i as TemplateId + 1;
        catalog.templates.push(Template {
            id,
            canonical_pattern: pattern.split_whitespace().map(str::to_string).collect(),
            frequency: 1,
            example_text: example.to_string(),
        });
        catalog.by_pattern.insert(pattern.to_string(), i);
        Ok(id)
    }

    async fn catalog_entries(&self) -> Result<Vec<Template>> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        Ok(catalog.templates.clone())
    }
}
