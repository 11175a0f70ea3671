//! Template catalog: pattern string to stable id and frequency.
//!
//! The catalog fronts the storage collaborator's
//! [`catalog_get_or_create`](crate::store::Store::catalog_get_or_create).
//! The store owns id assignment and the durable frequency column; the
//! in-memory map caches ids and keeps an atomic frequency per template
//! so [`stats`](TemplateCatalog::stats) never touches storage.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{SiftError, SiftResult};
use crate::models::{Template, TemplateId};
use crate::store::Store;

#[derive(Debug)]
struct CatalogEntry {
    id: TemplateId,
    pattern: String,
    example: String,
    frequency: AtomicU64,
}

impl CatalogEntry {
    fn to_template(&self) -> Template {
        Template {
            id: self.id,
            canonical_pattern: self.pattern.split_whitespace().map(str::to_string).collect(),
            frequency: self.frequency.load(Ordering::Relaxed),
            example_text: self.example.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub template_count: usize,
    pub total_frequency: u64,
}

pub struct TemplateCatalog {
    store: Arc<dyn Store>,
    entries: RwLock<HashMap<String, Arc<CatalogEntry>>>,
}

impl TemplateCatalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Build a catalog pre-loaded with every template the store knows.
    pub async fn warm(store: Arc<dyn Store>) -> SiftResult<Self> {
        let templates = store
            .catalog_entries()
            .await
            .map_err(|e| SiftError::storage("catalog_entries", e))?;
        let catalog = Self::new(store);
        {
            let mut entries = catalog.write();
            for t in templates {
                let pattern = t.pattern_string();
                entries.insert(
                    pattern.clone(),
                    Arc::new(CatalogEntry {
                        id: t.id,
                        pattern,
                        example: t.example_text,
                        frequency: AtomicU64::new(t.frequency),
                    }),
                );
            }
        }
        tracing::debug!(templates = catalog.len(), "template catalog warmed");
        Ok(catalog)
    }

    /// Resolve `pattern` to its id, incrementing its frequency.
    ///
    /// An unknown pattern must reach the store to get an id, so a store
    /// failure there is returned. For a known pattern the id is already
    /// cached; a failed frequency write is logged and the id returned.
    pub async fn get_or_create(&self, pattern: &str, example: &str) -> SiftResult<TemplateId> {
        let known = self.read().get(pattern).cloned();

        if let Some(entry) = known {
            entry.frequency.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.store.catalog_get_or_create(pattern, example).await {
                tracing::warn!(
                    template_id = entry.id,
                    error = %e,
                    "template frequency not persisted"
                );
            }
            return Ok(entry.id);
        }

        let id = self
            .store
            .catalog_get_or_create(pattern, example)
            .await
            .map_err(|e| SiftError::storage("catalog_get_or_create", e))?;

        // A concurrent caller may have inserted the same pattern meanwhile.
        let entry = self
            .write()
            .entry(pattern.to_string())
            .or_insert_with(|| {
                Arc::new(CatalogEntry {
                    id,
                    pattern: pattern.to_string(),
                    example: example.to_string(),
                    frequency: AtomicU64::new(0),
                })
            })
            .clone();
        entry.frequency.fetch_add(1, Ordering::Relaxed);
        Ok(entry.id)
    }

    pub fn get(&self, id: TemplateId) -> Option<Template> {
        self.read()
            .values()
            .find(|e| e.id == id)
            .map(|e| e.to_template())
    }

    pub fn id_of(&self, pattern: &str) -> Option<TemplateId> {
        self.read().get(pattern).map(|e| e.id)
    }

    /// Every cached template, most frequent first.
    pub fn templates(&self) -> Vec<Template> {
        let mut out: Vec<Template> = self.read().values().map(|e| e.to_template()).collect();
        out.sort_by(|a, b| b.frequency.cmp(&a.frequency).then(a.id.cmp(&b.id)));
        out
    }

    pub fn stats(&self) -> CatalogStats {
        let entries = self.read();
        CatalogStats {
            template_count: entries.len(),
            total_frequency: entries
                .values()
                .map(|e| e.frequency.load(Ordering::Relaxed))
                .sum(),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<CatalogEntry>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<CatalogEntry>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
