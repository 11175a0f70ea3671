//! Error taxonomy for the ingestion and indexing core.
//!
//! None of these are fatal to the process. Callers log them and keep
//! ingesting; the worst outcome is degraded recall.

use thiserror::Error;

use crate::models::{EntryId, TemplateId};

#[derive(Debug, Error)]
pub enum SiftError {
    /// Malformed or empty line. Skipped.
    #[error("input rejected: {0}")]
    Input(String),

    /// A storage collaborator call failed.
    #[error("storage operation '{op}' failed: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Template tree and catalog (or store) disagree about an entry.
    /// Tolerated as eventual consistency.
    #[error("index inconsistency for entry {entry_id}: {detail}")]
    IndexInconsistency {
        entry_id: EntryId,
        template_id: Option<TemplateId>,
        detail: String,
    },
}

impl SiftError {
    pub fn storage(op: &'static str, source: anyhow::Error) -> Self {
        SiftError::Storage { op, source }
    }
}

pub type SiftResult<T> = std::result::Result<T, SiftError>;
