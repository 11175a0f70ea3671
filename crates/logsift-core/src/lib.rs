//! # logsift core
//!
//! Runtime-agnostic logic for logsift: the log data model, the token
//! normalizer, the online template tree and its catalog, the lexical
//! and semantic indexes, the ingestion pipeline, and the fused
//! retrieval orchestrator.
//!
//! This crate contains no tokio, sqlx, filesystem or network code.
//! Storage and embedding generation are collaborators reached through
//! the [`store::Store`] and [`embedding::EmbeddingProvider`] traits.
//!
//! ## Data Flow
//!
//! ```text
//!  raw line ──▶ tokenize ──▶ Store::append_log_entry ──▶ entry id
//!                  │                                       │
//!                  ├──▶ TemplateMiner (tree + catalog) ─────┤ template id
//!                  ├──▶ LexicalIndex ───────────────────────┤
//!                  └──▶ EmbeddingProvider ──▶ VectorIndex ──┘
//!
//!  query ──▶ Retriever ──▶ template │ semantic │ keyword ──▶ merged top-k
//! ```

pub mod catalog;
pub mod embedding;
pub mod error;
pub mod lexical;
pub mod miner;
pub mod models;
pub mod pipeline;
pub mod retrieve;
pub mod semantic;
pub mod store;
pub mod tokenize;
pub mod tree;
