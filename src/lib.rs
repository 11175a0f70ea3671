//! # logsift
//!
//! Online log template mining and retrieval over recent logs.
//!
//! Lines are tailed from files, journald or syslog, stored in SQLite,
//! clustered into templates by a Drain-style parse tree, indexed by
//! keyword and (optionally) by embedding. Given a query line, logsift
//! returns related recent entries found by shared template, semantic
//! similarity or keyword overlap.
//!
//! The algorithms live in [`logsift_core`]; this crate supplies the
//! runtime around them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Sources    │──▶│   Pipeline   │──▶│    SQLite    │
//! │ file/journal │   │ tree+kw+vec  │   │ logs+templ.  │
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                           ▼                  │
//!                    ┌──────────────┐          │
//!                    │  Retriever   │◀─────────┘
//!                    └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! # async fn run() -> anyhow::Result<()> {
//! use logsift::config::load_config;
//! use logsift::runtime::LogSift;
//!
//! let config = load_config(std::path::Path::new("config/logsift.toml"))?;
//! logsift::logging::init(&config.logging.filter)?;
//! let sift = LogSift::open(config).await?;
//!
//! let ingested = sift.ingest_line("disk 91% full on /dev/sda1", chrono::Utc::now()).await?;
//! let source = ingested.map(|i| i.entry.id);
//! let results = sift.retrieve_default("disk full", source).await;
//! for hit in sift.hydrate(&results).await {
//!     println!("{:.2} {} {}", hit.result.score, hit.result.method, hit.raw_text);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`embedding`] | OpenAI, Ollama and local embedding providers |
//! | [`sources`] | File, journald and syslog line sources |
//! | [`ingest`] | Source tasks feeding the ingestion pipeline |
//! | [`runtime`] | [`LogSift`](runtime::LogSift), the assembled instance |
//! | [`logging`] | `tracing` subscriber setup |

pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod runtime;
pub mod sources;
pub mod sqlite_store;

pub use logsift_core;
