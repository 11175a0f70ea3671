//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/logsift.sqlite"
//!
//! [tree]
//! max_depth = 4
//! similarity_threshold = 0.5
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [[ingest.sources]]
//! type = "file"
//! path = "/var/log/app.log"
//! ```
//!
//! Every section except `[db]` is optional and falls back to defaults.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use logsift_core::pipeline::DEFAULT_MAX_LINE_BYTES;
use logsift_core::retrieve::RetrievalParams;
use logsift_core::tree::TreeConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub tree: TreeSettings,
    #[serde(default)]
    pub lexical: LexicalConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TreeSettings {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_children")]
    pub max_children: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_prefix_len")]
    pub prefix_len: usize,
    #[serde(default = "default_true")]
    pub parametrize_numeric: bool,
    #[serde(default)]
    pub max_groups_per_leaf: Option<usize>,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_children: default_max_children(),
            similarity_threshold: default_similarity_threshold(),
            prefix_len: default_prefix_len(),
            parametrize_numeric: true,
            max_groups_per_leaf: None,
        }
    }
}

impl TreeSettings {
    pub fn to_tree_config(&self) -> TreeConfig {
        TreeConfig {
            max_depth: self.max_depth,
            max_children: self.max_children,
            similarity_threshold: self.similarity_threshold,
            prefix_len: self.prefix_len,
            parametrize_numeric: self.parametrize_numeric,
            max_groups_per_leaf: self.max_groups_per_leaf,
        }
    }
}

fn default_max_depth() -> usize {
    4
}
fn default_max_children() -> usize {
    100
}
fn default_similarity_threshold() -> f64 {
    0.5
}
fn default_prefix_len() -> usize {
    8
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct LexicalConfig {
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            max_keywords: default_max_keywords(),
        }
    }
}

fn default_max_keywords() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_template_score")]
    pub template_score: f64,
    #[serde(default = "default_keyword_score")]
    pub keyword_score: f64,
    #[serde(default = "default_query_keywords")]
    pub query_keywords: usize,
    #[serde(default = "default_hits_per_keyword")]
    pub hits_per_keyword: usize,
    #[serde(default = "default_semantic_candidates")]
    pub semantic_candidates: usize,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_window_minutes")]
    pub default_window_minutes: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            template_score: default_template_score(),
            keyword_score: default_keyword_score(),
            query_keywords: default_query_keywords(),
            hits_per_keyword: default_hits_per_keyword(),
            semantic_candidates: default_semantic_candidates(),
            default_top_k: default_top_k(),
            default_window_minutes: default_window_minutes(),
        }
    }
}

impl RetrievalConfig {
    pub fn to_params(&self) -> RetrievalParams {
        RetrievalParams {
            template_score: self.template_score,
            keyword_score: self.keyword_score,
            query_keywords: self.query_keywords,
            hits_per_keyword: self.hits_per_keyword,
        }
    }
}

fn default_template_score() -> f64 {
    0.9
}
fn default_keyword_score() -> f64 {
    0.5
}
fn default_query_keywords() -> usize {
    3
}
fn default_hits_per_keyword() -> usize {
    5
}
fn default_semantic_candidates() -> usize {
    100
}
fn default_top_k() -> usize {
    10
}
fn default_window_minutes() -> i64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Embed each line before ingesting the next. When false, embeddings
    /// are computed on spawned tasks.
    #[serde(default = "default_true")]
    pub inline: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            inline: true,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Stored entries younger than this are replayed into the in-memory
    /// indexes on startup, and older ones are pruned from them while
    /// ingestion runs. Zero disables both.
    #[serde(default = "default_rebuild_window_minutes")]
    pub rebuild_window_minutes: i64,
    /// Seconds between index prunes during ingestion. Zero disables pruning.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
    /// Deferred embedding tasks allowed in flight before the consumer waits.
    #[serde(default = "default_max_pending_enrichments")]
    pub max_pending_enrichments: usize,
    /// Lines longer than this are rejected before storage.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            rebuild_window_minutes: default_rebuild_window_minutes(),
            prune_interval_secs: default_prune_interval_secs(),
            max_pending_enrichments: default_max_pending_enrichments(),
            max_line_bytes: default_max_line_bytes(),
            sources: Vec::new(),
        }
    }
}

fn default_channel_capacity() -> usize {
    1024
}
fn default_rebuild_window_minutes() -> i64 {
    24 * 60
}
fn default_prune_interval_secs() -> u64 {
    60
}
fn default_max_pending_enrichments() -> usize {
    64
}
fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    File {
        path: PathBuf,
        /// Read existing content instead of starting at the end.
        #[serde(default)]
        from_start: bool,
        #[serde(default = "default_poll_interval_ms")]
        poll_interval_ms: u64,
    },
    Journald {
        #[serde(default)]
        unit: Option<String>,
    },
    Syslog {
        #[serde(default)]
        fallback_path: Option<PathBuf>,
    },
}

impl SourceConfig {
    pub fn name(&self) -> String {
        match self {
            SourceConfig::File { path, .. } => format!("file:{}", path.display()),
            SourceConfig::Journald { unit: Some(u) } => format!("journald:{}", u),
            SourceConfig::Journald { unit: None } => "journald".to_string(),
            SourceConfig::Syslog { .. } => "syslog".to_string(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Upper bound for every window setting, about a century.
pub const MAX_WINDOW_MINUTES: i64 = 100 * 366 * 24 * 60;

fn validate(config: &Config) -> Result<()> {
    let tree = &config.tree;
    if tree.max_depth == 0 {
        bail!("tree.max_depth must be > 0");
    }
    if tree.max_children == 0 {
        bail!("tree.max_children must be > 0");
    }
    if !(0.0..=1.0).contains(&tree.similarity_threshold) {
        bail!("tree.similarity_threshold must be in [0.0, 1.0]");
    }
    if tree.prefix_len == 0 {
        bail!("tree.prefix_len must be > 0");
    }
    if tree.max_groups_per_leaf == Some(0) {
        bail!("tree.max_groups_per_leaf must be > 0 when set");
    }

    if config.lexical.max_keywords == 0 {
        bail!("lexical.max_keywords must be > 0");
    }

    let r = &config.retrieval;
    for (name, score) in [
        ("retrieval.template_score", r.template_score),
        ("retrieval.keyword_score", r.keyword_score),
    ] {
        if !(0.0..=1.0).contains(&score) {
            bail!("{} must be in [0.0, 1.0]", name);
        }
    }
    if r.default_top_k == 0 {
        bail!("retrieval.default_top_k must be >= 1");
    }
    if r.semantic_candidates == 0 {
        bail!("retrieval.semantic_candidates must be >= 1");
    }
    if r.default_window_minutes <= 0 || r.default_window_minutes > MAX_WINDOW_MINUTES {
        bail!(
            "retrieval.default_window_minutes must be in 1..={}",
            MAX_WINDOW_MINUTES
        );
    }

    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if matches!(e.provider.as_str(), "openai" | "ollama") {
        if e.model.is_none() {
            bail!("embedding.model must be specified when provider is '{}'", e.provider);
        }
        if e.dims.is_none() || e.dims == Some(0) {
            bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
        }
    }

    if config.ingest.channel_capacity == 0 {
        bail!("ingest.channel_capacity must be > 0");
    }
    if config.ingest.max_line_bytes == 0 {
        bail!("ingest.max_line_bytes must be > 0");
    }
    if !(0..=MAX_WINDOW_MINUTES).contains(&config.ingest.rebuild_window_minutes) {
        bail!(
            "ingest.rebuild_window_minutes must be in 0..={}",
            MAX_WINDOW_MINUTES
        );
    }
    if config.ingest.max_pending_enrichments == 0 {
        bail!("ingest.max_pending_enrichments must be > 0");
    }
    for source in &config.ingest.sources {
        if let SourceConfig::File {
            poll_interval_ms: 0,
            ..
        } = source
        {
            bail!("ingest.sources: poll_interval_ms must be > 0 for {}", source.name());
        }
    }

    Ok(())
}
