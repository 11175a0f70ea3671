//! Core data models used throughout logsift.
//!
//! These types represent the log entries, templates, and retrieval
//! results that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

/// Storage-assigned identifier of a log entry.
pub type EntryId = i64;

/// Catalog-assigned identifier of a template.
pub type TemplateId = i64;

/// A single ingested log line.
///
/// Immutable once stored, except that a template id and an embedding
/// may be attached after enrichment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: EntryId,
    pub timestamp: DateTime<Utc>,
    pub raw_text: String,
    pub normalized_tokens: Vec<String>,
    pub template_id: Option<TemplateId>,
    /// Set at ingestion when the line carries a severity marker.
    pub is_anomaly: bool,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
}

/// A structural pattern shared by one or more log lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    pub id: TemplateId,
    pub canonical_pattern: Vec<String>,
    pub frequency: u64,
    pub example_text: String,
}

impl Template {
    /// The pattern as a single string, the template's identity.
    pub fn pattern_string(&self) -> String {
        self.canonical_pattern.join(" ")
    }
}

/// Which retrieval path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMethod {
    Template,
    Semantic,
    Keyword,
}

impl RetrievalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::Template => "template",
            RetrievalMethod::Semantic => "semantic",
            RetrievalMethod::Keyword => "keyword",
        }
    }
}

impl fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One ranked hit of a retrieval request. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub log_entry_id: EntryId,
    /// Relevance score in `[0.0, 1.0]`.
    pub score: f64,
    pub method: RetrievalMethod,
    /// Timestamp of the entry, used for the recency tie-break.
    pub timestamp: DateTime<Utc>,
}

/// Inclusive time range bounding every index scan. `until: None` means
/// open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// Everything from `since` onwards.
    pub fn since(since: DateTime<Utc>) -> Self {
        Self { since, until: None }
    }

    /// The trailing `span` ending now. A span reaching past the
    /// earliest representable time starts there instead.
    pub fn last(span: Duration) -> Self {
        let since = Utc::now()
            .checked_sub_signed(span)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::since(since)
    }

    pub fn between(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since,
            until: Some(until),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.since && self.until.map(|u| ts <= u).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_contains() {
        let now = Utc::now();
        let w = TimeWindow::between(now - Duration::hours(1), now);
        assert!(w.contains(now - Duration::minutes(30)));
        assert!(w.contains(now));
        assert!(!w.contains(now - Duration::hours(2)));
        assert!(!w.contains(now + Duration::seconds(1)));
    }

    #[test]
    fn test_open_window_has_no_upper_bound() {
        let now = Utc::now();
        let w = TimeWindow::since(now - Duration::hours(1));
        assert!(w.contains(now + Duration::days(10)));
    }

    #[test]
    fn test_last_saturates_on_huge_span() {
        let w = TimeWindow::last(Duration::minutes(i64::MAX / 60_000 - 1));
        assert_eq!(w.since, DateTime::<Utc>::MIN_UTC);
        assert!(w.contains(Utc::now()));
    }

    #[test]
    fn test_method_labels() {
        assert_eq!(RetrievalMethod::Template.to_string(), "template");
        assert_eq!(RetrievalMethod::Semantic.as_str(), "semantic");
        assert_eq!(RetrievalMethod::Keyword.as_str(), "keyword");
    }
}
