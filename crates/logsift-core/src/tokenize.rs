//! Token normalization for template mining and keyword indexing.
//!
//! Two deliberately different normalizations live here:
//!
//! - [`normalize`] keeps the structure of a line and masks variable
//!   tokens (numbers, IPs, hex, paths) with placeholders. The template
//!   tree consumes this form.
//! - [`keywords`] lower-cases, keeps alphabetic words of three or more
//!   letters and drops stop words. The lexical index consumes this form.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

pub const NUM: &str = "<NUM>";
pub const IP: &str = "<IP>";
pub const HEX: &str = "<HEX>";
pub const PATH: &str = "<PATH>";
/// Wildcard token used by the template tree for overflow and parameter children.
pub const WILDCARD: &str = "<*>";

/// Default cap on keywords extracted per entry.
pub const DEFAULT_MAX_KEYWORDS: usize = 20;

static RE_IPV4: Lazy<Regex> = Lazy::new(|| {
    // Dotted quad with an optional port suffix.
    Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}(?::\d{1,5})?$").unwrap()
});

static RE_HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0[xX][0-9a-fA-F]+$").unwrap());

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-z]{3,}\b").unwrap());

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "with", "from", "that", "this", "was", "were", "are", "has",
        "have", "had", "not", "but", "into", "onto", "via", "been", "will", "can", "its",
        "our", "you", "your", "all", "any", "than", "then", "there", "their", "which",
        "while", "what", "when", "where", "who", "why", "how", "out", "off", "too",
    ]
    .into_iter()
    .collect()
});

/// Turn a raw line into its canonical token sequence.
///
/// Tokens are classified in priority order: all digits become `<NUM>`,
/// a dotted quad (optionally with `:port`) becomes `<IP>`, a `0x` hex
/// literal becomes `<HEX>`, anything containing a path separator
/// becomes `<PATH>`. Everything else is kept literally.
///
/// Never fails: empty input yields an empty sequence.
///
/// ```rust
/// use logsift_core::tokenize::normalize;
///
/// let tokens = normalize("read 512 bytes from 10.0.0.1 at /var/log/app.log");
/// assert_eq!(tokens, vec!["read", "<NUM>", "bytes", "from", "<IP>", "at", "<PATH>"]);
/// ```
pub fn normalize(raw_text: &str) -> Vec<String> {
    raw_text.split_whitespace().map(classify).collect()
}

fn classify(token: &str) -> String {
    if token.bytes().all(|b| b.is_ascii_digit()) {
        NUM.to_string()
    } else if RE_IPV4.is_match(token) {
        IP.to_string()
    } else if RE_HEX.is_match(token) {
        HEX.to_string()
    } else if token.contains('/') || token.contains('\\') {
        PATH.to_string()
    } else {
        token.to_string()
    }
}

/// Whether `token` is one of the four mask placeholders.
pub fn is_placeholder(token: &str) -> bool {
    matches!(token, NUM | IP | HEX | PATH)
}

/// Extract index keywords from a line, with the whitespace-token
/// position each keyword first appears at.
///
/// Keywords are alphabetic words of at least three letters, lower-cased,
/// with stop words removed and duplicates dropped. At most `cap`
/// keywords are returned.
pub fn keywords(text: &str, cap: usize) -> Vec<(String, usize)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (position, token) in text.split_whitespace().enumerate() {
        let lower = token.to_lowercase();
        for m in RE_WORD.find_iter(&lower) {
            if out.len() >= cap {
                return out;
            }
            let word = m.as_str();
            if STOP_WORDS.contains(word) || !seen.insert(word.to_string()) {
                continue;
            }
            out.push((word.to_string(), position));
        }
    }
    out
}

/// Severity markers that flag a line as an anomaly, upper-cased.
pub const ANOMALY_MARKERS: [&str; 6] = ["ERROR", "CRITICAL", "FAILED", "TIMEOUT", "FATAL", "WARNING"];

/// Whether the line carries an anomaly marker anywhere, ignoring case.
///
/// ```rust
/// use logsift_core::tokenize::is_anomalous;
///
/// assert!(is_anomalous("db: connection Timeout after 30s"));
/// assert!(!is_anomalous("user admin logged in"));
/// ```
pub fn is_anomalous(raw_text: &str) -> bool {
    let upper = raw_text.to_uppercase();
    ANOMALY_MARKERS.iter().any(|m| upper.contains(m))
}

/// Keywords of a free-text query, in order, without positions.
pub fn query_keywords(query: &str, cap: usize) -> Vec<String> {
    keywords(query, cap).into_iter().map(|(k, _)| k).collect()
}
