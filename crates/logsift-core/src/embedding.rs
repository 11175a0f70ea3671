//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that semantic enrichment and
//! semantic retrieval call into, plus pure helpers for vector
//! serialization and similarity.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the `logsift`
//! app crate. A pipeline or retriever built without a provider simply
//! skips the semantic path.

use anyhow::Result;
use async_trait::async_trait;

/// Maximum characters of a line handed to an embedding provider.
pub const EMBED_TEXT_LIMIT: usize = 512;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed one piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// The prefix of `text` that is sent for embedding.
pub fn embed_input(text: &str) -> &str {
    match text.char_indices().nth(EMBED_TEXT_LIMIT) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Encode a float vector as little-endian f32 bytes.
///
/// ```rust
/// use logsift_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes. Trailing bytes that do not form a
/// whole value are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity `dot / (|a| |b|)`, in `[-1.0, 1.0]`.
///
/// Returns `0.0` when the lengths differ, the vectors are empty, or
/// either norm is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_self_and_zero() {
        let v = vec![0.3, -1.2, 4.0, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&v, &[0.0; 4]), 0.0);
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_blob_ignores_partial_tail() {
        let mut blob = vec_to_blob(&[7.5]);
        blob.push(0xff);
        assert_eq!(blob_to_vec(&blob), vec![7.5]);
    }

    #[test]
    fn test_embed_input_truncates_on_char_boundary() {
        let short = "disk full";
        assert_eq!(embed_input(short), short);

        let long = "é".repeat(EMBED_TEXT_LIMIT + 10);
        let cut = embed_input(&long);
        assert_eq!(cut.chars().count(), EMBED_TEXT_LIMIT);
    }
}
